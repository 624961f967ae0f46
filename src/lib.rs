//! Staged StarlingX ISO build orchestration.
//!
//! The build runs as a sequence of independently invoked stages. Each stage
//! submits a script to an isolated execution environment, then decides
//! PASS or FAIL from what the toolchain left on disk, since the toolchain's
//! exit status cannot be trusted. A failed stage leaves a sentinel file and
//! a chat notification behind; it is never reported as an error.
//!
//! # Architecture
//!
//! ```text
//! stx-builder (binary)
//!     │
//!     ├── config    BuildConfig: env + TOML, resolved once
//!     ├── setup     host-side preparation steps
//!     └── runner    StageRunner
//!           │
//!           ├── sandbox   ExecutionEnvironment (docker exec, timeout, cancel)
//!           ├── stages    BuildStage registry: scripts, logs, sentinels
//!           ├── verify    Verifier predicates over the work tree
//!           ├── sentinel  failure markers
//!           ├── notify    chat webhook
//!           └── publish   ISO naming and copy
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use stx_builder::{BuildConfig, BuildStage, DockerSandbox, SlackWebhook, StageRunner};
//!
//! let config = BuildConfig::from_process_env(None)?;
//! let sandbox = DockerSandbox::from_config(&config);
//! let notifier = SlackWebhook::new(config.webhook_url.clone(), &config.slack_channel, "");
//! let report = StageRunner::new(&config, &sandbox, &notifier).run(BuildStage::Std)?;
//! ```

pub mod config;
pub mod layout;
pub mod notify;
pub mod process;
pub mod publish;
pub mod runner;
pub mod sandbox;
pub mod sentinel;
pub mod setup;
pub mod stages;
pub mod verify;

pub use config::BuildConfig;
pub use layout::WorkLayout;
pub use notify::{Notification, Notifier, SlackWebhook};
pub use runner::{StageOutcome, StageReport, StageRunner};
pub use sandbox::{DockerSandbox, ExecutionEnvironment};
pub use sentinel::SentinelStore;
pub use stages::BuildStage;
pub use verify::{Verdict, Verifier};
