//! Build configuration.
//!
//! Every environment-derived value (user, branch, project, paths, CI
//! identifiers) is resolved once into a [`BuildConfig`] and passed down
//! explicitly. Components never read the process environment themselves.
//!
//! Precedence, lowest to highest: built-in defaults, the optional TOML file,
//! environment variables.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_PATH: &str = "/var/opt";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_PROJECT: &str = "starlingx";
pub const DEFAULT_SLACK_CHANNEL: &str = "#gerrit_code_review";
pub const DEFAULT_TOOLS_REPO_URL: &str = "https://git.starlingx.io/stx-tools";
pub const DEFAULT_MANIFEST_URL: &str = "https://git.starlingx.io/stx-manifest.git";

/// Variables consulted, in order, to find the invoking user.
const USER_VARS: &[&str] = &["LOGNAME", "USER", "LNAME", "USERNAME"];

/// Identifiers handed to us by the CI system that scheduled this invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiInfo {
    pub build_url: Option<String>,
    pub build_number: Option<String>,
    pub display_name: Option<String>,
    pub job_name: Option<String>,
}

impl CiInfo {
    /// Short label for notification footers, e.g. `iso #42`.
    pub fn label(&self) -> String {
        match (&self.job_name, &self.build_number, &self.display_name) {
            (Some(job), Some(number), _) => format!("{} #{}", job, number),
            (_, _, Some(display)) => display.clone(),
            (Some(job), None, None) => job.clone(),
            _ => String::new(),
        }
    }
}

/// Proxy settings injected into the builder Dockerfiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
    pub ftp: Option<String>,
    pub no_proxy: Option<String>,
    /// Value for `proxy=` in the container's `/etc/yum.conf`.
    pub yum: Option<String>,
}

/// Upper bound on how long each sandboxed command may run.
///
/// Package builds take hours, the remaining stages minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub checkout: Duration,
    pub srpms: Duration,
    pub std: Duration,
    pub rt: Duration,
    pub installer: Duration,
    pub iso: Duration,
    pub init_files: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        Self {
            checkout: Duration::from_secs(3 * HOUR),
            srpms: Duration::from_secs(2 * HOUR),
            std: Duration::from_secs(6 * HOUR),
            rt: Duration::from_secs(HOUR),
            installer: Duration::from_secs(30 * MINUTE),
            iso: Duration::from_secs(45 * MINUTE),
            init_files: Duration::from_secs(30 * MINUTE),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Account running this process; owns the sandbox.
    pub current_user: String,
    /// Designer name used inside the toolchain tree (`MYUNAME`).
    pub myuname: String,
    pub branch: String,
    pub project: String,
    pub base_path: PathBuf,
    pub mirror_path: PathBuf,
    /// rsync source for `update_mirror`, e.g. `user@host:/mirror/mirror/`.
    pub mirror_remote: Option<String>,
    pub tools_repo_url: String,
    pub manifest_url: String,
    pub slack_channel: String,
    pub webhook_url: Option<String>,
    /// Public base URL of the publish directory.
    pub iso_url: Option<String>,
    pub cores: usize,
    pub ci: CiInfo,
    pub proxy: Option<ProxyConfig>,
    pub timeouts: StageTimeouts,
    pub clear_sentinel_before_run: bool,
    pub gate_on_upstream_sentinel: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    base_path: Option<PathBuf>,
    branch: Option<String>,
    project: Option<String>,
    myuname: Option<String>,
    mirror_path: Option<PathBuf>,
    mirror_remote: Option<String>,
    tools_repo_url: Option<String>,
    manifest_url: Option<String>,
    slack_channel: Option<String>,
    webhook_url: Option<String>,
    iso_url: Option<String>,
    cores: Option<usize>,
    clear_sentinel_before_run: Option<bool>,
    gate_on_upstream_sentinel: Option<bool>,
    proxy: Option<ProxyConfig>,
    timeouts: Option<TimeoutsToml>,
}

/// Timeouts in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutsToml {
    checkout: Option<u64>,
    srpms: Option<u64>,
    std: Option<u64>,
    rt: Option<u64>,
    installer: Option<u64>,
    iso: Option<u64>,
    init_files: Option<u64>,
}

impl TimeoutsToml {
    fn apply(self, base: StageTimeouts) -> StageTimeouts {
        let pick = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_secs).unwrap_or(default)
        };
        StageTimeouts {
            checkout: pick(self.checkout, base.checkout),
            srpms: pick(self.srpms, base.srpms),
            std: pick(self.std, base.std),
            rt: pick(self.rt, base.rt),
            installer: pick(self.installer, base.installer),
            iso: pick(self.iso, base.iso),
            init_files: pick(self.init_files, base.init_files),
        }
    }
}

impl BuildConfig {
    /// Resolve configuration from the process environment and an optional
    /// TOML file.
    pub fn from_process_env(config_file: Option<&Path>) -> Result<Self> {
        Self::load(config_file, |key| std::env::var(key).ok())
    }

    /// Resolve configuration using `lookup` in place of the process
    /// environment. Empty values count as unset.
    pub fn load<F>(config_file: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let file = match config_file {
            Some(path) => read_config_file(path)?,
            None => ConfigToml::default(),
        };

        let current_user = USER_VARS
            .iter()
            .find_map(|key| env(*key))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "cannot determine invoking user; none of {} is set",
                    USER_VARS.join(", ")
                )
            })?;

        let base_path = file
            .base_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH));
        if !base_path.is_absolute() {
            bail!("base_path must be absolute, got '{}'", base_path.display());
        }

        let mirror_path = env("MIRROR_PATH")
            .map(PathBuf::from)
            .or(file.mirror_path)
            .unwrap_or_else(|| base_path.join("mirror/latest"));

        let cores = match file.cores {
            Some(0) => bail!("cores must be at least 1"),
            Some(n) => n,
            None => num_cpus::get(),
        };

        Ok(Self {
            myuname: env("MYUNAME")
                .or(file.myuname)
                .unwrap_or_else(|| current_user.clone()),
            current_user,
            branch: env("BRANCH")
                .or(file.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            project: env("PROJECT")
                .or(file.project)
                .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            base_path,
            mirror_path,
            mirror_remote: file.mirror_remote,
            tools_repo_url: file
                .tools_repo_url
                .unwrap_or_else(|| DEFAULT_TOOLS_REPO_URL.to_string()),
            manifest_url: file
                .manifest_url
                .unwrap_or_else(|| DEFAULT_MANIFEST_URL.to_string()),
            slack_channel: env("SLACK_CHANNEL")
                .or(file.slack_channel)
                .unwrap_or_else(|| DEFAULT_SLACK_CHANNEL.to_string()),
            webhook_url: env("SLACK_WEBHOOK_URL").or(file.webhook_url),
            iso_url: env("ISO_URL").or(file.iso_url),
            cores,
            ci: CiInfo {
                build_url: env("BUILD_URL"),
                build_number: env("BUILD_NUMBER"),
                display_name: env("BUILD_DISPLAY_NAME"),
                job_name: env("JOB_NAME"),
            },
            proxy: file.proxy,
            timeouts: file
                .timeouts
                .map(|t| t.apply(StageTimeouts::default()))
                .unwrap_or_default(),
            clear_sentinel_before_run: file.clear_sentinel_before_run.unwrap_or(false),
            gate_on_upstream_sentinel: file.gate_on_upstream_sentinel.unwrap_or(false),
        })
    }

    pub fn repositories_dir(&self) -> PathBuf {
        self.base_path.join("repositories")
    }

    /// Local checkout of the build tooling repository.
    pub fn stx_tools_dir(&self) -> PathBuf {
        self.repositories_dir().join("stx-tools")
    }

    /// Host side of the sandbox's `/localdisk`; root of all shared state.
    pub fn work_root(&self) -> PathBuf {
        self.stx_tools_dir().join("work/localdisk")
    }

    pub fn publish_dir(&self) -> PathBuf {
        self.base_path.join("html/ISO")
    }

    /// Optional dependency cache carried between builds.
    pub fn dependency_cache_dir(&self) -> PathBuf {
        self.base_path.join("cgcs-tis-repo")
    }

    pub fn container_name(&self) -> String {
        format!("{}-centos-builder", self.myuname)
    }

    pub fn image_name(&self) -> String {
        format!("local/{}-stx-builder:7.3", self.current_user)
    }

    /// Branch name safe for use in a file name.
    pub fn sanitized_branch(&self) -> String {
        self.branch.replace('/', "-")
    }
}

fn read_config_file(path: &Path) -> Result<ConfigToml> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading build config '{}'", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing build config '{}'", path.display()))
}
