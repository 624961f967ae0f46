use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use stx_builder::setup::SetupStep;
use stx_builder::{BuildConfig, BuildStage};
use tracing_subscriber::EnvFilter;

mod workflows;

use workflows::{Action, Plan};

/// Build a StarlingX ISO one stage at a time.
///
/// Each flag runs one stage; stages are not chained. A failed build stage
/// leaves `build_<stage>_fail` in the work directory and does not change
/// the exit status.
#[derive(Debug, Parser)]
#[command(name = "stx-builder", version)]
struct Cli {
    /// TOML file with build settings; environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log at debug level, including captured stage output.
    #[arg(short, long)]
    verbose: bool,

    /// Maintenance action on the build environment.
    #[arg(long, value_enum)]
    action: Option<ActionArg>,

    /// Setup step to run.
    #[arg(long, value_enum)]
    setup_build: Option<SetupArg>,

    #[arg(long)]
    build_srpms: bool,

    #[arg(long)]
    build_std: bool,

    #[arg(long)]
    build_rt: bool,

    #[arg(long)]
    build_installer: bool,

    #[arg(long)]
    build_iso: bool,

    #[arg(long)]
    build_init_files: bool,

    /// Copy the dependency cache out of the work tree for the next build.
    #[arg(long)]
    cgcs_tis_repo: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    #[value(alias = "remove_container")]
    RemoveContainer,
    #[value(alias = "remove_image")]
    RemoveImage,
    #[value(alias = "clear_sentinels")]
    ClearSentinels,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SetupArg {
    #[value(alias = "update_mirror")]
    UpdateMirror,
    #[value(alias = "common_setup")]
    CommonSetup,
    #[value(alias = "clone_stx_tools")]
    CloneStxTools,
    #[value(alias = "create_localrc")]
    CreateLocalrc,
    #[value(alias = "create_containers")]
    CreateContainers,
    #[value(alias = "other_actions")]
    OtherActions,
    #[value(alias = "check_mirror_packages")]
    CheckMirrorPackages,
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::RemoveContainer => Action::RemoveContainer,
            ActionArg::RemoveImage => Action::RemoveImage,
            ActionArg::ClearSentinels => Action::ClearSentinels,
        }
    }
}

impl From<SetupArg> for SetupStep {
    fn from(arg: SetupArg) -> Self {
        match arg {
            SetupArg::UpdateMirror => SetupStep::UpdateMirror,
            SetupArg::CommonSetup => SetupStep::CommonSetup,
            SetupArg::CloneStxTools => SetupStep::CloneStxTools,
            SetupArg::CreateLocalrc => SetupStep::CreateLocalrc,
            SetupArg::CreateContainers => SetupStep::CreateContainers,
            SetupArg::OtherActions => SetupStep::OtherActions,
            SetupArg::CheckMirrorPackages => SetupStep::CheckMirrorPackages,
        }
    }
}

impl Cli {
    fn plan(&self) -> Plan {
        let selected = [
            (self.build_srpms, BuildStage::Srpms),
            (self.build_std, BuildStage::Std),
            (self.build_rt, BuildStage::Rt),
            (self.build_installer, BuildStage::Installer),
            (self.build_iso, BuildStage::Iso),
            (self.build_init_files, BuildStage::InitFiles),
        ];
        Plan {
            action: self.action.map(Action::from),
            setup: self.setup_build.map(SetupStep::from),
            stages: selected
                .into_iter()
                .filter_map(|(on, stage)| on.then_some(stage))
                .collect(),
            dependency_cache: self.cgcs_tis_repo,
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let plan = cli.plan();
    if plan.is_empty() {
        tracing::warn!("nothing to do; pass --action, --setup-build or a --build-* flag");
        return Ok(());
    }

    let config = BuildConfig::from_process_env(cli.config.as_deref())?;
    workflows::run(&config, &plan)
}
