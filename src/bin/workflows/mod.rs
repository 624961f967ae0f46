mod actions;
mod build;

use anyhow::{Context, Result};
use stx_builder::setup::{copy_dependency_cache, run_setup_step, SetupStep};
use stx_builder::{BuildConfig, BuildStage};

pub(crate) use actions::{run_action, Action};
pub(crate) use build::run_stages;

/// Everything one invocation was asked to do.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub(crate) action: Option<Action>,
    pub(crate) setup: Option<SetupStep>,
    pub(crate) stages: Vec<BuildStage>,
    pub(crate) dependency_cache: bool,
}

impl Plan {
    pub(crate) fn is_empty(&self) -> bool {
        self.action.is_none() && self.setup.is_none() && self.stages.is_empty() && !self.dependency_cache
    }
}

/// Actions first, then the setup step, then build stages, then the cache copy.
pub(crate) fn run(config: &BuildConfig, plan: &Plan) -> Result<()> {
    tracing::info!(
        user = %config.current_user,
        branch = %config.branch,
        project = %config.project,
        "stx-builder starting"
    );

    if let Some(action) = plan.action {
        run_action(config, action)?;
    }
    if let Some(step) = plan.setup {
        run_setup_step(config, step)?;
    }
    if !plan.stages.is_empty() {
        run_stages(config, &plan.stages)?;
    }
    if plan.dependency_cache {
        copy_dependency_cache(config).context("copying dependency cache")?;
    }
    Ok(())
}
