use anyhow::{Context, Result};
use stx_builder::sandbox::docker::remove_image;
use stx_builder::{BuildConfig, BuildStage, DockerSandbox, SentinelStore, WorkLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    RemoveContainer,
    RemoveImage,
    ClearSentinels,
}

pub(crate) fn run_action(config: &BuildConfig, action: Action) -> Result<()> {
    let result = match action {
        Action::RemoveContainer => DockerSandbox::from_config(config).remove_container().map(|_| ()),
        Action::RemoveImage => remove_image(&config.image_name()).map(|_| ()),
        Action::ClearSentinels => clear_sentinels(config),
    };
    result.with_context(|| format!("action {:?}", action))
}

fn clear_sentinels(config: &BuildConfig) -> Result<()> {
    let store = SentinelStore::new(WorkLayout::from_config(config));
    let mut cleared = 0;
    for &stage in BuildStage::ALL {
        if store.clear(stage)? {
            tracing::info!(stage = %stage, "removed {}", stage.sentinel_name());
            cleared += 1;
        }
    }
    tracing::info!(cleared, "sentinels cleared");
    Ok(())
}
