use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::BuildConfig;

/// Contents of `localrc`, read by `tb.sh` when creating the container.
pub fn render_localrc(config: &BuildConfig) -> String {
    format!(
        "MYUNAME={}\nPROJECT={}\nHOST_PREFIX={}/work\nHOST_MIRROR_DIR={}\n",
        config.myuname,
        config.project,
        config.stx_tools_dir().display(),
        config.mirror_path.display()
    )
}

/// Write `localrc` and `.dockerignore` into the tools checkout and copy the
/// user's `.gitconfig` into `toCOPY/`.
pub fn create_localrc(config: &BuildConfig, home: &Path) -> Result<()> {
    let tools = config.stx_tools_dir();
    super::require_dir(&tools, "clone_stx_tools")?;

    let localrc = tools.join("localrc");
    tracing::info!(path = %localrc.display(), "creating localrc file");
    fs::write(&localrc, render_localrc(config))
        .with_context(|| format!("writing '{}'", localrc.display()))?;

    let dockerignore = tools.join(".dockerignore");
    tracing::info!(path = %dockerignore.display(), "creating .dockerignore file");
    fs::write(&dockerignore, "work/*\n")
        .with_context(|| format!("writing '{}'", dockerignore.display()))?;

    let gitconfig = home.join(".gitconfig");
    let dest_dir = tools.join("toCOPY");
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("creating '{}'", dest_dir.display()))?;
    tracing::info!(from = %gitconfig.display(), "copying .gitconfig file");
    fs::copy(&gitconfig, dest_dir.join(".gitconfig")).with_context(|| {
        format!(
            "copying '{}' into '{}'",
            gitconfig.display(),
            dest_dir.display()
        )
    })?;
    Ok(())
}
