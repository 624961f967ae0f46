//! Docker-backed sandbox.
//!
//! The builder container is created by the `other_actions` setup step
//! (`tb.sh run`) and lives until an explicit `remove_container` action.
//! Nothing here guards against two pipeline runs sharing one container.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

use super::{supervise, ExecLimits, ExecutionEnvironment, RunOutput, SandboxError};
use crate::config::BuildConfig;
use crate::process::{probe, run_checked};

#[derive(Debug, Clone)]
pub struct DockerSandbox {
    container: String,
    user: String,
}

impl DockerSandbox {
    pub fn new(container: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            user: user.into(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(config.container_name(), &config.current_user)
    }

    /// Arguments passed to `docker` to run `command` inside the container.
    ///
    /// `script` allocates a pseudo-terminal so toolchain scripts that insist
    /// on a tty behave, and merges their output into stdout.
    pub fn exec_args(&self, command: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--interactive".to_string(),
            format!("--user={}", self.user),
            "-e".to_string(),
            format!("MYUNAME={}", self.user),
            self.container.clone(),
            "script".to_string(),
            "-q".to_string(),
            "-c".to_string(),
            command.to_string(),
            "/dev/null".to_string(),
        ]
    }

    /// Copy a host path into the user's home directory inside the container.
    pub fn copy_into_home(&self, source: &Path) -> Result<()> {
        let dest = format!("{}:/home/{}", self.container, self.user);
        run_checked(Command::new("docker").arg("cp").arg(source).arg(&dest))
            .with_context(|| format!("copying '{}' into {}", source.display(), dest))?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        probe(Command::new("docker").args(["container", "inspect", self.container.as_str()]))
    }

    /// Force-remove the container when it exists.
    pub fn remove_container(&self) -> Result<bool> {
        if !self.exists() {
            tracing::info!(container = %self.container, "no container to remove");
            return Ok(false);
        }
        tracing::info!(container = %self.container, "removing docker container");
        run_checked(Command::new("docker").args(["rm", "--force", self.container.as_str()]))
            .with_context(|| format!("removing container '{}'", self.container))?;
        Ok(true)
    }
}

/// Force-remove a builder image when it exists.
pub fn remove_image(image: &str) -> Result<bool> {
    let listed = run_checked(Command::new("docker").args(["images", "--quiet", image]))
        .with_context(|| format!("listing docker images matching '{}'", image))?;
    if String::from_utf8_lossy(&listed.stdout).trim().is_empty() {
        tracing::info!(image, "no image to remove");
        return Ok(false);
    }
    tracing::info!(image, "removing docker image");
    run_checked(Command::new("docker").args(["rmi", "--force", image]))
        .with_context(|| format!("removing image '{}'", image))?;
    Ok(true)
}

impl ExecutionEnvironment for DockerSandbox {
    fn name(&self) -> &str {
        &self.container
    }

    fn execute(&self, command: &str, limits: &ExecLimits) -> Result<RunOutput, SandboxError> {
        let mut cmd = Command::new("docker");
        cmd.args(self.exec_args(command));
        supervise(cmd, limits)
    }
}
