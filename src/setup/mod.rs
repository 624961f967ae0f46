//! Build environment preparation.
//!
//! These steps run on the host, before and around the sandbox. They report
//! failure through ordinary errors; only the verified build stages use the
//! sentinel protocol.

pub mod localrc;
pub mod proxies;

pub use localrc::create_localrc;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::BuildConfig;
use crate::layout::WorkLayout;
use crate::process::{ensure_exists, run_checked};
use crate::sandbox::{DockerSandbox, ExecLimits, ExecutionEnvironment, RunOutput};
use crate::stages::{checkout_script, CheckoutParams};
use crate::verify::mirror::{check_mirror_packages, MissingPackages};

/// Installer images copied out of the mirror, with their published names.
const INSTALLER_IMAGES: &[(&str, &str)] = &[
    ("images/pxeboot/initrd.img", "initrd.img-stx-0.2"),
    ("images/pxeboot/vmlinuz", "vmlinuz-stx-0.2"),
    ("LiveOS/squashfs.img", "squashfs.img-stx-0.2"),
];

/// Setup step selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    UpdateMirror,
    CommonSetup,
    CloneStxTools,
    CreateLocalrc,
    CreateContainers,
    OtherActions,
    CheckMirrorPackages,
}

/// Dispatch one setup step.
pub fn run_setup_step(config: &BuildConfig, step: SetupStep) -> Result<()> {
    tracing::info!(step = ?step, "running setup step");
    let result = match step {
        SetupStep::UpdateMirror => update_mirror(config),
        SetupStep::CommonSetup => common_setup(config),
        SetupStep::CloneStxTools => clone_stx_tools(config),
        SetupStep::CreateLocalrc => create_localrc(config, &home_dir()?),
        SetupStep::CreateContainers => create_containers(config),
        SetupStep::OtherActions => {
            other_actions(config, &DockerSandbox::from_config(config)).map(|_| ())
        }
        SetupStep::CheckMirrorPackages => {
            check_mirror_packages(&WorkLayout::from_config(config)).map(|_: MissingPackages| ())
        }
    };
    result.with_context(|| format!("setup step {:?}", step))
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))
}

/// Refresh the local package mirror from the configured remote.
pub fn update_mirror(config: &BuildConfig) -> Result<()> {
    let remote = config
        .mirror_remote
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("mirror_remote is not configured"))?;
    ensure_exists("rsync", "rsync")?;

    let pike = config.mirror_path.join("CentOS/pike");
    let installer = config.mirror_path.join("CentOS/tis-installer");
    for dir in [&pike, &installer] {
        fs::create_dir_all(dir).with_context(|| format!("creating '{}'", dir.display()))?;
    }

    let key = home_dir()?.join(".ssh/id_rsa");
    let ssh = format!(
        "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
        key.display()
    );
    tracing::info!(remote, dest = %pike.display(), "syncing mirror");
    run_checked(
        Command::new("rsync")
            .args(["-e", ssh.as_str(), "-avF", remote])
            .arg(&pike),
    )?;

    copy_installer_images(&pike.join("Binary"), &installer)
}

fn copy_installer_images(binary: &Path, installer: &Path) -> Result<()> {
    for (source, name) in INSTALLER_IMAGES {
        let from = binary.join(source);
        let to = installer.join(name);
        fs::copy(&from, &to)
            .with_context(|| format!("copying '{}' to '{}'", from.display(), to.display()))?;
    }
    Ok(())
}

pub fn common_setup(config: &BuildConfig) -> Result<()> {
    let repositories = config.repositories_dir();
    fs::create_dir_all(&repositories)
        .with_context(|| format!("creating '{}'", repositories.display()))
}

/// Fresh clone of the tools repository at the configured branch.
pub fn clone_stx_tools(config: &BuildConfig) -> Result<()> {
    ensure_exists("git", "git")?;
    let dest = config.stx_tools_dir();
    if dest.exists() {
        tracing::info!(path = %dest.display(), "removing stx-tools repository");
        fs::remove_dir_all(&dest)
            .with_context(|| format!("removing '{}'", dest.display()))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating '{}'", parent.display()))?;
    }

    tracing::info!(url = %config.tools_repo_url, branch = %config.branch, "cloning stx-tools repository");
    run_checked(
        Command::new("git")
            .args([
                "clone",
                "--branch",
                config.branch.as_str(),
                config.tools_repo_url.as_str(),
            ])
            .arg(&dest),
    )?;
    Ok(())
}

/// Apply proxies to every `Dockerfile*` in the tools checkout and build the
/// base and builder images.
pub fn create_containers(config: &BuildConfig) -> Result<()> {
    ensure_exists("make", "make")?;
    let tools = config.stx_tools_dir();
    require_dir(&tools, "clone_stx_tools")?;

    if let Some(proxy) = &config.proxy {
        for dockerfile in dockerfiles(&tools)? {
            let content = fs::read_to_string(&dockerfile)
                .with_context(|| format!("reading '{}'", dockerfile.display()))?;
            if let Some(updated) = proxies::with_proxies(&content, proxy) {
                tracing::info!(file = %dockerfile.display(), "setting proxies");
                fs::write(&dockerfile, updated)
                    .with_context(|| format!("writing '{}'", dockerfile.display()))?;
            }
        }
    }

    for target in ["base-build", "build"] {
        tracing::info!("make {}", target);
        run_checked(Command::new("make").arg("-C").arg(&tools).arg(target))?;
    }
    Ok(())
}

fn dockerfiles(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading '{}'", dir.display()))? {
        let entry = entry.with_context(|| format!("iterating '{}'", dir.display()))?;
        let is_dockerfile = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("Dockerfile"));
        if is_dockerfile && entry.path().is_file() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Start the builder container, seed it, and check out the sources inside it.
pub fn other_actions(config: &BuildConfig, sandbox: &DockerSandbox) -> Result<RunOutput> {
    let tools = config.stx_tools_dir();
    require_dir(&tools, "clone_stx_tools")?;
    run_checked(
        Command::new("bash")
            .args(["tb.sh", "run"])
            .current_dir(&tools),
    )
    .context("launching builder container")?;

    sandbox.copy_into_home(&tools.join("buildrc"))?;
    sandbox.copy_into_home(&tools.join("localrc"))?;
    let cache = config.dependency_cache_dir();
    if cache.is_dir() {
        sandbox.copy_into_home(&cache)?;
    }

    let script = checkout_script(&CheckoutParams {
        user: &config.current_user,
        branch: &config.branch,
        manifest_url: &config.manifest_url,
        cores: config.cores,
    });
    tracing::info!(sandbox = sandbox.name(), "checking out sources");
    let output = sandbox
        .execute(&script, &ExecLimits::with_timeout(config.timeouts.checkout))
        .context("running source checkout in sandbox")?;
    for line in output.stdout.lines() {
        tracing::debug!(step = "checkout", "{}", line);
    }
    Ok(output)
}

/// Copy the dependency cache left by a finished build back to the base
/// path, so the next `other_actions` can seed the container with it.
///
/// Returns the destination, or `None` when there was no cache to copy.
pub fn copy_dependency_cache(config: &BuildConfig) -> Result<Option<PathBuf>> {
    let source = WorkLayout::from_config(config).dependency_cache();
    if !source.is_dir() {
        tracing::info!(path = %source.display(), "no dependency cache to copy");
        return Ok(None);
    }
    let dest = config.dependency_cache_dir();
    tracing::info!(from = %source.display(), to = %dest.display(), "copying dependency cache");
    copy_dir_recursive(&source, &dest)?;
    Ok(Some(dest))
}

/// Recursively copy a directory, preserving symlinks.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("creating directory '{}'", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("reading directory '{}'", src.display()))? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("creating symlink '{}'", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("copying '{}'", src_path.display()))?;
        }
    }
    Ok(())
}

/// Fail when `path` is missing, naming the step that creates it.
pub fn require_dir(path: &Path, created_by: &str) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    bail!("'{}' not found; run {} first", path.display(), created_by)
}
