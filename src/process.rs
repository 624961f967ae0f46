//! Host-side process helpers.
//!
//! Used for everything that runs outside the sandbox: docker CLI calls,
//! `git`, `make`, `rsync`. Unlike sandboxed stage scripts, these report
//! failure through their exit status.

use anyhow::{bail, Context, Result};
use std::process::{Command, Output};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Fail early with an install hint when a host tool is missing.
pub fn ensure_exists(cmd: &str, package: &str) -> Result<()> {
    if command_exists(cmd) {
        return Ok(());
    }
    bail!("required host tool '{}' not found (install: {})", cmd, package)
}

/// Render a command line for log messages.
pub fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `cmd` to completion and require a zero exit status.
pub fn run_checked(cmd: &mut Command) -> Result<Output> {
    let line = describe(cmd);
    tracing::debug!(command = %line, "running host command");

    let output = cmd
        .output()
        .with_context(|| format!("launching '{}'", line))?;

    if output.status.success() {
        return Ok(output);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!(
        "'{}' failed ({}): {}\n{}",
        line,
        output.status,
        stdout.trim(),
        stderr.trim()
    )
}

/// Run `cmd` and report only whether it succeeded.
pub fn probe(cmd: &mut Command) -> bool {
    cmd.output().map(|o| o.status.success()).unwrap_or(false)
}
