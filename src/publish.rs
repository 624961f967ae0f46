//! Publishing a finished ISO.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Date, OffsetDateTime};

/// `stx-<YYYY-MM-DD>-<build-number>-<branch>.iso`, with `/` in the branch
/// replaced by `-`.
pub fn published_iso_name(date: Date, build_number: &str, branch: &str) -> String {
    format!(
        "stx-{:04}-{:02}-{:02}-{}-{}.iso",
        date.year(),
        date.month() as u8,
        date.day(),
        build_number,
        branch.replace('/', "-")
    )
}

/// Today's date in local time, falling back to UTC when the local offset
/// cannot be determined.
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// Copy `iso` into `publish_dir` (created on demand) under `name`.
pub fn publish_iso(iso: &Path, publish_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(publish_dir)
        .with_context(|| format!("creating publish directory '{}'", publish_dir.display()))?;
    let dest = publish_dir.join(name);
    fs::copy(iso, &dest).with_context(|| {
        format!(
            "publishing ISO '{}' to '{}'",
            iso.display(),
            dest.display()
        )
    })?;
    Ok(dest)
}

/// Download link for a published ISO.
pub fn download_link(iso_url: &str, name: &str) -> String {
    format!("{}/{}", iso_url.trim_end_matches('/'), name)
}
