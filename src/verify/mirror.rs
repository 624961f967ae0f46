//! Mirror completeness check.
//!
//! `generate-cgcs-centos-repo.sh` reports every package it could not find
//! in the local mirror on a line starting with `Error`. Those lines are
//! collected into a missing-packages record, written only when non-empty.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::WorkLayout;

const ERROR_PREFIX: &str = "Error";

/// Outcome of a mirror check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPackages {
    pub lines: Vec<String>,
    /// Where the record was written, when there was anything to write.
    pub record: Option<PathBuf>,
}

impl MissingPackages {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub fn error_lines(log: &str) -> Vec<String> {
    log.lines()
        .filter(|line| line.starts_with(ERROR_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Scan `log_path` and write the missing-packages record to `record_path`
/// when any error line is present.
pub fn check_mirror_log(log_path: &Path, record_path: &Path) -> Result<MissingPackages> {
    let log = fs::read_to_string(log_path)
        .with_context(|| format!("reading mirror check log '{}'", log_path.display()))?;
    let lines = error_lines(&log);
    if lines.is_empty() {
        return Ok(MissingPackages {
            lines,
            record: None,
        });
    }

    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(record_path, body)
        .with_context(|| format!("writing missing packages '{}'", record_path.display()))?;

    Ok(MissingPackages {
        lines,
        record: Some(record_path.to_path_buf()),
    })
}

pub fn check_mirror_packages(layout: &WorkLayout) -> Result<MissingPackages> {
    let result = check_mirror_log(&layout.mirror_check_log(), &layout.missing_packages())?;
    match &result.record {
        Some(record) => tracing::error!(
            count = result.lines.len(),
            record = %record.display(),
            "packages missing from the mirror"
        ),
        None => tracing::info!("mirror check found no missing packages"),
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_error_lines_prefix_only() {
        let log = "Info: ok\nError: missing foo.rpm\n  Error: indented\nErrors: plural\nerror: lower\n";
        assert_eq!(
            error_lines(log),
            vec!["Error: missing foo.rpm", "Errors: plural"]
        );
    }

    #[test]
    fn test_record_written_when_errors_present() {
        let temp = TempDir::new().unwrap();
        let layout = WorkLayout::new(temp.path(), "alice", "starlingx");
        fs::write(
            layout.mirror_check_log(),
            "copying\nError: cannot find bash-4.2.rpm\ndone\n",
        )
        .unwrap();

        let result = check_mirror_packages(&layout).unwrap();

        assert_eq!(result.record.as_deref(), Some(layout.missing_packages().as_path()));
        assert_eq!(
            fs::read_to_string(layout.missing_packages()).unwrap(),
            "Error: cannot find bash-4.2.rpm\n"
        );
    }

    #[test]
    fn test_no_record_without_errors() {
        let temp = TempDir::new().unwrap();
        let layout = WorkLayout::new(temp.path(), "alice", "starlingx");
        fs::write(layout.mirror_check_log(), "all packages present\n").unwrap();

        let result = check_mirror_packages(&layout).unwrap();

        assert!(result.is_empty());
        assert!(result.record.is_none());
        assert!(!layout.missing_packages().exists());
    }

    #[test]
    fn test_missing_log_is_an_error() {
        let temp = TempDir::new().unwrap();
        let layout = WorkLayout::new(temp.path(), "alice", "starlingx");
        assert!(check_mirror_packages(&layout).is_err());
    }
}
