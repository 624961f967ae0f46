//! Per-stage failure sentinels.
//!
//! A sentinel's existence means "this stage failed in its most recent run".
//! Downstream automation only tests for the file; the content is the
//! sentinel's own name. Writing is idempotent: a second failure overwrites
//! the same path.
//!
//! Sentinels are never removed on success. Clearing is a separate, explicit
//! step ([`SentinelStore::clear`]), opted into through configuration.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::layout::WorkLayout;
use crate::stages::BuildStage;

#[derive(Debug, Clone)]
pub struct SentinelStore {
    layout: WorkLayout,
}

impl SentinelStore {
    pub fn new(layout: WorkLayout) -> Self {
        Self { layout }
    }

    pub fn path(&self, stage: BuildStage) -> PathBuf {
        self.layout.sentinel(stage.sentinel_name())
    }

    pub fn exists(&self, stage: BuildStage) -> bool {
        self.path(stage).is_file()
    }

    pub fn write(&self, stage: BuildStage) -> Result<PathBuf> {
        let path = self.path(stage);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating sentinel directory '{}'", parent.display()))?;
        }
        fs::write(&path, stage.sentinel_name())
            .with_context(|| format!("writing sentinel '{}'", path.display()))?;
        Ok(path)
    }

    /// Remove the stage's sentinel. Returns whether one was present.
    pub fn clear(&self, stage: BuildStage) -> Result<bool> {
        let path = self.path(stage);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("removing sentinel '{}'", path.display()))
            }
        }
    }

    pub fn present(&self) -> Vec<BuildStage> {
        BuildStage::ALL
            .iter()
            .copied()
            .filter(|stage| self.exists(*stage))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> SentinelStore {
        SentinelStore::new(WorkLayout::new(temp.path(), "alice", "starlingx"))
    }

    #[test]
    fn test_write_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let first = store.write(BuildStage::Std).unwrap();
        let second = store.write(BuildStage::Std).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, temp.path().join("build_std_fail"));
        assert_eq!(fs::read_to_string(&first).unwrap(), "build_std_fail");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_clear_and_present() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.write(BuildStage::Rt).unwrap();
        store.write(BuildStage::Iso).unwrap();

        assert_eq!(store.present(), vec![BuildStage::Rt, BuildStage::Iso]);
        assert!(store.clear(BuildStage::Rt).unwrap());
        assert!(!store.clear(BuildStage::Rt).unwrap());
        assert_eq!(store.present(), vec![BuildStage::Iso]);
    }
}
