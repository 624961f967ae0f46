//! Stage verification predicates.
//!
//! The toolchain's exit status is not trustworthy, so each stage is judged
//! from what it leaves on disk. A [`Verifier`] is a pure function from the
//! current filesystem state to a [`Verdict`]; it never runs anything and
//! can be exercised against synthetic directory fixtures.

pub mod mirror;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: String },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verifier {
    /// Fails when any entry directly under `dir` has a non-zero size.
    NonEmptyEntry(PathBuf),
    /// Fails when an entry called `name` exists anywhere below `tree`.
    ///
    /// A missing `tree` is not a failure: this is an existence search,
    /// not a check that the toolchain produced any results.
    NamedUnder { tree: PathBuf, name: &'static str },
    /// Fails when `path` is not a regular file.
    FileExists(PathBuf),
    /// Fails when any of `names` is not a regular file in `dir`.
    AllFilesExist {
        dir: PathBuf,
        names: &'static [&'static str],
    },
}

impl Verifier {
    pub fn check(&self) -> Result<Verdict> {
        match self {
            Verifier::NonEmptyEntry(dir) => non_empty_entries(dir).map(|found| match found.first() {
                None => Verdict::Pass,
                Some(first) => Verdict::Fail {
                    reason: format!(
                        "{} non-empty entries under '{}' (first: '{}')",
                        found.len(),
                        dir.display(),
                        first.display()
                    ),
                },
            }),
            Verifier::NamedUnder { tree, name } => {
                let found = find_named(tree, name)?;
                Ok(match found.first() {
                    None => Verdict::Pass,
                    Some(first) => Verdict::Fail {
                        reason: format!(
                            "{} '{}' markers under '{}' (first: '{}')",
                            found.len(),
                            name,
                            tree.display(),
                            first.display()
                        ),
                    },
                })
            }
            Verifier::FileExists(path) => Ok(if path.is_file() {
                Verdict::Pass
            } else {
                Verdict::Fail {
                    reason: format!("expected artifact missing: '{}'", path.display()),
                }
            }),
            Verifier::AllFilesExist { dir, names } => {
                let missing = missing_files(dir, names);
                Ok(if missing.is_empty() {
                    Verdict::Pass
                } else {
                    Verdict::Fail {
                        reason: format!(
                            "missing from '{}': {}",
                            dir.display(),
                            missing.join(", ")
                        ),
                    }
                })
            }
        }
    }
}

/// Entries directly under `dir` whose size is non-zero.
///
/// Sizes are taken through symlinks. A missing `dir` yields nothing.
pub fn non_empty_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("reading directory '{}'", dir.display()))?
    {
        let entry = entry.with_context(|| format!("iterating directory '{}'", dir.display()))?;
        let path = entry.path();
        let size = fs::metadata(&path)
            .with_context(|| format!("reading metadata '{}'", path.display()))?
            .len();
        if size > 0 {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Every entry named `name` below `tree`, files and directories alike.
pub fn find_named(tree: &Path, name: &str) -> Result<Vec<PathBuf>> {
    if !tree.exists() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(tree).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking results tree '{}'", tree.display()))?;
        if entry.file_name() == name {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

pub fn missing_files(dir: &Path, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| !dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::INIT_FILES;
    use tempfile::TempDir;

    fn fail_verifier(tree: &Path) -> Verifier {
        Verifier::NamedUnder {
            tree: tree.to_path_buf(),
            name: "fail",
        }
    }

    #[test]
    fn test_non_empty_entry_pass_and_fail() {
        let temp = TempDir::new().unwrap();
        let tmp = temp.path().join("std/tmp");
        fs::create_dir_all(&tmp).unwrap();
        fs::write(tmp.join("empty.log"), "").unwrap();

        let verifier = Verifier::NonEmptyEntry(tmp.clone());
        assert_eq!(verifier.check().unwrap(), Verdict::Pass);

        fs::write(tmp.join("pkg.err"), "rpmbuild failed").unwrap();
        match verifier.check().unwrap() {
            Verdict::Fail { reason } => assert!(reason.contains("pkg.err")),
            Verdict::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn test_non_empty_entry_missing_dir_passes() {
        let temp = TempDir::new().unwrap();
        let verifier = Verifier::NonEmptyEntry(temp.path().join("absent"));
        assert!(verifier.check().unwrap().is_pass());
    }

    #[test]
    fn test_named_under_finds_nested_marker() {
        let temp = TempDir::new().unwrap();
        let results = temp.path().join("results");
        fs::create_dir_all(results.join("pkgA")).unwrap();
        fs::create_dir_all(results.join("pkgB")).unwrap();
        fs::write(results.join("pkgB/build.log"), "ok").unwrap();

        assert!(fail_verifier(&results).check().unwrap().is_pass());

        fs::write(results.join("pkgA/fail"), "").unwrap();
        assert!(!fail_verifier(&results).check().unwrap().is_pass());
        assert_eq!(
            find_named(&results, "fail").unwrap(),
            vec![results.join("pkgA/fail")]
        );
    }

    #[test]
    fn test_named_under_matches_directories_too() {
        let temp = TempDir::new().unwrap();
        let results = temp.path().join("results");
        fs::create_dir_all(results.join("deep/er/fail")).unwrap();

        assert!(!fail_verifier(&results).check().unwrap().is_pass());
    }

    #[test]
    fn test_named_under_absent_tree_passes() {
        let temp = TempDir::new().unwrap();
        assert!(fail_verifier(&temp.path().join("results"))
            .check()
            .unwrap()
            .is_pass());
    }

    #[test]
    fn test_file_exists() {
        let temp = TempDir::new().unwrap();
        let iso = temp.path().join("bootimage.iso");
        let verifier = Verifier::FileExists(iso.clone());

        assert!(!verifier.check().unwrap().is_pass());
        fs::write(&iso, "iso").unwrap();
        assert!(verifier.check().unwrap().is_pass());
    }

    #[test]
    fn test_file_exists_rejects_directory() {
        let temp = TempDir::new().unwrap();
        let iso = temp.path().join("bootimage.iso");
        fs::create_dir_all(&iso).unwrap();
        assert!(!Verifier::FileExists(iso).check().unwrap().is_pass());
    }

    #[test]
    fn test_all_files_exist_for_each_count() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("output");
        fs::create_dir_all(&dir).unwrap();
        let verifier = Verifier::AllFilesExist {
            dir: dir.clone(),
            names: INIT_FILES,
        };

        for (present, name) in INIT_FILES.iter().enumerate() {
            assert_eq!(missing_files(&dir, INIT_FILES).len(), INIT_FILES.len() - present);
            assert!(!verifier.check().unwrap().is_pass(), "{present} files present");
            fs::write(dir.join(name), "x").unwrap();
        }

        assert!(missing_files(&dir, INIT_FILES).is_empty());
        assert!(verifier.check().unwrap().is_pass());
    }
}
