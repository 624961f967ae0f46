//! On-disk layout of the shared work directory.
//!
//! The root is the host side of the sandbox's `/localdisk`. Everything the
//! toolchain leaves behind (logs, result trees, exported images) and every
//! sentinel we write lives under it.

use std::path::{Path, PathBuf};

use crate::config::BuildConfig;

/// Results trees produced by `build-pkgs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsTree {
    Std,
    Rt,
    Installer,
}

impl ResultsTree {
    pub fn dir_name(self) -> &'static str {
        match self {
            ResultsTree::Std => "std",
            ResultsTree::Rt => "rt",
            ResultsTree::Installer => "installer",
        }
    }
}

/// Output files `update-pxe-network-installer` must produce.
pub const INIT_FILES: &[&str] = &["new-initrd.img", "new-squashfs.img", "new-vmlinuz"];

pub const ISO_FILENAME: &str = "bootimage.iso";
pub const MIRROR_CHECK_LOG: &str = "cgcs-centos-repo-output";
pub const MISSING_PACKAGES_FILE: &str = "missing_packages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    root: PathBuf,
    user: String,
    project: String,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>, user: &str, project: &str) -> Self {
        Self {
            root: root.into(),
            user: user.to_string(),
            project: project.to_string(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(config.work_root(), &config.myuname, &config.project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn sentinel(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// `<root>/loadbuild/<user>/<project>`
    pub fn loadbuild(&self) -> PathBuf {
        self.root
            .join("loadbuild")
            .join(&self.user)
            .join(&self.project)
    }

    pub fn results_dir(&self, tree: ResultsTree) -> PathBuf {
        self.loadbuild().join(tree.dir_name()).join("results")
    }

    pub fn srpm_tmp_dir(&self) -> PathBuf {
        self.loadbuild().join("std/tmp")
    }

    pub fn iso_artifact(&self) -> PathBuf {
        self.loadbuild().join("export").join(ISO_FILENAME)
    }

    pub fn init_files_dir(&self) -> PathBuf {
        self.loadbuild().join("pxe-network-installer/output")
    }

    pub fn mirror_check_log(&self) -> PathBuf {
        self.root.join(MIRROR_CHECK_LOG)
    }

    pub fn missing_packages(&self) -> PathBuf {
        self.root.join(MISSING_PACKAGES_FILE)
    }

    /// Dependency cache left by a finished source build.
    pub fn dependency_cache(&self) -> PathBuf {
        self.root
            .join("designer")
            .join(&self.user)
            .join(&self.project)
            .join("cgcs-root/cgcs-tis-repo")
    }
}
