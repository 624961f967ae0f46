//! Stage registry.
//!
//! Verified build stages are statically enumerated. Each one knows the
//! script it submits to the sandbox, the log it tees into, the sentinel it
//! leaves on failure, and how its result is judged.
//!
//! Ordering is a convention of the caller. [`BuildStage::predecessor`] makes
//! the conventional order explicit so a driver *may* gate on an upstream
//! sentinel; nothing here enforces it.

use std::fmt;
use std::time::Duration;

use crate::config::StageTimeouts;
use crate::layout::{ResultsTree, WorkLayout, INIT_FILES};
use crate::verify::Verifier;

/// Name of the failure marker written by `build-pkgs` into a package's
/// results directory.
pub const FAIL_MARKER: &str = "fail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Srpms,
    Std,
    Rt,
    Installer,
    Iso,
    InitFiles,
}

impl BuildStage {
    /// Pipeline order.
    pub const ALL: &'static [BuildStage] = &[
        BuildStage::Srpms,
        BuildStage::Std,
        BuildStage::Rt,
        BuildStage::Installer,
        BuildStage::Iso,
        BuildStage::InitFiles,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            BuildStage::Srpms => "srpms",
            BuildStage::Std => "std",
            BuildStage::Rt => "rt",
            BuildStage::Installer => "installer",
            BuildStage::Iso => "iso",
            BuildStage::InitFiles => "init_files",
        }
    }

    /// Toolchain invocation, also used to name the stage in notifications.
    pub fn tool(self) -> &'static str {
        match self {
            BuildStage::Srpms => "build-srpms",
            BuildStage::Std => "build-pkgs --std",
            BuildStage::Rt => "build-pkgs --rt",
            BuildStage::Installer => "build-pkgs --installer",
            BuildStage::Iso => "build-iso",
            BuildStage::InitFiles => "update-pxe-network-installer",
        }
    }

    pub fn log_name(self) -> &'static str {
        match self {
            BuildStage::Srpms => "build-srpms.log",
            BuildStage::Std => "build-pkgs_std.log",
            BuildStage::Rt => "build-pkgs_rt.log",
            BuildStage::Installer => "build-pkgs_installer.log",
            BuildStage::Iso => "build-iso.log",
            BuildStage::InitFiles => "build_init_files.log",
        }
    }

    pub fn sentinel_name(self) -> &'static str {
        match self {
            BuildStage::Srpms => "build_srpms_fail",
            BuildStage::Std => "build_std_fail",
            BuildStage::Rt => "build_rt_fail",
            BuildStage::Installer => "build_installer_fail",
            BuildStage::Iso => "build_iso_fail",
            BuildStage::InitFiles => "build_init_files_fail",
        }
    }

    pub fn predecessor(self) -> Option<BuildStage> {
        match self {
            BuildStage::Srpms => None,
            BuildStage::Std => Some(BuildStage::Srpms),
            BuildStage::Rt => Some(BuildStage::Std),
            BuildStage::Installer => Some(BuildStage::Rt),
            BuildStage::Iso => Some(BuildStage::Installer),
            BuildStage::InitFiles => Some(BuildStage::Iso),
        }
    }

    pub fn timeout(self, timeouts: &StageTimeouts) -> Duration {
        match self {
            BuildStage::Srpms => timeouts.srpms,
            BuildStage::Std => timeouts.std,
            BuildStage::Rt => timeouts.rt,
            BuildStage::Installer => timeouts.installer,
            BuildStage::Iso => timeouts.iso,
            BuildStage::InitFiles => timeouts.init_files,
        }
    }

    /// Script submitted to the sandbox. Runs from `$MY_REPO` and tees into
    /// the stage log under `/localdisk`.
    pub fn script(self) -> String {
        format!(
            "source $HOME/.bashrc\ncd $MY_REPO\ntime {} | tee /localdisk/{}\n",
            self.tool(),
            self.log_name()
        )
    }

    pub fn verifier(self, layout: &WorkLayout) -> Verifier {
        match self {
            BuildStage::Srpms => Verifier::NonEmptyEntry(layout.srpm_tmp_dir()),
            BuildStage::Std => fail_markers(layout, ResultsTree::Std),
            BuildStage::Rt => fail_markers(layout, ResultsTree::Rt),
            BuildStage::Installer => fail_markers(layout, ResultsTree::Installer),
            BuildStage::Iso => Verifier::FileExists(layout.iso_artifact()),
            BuildStage::InitFiles => Verifier::AllFilesExist {
                dir: layout.init_files_dir(),
                names: INIT_FILES,
            },
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

fn fail_markers(layout: &WorkLayout, tree: ResultsTree) -> Verifier {
    Verifier::NamedUnder {
        tree: layout.results_dir(tree),
        name: FAIL_MARKER,
    }
}

/// Parameters of the source checkout script.
#[derive(Debug, Clone)]
pub struct CheckoutParams<'a> {
    pub user: &'a str,
    pub branch: &'a str,
    pub manifest_url: &'a str,
    pub cores: usize,
}

/// Script that wipes any previous tree, syncs sources from the manifest,
/// regenerates the local package repo and links the mirror downloads.
///
/// The regeneration output lands in `/localdisk/cgcs-centos-repo-output`,
/// which the mirror check reads afterwards.
pub fn checkout_script(params: &CheckoutParams<'_>) -> String {
    format!(
        r#"source $HOME/.bashrc

git config --global color.ui false

if [[ -d /localdisk/loadbuild/{user} ]]; then
    sudo rm -rf /localdisk/designer/$MYUNAME/$PROJECT/*
    sudo rm -rf /localdisk/designer/$MYUNAME/$PROJECT/.repo
    sudo rm -rf /localdisk/loadbuild/*
fi

cd $MY_REPO_ROOT_DIR
repo init -u {manifest} -m default.xml -b {branch}
repo sync -j{cores}

time generate-cgcs-centos-repo.sh /import/mirrors/CentOS/pike | tee /localdisk/cgcs-centos-repo-output

mkdir -p $MY_REPO/stx
if [[ ! -L $MY_REPO/stx/downloads ]]; then
    ln -s /import/mirrors/CentOS/pike/downloads $MY_REPO/stx/
fi

mkdir -p $MY_REPO/cgcs-tis-repo
if [[ -d $HOME/cgcs-tis-repo ]]; then
    cp -r $HOME/cgcs-tis-repo/* $MY_REPO/cgcs-tis-repo/
fi
"#,
        user = params.user,
        manifest = params.manifest_url,
        branch = params.branch,
        cores = params.cores,
    )
}
