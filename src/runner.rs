//! Stage runner.
//!
//! Every verified stage has the same shape:
//!
//! ```text
//! run(stage) -> verify(stage) -> PASS | FAIL
//! ```
//!
//! The script goes to the sandbox, the captured output goes to the log, and
//! the verdict comes from the artifacts the toolchain left on disk. A FAIL is
//! recorded (notification + sentinel), never returned as an error. Only
//! transport failures of the sandbox itself propagate to the caller.

use anyhow::{Context, Result};
use std::path::PathBuf;
use time::Date;

use crate::config::BuildConfig;
use crate::layout::WorkLayout;
use crate::notify::{Notification, Notifier, Priority, Severity};
use crate::publish::{download_link, publish_iso, published_iso_name, today};
use crate::sandbox::{CancelToken, ExecLimits, ExecutionEnvironment, RunOutput};
use crate::sentinel::SentinelStore;
use crate::stages::BuildStage;
use crate::verify::Verdict;

/// Used in the published file name when no CI build number is available.
const LOCAL_BUILD_NUMBER: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Passed {
        /// Published copy of the ISO, for the ISO stage.
        published: Option<PathBuf>,
    },
    Failed {
        reason: String,
        sentinel: PathBuf,
    },
    /// Not launched because the predecessor's sentinel was present.
    Skipped { upstream: BuildStage },
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: BuildStage,
    pub outcome: StageOutcome,
    pub output: Option<RunOutput>,
}

pub struct StageRunner<'a> {
    config: &'a BuildConfig,
    env: &'a dyn ExecutionEnvironment,
    notifier: &'a dyn Notifier,
    layout: WorkLayout,
    sentinels: SentinelStore,
    cancel: CancelToken,
    today: Option<Date>,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        config: &'a BuildConfig,
        env: &'a dyn ExecutionEnvironment,
        notifier: &'a dyn Notifier,
    ) -> Self {
        let layout = WorkLayout::from_config(config);
        Self {
            config,
            env,
            notifier,
            sentinels: SentinelStore::new(layout.clone()),
            layout,
            cancel: CancelToken::new(),
            today: None,
        }
    }

    /// Pin the date used to name published ISOs.
    pub fn with_date(mut self, date: Date) -> Self {
        self.today = Some(date);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    pub fn sentinels(&self) -> &SentinelStore {
        &self.sentinels
    }

    pub fn run(&self, stage: BuildStage) -> Result<StageReport> {
        if self.config.gate_on_upstream_sentinel {
            if let Some(upstream) = stage.predecessor().filter(|p| self.sentinels.exists(*p)) {
                tracing::warn!(
                    stage = %stage,
                    upstream = %upstream,
                    "skipping stage: upstream sentinel present"
                );
                return Ok(StageReport {
                    stage,
                    outcome: StageOutcome::Skipped { upstream },
                    output: None,
                });
            }
        }

        if self.config.clear_sentinel_before_run && self.sentinels.clear(stage)? {
            tracing::info!(stage = %stage, "cleared stale sentinel");
        }

        tracing::info!(
            stage = %stage,
            branch = %self.config.branch,
            sandbox = self.env.name(),
            "running {}",
            stage.tool()
        );
        let limits = ExecLimits {
            timeout: Some(stage.timeout(&self.config.timeouts)),
            cancel: self.cancel.clone(),
        };
        let output = self
            .env
            .execute(&stage.script(), &limits)
            .with_context(|| format!("running stage '{}' in '{}'", stage, self.env.name()))?;
        log_output(stage, &output);

        let outcome = match self.verify(stage)? {
            Verdict::Pass => self.on_pass(stage)?,
            Verdict::Fail { reason } => self.on_fail(stage, reason)?,
        };

        Ok(StageReport {
            stage,
            outcome,
            output: Some(output),
        })
    }

    /// Judge the stage from the current filesystem state alone.
    pub fn verify(&self, stage: BuildStage) -> Result<Verdict> {
        stage
            .verifier(&self.layout)
            .check()
            .with_context(|| format!("verifying stage '{}'", stage))
    }

    fn on_pass(&self, stage: BuildStage) -> Result<StageOutcome> {
        tracing::info!(stage = %stage, "stage passed");
        let published = match stage {
            BuildStage::Iso => Some(self.publish()?),
            _ => None,
        };
        Ok(StageOutcome::Passed { published })
    }

    fn publish(&self) -> Result<PathBuf> {
        let name = published_iso_name(
            self.today.unwrap_or_else(today),
            self.config
                .ci
                .build_number
                .as_deref()
                .unwrap_or(LOCAL_BUILD_NUMBER),
            &self.config.branch,
        );
        let dest = publish_iso(
            &self.layout.iso_artifact(),
            &self.config.publish_dir(),
            &name,
        )?;
        tracing::info!(iso = %dest.display(), "published ISO");

        self.notifier.send(&Notification {
            text: format!(":smiley: Successful build for branch `{}`", self.config.branch),
            severity: Severity::Good,
            priority: Priority::Normal,
            title: "Get the new ISO here".to_string(),
            title_link: self
                .config
                .iso_url
                .as_deref()
                .map(|url| download_link(url, &name)),
        });
        Ok(dest)
    }

    fn on_fail(&self, stage: BuildStage, reason: String) -> Result<StageOutcome> {
        tracing::error!(stage = %stage, branch = %self.config.branch, %reason, "stage failed");

        self.notifier.send(&Notification {
            text: format!(
                ":neutral_face: Build failed in stage `{}` for branch `{}`",
                stage.tool(),
                self.config.branch
            ),
            severity: Severity::Danger,
            priority: Priority::Normal,
            title: "Check the logs here".to_string(),
            title_link: self.config.ci.build_url.clone(),
        });

        let sentinel = self.sentinels.write(stage)?;
        tracing::info!(sentinel = %sentinel.display(), "wrote failure sentinel");
        Ok(StageOutcome::Failed { reason, sentinel })
    }
}

fn log_output(stage: BuildStage, output: &RunOutput) {
    for line in output.stdout.lines() {
        tracing::debug!(stage = %stage, "{}", line);
    }
    for line in output.stderr.lines() {
        tracing::debug!(stage = %stage, stream = "stderr", "{}", line);
    }
    tracing::debug!(stage = %stage, exit_code = ?output.exit_code, "sandbox command returned");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxError;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use time::Month;

    /// Sandbox stand-in that lets a test play the toolchain.
    struct FakeSandbox<F: Fn(&str) -> Result<RunOutput, SandboxError>> {
        scripts: RefCell<Vec<String>>,
        behaviour: F,
    }

    impl<F: Fn(&str) -> Result<RunOutput, SandboxError>> FakeSandbox<F> {
        fn new(behaviour: F) -> Self {
            Self {
                scripts: RefCell::new(Vec::new()),
                behaviour,
            }
        }
    }

    impl<F: Fn(&str) -> Result<RunOutput, SandboxError>> ExecutionEnvironment for FakeSandbox<F> {
        fn name(&self) -> &str {
            "fake"
        }

        fn execute(&self, command: &str, _limits: &ExecLimits) -> Result<RunOutput, SandboxError> {
            self.scripts.borrow_mut().push(command.to_string());
            (self.behaviour)(command)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, notification: &Notification) {
            self.sent.borrow_mut().push(notification.clone());
        }
    }

    fn ok_output(_: &str) -> Result<RunOutput, SandboxError> {
        Ok(RunOutput::default())
    }

    fn config(temp: &TempDir) -> BuildConfig {
        let mut config = BuildConfig::load(None, |key| match key {
            "USER" => Some("alice".to_string()),
            "BRANCH" => Some("f/stein".to_string()),
            "BUILD_NUMBER" => Some("113".to_string()),
            "BUILD_URL" => Some("https://ci.example/job/iso/113/".to_string()),
            "ISO_URL" => Some("http://mirror.example/ISO".to_string()),
            _ => None,
        })
        .unwrap();
        config.base_path = temp.path().to_path_buf();
        config
    }

    fn sentinels_in(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(root) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with("build_") && name.ends_with("_fail"))
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    fn date() -> Date {
        Date::from_calendar_date(2018, Month::October, 19).unwrap()
    }

    #[test]
    fn test_std_fail_marker_writes_sentinel_and_notifies() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let layout = WorkLayout::from_config(&config);
        let results = layout.results_dir(crate::layout::ResultsTree::Std);
        let sandbox = FakeSandbox::new(move |_: &str| {
            fs::create_dir_all(results.join("pkgA")).unwrap();
            fs::write(results.join("pkgA/fail"), "").unwrap();
            Ok(RunOutput::default())
        });
        let notifier = RecordingNotifier::default();

        let report = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Std)
            .unwrap();

        match report.outcome {
            StageOutcome::Failed { sentinel, .. } => {
                assert_eq!(sentinel, layout.root().join("build_std_fail"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sentinels_in(layout.root()), vec!["build_std_fail"]);
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Danger);
        assert!(sent[0].text.contains("`build-pkgs --std`"));
        assert!(sent[0].text.contains("`f/stein`"));
        assert_eq!(
            sent[0].title_link.as_deref(),
            Some("https://ci.example/job/iso/113/")
        );
        assert!(sandbox.scripts.borrow()[0].contains("time build-pkgs --std"));
    }

    #[test]
    fn test_std_absent_results_tree_passes() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();

        let report = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Std)
            .unwrap();

        assert_eq!(report.outcome, StageOutcome::Passed { published: None });
        assert!(notifier.sent.borrow().is_empty());
        assert!(sentinels_in(&config.work_root()).is_empty());
    }

    #[test]
    fn test_srpm_single_non_empty_file_fails_once() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let layout = WorkLayout::from_config(&config);
        let tmp = layout.srpm_tmp_dir();
        fs::create_dir_all(&tmp).unwrap();
        fs::write(tmp.join("empty"), "").unwrap();
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();
        let runner = StageRunner::new(&config, &sandbox, &notifier);

        assert_eq!(
            runner.run(BuildStage::Srpms).unwrap().outcome,
            StageOutcome::Passed { published: None }
        );

        fs::write(tmp.join("failed.txt"), "pkg-x").unwrap();
        let first = runner.run(BuildStage::Srpms).unwrap();
        let second = runner.run(BuildStage::Srpms).unwrap();

        assert!(matches!(first.outcome, StageOutcome::Failed { .. }));
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(sentinels_in(layout.root()), vec!["build_srpms_fail"]);
        assert_eq!(notifier.sent.borrow().len(), 2);
    }

    #[test]
    fn test_exit_code_does_not_decide_verdict() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let sandbox = FakeSandbox::new(|_: &str| {
            Ok(RunOutput {
                stdout: "make: *** [all] Error 2\n".to_string(),
                stderr: String::new(),
                exit_code: Some(2),
            })
        });
        let notifier = RecordingNotifier::default();

        let report = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Rt)
            .unwrap();

        assert_eq!(report.outcome, StageOutcome::Passed { published: None });
        assert_eq!(report.output.unwrap().exit_code, Some(2));
    }

    #[test]
    fn test_iso_pass_publishes_and_announces() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let layout = WorkLayout::from_config(&config);
        let iso = layout.iso_artifact();
        let sandbox = FakeSandbox::new(move |_: &str| {
            fs::create_dir_all(iso.parent().unwrap()).unwrap();
            fs::write(&iso, "ISO9660").unwrap();
            Ok(RunOutput::default())
        });
        let notifier = RecordingNotifier::default();

        let report = StageRunner::new(&config, &sandbox, &notifier)
            .with_date(date())
            .run(BuildStage::Iso)
            .unwrap();

        let expected = config.publish_dir().join("stx-2018-10-19-113-f-stein.iso");
        assert_eq!(
            report.outcome,
            StageOutcome::Passed {
                published: Some(expected.clone())
            }
        );
        assert_eq!(fs::read_to_string(&expected).unwrap(), "ISO9660");
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Good);
        assert_eq!(
            sent[0].title_link.as_deref(),
            Some("http://mirror.example/ISO/stx-2018-10-19-113-f-stein.iso")
        );
        assert!(sentinels_in(layout.root()).is_empty());
    }

    #[test]
    fn test_iso_missing_writes_sentinel_without_publishing() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();

        let report = StageRunner::new(&config, &sandbox, &notifier)
            .with_date(date())
            .run(BuildStage::Iso)
            .unwrap();

        assert!(matches!(report.outcome, StageOutcome::Failed { .. }));
        assert_eq!(sentinels_in(&config.work_root()), vec!["build_iso_fail"]);
        assert!(!config.publish_dir().exists());
        assert_eq!(notifier.sent.borrow()[0].severity, Severity::Danger);
    }

    #[test]
    fn test_init_files_need_all_three() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let layout = WorkLayout::from_config(&config);
        let out = layout.init_files_dir();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("new-initrd.img"), "i").unwrap();
        fs::write(out.join("new-vmlinuz"), "k").unwrap();
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();
        let runner = StageRunner::new(&config, &sandbox, &notifier);

        match runner.run(BuildStage::InitFiles).unwrap().outcome {
            StageOutcome::Failed { reason, .. } => assert!(reason.contains("new-squashfs.img")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sentinels_in(layout.root()), vec!["build_init_files_fail"]);

        fs::write(out.join("new-squashfs.img"), "s").unwrap();
        assert!(runner.verify(BuildStage::InitFiles).unwrap().is_pass());
    }

    #[test]
    fn test_stale_sentinel_survives_success_by_default() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();
        let runner = StageRunner::new(&config, &sandbox, &notifier);
        runner.sentinels().write(BuildStage::Rt).unwrap();

        let report = runner.run(BuildStage::Rt).unwrap();

        assert_eq!(report.outcome, StageOutcome::Passed { published: None });
        assert!(runner.sentinels().exists(BuildStage::Rt));
    }

    #[test]
    fn test_clear_before_run_removes_stale_sentinel() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        config.clear_sentinel_before_run = true;
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();
        let runner = StageRunner::new(&config, &sandbox, &notifier);
        runner.sentinels().write(BuildStage::Rt).unwrap();

        runner.run(BuildStage::Rt).unwrap();

        assert!(!runner.sentinels().exists(BuildStage::Rt));
    }

    #[test]
    fn test_upstream_sentinel_ignored_unless_gated() {
        let temp = TempDir::new().unwrap();
        let mut config = config(&temp);
        let sandbox = FakeSandbox::new(ok_output);
        let notifier = RecordingNotifier::default();
        SentinelStore::new(WorkLayout::from_config(&config))
            .write(BuildStage::Std)
            .unwrap();

        let ungated = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Rt)
            .unwrap();
        assert!(matches!(ungated.outcome, StageOutcome::Passed { .. }));
        assert_eq!(sandbox.scripts.borrow().len(), 1);

        config.gate_on_upstream_sentinel = true;
        let gated = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Rt)
            .unwrap();
        assert_eq!(
            gated.outcome,
            StageOutcome::Skipped {
                upstream: BuildStage::Std
            }
        );
        assert_eq!(sandbox.scripts.borrow().len(), 1);
    }

    #[test]
    fn test_transport_failure_propagates_without_sentinel() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp);
        let sandbox =
            FakeSandbox::new(|_: &str| Err(SandboxError::TimedOut(Duration::from_secs(60))));
        let notifier = RecordingNotifier::default();

        let err = StageRunner::new(&config, &sandbox, &notifier)
            .run(BuildStage::Installer)
            .unwrap_err();

        assert!(format!("{:#}", err).contains("timeout"));
        assert!(sentinels_in(&config.work_root()).is_empty());
        assert!(notifier.sent.borrow().is_empty());
    }
}
