use anyhow::Result;
use stx_builder::{
    BuildConfig, BuildStage, DockerSandbox, SlackWebhook, StageOutcome, StageReport, StageRunner,
};

/// Run the selected stages in order.
///
/// A failed verification is reported and recorded, then the next selected
/// stage still runs. Only errors reaching the sandbox or the work tree
/// abort the invocation.
pub(crate) fn run_stages(config: &BuildConfig, stages: &[BuildStage]) -> Result<()> {
    let sandbox = DockerSandbox::from_config(config);
    let notifier = SlackWebhook::new(
        config.webhook_url.clone(),
        &config.slack_channel,
        config.ci.label(),
    );
    let runner = StageRunner::new(config, &sandbox, &notifier);

    let mut reports = Vec::with_capacity(stages.len());
    for &stage in stages {
        reports.push(runner.run(stage)?);
    }
    summarize(&reports);
    Ok(())
}

fn summarize(reports: &[StageReport]) {
    for report in reports {
        match &report.outcome {
            StageOutcome::Passed { published: Some(path) } => {
                tracing::info!(stage = %report.stage, published = %path.display(), "PASS");
            }
            StageOutcome::Passed { published: None } => {
                tracing::info!(stage = %report.stage, "PASS");
            }
            StageOutcome::Failed { reason, sentinel } => {
                tracing::error!(
                    stage = %report.stage,
                    sentinel = %sentinel.display(),
                    "FAIL: {}",
                    reason
                );
            }
            StageOutcome::Skipped { upstream } => {
                tracing::warn!(stage = %report.stage, upstream = %upstream, "SKIPPED");
            }
        }
    }
}
