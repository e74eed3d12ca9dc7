//! Sync command: one reconciliation pass per policy

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use futures::future::join_all;
use serde::Serialize;
use tagmirror_core::{
    CancelHandle, Error, FileStatusSink, MirrorStatus, PassOutcome, ReconciliationResult,
    StatusSink, TagSet,
};
use tracing::warn;

use super::{build_engine, load_config, select_policies};
use crate::cli::SyncArgs;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReport {
    policy: String,
    outcome: &'static str,
    transferred: TagSet,
    status: MirrorStatus,
}

fn outcome_label(outcome: PassOutcome) -> &'static str {
    match outcome {
        PassOutcome::Converged => "converged",
        PassOutcome::Retry => "retry",
        PassOutcome::Terminal => "terminal",
    }
}

/// Persist the pass and build its report
///
/// A status that cannot be read or written is logged; the pass result
/// still stands.
async fn record(sink: &dyn StatusSink, result: &ReconciliationResult) -> SyncReport {
    let previous = match sink.load(&result.policy).await {
        Ok(previous) => previous,
        Err(e) => {
            warn!(policy = %result.policy, "Ignoring unreadable status: {:#}", e);
            None
        }
    };

    let status = MirrorStatus::from_result(result, previous.as_ref());
    if let Err(e) = sink.record(&status).await {
        warn!(policy = %result.policy, "Failed to record status: {:#}", e);
    }

    SyncReport {
        policy: result.policy.clone(),
        outcome: outcome_label(result.outcome()),
        transferred: result.transferred.clone(),
        status,
    }
}

/// Persist a policy that could not be built and report it as terminal
async fn record_rejected(sink: &dyn StatusSink, name: &str, problem: &Error) -> SyncReport {
    let previous = match sink.load(name).await {
        Ok(previous) => previous,
        Err(e) => {
            warn!(policy = %name, "Ignoring unreadable status: {:#}", e);
            None
        }
    };

    let status = MirrorStatus::rejected(name, problem, previous.as_ref());
    if let Err(e) = sink.record(&status).await {
        warn!(policy = %name, "Failed to record status: {:#}", e);
    }

    SyncReport {
        policy: name.to_string(),
        outcome: outcome_label(PassOutcome::Terminal),
        transferred: TagSet::new(),
        status,
    }
}

pub async fn run(args: SyncArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let declared = select_policies(&config, args.policy.as_deref())?;
    let engine = build_engine(&config)?;
    let sink = FileStatusSink::new(config.status_dir());

    let handle = CancelHandle::new();
    let cancel = handle.signal();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfers in flight");
            handle.cancel();
        }
    });

    let results = join_all(
        declared
            .valid
            .iter()
            .map(|policy| engine.reconcile(policy, &cancel)),
    )
    .await;
    interrupt.abort();

    let mut reports = Vec::with_capacity(results.len() + declared.invalid.len());
    for result in &results {
        reports.push(record(&sink, result).await);
    }
    for (name, problem) in &declared.invalid {
        reports.push(record_rejected(&sink, name, problem).await);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let failed = reports.iter().filter(|r| !r.status.is_healthy()).count();
    if failed == 0 {
        Ok(())
    } else {
        Err(anyhow!("{} of {} policies did not converge", failed, reports.len()))
    }
}

fn print_report(report: &SyncReport) {
    let status = &report.status;
    if status.is_healthy() {
        output::success(&format!(
            "{}: {} tag(s) mirrored, {} copied",
            report.policy,
            status.mirrored_tags.len(),
            report.transferred.len()
        ));
        if !report.transferred.is_empty() {
            output::kv("Copied", &output::tag_list(&report.transferred));
        }
        return;
    }

    output::error(&format!("{}: pass ended {}", report.policy, report.outcome));
    if let Some(error) = &status.last_error {
        output::kv("Error", error);
    }
    for (tag, message) in &status.failed_tags {
        output::kv(tag, message);
    }
    if status.retryable {
        output::info("The failure looks transient; 'tagmirror run' retries automatically");
    }
}
