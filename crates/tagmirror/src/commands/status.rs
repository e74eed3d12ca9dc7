//! Status command: report what the last passes recorded

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use tagmirror_core::{FileStatusSink, MirrorStatus, StatusSink};

use super::load_config;
use crate::cli::StatusArgs;
use crate::output;

#[derive(Debug, Serialize)]
struct PolicyStatus {
    policy: String,
    status: Option<MirrorStatus>,
}

/// Recorded status for each named policy, `None` where nothing was recorded yet
async fn collect(sink: &dyn StatusSink, names: Vec<String>) -> Result<Vec<PolicyStatus>> {
    let mut statuses = Vec::with_capacity(names.len());
    for policy in names {
        let status = sink
            .load(&policy)
            .await
            .with_context(|| format!("Failed to read status of policy '{}'", policy))?;
        statuses.push(PolicyStatus { policy, status });
    }
    Ok(statuses)
}

pub async fn run(args: StatusArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;

    let names: Vec<String> = match &args.policy {
        Some(name) => {
            if !config.config.policies.iter().any(|p| p.name() == name.as_str()) {
                return Err(anyhow!("No policy named '{}'", name));
            }
            vec![name.clone()]
        }
        None => config
            .config
            .policies
            .iter()
            .map(|p| p.name().to_string())
            .collect(),
    };

    let sink = FileStatusSink::new(config.status_dir());
    let statuses = collect(&sink, names).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    output::header(&format!("Status: {}", config.status_dir()));
    for entry in &statuses {
        let status = match &entry.status {
            Some(status) => status,
            None => {
                output::warning(&format!("{}: no pass recorded yet", entry.policy));
                continue;
            }
        };

        if status.is_healthy() {
            output::success(&entry.policy);
        } else {
            output::error(&entry.policy);
        }
        output::kv("Observed", &status.observed_at.to_rfc3339());
        output::kv("Mirrored", &output::tag_list(&status.mirrored_tags));
        if let Some(error) = &status.last_error {
            output::kv("Last error", error);
        }
        for (tag, message) in &status.failed_tags {
            output::kv(&format!("Failed {}", tag), message);
        }
        if !status.is_healthy() {
            let next = if status.retryable {
                "retry scheduled"
            } else {
                "needs a configuration change"
            };
            output::kv("Next", next);
        }
    }

    Ok(())
}
