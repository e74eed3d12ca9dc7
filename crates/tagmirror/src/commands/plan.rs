//! Plan command: a dry-run that lists tags without copying any

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use futures::future::join_all;
use serde::Serialize;
use tagmirror_core::{CancelSignal, PassFailure, ReconciliationPlan};

use super::{build_engine, load_config, select_policies};
use crate::cli::PlanArgs;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanReport {
    policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<ReconciliationPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PlanReport {
    fn new(policy: String, outcome: std::result::Result<ReconciliationPlan, PassFailure>) -> Self {
        match outcome {
            Ok(plan) => Self {
                policy,
                plan: Some(plan),
                error: None,
            },
            Err(failure) => Self {
                policy,
                plan: None,
                error: Some(failure.to_string()),
            },
        }
    }
}

pub async fn run(args: PlanArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let declared = select_policies(&config, args.policy.as_deref())?;
    let engine = build_engine(&config)?;

    let cancel = CancelSignal::never();
    let mut reports: Vec<PlanReport> = join_all(declared.valid.iter().map(|policy| {
        let engine = &engine;
        let cancel = &cancel;
        async move { PlanReport::new(policy.name.clone(), engine.plan(policy, cancel).await) }
    }))
    .await;
    reports.extend(
        declared
            .invalid
            .into_iter()
            .map(|(name, problem)| PlanReport::new(name, Err(PassFailure::from(problem)))),
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed == 0 {
        Ok(())
    } else {
        Err(anyhow!("{} of {} policies could not be planned", failed, reports.len()))
    }
}

fn print_report(report: &PlanReport) {
    output::header(&format!("Policy: {}", report.policy));

    let plan = match (&report.plan, &report.error) {
        (Some(plan), _) => plan,
        (None, Some(error)) => {
            output::error(error);
            return;
        }
        (None, None) => return,
    };

    output::kv("Source", &plan.source.to_string());
    output::kv("Destination", &plan.destination.to_string());
    output::kv(
        "Selected",
        &format!("{} of {} source tags", plan.filtered.len(), plan.source_tags.len()),
    );
    output::kv("Already mirrored", &output::tag_list(&plan.already_mirrored));
    output::kv("Missing", &output::tag_list(&plan.missing));

    if plan.is_converged() {
        output::success("Destination is up to date");
    } else {
        output::info(&format!("{} tag(s) would be copied", plan.missing.len()));
    }
}
