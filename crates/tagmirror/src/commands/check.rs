//! Check command

use anyhow::{anyhow, Result};
use camino::Utf8Path;
use serde::Serialize;
use tagmirror_core::config::PolicyConfig;
use tagmirror_core::MirrorConfig;

use super::load_config;
use crate::cli::CheckArgs;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    config_path: String,
    policies: Vec<PolicySummary>,
    problems: Vec<Problem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicySummary {
    name: String,
    source: String,
    destination: String,
    pattern: String,
    kind: String,
}

#[derive(Debug, Serialize)]
struct Problem {
    policy: String,
    error: String,
}

impl CheckReport {
    fn build(config: &MirrorConfig) -> Self {
        let problems = config
            .check()
            .into_iter()
            .map(|(policy, error)| Problem {
                policy,
                error: error.to_string(),
            })
            .collect();

        Self {
            config_path: config.config_path.to_string(),
            policies: config.config.policies.iter().filter_map(summarize).collect(),
            problems,
        }
    }
}

fn summarize(entry: &PolicyConfig) -> Option<PolicySummary> {
    let policy = entry.to_policy().ok()?;
    let pattern = policy.compile_pattern().ok()?;
    Some(PolicySummary {
        source: policy.source().ok()?.to_string(),
        destination: policy.destination().ok()?.to_string(),
        pattern: pattern.as_str().to_string(),
        kind: pattern.kind().to_string(),
        name: policy.name,
    })
}

pub fn run(args: CheckArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let report = CheckReport::build(&config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::header(&format!("Configuration: {}", report.config_path));
        for policy in &report.policies {
            if report.problems.iter().any(|p| p.policy == policy.name) {
                continue;
            }
            output::success(&policy.name);
            output::kv("Source", &policy.source);
            output::kv("Destination", &policy.destination);
            output::kv("Pattern", &format!("{} ({})", policy.pattern, policy.kind));
        }
        for problem in &report.problems {
            output::error(&format!("{}: {}", problem.policy, problem.error));
        }
    }

    if report.problems.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} problem(s) found in {}",
            report.problems.len(),
            report.config_path
        ))
    }
}
