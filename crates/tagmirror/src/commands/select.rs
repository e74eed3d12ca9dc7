//! Match command: try a pattern against tags without touching a registry

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use tagmirror_core::{TagPattern, TagSet};

use crate::cli::MatchArgs;
use crate::output;

#[derive(Debug, Serialize)]
struct Selection {
    pattern: String,
    kind: String,
    selected: TagSet,
    rejected: TagSet,
}

fn select(pattern: &str, tags: &[String]) -> Result<Selection> {
    let compiled = TagPattern::compile(pattern).context("Pattern does not compile")?;
    let candidates: TagSet = tags.iter().cloned().collect();
    let selected = candidates.filter(&compiled);

    Ok(Selection {
        pattern: compiled.as_str().to_string(),
        kind: compiled.kind().to_string(),
        rejected: candidates.difference(&selected),
        selected,
    })
}

pub fn run(args: MatchArgs) -> Result<()> {
    let selection = select(&args.pattern, &args.tags)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
        return Ok(());
    }

    if selection.kind == "none" {
        output::warning(&format!(
            "'{}' has no glob:, regex: or semver: prefix and selects nothing",
            selection.pattern
        ));
    }
    for tag in &args.tags {
        if selection.selected.contains(tag) {
            println!("{} {}", "✓".green(), tag);
        } else {
            println!("{} {}", "✗".dimmed(), tag.dimmed());
        }
    }
    output::info(&format!(
        "{} of {} tags selected",
        selection.selected.len(),
        selection.selected.len() + selection.rejected.len()
    ));
    Ok(())
}
