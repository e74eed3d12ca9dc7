//! Semantic-version range matching for tags

use semver::{Version, VersionReq};
use tracing::trace;

/// Parse a tag as a version, ignoring any non-numeric prefix
///
/// `v1.2.3` and `release-1.2.3` both parse as `1.2.3`. Tags that are not
/// complete three-component versions return `None`.
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let version_str = tag.trim_start_matches(|c: char| !c.is_ascii_digit());
    if version_str.is_empty() {
        return None;
    }
    Version::parse(version_str).ok()
}

/// A version range: a disjunction of comparator sets
///
/// Accepted syntax:
/// - comparators `>`, `>=`, `<`, `<=`, `=`, `^`, `~`
/// - a bare version means exact equality (`1.2.3` is `=1.2.3`)
/// - wildcards `*`, `x`, `X` in any component (`1.x`, `1.2.*`)
/// - hyphen ranges `1.2.3 - 2.0.0` (inclusive on both ends)
/// - comparators joined by whitespace or commas must all hold
/// - `||` separates alternatives
#[derive(Debug, Clone)]
pub struct SemverRange {
    alternatives: Vec<VersionReq>,
}

impl SemverRange {
    /// Parse a range expression
    pub fn parse(range: &str) -> Result<Self, String> {
        let alternatives = range
            .split("||")
            .map(|alternative| {
                let normalized = normalize_alternative(alternative)?;
                trace!("semver range '{}' normalized to '{}'", alternative.trim(), normalized);
                VersionReq::parse(&normalized)
                    .map_err(|e| format!("invalid range '{}': {}", alternative.trim(), e))
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(Self { alternatives })
    }

    /// Whether `version` satisfies any alternative
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    /// Whether `tag` parses as a version inside the range
    pub fn matches_tag(&self, tag: &str) -> bool {
        match parse_tag_version(tag) {
            Some(version) => self.matches(&version),
            None => {
                trace!("Skipping non-semver tag: {}", tag);
                false
            }
        }
    }
}

/// Rewrite one alternative into the comma-separated form `VersionReq` reads
fn normalize_alternative(alternative: &str) -> Result<String, String> {
    let alternative = alternative.trim();
    if alternative.is_empty() {
        return Err("empty range alternative".to_string());
    }

    if let Some((low, high)) = alternative.split_once(" - ") {
        let (low, high) = (low.trim(), high.trim());
        if low.is_empty() || high.is_empty() {
            return Err(format!("incomplete hyphen range '{}'", alternative));
        }
        return Ok(format!(
            ">={}, <={}",
            strip_v(low),
            strip_v(high)
        ));
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in alternative
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(is_op_char) {
            if pending_op.is_some() {
                return Err(format!("dangling operator in '{}'", alternative));
            }
            pending_op = Some(token);
            continue;
        }

        let comparator = match pending_op.take() {
            Some(op) => format!("{}{}", op, token),
            None => token.to_string(),
        };
        comparators.push(normalize_comparator(&comparator));
    }

    if pending_op.is_some() {
        return Err(format!("dangling operator in '{}'", alternative));
    }

    Ok(comparators.join(", "))
}

fn normalize_comparator(comparator: &str) -> String {
    let split = comparator
        .char_indices()
        .find(|(_, c)| !is_op_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(comparator.len());
    let (op, version) = comparator.split_at(split);
    let version = strip_v(version);

    // A bare complete version is an exact match, not a caret range
    if op.is_empty() && version.starts_with(|c: char| c.is_ascii_digit()) && !has_wildcard(version)
    {
        format!("={}", version)
    } else {
        format!("{}{}", op, version)
    }
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

fn has_wildcard(version: &str) -> bool {
    version
        .split('.')
        .any(|part| matches!(part, "*" | "x" | "X"))
}

fn is_op_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '^' | '~')
}
