//! Tag selection patterns
//!
//! A policy selects tags with a prefixed pattern string:
//!
//! - `glob:<expr>`: `*` matches any run of characters, `?` exactly one
//! - `regex:<expr>`: the whole tag must match
//! - `semver:<range>`: tags that parse as versions, inside the range
//!
//! Anything else, including an empty string, compiles to a pattern that
//! selects no tags. A policy whose intent cannot be read mirrors nothing.

mod semver;

pub use self::semver::{parse_tag_version, SemverRange};

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use std::fmt;

const GLOB_PREFIX: &str = "glob:";
const REGEX_PREFIX: &str = "regex:";
const SEMVER_PREFIX: &str = "semver:";

/// Predicate over tag strings
pub trait TagMatcher {
    /// Whether `tag` is selected
    fn matches(&self, tag: &str) -> bool;
}

impl<F> TagMatcher for F
where
    F: Fn(&str) -> bool,
{
    fn matches(&self, tag: &str) -> bool {
        self(tag)
    }
}

/// Which pattern family a pattern string belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Glob,
    Regex,
    Semver,
    None,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternKind::Glob => write!(f, "glob"),
            PatternKind::Regex => write!(f, "regex"),
            PatternKind::Semver => write!(f, "semver"),
            PatternKind::None => write!(f, "none"),
        }
    }
}

/// A compiled tag selection pattern
#[derive(Debug, Clone)]
pub struct TagPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
    Semver(SemverRange),
    None,
}

impl TagPattern {
    /// Compile a prefixed pattern string
    ///
    /// # Errors
    /// Returns [`Error::InvalidPattern`] when the expression after a
    /// recognized prefix is malformed. Unrecognized prefixes are not an
    /// error; they compile to a pattern that matches nothing.
    pub fn compile(pattern: &str) -> Result<Self> {
        let matcher = if let Some(expr) = pattern.strip_prefix(GLOB_PREFIX) {
            match expr.trim() {
                "" => Matcher::None,
                expr => Matcher::Glob(
                    compile_glob(expr).map_err(|e| Error::invalid_pattern(pattern, e))?,
                ),
            }
        } else if let Some(expr) = pattern.strip_prefix(REGEX_PREFIX) {
            match expr.trim() {
                "" => Matcher::None,
                expr => Matcher::Regex(
                    Regex::new(&format!("^(?:{})$", expr))
                        .map_err(|e| Error::invalid_pattern(pattern, e))?,
                ),
            }
        } else if let Some(expr) = pattern.strip_prefix(SEMVER_PREFIX) {
            match expr.trim() {
                "" => Matcher::None,
                expr => Matcher::Semver(
                    SemverRange::parse(expr).map_err(|e| Error::invalid_pattern(pattern, e))?,
                ),
            }
        } else {
            Matcher::None
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// A pattern that selects no tags
    pub fn none() -> Self {
        Self {
            source: String::new(),
            matcher: Matcher::None,
        }
    }

    /// The pattern family
    pub fn kind(&self) -> PatternKind {
        match self.matcher {
            Matcher::Glob(_) => PatternKind::Glob,
            Matcher::Regex(_) => PatternKind::Regex,
            Matcher::Semver(_) => PatternKind::Semver,
            Matcher::None => PatternKind::None,
        }
    }

    /// True when this pattern can never select a tag
    pub fn is_none(&self) -> bool {
        matches!(self.matcher, Matcher::None)
    }

    /// The pattern string this was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl TagMatcher for TagPattern {
    fn matches(&self, tag: &str) -> bool {
        match &self.matcher {
            Matcher::Glob(glob) => glob.is_match(tag),
            Matcher::Regex(regex) => regex.is_match(tag),
            Matcher::Semver(range) => range.matches_tag(tag),
            Matcher::None => false,
        }
    }
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Tags are flat strings, so `*` must cross `/` like any other character
fn compile_glob(expr: &str) -> std::result::Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(expr)
        .literal_separator(false)
        .backslash_escape(true)
        .build()?
        .compile_matcher())
}
