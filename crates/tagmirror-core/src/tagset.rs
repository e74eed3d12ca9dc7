//! Set algebra over image tags
//!
//! Registries return tags in no particular order and sometimes with
//! duplicates across paginated responses. [`TagSet`] normalizes both: it
//! holds each tag once and iterates lexicographically, so results are
//! deterministic and diff-friendly.

use crate::pattern::TagMatcher;
use serde::{Deserialize, Serialize};
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;

/// Unordered collection of unique tags with deterministic iteration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Every tag present in `self` or `other`
    pub fn union(&self, other: &TagSet) -> TagSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Every tag present in both `self` and `other`
    pub fn intersection(&self, other: &TagSet) -> TagSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// Every tag in `self` that is not in `other`
    pub fn difference(&self, other: &TagSet) -> TagSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Every tag the matcher selects
    pub fn filter<M: TagMatcher + ?Sized>(&self, matcher: &M) -> TagSet {
        Self(
            self.0
                .iter()
                .filter(|tag| matcher.matches(tag))
                .cloned()
                .collect(),
        )
    }

    /// Add a tag, returning false if it was already present
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in lexicographic order
    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    /// Tags as a sorted vector
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for TagSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for TagSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", tag)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::TagPattern;

    fn set(tags: &[&str]) -> TagSet {
        tags.iter().copied().collect()
    }

    fn samples() -> Vec<TagSet> {
        vec![
            set(&[]),
            set(&["8.1"]),
            set(&["8.1", "8.2", "9.0"]),
            set(&["latest", "8.2", "v1.0.0"]),
            set(&["a", "b", "c", "d"]),
        ]
    }

    #[test]
    fn test_duplicates_collapse() {
        let tags: TagSet = vec!["8.1", "8.2", "8.1"].into_iter().collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags, set(&["8.2", "8.1"]));
    }

    #[test]
    fn test_difference_of_union_is_empty() {
        for a in samples() {
            for b in samples() {
                assert!(a.difference(&a.union(&b)).is_empty(), "a={} b={}", a, b);
            }
        }
    }

    #[test]
    fn test_intersection_and_difference_partition() {
        for a in samples() {
            for b in samples() {
                let rebuilt = a.intersection(&b).union(&a.difference(&b));
                assert_eq!(rebuilt, a, "a={} b={}", a, b);
            }
        }
    }

    #[test]
    fn test_commutative() {
        for a in samples() {
            for b in samples() {
                assert_eq!(a.union(&b), b.union(&a));
                assert_eq!(a.intersection(&b), b.intersection(&a));
            }
        }
    }

    #[test]
    fn test_idempotent_on_equal_inputs() {
        for a in samples() {
            assert_eq!(a.union(&a), a);
            assert_eq!(a.intersection(&a), a);
            assert!(a.difference(&a).is_empty());
        }
    }

    #[test]
    fn test_filter_is_sorted_and_order_independent() {
        let pattern = TagPattern::compile("glob:8*").unwrap();
        let forward: TagSet = vec!["9.0", "8.2", "8.1"].into_iter().collect();
        let backward: TagSet = vec!["8.1", "8.2", "9.0"].into_iter().collect();

        let filtered = forward.filter(&pattern);
        assert_eq!(filtered, backward.filter(&pattern));
        assert_eq!(filtered.to_vec(), vec!["8.1", "8.2"]);
    }

    #[test]
    fn test_filter_with_closure() {
        let tags = set(&["alpha", "beta", "gamma"]);
        let filtered = tags.filter(&|tag: &str| tag.len() == 5);
        assert_eq!(filtered, set(&["alpha", "gamma"]));
    }

    #[test]
    fn test_serialize_as_sorted_list() {
        let tags = set(&["b", "a"]);
        assert_eq!(serde_json::to_string(&tags).unwrap(), r#"["a","b"]"#);
        let back: TagSet = serde_json::from_str(r#"["b","a","b"]"#).unwrap();
        assert_eq!(back, tags);
    }

    #[test]
    fn test_display() {
        assert_eq!(set(&["8.2", "8.1"]).to_string(), "[8.1, 8.2]");
        assert_eq!(TagSet::new().to_string(), "[]");
    }
}
