//! Exclusivity classification and scope keys.

use std::collections::HashSet;
use std::fmt;

use crate::scheduler::collection::Collection;

/// Display prefix for scopes that hold a single exclusive item.
pub const EXCLUSIVE_SCOPE_PREFIX: &str = "-exclusive-test-";

/// Separator between file, class and test parts of an item identifier.
pub const SCOPE_SEPARATOR: &str = "::";

/// Identifiers that must run alone on a worker.
///
/// Keeps the listed order for diagnostics and a hash set for lookups.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveSet {
    ordered: Vec<String>,
    members: HashSet<String>,
}

impl ExclusiveSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for id in ids {
            let id = id.into();
            if set.members.insert(id.clone()) {
                set.ordered.push(id);
            }
        }
        set
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the line-based list format: one identifier per line, blank lines
    /// and `#` comments skipped.
    pub fn parse(contents: &str) -> Self {
        Self::new(crate::source::parse_lines(contents))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    /// Indices of exclusive items present in `collection`, in collection order.
    /// Entries that were not collected are ignored.
    pub fn indices_in(&self, collection: &Collection) -> Vec<usize> {
        collection
            .iter()
            .enumerate()
            .filter(|(_, id)| self.contains(id))
            .map(|(index, _)| index)
            .collect()
    }

    /// Entries of the list that the collection does not contain.
    pub fn missing_from<'a>(&'a self, collection: &'a Collection) -> Vec<&'a str> {
        self.iter()
            .filter(|id| collection.index_of(id).is_none())
            .collect()
    }
}

/// File part of an identifier: everything before the first separator.
fn file_of(id: &str) -> &str {
    id.split(SCOPE_SEPARATOR).next().unwrap_or(id)
}

/// Grouping key of a work item.
///
/// Exclusive items get their own variant so they can never share a key with
/// an ordinary group, whatever the identifiers look like.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Exclusive(String),
    Group(String),
}

impl ScopeKey {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, ScopeKey::Exclusive(_))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Exclusive(id) => write!(f, "{}{}{}", EXCLUSIVE_SCOPE_PREFIX, SCOPE_SEPARATOR, id),
            ScopeKey::Group(group) => write!(f, "{}", group),
        }
    }
}

/// Answers "is this item exclusive" and "which scope does it belong to".
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    exclusive: ExclusiveSet,
}

impl Classifier {
    pub fn new(exclusive: ExclusiveSet) -> Self {
        Self { exclusive }
    }

    pub fn exclusive(&self) -> &ExclusiveSet {
        &self.exclusive
    }

    pub fn is_exclusive(&self, id: &str) -> bool {
        self.exclusive.contains(id)
    }

    /// Exclusive items are their own scope; everything else is grouped by file.
    pub fn scope_of(&self, id: &str) -> ScopeKey {
        if self.is_exclusive(id) {
            ScopeKey::Exclusive(id.to_string())
        } else {
            ScopeKey::Group(file_of(id).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_lines_and_comments() {
        let set = ExclusiveSet::parse(
            "# slow tests\n\ntest_a.py::test_one\n   \n  test_b.py::test_two  \n#test_c\n",
        );
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec!["test_a.py::test_one", "test_b.py::test_two"]
        );
    }

    #[test]
    fn new_deduplicates_keeping_first_order() {
        let set = ExclusiveSet::new(["b", "a", "b"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn groups_by_first_separator() {
        let classifier = Classifier::new(ExclusiveSet::empty());
        assert_eq!(
            classifier.scope_of("tests/test_x.py::TestA::test_one"),
            ScopeKey::Group("tests/test_x.py".to_string())
        );
        assert_eq!(
            classifier.scope_of("plain_id"),
            ScopeKey::Group("plain_id".to_string())
        );
    }

    #[test]
    fn classes_in_one_file_share_a_scope() {
        let classifier = Classifier::new(ExclusiveSet::empty());
        assert_eq!(
            classifier.scope_of("t/a.py::TestA::t1"),
            ScopeKey::Group("t/a.py".to_string())
        );
        assert_eq!(
            classifier.scope_of("t/a.py::TestB::t1"),
            classifier.scope_of("t/a.py::TestA::t1")
        );
    }

    #[test]
    fn exclusive_items_get_their_own_scope() {
        let classifier = Classifier::new(ExclusiveSet::new(["test_x.py::test_slow"]));
        let key = classifier.scope_of("test_x.py::test_slow");
        assert!(key.is_exclusive());
        assert_eq!(key.to_string(), "-exclusive-test-::test_x.py::test_slow");
        assert_ne!(key, classifier.scope_of("test_x.py::test_fast"));
    }

    #[test]
    fn exclusive_key_cannot_collide_with_lookalike_group() {
        let classifier = Classifier::new(ExclusiveSet::new(["t"]));
        let lookalike = ScopeKey::Group("-exclusive-test-::t".to_string());
        let exclusive = classifier.scope_of("t");
        assert_eq!(lookalike.to_string(), exclusive.to_string());
        assert_ne!(lookalike, exclusive);
    }
}
