//! In-memory continuation tracking
//!
//! One [`ContinuationStore`] belongs to one worker. Tokens are keyed by the
//! exact partition range id, never copied between ranges and dropped when a
//! range disappears from the catalog. Nothing is persisted: a restarted run
//! begins again from its start policy.

use std::collections::HashMap;

/// Last-seen continuation per partition range
#[derive(Debug, Clone, Default)]
pub struct ContinuationStore {
    tokens: HashMap<String, String>,
}

impl ContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuation for `range_id`, if a page was ever read for it
    pub fn get(&self, range_id: &str) -> Option<&str> {
        self.tokens.get(range_id).map(String::as_str)
    }

    /// Overwrite the continuation for `range_id`
    pub fn set(&mut self, range_id: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(range_id.into(), token.into());
    }

    /// Drop tokens whose range is not in `known_ids`, returning how many were dropped
    pub fn retain<'a>(&mut self, known_ids: impl IntoIterator<Item = &'a str>) -> usize {
        let known: std::collections::HashSet<&str> = known_ids.into_iter().collect();
        let before = self.tokens.len();
        self.tokens.retain(|id, _| known.contains(id.as_str()));
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Copy of the current mapping
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.tokens.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let mut store = ContinuationStore::new();
        assert!(store.get("0").is_none());

        store.set("0", "c1");
        assert_eq!(store.get("0"), Some("c1"));

        store.set("0", "c2");
        assert_eq!(store.get("0"), Some("c2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retain_drops_vanished_ranges() {
        let mut store = ContinuationStore::new();
        store.set("0", "a");
        store.set("1", "b");
        store.set("2", "c");

        // range 1 split into 3 and 4
        let dropped = store.retain(["0", "2", "3", "4"]);
        assert_eq!(dropped, 1);
        assert_eq!(store.get("0"), Some("a"));
        assert_eq!(store.get("2"), Some("c"));
        assert!(store.get("1").is_none());
        assert!(store.get("3").is_none());
    }

    #[test]
    fn test_retain_nothing_known() {
        let mut store = ContinuationStore::new();
        store.set("0", "a");
        assert_eq!(store.retain(std::iter::empty()), 1);
        assert!(store.is_empty());
    }
}
