//! Pending and retry bookkeeping for the scan loop.

use std::collections::BTreeSet;

/// Ids known remotely but not yet stored, plus their retry grace.
///
/// `retry ⊆ pending` holds between cycles. Each id gets the cycle in which
/// it first fails and exactly one more; an id that was in `retry` when a
/// cycle started is dropped at the end of that cycle whatever happened.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Backlog {
    pending: BTreeSet<String>,
    retry: BTreeSet<String>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &BTreeSet<String> {
        &self.pending
    }

    pub fn retry(&self) -> &BTreeSet<String> {
        &self.retry
    }

    /// Installs the pending set produced by a completed cycle and reconciles
    /// the retry set against it.
    ///
    /// Returns the ids abandoned for good: those whose grace cycle just
    /// ended without a stored copy.
    pub fn commit(&mut self, pending: BTreeSet<String>) -> Vec<String> {
        self.pending = pending;

        let mut abandoned = Vec::new();
        for id in std::mem::take(&mut self.retry) {
            if self.pending.remove(&id) {
                abandoned.push(id);
            }
        }

        self.retry = self.pending.clone();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_first_failure_grants_one_retry() {
        let mut backlog = Backlog::new();

        let abandoned = backlog.commit(set(&["a"]));

        assert!(abandoned.is_empty());
        assert_eq!(backlog.pending(), &set(&["a"]));
        assert_eq!(backlog.retry(), &set(&["a"]));
    }

    #[test]
    fn test_second_failure_abandons() {
        let mut backlog = Backlog::new();
        backlog.commit(set(&["a"]));

        let abandoned = backlog.commit(set(&["a", "b"]));

        assert_eq!(abandoned, vec!["a".to_string()]);
        assert_eq!(backlog.pending(), &set(&["b"]));
        assert_eq!(backlog.retry(), &set(&["b"]));
    }

    #[test]
    fn test_success_in_grace_cycle_is_not_abandoned() {
        let mut backlog = Backlog::new();
        backlog.commit(set(&["a", "b"]));

        let abandoned = backlog.commit(set(&["b"]));

        assert_eq!(abandoned, vec!["b".to_string()]);
        assert!(backlog.pending().is_empty());
        assert!(backlog.retry().is_empty());
    }

    #[test]
    fn test_dropped_id_returns_with_fresh_budget() {
        let mut backlog = Backlog::new();
        backlog.commit(set(&["a"]));
        backlog.commit(set(&["a"]));
        assert!(backlog.pending().is_empty());

        let abandoned = backlog.commit(set(&["a"]));

        assert!(abandoned.is_empty());
        assert_eq!(backlog.pending(), &set(&["a"]));
    }

    #[test]
    fn test_retry_stays_subset_of_pending() {
        let mut backlog = Backlog::new();
        let rounds = [set(&["a", "b"]), set(&["b", "c"]), set(&["c", "d", "e"]), set(&[])];

        for round in rounds {
            backlog.commit(round);
            assert!(backlog.retry().is_subset(backlog.pending()));
        }
    }
}
