//! Tracks which transactions have already been counted.
//!
//! TonAPI has no cursor that we can hand back to it, so we remember the identifier of the newest
//! incoming transaction we have counted (the watermark) and scan pages newest-first until we see
//! it again.

use crate::model::{CursorState, Transaction};

/// Decides, one transaction at a time during a cycle, whether a transaction still needs to be
/// counted, and collects the candidate for the next watermark.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    committed: Option<String>,
    candidate: Option<String>,
    stopped: bool,
}

impl CursorTracker {
    /// Creates a tracker that filters against the watermark in `state`.
    pub fn new(state: &CursorState) -> Self {
        Self {
            committed: state.last_seen_tx_id().map(String::from),
            candidate: None,
            stopped: false,
        }
    }

    /// Returns `false` for the watermark transaction and for every transaction after it. Once the
    /// watermark has been seen the scan is over and `stopped` returns `true`.
    pub fn is_new(&mut self, tx: &Transaction) -> bool {
        if self.stopped {
            return false;
        }
        match (self.committed.as_deref(), tx.id()) {
            (Some(watermark), Some(id)) if watermark == id => {
                self.stopped = true;
                false
            }
            _ => true,
        }
    }

    /// Records `tx` as the candidate watermark if it is the first transaction with an identifier
    /// that has been observed in this cycle.
    pub fn observe(&mut self, tx: &Transaction) {
        if self.candidate.is_none() {
            self.candidate = tx.id().map(String::from);
        }
    }

    /// Whether the watermark has been reached.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn watermark(&self) -> Option<&str> {
        self.committed.as_deref()
    }

    /// Writes the candidate into `state`. Does nothing if there is no candidate. Returns `true` if
    /// the watermark changed.
    pub fn commit(&mut self, state: &mut CursorState) -> bool {
        let Some(candidate) = self.candidate.take() else {
            return false;
        };
        let changed = state.last_seen_tx_id() != Some(candidate.as_str());
        self.committed = Some(candidate.clone());
        state.last_seen_tx_id = Some(candidate);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> Transaction {
        Transaction::incoming(id, 0, 1, None)
    }

    #[test]
    fn test_no_watermark_filters_nothing() {
        let mut tracker = CursorTracker::new(&CursorState::default());
        assert!(tracker.is_new(&tx("t3")));
        assert!(tracker.is_new(&tx("t2")));
        assert!(!tracker.stopped());
    }

    #[test]
    fn test_stops_at_watermark() {
        let mut tracker = CursorTracker::new(&CursorState::new(Some("t2".into())));
        assert!(tracker.is_new(&tx("t4")));
        assert!(tracker.is_new(&tx("t3")));
        assert!(!tracker.is_new(&tx("t2")));
        assert!(tracker.stopped());
        // anything older than the watermark is already counted
        assert!(!tracker.is_new(&tx("t1")));
    }

    #[test]
    fn test_transaction_without_id_is_new() {
        let mut tracker = CursorTracker::new(&CursorState::new(Some("t2".into())));
        assert!(tracker.is_new(&Transaction::default()));
    }

    #[test]
    fn test_candidate_is_first_observed() {
        let mut tracker = CursorTracker::default();
        tracker.observe(&Transaction::default());
        tracker.observe(&tx("t3"));
        tracker.observe(&tx("t2"));
        assert_eq!(tracker.candidate(), Some("t3"));
    }

    #[test]
    fn test_commit() {
        let mut state = CursorState::new(Some("t1".into()));
        let mut tracker = CursorTracker::new(&state);
        tracker.observe(&tx("t3"));
        assert!(tracker.commit(&mut state));
        assert_eq!(state.last_seen_tx_id(), Some("t3"));
        assert_eq!(tracker.watermark(), Some("t3"));
    }

    #[test]
    fn test_commit_without_candidate_keeps_watermark() {
        let mut state = CursorState::new(Some("t1".into()));
        let mut tracker = CursorTracker::new(&state);
        assert!(!tracker.commit(&mut state));
        assert_eq!(state.last_seen_tx_id(), Some("t1"));
    }

    #[test]
    fn test_commit_same_candidate_is_not_a_change() {
        let mut state = CursorState::new(Some("t3".into()));
        let mut tracker = CursorTracker::new(&state);
        tracker.observe(&tx("t3"));
        assert!(!tracker.commit(&mut state));
        assert_eq!(state.last_seen_tx_id(), Some("t3"));
    }
}
