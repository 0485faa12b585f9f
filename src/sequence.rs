//! Request sequence numbers for discarding out-of-order responses.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic request counter with a high-water mark of applied responses.
///
/// Every fetch draws a number with [`RequestSequencer::issue`] before it goes
/// out; when the response lands, [`RequestSequencer::try_accept`] admits it
/// only if nothing newer has been applied yet.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RequestSequencer {
    /// Create an empty sequencer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    /// Draw the next request number.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Admit the response for `seq` if it is newer than every applied one.
    pub fn try_accept(&self, seq: u64) -> bool {
        self.applied.fetch_max(seq, Ordering::AcqRel) < seq
    }

    /// Highest response number applied so far.
    #[must_use]
    pub fn last_applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_response_is_rejected() {
        let sequencer = RequestSequencer::new();
        let first = sequencer.issue();
        let second = sequencer.issue();

        assert!(sequencer.try_accept(second));
        assert!(!sequencer.try_accept(first));
        assert_eq!(sequencer.last_applied(), second);
    }

    #[test]
    fn test_in_order_responses_are_accepted() {
        let sequencer = RequestSequencer::new();
        for _ in 0..3 {
            let seq = sequencer.issue();
            assert!(sequencer.try_accept(seq));
        }
        assert_eq!(sequencer.last_applied(), 3);
    }

    #[test]
    fn test_duplicate_response_is_rejected() {
        let sequencer = RequestSequencer::new();
        let seq = sequencer.issue();
        assert!(sequencer.try_accept(seq));
        assert!(!sequencer.try_accept(seq));
    }
}
