//! Operator engagement signal.
//!
//! Pure state: input recency and tab visibility. The scheduler reads a
//! snapshot whenever it needs the next delay; nothing subscribes to changes.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Point-in-time copy of the activity signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Last time the operator produced input.
    pub last_interaction: DateTime<Utc>,
    /// Whether the operator's view is currently visible.
    pub tab_visible: bool,
}

impl ActivitySnapshot {
    /// Milliseconds elapsed since the last interaction, clamped at zero.
    #[must_use]
    pub fn idle_millis(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_interaction).num_milliseconds().max(0)
    }
}

/// Lock-free activity signal shared by the session and its poll loops.
#[derive(Debug)]
pub struct ActivitySignal {
    last_interaction_ms: AtomicI64,
    tab_visible: AtomicBool,
}

impl Default for ActivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySignal {
    /// Create a signal that counts "now" as the last interaction, visible.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now(), true)
    }

    /// Create a signal with explicit initial values.
    #[must_use]
    pub fn starting_at(last_interaction: DateTime<Utc>, tab_visible: bool) -> Self {
        Self {
            last_interaction_ms: AtomicI64::new(last_interaction.timestamp_millis()),
            tab_visible: AtomicBool::new(tab_visible),
        }
    }

    /// Record operator input at the current time.
    pub fn record_interaction(&self) {
        self.record_interaction_at(Utc::now());
    }

    /// Record operator input at `at`.
    pub fn record_interaction_at(&self, at: DateTime<Utc>) {
        self.last_interaction_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    /// Update tab visibility.
    pub fn set_visible(&self, visible: bool) {
        self.tab_visible.store(visible, Ordering::Release);
    }

    /// Read the current state.
    #[must_use]
    pub fn snapshot(&self) -> ActivitySnapshot {
        let millis = self.last_interaction_ms.load(Ordering::Acquire);
        ActivitySnapshot {
            last_interaction: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            tab_visible: self.tab_visible.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_record_interaction_updates_snapshot() {
        let start = DateTime::from_timestamp_millis(1_000).unwrap();
        let signal = ActivitySignal::starting_at(start, true);

        let later = start + TimeDelta::milliseconds(4_500);
        signal.record_interaction_at(later);

        let snapshot = signal.snapshot();
        assert_eq!(snapshot.last_interaction, later);
        assert!(snapshot.tab_visible);
    }

    #[test]
    fn test_visibility_toggle() {
        let signal = ActivitySignal::new();
        signal.set_visible(false);
        assert!(!signal.snapshot().tab_visible);
        signal.set_visible(true);
        assert!(signal.snapshot().tab_visible);
    }

    #[test]
    fn test_idle_millis_clamps_clock_skew() {
        let at = DateTime::from_timestamp_millis(10_000).unwrap();
        let snapshot = ActivitySnapshot {
            last_interaction: at,
            tab_visible: true,
        };
        assert_eq!(snapshot.idle_millis(at + TimeDelta::milliseconds(250)), 250);
        assert_eq!(snapshot.idle_millis(at - TimeDelta::milliseconds(250)), 0);
    }
}
