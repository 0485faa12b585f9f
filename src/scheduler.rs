//! Activity-aware polling scheduler.
//!
//! Each named loop is a single self-rescheduling timer: run the step, read
//! the activity signal, compute the next delay, sleep, repeat. The delay for
//! iteration n+1 is computed only after iteration n completes, so a change
//! in engagement is picked up at the next firing, never mid-wait.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::activity::{ActivitySignal, ActivitySnapshot};
use crate::config::duration_ms;
use crate::error::{TrackerError, TrackerResult};

/// Poll interval tiers keyed on tab visibility and idle time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCadence {
    /// Interval while the tab is hidden.
    #[serde(with = "duration_ms")]
    pub hidden: Duration,
    /// Interval while the operator is actively interacting.
    #[serde(with = "duration_ms")]
    pub active: Duration,
    /// Interval after a short idle period.
    #[serde(with = "duration_ms")]
    pub recent: Duration,
    /// Interval once the operator has gone idle.
    #[serde(with = "duration_ms")]
    pub idle: Duration,
    /// Idle time below which the operator counts as active.
    #[serde(with = "duration_ms")]
    pub active_window: Duration,
    /// Idle time below which the operator counts as recently active.
    #[serde(with = "duration_ms")]
    pub recent_window: Duration,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            hidden: Duration::from_millis(30_000),
            active: Duration::from_millis(1_500),
            recent: Duration::from_millis(3_000),
            idle: Duration::from_millis(10_000),
            active_window: Duration::from_millis(5_000),
            recent_window: Duration::from_millis(30_000),
        }
    }
}

impl PollCadence {
    /// Delay before the next poll given a snapshot taken at `now`.
    #[must_use]
    pub fn interval_at(&self, snapshot: &ActivitySnapshot, now: DateTime<Utc>) -> Duration {
        if !snapshot.tab_visible {
            return self.hidden;
        }

        let idle = Duration::from_millis(snapshot.idle_millis(now).unsigned_abs());
        if idle < self.active_window {
            self.active
        } else if idle < self.recent_window {
            self.recent
        } else {
            self.idle
        }
    }

    /// Delay before the next poll, measured against the wall clock.
    #[must_use]
    pub fn interval_now(&self, snapshot: &ActivitySnapshot) -> Duration {
        self.interval_at(snapshot, Utc::now())
    }

    /// Validate that every tier is non-zero and the windows are ordered.
    ///
    /// # Errors
    /// Returns an error describing the first inconsistent value.
    pub fn validate(&self) -> TrackerResult<()> {
        let tiers = [
            ("hidden", self.hidden),
            ("active", self.active),
            ("recent", self.recent),
            ("idle", self.idle),
        ];
        for (name, value) in tiers {
            if value.is_zero() {
                return Err(TrackerError::Config(format!(
                    "cadence.{name} must be > 0"
                )));
            }
        }

        if self.active_window >= self.recent_window {
            return Err(TrackerError::Config(
                "cadence.active_window must be shorter than cadence.recent_window".to_string(),
            ));
        }

        Ok(())
    }
}

/// Named poll loops owned by a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollLoop {
    /// Conversation list refresh; runs for the whole session.
    ChatList,
    /// Message refresh for the selected conversation.
    Messages,
}

impl fmt::Display for PollLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChatList => f.write_str("chat_list"),
            Self::Messages => f.write_str("messages"),
        }
    }
}

/// Stop flag plus wake-up for a sleeping loop.
#[derive(Debug, Default)]
struct LoopStop {
    stopped: AtomicBool,
    notify: Notify,
}

impl LoopStop {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // notify_one keeps a permit if the loop is busy inside its step.
        self.notify.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

struct LoopHandle {
    stop: Arc<LoopStop>,
    task: JoinHandle<()>,
}

/// Owner of the running poll loops.
pub struct PollScheduler {
    signal: Arc<ActivitySignal>,
    cadence: PollCadence,
    loops: DashMap<PollLoop, LoopHandle>,
}

impl PollScheduler {
    /// Create a scheduler reading engagement from `signal`.
    #[must_use]
    pub fn new(signal: Arc<ActivitySignal>, cadence: PollCadence) -> Self {
        Self {
            signal,
            cadence,
            loops: DashMap::new(),
        }
    }

    /// Start `name`, running `step` immediately and then on every tick.
    ///
    /// A loop already registered under `name` is stopped first.
    pub fn start<F, Fut>(&self, name: PollLoop, step: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop(name);

        let stop = Arc::new(LoopStop::default());
        let task = tokio::spawn(drive(
            name,
            step,
            Arc::clone(&self.signal),
            self.cadence,
            Arc::clone(&stop),
        ));

        info!(loop = %name, "Poll loop started");
        self.loops.insert(name, LoopHandle { stop, task });
    }

    /// Stop `name`. Stopping a loop that is not running is a no-op.
    ///
    /// A step already in flight is allowed to finish; the loop exits
    /// afterwards without rescheduling.
    pub fn stop(&self, name: PollLoop) {
        if let Some((_, handle)) = self.loops.remove(&name) {
            handle.stop.stop();
            debug!(loop = %name, finished = handle.task.is_finished(), "Poll loop stopped");
        }
    }

    /// Stop every loop.
    pub fn stop_all(&self) {
        let names: Vec<PollLoop> = self.loops.iter().map(|entry| *entry.key()).collect();
        for name in names {
            self.stop(name);
        }
    }

    /// Whether a loop instance is registered under `name`.
    #[must_use]
    pub fn is_running(&self, name: PollLoop) -> bool {
        self.loops.contains_key(&name)
    }

    /// Number of registered loops.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.loops.len()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn drive<F, Fut>(
    name: PollLoop,
    step: F,
    signal: Arc<ActivitySignal>,
    cadence: PollCadence,
    stop: Arc<LoopStop>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut iteration: u64 = 0;

    loop {
        if stop.is_stopped() {
            break;
        }

        step().await;
        iteration += 1;

        if stop.is_stopped() {
            break;
        }

        let delay = cadence.interval_now(&signal.snapshot());
        debug!(
            loop = %name,
            iteration,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Rescheduling poll loop"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = stop.notify.notified() => {}
        }
    }

    debug!(loop = %name, iteration, "Poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::TimeDelta;

    fn snapshot_at(idle_ms: i64, visible: bool) -> (ActivitySnapshot, DateTime<Utc>) {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let snapshot = ActivitySnapshot {
            last_interaction: now - TimeDelta::milliseconds(idle_ms),
            tab_visible: visible,
        };
        (snapshot, now)
    }

    fn interval(idle_ms: i64, visible: bool) -> u128 {
        let (snapshot, now) = snapshot_at(idle_ms, visible);
        PollCadence::default().interval_at(&snapshot, now).as_millis()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn hidden_scheduler() -> PollScheduler {
        let signal = Arc::new(ActivitySignal::starting_at(Utc::now(), false));
        PollScheduler::new(signal, PollCadence::default())
    }

    #[test]
    fn test_cadence_table() {
        assert_eq!(interval(0, true), 1_500);
        assert_eq!(interval(4_999, true), 1_500);
        assert_eq!(interval(5_000, true), 3_000);
        assert_eq!(interval(29_999, true), 3_000);
        assert_eq!(interval(30_000, true), 10_000);
        assert_eq!(interval(600_000, true), 10_000);
    }

    #[test]
    fn test_cadence_hidden_ignores_idle_time() {
        for idle in [0, 5_000, 30_000, 3_600_000] {
            assert_eq!(interval(idle, false), 30_000);
        }
    }

    #[test]
    fn test_cadence_future_interaction_counts_as_active() {
        assert_eq!(interval(-2_000, true), 1_500);
    }

    #[test]
    fn test_cadence_validation() {
        assert!(PollCadence::default().validate().is_ok());

        let zero = PollCadence {
            active: Duration::ZERO,
            ..PollCadence::default()
        };
        assert!(zero.validate().is_err());

        let inverted = PollCadence {
            active_window: Duration::from_secs(60),
            ..PollCadence::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_immediately_then_on_cadence() {
        let scheduler = hidden_scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        scheduler.start(PollLoop::ChatList, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(29_000)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timer_and_is_idempotent() {
        let scheduler = hidden_scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        scheduler.start(PollLoop::Messages, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        assert!(scheduler.is_running(PollLoop::Messages));

        scheduler.stop(PollLoop::Messages);
        scheduler.stop(PollLoop::Messages);
        assert!(!scheduler.is_running(PollLoop::Messages));

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_instance() {
        let scheduler = hidden_scheduler();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        scheduler.start(PollLoop::Messages, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;

        let replacement = Arc::clone(&second);
        scheduler.start(PollLoop::Messages, move || {
            let counter = Arc::clone(&replacement);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        assert_eq!(scheduler.running_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_and_independent_loops() {
        let scheduler = hidden_scheduler();
        scheduler.start(PollLoop::ChatList, || async {});
        scheduler.start(PollLoop::Messages, || async {});
        assert_eq!(scheduler.running_count(), 2);

        scheduler.stop(PollLoop::Messages);
        assert!(scheduler.is_running(PollLoop::ChatList));

        scheduler.stop_all();
        assert_eq!(scheduler.running_count(), 0);
    }
}
