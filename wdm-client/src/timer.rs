//! Timer service seam.
//!
//! A client owns at most one timer of each [`TimerKind`]. Starting a timer
//! that is already armed replaces it. Expiry is delivered back through
//! [`crate::SubscriptionClient::on_timer`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The timers a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Subscribing inactivity, liveness, or resubscribe holdoff; only one is
    /// ever needed at a time.
    Subscription,
    /// Delay before an update is sent again.
    UpdateRetry,
}

/// Clock and one-shot timers.
pub trait TimerService: Send + Sync {
    /// Arm (or re-arm) a timer.
    fn start(&self, kind: TimerKind, delay: Duration);

    /// Disarm a timer. No-op when not armed.
    fn cancel(&self, kind: TimerKind);

    /// Current time.
    fn now(&self) -> Instant;
}

/// Shared timer handle.
pub type TimerRef = Arc<dyn TimerService>;

#[derive(Debug)]
struct ManualClock {
    now: Instant,
    armed: HashMap<TimerKind, Instant>,
}

/// Hand-driven timers for tests.
///
/// Time only moves through [`ManualTimers::advance`], which returns the
/// timers that came due so the test can deliver them to the client.
#[derive(Debug, Clone)]
pub struct ManualTimers {
    inner: Arc<Mutex<ManualClock>>,
}

impl ManualTimers {
    /// Create a clock starting now with nothing armed.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClock {
                now: Instant::now(),
                armed: HashMap::new(),
            })),
        }
    }

    /// Move time forward. Returns the timers that expired, earliest first;
    /// they are disarmed.
    pub fn advance(&self, by: Duration) -> Vec<TimerKind> {
        let mut inner = self.inner.lock().unwrap();
        inner.now += by;
        let now = inner.now;
        let mut due: Vec<(Instant, TimerKind)> = inner
            .armed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, deadline)| (*deadline, *kind))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, kind) in &due {
            inner.armed.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }

    /// Deadline of an armed timer.
    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.armed.get(&kind).copied()
    }

    /// Delay left on an armed timer.
    pub fn remaining(&self, kind: TimerKind) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        inner
            .armed
            .get(&kind)
            .map(|deadline| deadline.saturating_duration_since(inner.now))
    }

    /// Check whether a timer is armed.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadline(kind).is_some()
    }
}

impl Default for ManualTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ManualTimers {
    fn start(&self, kind: TimerKind, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let deadline = inner.now + delay;
        inner.armed.insert(kind, deadline);
    }

    fn cancel(&self, kind: TimerKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.armed.remove(&kind);
    }

    fn now(&self) -> Instant {
        let inner = self.inner.lock().unwrap();
        inner.now
    }
}
