//! Liveness timer discipline for established subscriptions.
//!
//! The timer is one-shot. It is armed on every transition into idle; inbound
//! activity only moves the reference point, and the next firing computes how
//! much of the window is left. This keeps a single pending timer per
//! subscription no matter how much traffic arrives.

use std::time::{Duration, Instant};

/// Outcome of a liveness timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessCheck {
    /// No activity within the window; the subscription is presumed dead.
    Expired,
    /// Arm the timer again with this delay.
    Rearm(Duration),
    /// The timer was disarmed; ignore this firing.
    Stale,
}

/// Liveness state of one subscription.
#[derive(Debug, Clone)]
pub struct LivenessTimer {
    window: Option<Duration>,
    last_activity: Option<Instant>,
    armed: bool,
}

impl LivenessTimer {
    /// Create a disarmed timer with the given window. A zero window disables
    /// liveness checking.
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window: window.filter(|w| !w.is_zero()),
            last_activity: None,
            armed: false,
        }
    }

    /// The configured window.
    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Replace the window. Takes effect at the next arm or firing.
    pub fn set_window(&mut self, window: Option<Duration>) {
        self.window = window.filter(|w| !w.is_zero());
    }

    /// Check whether a firing is expected.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the timer from `now`. Returns the delay to schedule, or `None`
    /// when liveness checking is disabled.
    pub fn arm(&mut self, now: Instant) -> Option<Duration> {
        let window = self.window?;
        self.last_activity = Some(now);
        self.armed = true;
        Some(window)
    }

    /// Record inbound activity.
    pub fn indicate_activity(&mut self, now: Instant) {
        if self.armed {
            self.last_activity = Some(now);
        }
    }

    /// Disarm; a later firing reports [`LivenessCheck::Stale`].
    pub fn disarm(&mut self) {
        self.armed = false;
        self.last_activity = None;
    }

    /// Evaluate a firing at `now`.
    ///
    /// While not idle an exchange is outstanding with its own, shorter,
    /// response timeout, so the check is postponed by a full window.
    pub fn on_fire(&mut self, now: Instant, idle: bool) -> LivenessCheck {
        let (Some(window), Some(last)) = (self.window, self.last_activity) else {
            return LivenessCheck::Stale;
        };
        if !self.armed {
            return LivenessCheck::Stale;
        }
        if !idle {
            return LivenessCheck::Rearm(window);
        }
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= window {
            self.disarm();
            LivenessCheck::Expired
        } else {
            LivenessCheck::Rearm(window - elapsed)
        }
    }
}
