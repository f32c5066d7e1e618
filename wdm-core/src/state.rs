//! Subscription client states and roles.
//!
//! States are totally ordered; the client's lifecycle predicates are range
//! checks over that order, so the declaration order below is significant.

use std::fmt;

/// Lifecycle state of a subscription client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ClientState {
    /// In the pool, not assigned to anything.
    #[default]
    Free,
    /// Binding and catalog assigned; no subscription.
    Initialized,
    /// Subscribe request sent, nothing heard yet.
    Subscribing,
    /// Subscription id known, confirmation outstanding.
    SubscribingIdAssigned,
    /// Established, no exchange outstanding.
    EstablishedIdle,
    /// Established, a notification is being processed.
    EstablishedConfirming,
    /// Cancel request sent.
    Canceling,
    /// Waiting before the next subscribe attempt.
    ResubscribeHoldoff,
    /// Tearing down.
    Aborting,
}

impl ClientState {
    /// Create a client state in the Free state.
    pub fn new() -> Self {
        Self::Free
    }

    /// Check if a subscription is being set up or is established.
    pub fn is_in_progress_or_established(&self) -> bool {
        (Self::Subscribing..=Self::EstablishedConfirming).contains(self)
    }

    /// Check if the subscription is established.
    pub fn is_established(&self) -> bool {
        (Self::EstablishedIdle..=Self::EstablishedConfirming).contains(self)
    }

    /// Check if data sinks must be told that no more data will arrive when
    /// the subscription ends from this state.
    pub fn notifies_sinks_on_abort(&self) -> bool {
        (Self::Subscribing..=Self::Canceling).contains(self)
    }

    /// Check if the subscription timer may fire in this state.
    pub fn accepts_timer_tick(&self) -> bool {
        (Self::Subscribing..=Self::ResubscribeHoldoff).contains(self)
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Initialized => "INIT",
            Self::Subscribing => "SReq1",
            Self::SubscribingIdAssigned => "SReq2",
            Self::EstablishedIdle => "ALIVE",
            Self::EstablishedConfirming => "CONFM",
            Self::Canceling => "CANCL",
            Self::ResubscribeHoldoff => "RETRY",
            Self::Aborting => "ABORT",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role the application chose for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientConfig {
    /// No subscription desired.
    #[default]
    Down,
    /// The client subscribes to a peer.
    Initiator,
    /// The client accepts a subscription driven by the peer.
    CounterSubscriber,
}
