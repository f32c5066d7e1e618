//! Callback contract toward the application.
//!
//! The client reports everything through one synchronous callback,
//! [`EventSink::on_event`], called from inside client operations. Each event
//! carries only its own parameters. Some events expect output, written to the
//! [`OutEventParam`] passed alongside.
//!
//! A callback cannot call back into the client that is dispatching to it.
//! Instead it returns a [`Directive`], which the client applies once the
//! callback has returned. `Directive::Free` is honoured only for events where
//! [`InEventParam::permits_free`] holds; elsewhere it is logged and ignored.

use std::fmt;
use std::time::Duration;
use wdm_types::{
    EventRecord, ExchangeId, LastObservedEvent, NotificationRequest, StatusReport, SubscriptionId,
    TraitPath, VersionedTraitPath,
};

use crate::error::ClientError;

/// Event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    /// See [`InEventParam::SubscriptionTerminated`].
    SubscriptionTerminated,
    /// See [`InEventParam::ExchangeStart`].
    ExchangeStart,
    /// See [`InEventParam::SubscribeRequestPrepareNeeded`].
    SubscribeRequestPrepareNeeded,
    /// See [`InEventParam::SubscriptionEstablished`].
    SubscriptionEstablished,
    /// See [`InEventParam::NotificationRequest`].
    NotificationRequest,
    /// See [`InEventParam::NotificationProcessed`].
    NotificationProcessed,
    /// See [`InEventParam::EventStreamReceived`].
    EventStreamReceived,
    /// See [`InEventParam::SubscriptionActivity`].
    SubscriptionActivity,
    /// See [`InEventParam::UpdateComplete`].
    UpdateComplete,
    /// See [`InEventParam::NoMorePendingUpdates`].
    NoMorePendingUpdates,
}

/// Input parameters of an event.
#[derive(Debug)]
pub enum InEventParam<'a> {
    /// The subscription ended.
    SubscriptionTerminated {
        /// Why, if it was not a clean end.
        reason: Option<ClientError>,
        /// Status report received from the peer, if any.
        status: Option<StatusReport>,
        /// Whether the client will resubscribe after a holdoff.
        will_retry: bool,
    },
    /// An exchange was allocated. Only the response timeout may be tuned.
    ExchangeStart {
        /// The new exchange.
        exchange: ExchangeId,
        /// Response timeout for requests on it.
        response_timeout: &'a mut Duration,
    },
    /// Subscribe request parameters are needed. Answer with
    /// [`OutEventParam::SubscribeRequestPrepared`].
    SubscribeRequestPrepareNeeded {
        /// Consecutive failed attempts before this one.
        retry_count: u32,
    },
    /// The subscription is established.
    SubscriptionEstablished {
        /// Id assigned by the publisher.
        subscription_id: SubscriptionId,
        /// Liveness timeout in effect.
        liveness_timeout: Option<Duration>,
    },
    /// A notification arrived and is about to be applied.
    NotificationRequest {
        /// The notification.
        notification: &'a NotificationRequest,
    },
    /// A notification was applied and acknowledged.
    NotificationProcessed {
        /// The notification.
        notification: &'a NotificationRequest,
    },
    /// Events arrived in a notification.
    EventStreamReceived {
        /// The events, in order.
        events: &'a [EventRecord],
    },
    /// Traffic was seen on the subscription.
    SubscriptionActivity,
    /// An updated path was accepted or given up on.
    UpdateComplete {
        /// The path.
        path: TraitPath,
        /// Outcome.
        result: Result<(), ClientError>,
        /// Status report for the path, if one was received.
        status: Option<StatusReport>,
        /// Whether the path stays queued for another attempt.
        will_retry: bool,
    },
    /// Both update sets have drained.
    NoMorePendingUpdates,
}

impl InEventParam<'_> {
    /// Identifier of the event.
    pub fn id(&self) -> EventId {
        match self {
            InEventParam::SubscriptionTerminated { .. } => EventId::SubscriptionTerminated,
            InEventParam::ExchangeStart { .. } => EventId::ExchangeStart,
            InEventParam::SubscribeRequestPrepareNeeded { .. } => {
                EventId::SubscribeRequestPrepareNeeded
            }
            InEventParam::SubscriptionEstablished { .. } => EventId::SubscriptionEstablished,
            InEventParam::NotificationRequest { .. } => EventId::NotificationRequest,
            InEventParam::NotificationProcessed { .. } => EventId::NotificationProcessed,
            InEventParam::EventStreamReceived { .. } => EventId::EventStreamReceived,
            InEventParam::SubscriptionActivity => EventId::SubscriptionActivity,
            InEventParam::UpdateComplete { .. } => EventId::UpdateComplete,
            InEventParam::NoMorePendingUpdates => EventId::NoMorePendingUpdates,
        }
    }

    /// Check whether the callback may free the client from this event.
    pub fn permits_free(&self) -> bool {
        matches!(
            self.id(),
            EventId::SubscriptionTerminated
                | EventId::SubscriptionEstablished
                | EventId::NotificationRequest
                | EventId::NotificationProcessed
        )
    }
}

/// Parameters of the subscribe request, supplied by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeRequestParams {
    /// Paths to subscribe to; versions are filled in from the sinks.
    pub paths: Vec<TraitPath>,
    /// Paths with explicit versions. Used instead of `paths` when not empty.
    pub versioned_paths: Vec<VersionedTraitPath>,
    /// Events already seen, per source.
    pub last_observed_events: Vec<LastObservedEvent>,
    /// Lower bound of the liveness timeout, seconds.
    pub timeout_sec_min: Option<u32>,
    /// Upper bound of the liveness timeout, seconds.
    pub timeout_sec_max: Option<u32>,
    /// Subscription id to reuse for a mutual subscription.
    pub subscription_id: Option<SubscriptionId>,
    /// Whether to receive the event stream.
    pub need_all_events: bool,
}

/// Output parameters an event handler may fill in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutEventParam {
    /// Nothing written.
    #[default]
    None,
    /// Answer to [`InEventParam::SubscribeRequestPrepareNeeded`].
    SubscribeRequestPrepared(SubscribeRequestParams),
}

/// What the client does once a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Directive {
    /// Carry on.
    #[default]
    Continue,
    /// End the subscription gracefully.
    EndSubscription,
    /// Abort the subscription without further callbacks.
    AbortSubscription,
    /// Abort and release the application's reference.
    Free,
}

/// Receives client events.
pub trait EventSink: Send {
    /// Handle one event.
    fn on_event(&mut self, event: InEventParam<'_>, out: &mut OutEventParam) -> Directive;
}

impl<F> EventSink for F
where
    F: FnMut(InEventParam<'_>, &mut OutEventParam) -> Directive + Send,
{
    fn on_event(&mut self, event: InEventParam<'_>, out: &mut OutEventParam) -> Directive {
        self(event, out)
    }
}

/// Handler that accepts everything and subscribes to nothing in particular.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEventHandler;

impl EventSink for DefaultEventHandler {
    fn on_event(&mut self, event: InEventParam<'_>, out: &mut OutEventParam) -> Directive {
        if let InEventParam::SubscribeRequestPrepareNeeded { .. } = event {
            *out = OutEventParam::SubscribeRequestPrepared(SubscribeRequestParams::default());
        }
        Directive::Continue
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
