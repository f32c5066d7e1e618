//! The subscription client state machine.
//!
//! A [`SubscriptionClient`] owns one subscription to one peer: its state,
//! both update path sets and the exchanges it has open. Everything happens
//! in response to a call from one of three places:
//!
//! - the application (`init`, `initiate_subscription`, `set_updated`, ...),
//! - the binding, reporting on exchanges the client opened (`on_message`,
//!   `on_response_timeout`, `on_send_error`) or on exchanges the peer opened
//!   (`on_peer_request`), and binding lifecycle (`on_binding_event`),
//! - the timer service (`on_timer`).
//!
//! All calls are made from one processing loop. Callbacks to the
//! application run synchronously inside these calls and steer the client
//! through the [`Directive`] they return.
//!
//! # Reference counting
//!
//! The application holds one reference from `init` (or pool allocation)
//! until `free`. Every exchange the client opens holds one more until it is
//! closed or aborted. When the count drops to zero the client resets itself
//! to `Free`.

mod update;

#[cfg(test)]
pub(crate) mod fixture;

use std::time::Duration;
use wdm_core::{
    ClientConfig, ClientState, ExponentialBackoff, FailureKind, LivenessCheck, LivenessTimer,
    RequestType, ResubscribeAttempt, ResubscribePolicy,
};
use wdm_types::status::{common, wdm, PROFILE_COMMON, PROFILE_WDM};
use wdm_types::{
    ExchangeId, Message, NotificationRequest, StatusReport, SubscribeCancelRequest,
    SubscribeRequest, SubscribeResponse, SubscriptionId, TraitDataHandle, VersionedTraitPath,
};

use crate::binding::{BindingError, BindingEvent, BindingRef, BindingState};
use crate::catalog::CatalogRef;
use crate::config::{ClientSection, Config, SubscriptionTimeouts, MAX_TIMEOUT_SECS};
use crate::error::ClientError;
use crate::event::{
    DefaultEventHandler, Directive, EventSink, InEventParam, OutEventParam,
    SubscribeRequestParams,
};
use crate::mutex::UpdateMutexRef;
use crate::timer::{TimerKind, TimerRef};

use update::UpdateState;

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

/// Client side of one subscription.
pub struct SubscriptionClient {
    id: usize,
    options: ClientSection,
    backoff: ExponentialBackoff,
    timers: TimerRef,

    state: ClientState,
    config: ClientConfig,
    ref_count: u32,
    // bumped on every termination and reset; callers compare it across
    // callbacks to learn whether the subscription they were serving is gone
    epoch: u64,

    binding: Option<BindingRef>,
    catalog: Option<CatalogRef>,
    events: Box<dyn EventSink>,

    policy: Option<Box<dyn ResubscribePolicy>>,
    retry_count: u32,
    awaiting_binding: bool,

    exchange: Option<ExchangeId>,
    response_timeout: Duration,
    subscription_id: Option<SubscriptionId>,
    liveness: LivenessTimer,
    partial_change: Option<TraitDataHandle>,

    update: UpdateState,
}

impl SubscriptionClient {
    /// Create a client in the `Free` state.
    ///
    /// `id` only tags log lines.
    pub fn new(id: usize, config: &Config, timers: TimerRef) -> Self {
        Self {
            id,
            options: config.client.clone(),
            backoff: ExponentialBackoff::from(config.resubscribe),
            timers,
            state: ClientState::Free,
            config: ClientConfig::Down,
            ref_count: 0,
            epoch: 0,
            binding: None,
            catalog: None,
            events: Box::new(DefaultEventHandler),
            policy: None,
            retry_count: 0,
            awaiting_binding: false,
            exchange: None,
            response_timeout: config.client.response_timeout(),
            subscription_id: None,
            liveness: LivenessTimer::new(None),
            partial_change: None,
            update: UpdateState::new(&config.client, ExponentialBackoff::from(config.resubscribe)),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Assign the binding, catalog and event handler.
    ///
    /// Takes the application's reference unless the pool already did. When
    /// resubscription is enabled in the configuration, exponential backoff
    /// becomes the retry policy.
    ///
    /// # Errors
    ///
    /// `InvalidState` when not `Free`; `ResourceExhausted` when the catalog
    /// has more updatable traits than `max_updatable_traits`.
    pub fn init(
        &mut self,
        binding: BindingRef,
        catalog: CatalogRef,
        events: Box<dyn EventSink>,
        update_mutex: Option<UpdateMutexRef>,
    ) -> Result<(), ClientError> {
        if self.state != ClientState::Free {
            return Err(ClientError::InvalidState("client already initialized"));
        }
        let traits = update::collect_updatable_traits(&catalog, self.options.max_updatable_traits)?;

        if self.ref_count == 0 {
            self.ref_count = 1;
        }
        self.binding = Some(binding);
        self.catalog = Some(catalog);
        self.events = events;
        self.update.init(traits, update_mutex);
        self.liveness = LivenessTimer::new(None);
        if self.options.resubscribe_enabled {
            self.policy = Some(Box::new(self.backoff.clone()));
        }
        self.move_to(ClientState::Initialized);
        Ok(())
    }

    /// Subscribe to the peer.
    ///
    /// Failures after this returns are reported through
    /// `SubscriptionTerminated`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Initialized`.
    pub fn initiate_subscription(&mut self) -> Result<(), ClientError> {
        if self.state != ClientState::Initialized {
            return Err(ClientError::InvalidState("subscription already active"));
        }
        self.config = ClientConfig::Initiator;
        self.retry_count = 0;
        self.start_subscribing();
        Ok(())
    }

    /// Accept a subscription the peer drives, as the counterpart of its own.
    ///
    /// Without `liveness_timeout_secs` the configured default applies.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Initialized`; `ConfigurationInvalid` when the
    /// timeout exceeds [`MAX_TIMEOUT_SECS`].
    pub fn initiate_counter_subscription(
        &mut self,
        subscription_id: SubscriptionId,
        liveness_timeout_secs: Option<u32>,
    ) -> Result<(), ClientError> {
        if self.state != ClientState::Initialized {
            return Err(ClientError::InvalidState("subscription already active"));
        }
        SubscriptionTimeouts::new(None, liveness_timeout_secs).validate()?;

        self.config = ClientConfig::CounterSubscriber;
        self.subscription_id = Some(subscription_id);
        self.liveness.set_window(
            liveness_timeout_secs
                .map(secs)
                .or(self.options.default_liveness_timeout()),
        );
        self.establish();
        Ok(())
    }

    /// End the subscription gracefully.
    ///
    /// With a subscription id known, a cancel request is sent and the
    /// subscription terminates, without retry, when the peer answers. Before
    /// that the subscription is aborted.
    ///
    /// # Errors
    ///
    /// `InvalidState` when there is no subscription to end.
    pub fn end_subscription(&mut self) -> Result<(), ClientError> {
        match self.state {
            state if state.is_in_progress_or_established() => {}
            ClientState::ResubscribeHoldoff => {
                self.abort_subscription();
                return Ok(());
            }
            _ => return Err(ClientError::InvalidState("no subscription to end")),
        }
        self.config = ClientConfig::Down;
        match self.subscription_id {
            Some(subscription_id) => self.send_cancel(subscription_id),
            None => self.abort_subscription(),
        }
        Ok(())
    }

    #[cfg(feature = "subscription-cancel")]
    fn send_cancel(&mut self, subscription_id: SubscriptionId) {
        let (exchange, timeout) = match self.replace_exchange() {
            Ok(opened) => opened,
            Err(e) => {
                self.handle_subscription_terminated(Some(e), None);
                return;
            }
        };
        self.move_to(ClientState::Canceling);
        let cancel = Message::SubscribeCancelRequest(SubscribeCancelRequest { subscription_id });
        if let Err(e) = self.send_on(exchange, &cancel, true, timeout) {
            self.handle_subscription_terminated(Some(e), None);
        }
    }

    #[cfg(not(feature = "subscription-cancel"))]
    fn send_cancel(&mut self, _subscription_id: SubscriptionId) {
        self.abort_subscription();
    }

    /// Abort the subscription without any further callbacks.
    ///
    /// Outstanding exchanges are aborted and pending updates discarded. The
    /// client returns to `Initialized`.
    pub fn abort_subscription(&mut self) {
        if self.state == ClientState::Free {
            return;
        }
        self.config = ClientConfig::Down;
        self.terminate(None, None, false);
    }

    /// Abort and release the application's reference.
    pub fn free(&mut self) {
        if self.state == ClientState::Free && self.ref_count == 0 {
            return;
        }
        self.abort_subscription();
        self.release();
    }

    pub(crate) fn add_ref(&mut self) {
        self.ref_count += 1;
    }

    fn release(&mut self) {
        match self.ref_count {
            0 => tracing::warn!("client[{}] released without a reference", self.id),
            1 => {
                self.ref_count = 0;
                self.reset();
            }
            _ => self.ref_count -= 1,
        }
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.timers.cancel(TimerKind::Subscription);
        self.timers.cancel(TimerKind::UpdateRetry);
        self.move_to(ClientState::Free);
        self.config = ClientConfig::Down;
        self.binding = None;
        self.catalog = None;
        self.events = Box::new(DefaultEventHandler);
        self.policy = None;
        self.retry_count = 0;
        self.awaiting_binding = false;
        self.exchange = None;
        self.response_timeout = self.options.response_timeout();
        self.subscription_id = None;
        self.liveness = LivenessTimer::new(None);
        self.partial_change = None;
        self.update.reset();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Role chosen by the application.
    pub fn config(&self) -> ClientConfig {
        self.config
    }

    /// References held: the application's plus one per open exchange.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Node id of the peer, once a binding is assigned.
    pub fn peer_node_id(&self) -> Option<u64> {
        self.binding.as_ref().map(|binding| binding.peer_node_id())
    }

    /// The binding, once assigned.
    pub fn binding(&self) -> Option<&BindingRef> {
        self.binding.as_ref()
    }

    /// Id of the subscription.
    ///
    /// # Errors
    ///
    /// `InvalidState` until the peer assigned one.
    pub fn subscription_id(&self) -> Result<SubscriptionId, ClientError> {
        self.subscription_id
            .ok_or(ClientError::InvalidState("no subscription id assigned"))
    }

    /// Liveness timeout in effect.
    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness.window()
    }

    /// Replace the liveness timeout. Takes effect when the timer next arms.
    pub fn set_liveness_timeout(&mut self, timeout: Option<Duration>) {
        self.liveness.set_window(timeout);
    }

    /// Check whether the client is back in the pool.
    pub fn is_free(&self) -> bool {
        self.state == ClientState::Free
    }

    /// Check whether the client is tearing down.
    pub fn is_aborting(&self) -> bool {
        self.state == ClientState::Aborting
    }

    /// Check whether established with no exchange outstanding.
    pub fn is_established_idle(&self) -> bool {
        self.state == ClientState::EstablishedIdle
    }

    /// Check whether the subscription is established.
    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// Check whether waiting to resubscribe.
    pub fn is_in_resubscribe_holdoff(&self) -> bool {
        self.state == ClientState::ResubscribeHoldoff
    }

    /// Check whether failures lead to a resubscribe.
    pub fn is_retry_enabled(&self) -> bool {
        self.policy.is_some()
    }

    // =========================================================================
    // Resubscribe
    // =========================================================================

    /// Resubscribe after failures, waiting as `policy` says.
    pub fn enable_resubscribe<P>(&mut self, policy: P)
    where
        P: ResubscribePolicy + 'static,
    {
        self.policy = Some(Box::new(policy));
    }

    /// Give up after the next failure.
    pub fn disable_resubscribe(&mut self) {
        self.policy = None;
    }

    /// Forget past failures. In holdoff, resubscribe now.
    pub fn reset_resubscribe(&mut self) {
        self.retry_count = 0;
        if self.state == ClientState::ResubscribeHoldoff {
            self.timers.cancel(TimerKind::Subscription);
            self.start_subscribing();
        }
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    /// Note traffic on the subscription. Moves the liveness window forward
    /// and fires `SubscriptionActivity`.
    pub fn indicate_activity(&mut self) {
        if !self.state.is_established() {
            return;
        }
        self.liveness.indicate_activity(self.timers.now());
        self.notify(InEventParam::SubscriptionActivity);
    }

    /// Binding lifecycle event.
    pub fn on_binding_event(&mut self, event: BindingEvent) {
        match event {
            BindingEvent::Ready => {
                if self.state == ClientState::Subscribing && self.awaiting_binding {
                    self.send_subscribe_request();
                }
            }
            BindingEvent::PrepareFailed(e) | BindingEvent::Failed(e) => {
                if self.state.is_in_progress_or_established()
                    || self.state == ClientState::Canceling
                {
                    self.handle_subscription_terminated(Some(ClientError::Binding(e)), None);
                }
            }
        }
    }

    /// A message arrived on an exchange the client opened.
    pub fn on_message(&mut self, exchange: ExchangeId, message: Message) {
        if self.update.exchange == Some(exchange) {
            self.on_update_response(message);
        } else if self.exchange == Some(exchange) {
            self.on_subscription_response(message);
        } else {
            tracing::debug!(
                "client[{}] ignoring {:?} on stale exchange {:?}",
                self.id,
                message.message_type(),
                exchange
            );
        }
    }

    /// No response arrived within the exchange's response timeout.
    pub fn on_response_timeout(&mut self, exchange: ExchangeId) {
        self.on_exchange_error(exchange, ClientError::Timeout);
    }

    /// Sending on an exchange failed after `send` had returned.
    pub fn on_send_error(&mut self, exchange: ExchangeId, error: BindingError) {
        self.on_exchange_error(exchange, ClientError::TransportFailure(error.to_string()));
    }

    /// An exchange the client opened failed.
    pub fn on_exchange_error(&mut self, exchange: ExchangeId, error: ClientError) {
        if self.update.exchange == Some(exchange) {
            self.on_update_no_response(error);
        } else if self.exchange == Some(exchange) {
            self.flush_exchange(true);
            self.handle_subscription_terminated(Some(error), None);
        } else {
            tracing::debug!(
                "client[{}] ignoring error on stale exchange {:?}: {}",
                self.id,
                exchange,
                error
            );
        }
    }

    /// Timer expiry.
    pub fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Subscription => self.on_subscription_timer(),
            TimerKind::UpdateRetry => self.on_update_retry_timer(),
        }
    }

    fn on_subscription_timer(&mut self) {
        if !self.state.accepts_timer_tick() {
            tracing::debug!("client[{}] timer ignored in {}", self.id, self.state);
            return;
        }
        match self.state {
            ClientState::Subscribing | ClientState::SubscribingIdAssigned => {
                tracing::warn!("client[{}] no confirmation while subscribing", self.id);
                self.flush_exchange(true);
                self.handle_subscription_terminated(Some(ClientError::Timeout), None);
            }
            ClientState::EstablishedIdle | ClientState::EstablishedConfirming => {
                let idle = self.state == ClientState::EstablishedIdle;
                match self.liveness.on_fire(self.timers.now(), idle) {
                    LivenessCheck::Expired => {
                        tracing::warn!("client[{}] liveness timeout", self.id);
                        self.handle_subscription_terminated(Some(ClientError::Timeout), None);
                    }
                    LivenessCheck::Rearm(delay) => {
                        self.timers.start(TimerKind::Subscription, delay);
                    }
                    LivenessCheck::Stale => {}
                }
            }
            ClientState::ResubscribeHoldoff => self.start_subscribing(),
            // canceling waits on the exchange response timeout
            _ => {}
        }
    }

    // =========================================================================
    // Subscribing
    // =========================================================================

    fn start_subscribing(&mut self) {
        self.move_to(ClientState::Subscribing);
        match self.options.inactivity_timeout_during_subscribing() {
            timeout if timeout.is_zero() => self.timers.cancel(TimerKind::Subscription),
            timeout => self.timers.start(TimerKind::Subscription, timeout),
        }

        let Some(binding) = self.binding.clone() else {
            self.handle_subscription_terminated(
                Some(ClientError::InvalidState("client has no binding")),
                None,
            );
            return;
        };
        if binding.is_ready() {
            self.send_subscribe_request();
            return;
        }
        match binding.prepare() {
            Ok(BindingState::Ready) => self.send_subscribe_request(),
            Ok(BindingState::Pending) => {
                tracing::debug!("client[{}] waiting for binding", self.id);
                self.awaiting_binding = true;
            }
            Err(e) => self.handle_subscription_terminated(Some(e.into()), None),
        }
    }

    fn send_subscribe_request(&mut self) {
        self.awaiting_binding = false;
        let epoch = self.epoch;
        let (exchange, timeout) = match self.replace_exchange() {
            Ok(opened) => opened,
            Err(e) => {
                self.handle_subscription_terminated(Some(e), None);
                return;
            }
        };

        let mut out = OutEventParam::None;
        let directive = self.callback(
            InEventParam::SubscribeRequestPrepareNeeded {
                retry_count: self.retry_count,
            },
            &mut out,
        );
        self.apply(directive);
        if self.epoch != epoch || self.state != ClientState::Subscribing {
            return;
        }

        let request = match out {
            OutEventParam::SubscribeRequestPrepared(params) => self.build_subscribe_request(params),
            OutEventParam::None => Err(ClientError::ConfigurationInvalid(
                "no subscribe request prepared".into(),
            )),
        };
        let result = request.and_then(|request| {
            self.send_on(exchange, &Message::SubscribeRequest(request), true, timeout)
        });
        if let Err(e) = result {
            self.flush_exchange(true);
            self.handle_subscription_terminated(Some(e), None);
        }
    }

    fn build_subscribe_request(
        &self,
        params: SubscribeRequestParams,
    ) -> Result<SubscribeRequest, ClientError> {
        SubscriptionTimeouts::new(params.timeout_sec_min, params.timeout_sec_max).validate()?;
        let catalog = self
            .catalog
            .as_ref()
            .ok_or(ClientError::InvalidState("client has no catalog"))?;
        let unknown = |handle: TraitDataHandle| {
            ClientError::ConfigurationInvalid(format!("trait {} not in catalog", handle))
        };

        let paths = if params.versioned_paths.is_empty() {
            params
                .paths
                .iter()
                .map(|path| {
                    let sink = catalog
                        .sink(path.trait_handle)
                        .ok_or_else(|| unknown(path.trait_handle))?;
                    Ok(VersionedTraitPath {
                        path: *path,
                        requested_version: sink.version(),
                    })
                })
                .collect::<Result<Vec<_>, ClientError>>()?
        } else {
            if let Some(missing) = params
                .versioned_paths
                .iter()
                .find(|versioned| catalog.sink(versioned.path.trait_handle).is_none())
            {
                return Err(unknown(missing.path.trait_handle));
            }
            params.versioned_paths
        };

        Ok(SubscribeRequest {
            subscription_id: params.subscription_id,
            paths,
            last_observed_events: params.last_observed_events,
            timeout_sec_min: params.timeout_sec_min,
            timeout_sec_max: params.timeout_sec_max,
            need_all_events: params.need_all_events,
        })
    }

    fn on_subscription_response(&mut self, message: Message) {
        let subscribing = matches!(
            self.state,
            ClientState::Subscribing | ClientState::SubscribingIdAssigned
        );
        match message {
            Message::SubscribeResponse(response) if subscribing => {
                self.on_subscribe_response(response);
            }
            Message::NotificationRequest(notification) if subscribing => {
                self.on_subscribe_notification(notification);
            }
            Message::StatusReport(status) if self.state == ClientState::Canceling => {
                self.flush_exchange(false);
                let reason = (!status.is_success()).then(|| ClientError::PeerRejected {
                    status: status.clone(),
                });
                self.handle_subscription_terminated(reason, Some(status));
            }
            Message::StatusReport(status) if !status.is_success() => {
                tracing::warn!(
                    "client[{}] peer rejected subscription: {:?}",
                    self.id,
                    status
                );
                self.flush_exchange(true);
                let reason = ClientError::PeerRejected {
                    status: status.clone(),
                };
                self.handle_subscription_terminated(Some(reason), Some(status));
            }
            other => {
                let reason = ClientError::MalformedMessage(format!(
                    "unexpected {:?} in {}",
                    other.message_type(),
                    self.state
                ));
                self.flush_exchange(true);
                self.handle_subscription_terminated(Some(reason), None);
            }
        }
    }

    fn on_subscribe_response(&mut self, response: SubscribeResponse) {
        if response.timeout_sec.is_some_and(|t| t > MAX_TIMEOUT_SECS) {
            self.flush_exchange(true);
            self.handle_subscription_terminated(
                Some(ClientError::MalformedMessage(
                    "liveness timeout out of range".into(),
                )),
                None,
            );
            return;
        }
        self.subscription_id = Some(response.subscription_id);
        if self.state == ClientState::Subscribing {
            self.move_to(ClientState::SubscribingIdAssigned);
        }
        self.flush_exchange(false);
        self.liveness.set_window(response.timeout_sec.map(secs));
        self.establish();
    }

    /// A notification priming the subscription, sent before the response.
    fn on_subscribe_notification(&mut self, notification: NotificationRequest) {
        if self
            .subscription_id
            .is_some_and(|id| id != notification.subscription_id)
        {
            self.flush_exchange(true);
            self.handle_subscription_terminated(
                Some(ClientError::MalformedMessage(
                    "notification for another subscription".into(),
                )),
                None,
            );
            return;
        }
        self.subscription_id = Some(notification.subscription_id);
        if self.state == ClientState::Subscribing {
            self.move_to(ClientState::SubscribingIdAssigned);
        }

        let epoch = self.epoch;
        if let Err(e) = self.process_notification(&notification) {
            self.flush_exchange(true);
            self.handle_subscription_terminated(Some(e), None);
            return;
        }
        let Some(exchange) = self.exchange.filter(|_| self.epoch == epoch) else {
            return;
        };

        // the response follows on the same exchange
        let ack = Message::StatusReport(StatusReport::success());
        if let Err(e) = self.send_on(exchange, &ack, true, self.response_timeout) {
            self.flush_exchange(true);
            self.handle_subscription_terminated(Some(e), None);
            return;
        }
        self.notify(InEventParam::NotificationProcessed {
            notification: &notification,
        });
    }

    fn establish(&mut self) {
        self.awaiting_binding = false;
        self.retry_count = 0;
        self.move_to(ClientState::EstablishedIdle);
        self.arm_liveness();

        let Some(subscription_id) = self.subscription_id else {
            return;
        };
        tracing::info!(
            "client[{}] subscription {} established",
            self.id,
            subscription_id
        );
        let epoch = self.epoch;
        self.notify(InEventParam::SubscriptionEstablished {
            subscription_id,
            liveness_timeout: self.liveness.window(),
        });
        if self.epoch == epoch && self.state.is_established() {
            self.form_and_send_update();
        }
    }

    fn arm_liveness(&mut self) {
        match self.liveness.arm(self.timers.now()) {
            Some(delay) => self.timers.start(TimerKind::Subscription, delay),
            None => self.timers.cancel(TimerKind::Subscription),
        }
    }

    // =========================================================================
    // Peer requests
    // =========================================================================

    /// A request arrived on an exchange the peer opened.
    ///
    /// The client answers it and closes the exchange.
    pub fn on_peer_request(&mut self, exchange: ExchangeId, message: Message) {
        match message {
            Message::NotificationRequest(notification) => {
                self.on_notification(exchange, notification);
            }
            Message::SubscribeCancelRequest(cancel) => self.on_cancel_request(exchange, cancel),
            other => {
                tracing::debug!(
                    "client[{}] unsupported peer request {:?}",
                    self.id,
                    other.message_type()
                );
                self.reply(
                    exchange,
                    StatusReport::new(PROFILE_COMMON, common::UNSUPPORTED_MESSAGE),
                );
            }
        }
    }

    fn on_notification(&mut self, exchange: ExchangeId, notification: NotificationRequest) {
        if !self.state.is_established() {
            self.reply(
                exchange,
                StatusReport::new(PROFILE_COMMON, common::UNEXPECTED_MESSAGE),
            );
            return;
        }
        if self.subscription_id != Some(notification.subscription_id) {
            self.reply(
                exchange,
                StatusReport::new(PROFILE_WDM, wdm::INVALID_SUBSCRIPTION),
            );
            return;
        }

        let binding = self.binding.clone();
        let epoch = self.epoch;
        self.move_to(ClientState::EstablishedConfirming);
        self.indicate_activity();
        let processed = if self.epoch == epoch {
            self.process_notification(&notification)
        } else {
            Ok(())
        };
        if self.epoch != epoch {
            // the application ended the subscription from a callback
            if let Some(binding) = binding {
                binding.abort_exchange(exchange);
            }
            return;
        }
        if let Err(e) = processed {
            self.reply(exchange, StatusReport::new(PROFILE_COMMON, common::BAD_REQUEST));
            self.handle_subscription_terminated(Some(e), None);
            return;
        }

        self.reply(exchange, StatusReport::success());
        self.move_to(ClientState::EstablishedIdle);
        self.arm_liveness();
        self.notify(InEventParam::NotificationProcessed {
            notification: &notification,
        });
    }

    fn on_cancel_request(&mut self, exchange: ExchangeId, cancel: SubscribeCancelRequest) {
        let ours = self.subscription_id == Some(cancel.subscription_id);
        if !ours || !self.state.is_in_progress_or_established() {
            self.reply(
                exchange,
                StatusReport::new(PROFILE_WDM, wdm::INVALID_SUBSCRIPTION),
            );
            return;
        }
        tracing::info!(
            "client[{}] subscription {} canceled by peer",
            self.id,
            cancel.subscription_id
        );
        self.reply(exchange, StatusReport::success());
        self.config = ClientConfig::Down;
        self.flush_exchange(true);
        self.handle_subscription_terminated(None, None);
    }

    /// Apply a notification to the sinks and fire its events.
    ///
    /// Stops early, returning `Ok`, when a callback ended the subscription;
    /// callers compare the epoch.
    fn process_notification(&mut self, notification: &NotificationRequest) -> Result<(), ClientError> {
        let epoch = self.epoch;
        self.notify(InEventParam::NotificationRequest { notification });
        if self.epoch != epoch {
            return Ok(());
        }
        let catalog = self
            .catalog
            .clone()
            .ok_or(ClientError::InvalidState("client has no catalog"))?;

        for element in &notification.data_list {
            let trait_handle = element.path.trait_handle;
            if self.partial_change.is_some_and(|current| current != trait_handle) {
                self.partial_change = None;
                return Err(ClientError::MalformedMessage(
                    "partial change interrupted by another trait".into(),
                ));
            }
            self.partial_change = element.is_partial_change.then_some(trait_handle);

            let Some(sink) = catalog.sink(trait_handle) else {
                tracing::debug!("client[{}] no sink for {}", self.id, element.path);
                continue;
            };
            if let Err(e) = sink.apply_notified(element.path.property, &element.value) {
                tracing::warn!("client[{}] sink refused {}: {}", self.id, element.path, e);
            }
            self.filter_notified_path(&element.path);
            if !element.is_partial_change {
                sink.set_version(element.version);
            }
        }

        if !notification.events.is_empty() {
            self.notify(InEventParam::EventStreamReceived {
                events: &notification.events,
            });
        }
        Ok(())
    }

    fn reply(&self, exchange: ExchangeId, status: StatusReport) {
        let Some(binding) = &self.binding else {
            return;
        };
        if let Err(e) = binding.send(exchange, &Message::StatusReport(status), false, Duration::ZERO)
        {
            tracing::debug!("client[{}] reply on {:?} failed: {}", self.id, exchange, e);
        }
        binding.close_exchange(exchange);
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Single exit point for every way a subscription ends.
    fn handle_subscription_terminated(
        &mut self,
        reason: Option<ClientError>,
        status: Option<StatusReport>,
    ) {
        self.terminate(reason, status, true);
    }

    fn terminate(&mut self, reason: Option<ClientError>, status: Option<StatusReport>, notify: bool) {
        let will_retry = self.is_retry_enabled() && self.config == ClientConfig::Initiator;
        let notify_sinks = self.state.notifies_sinks_on_abort();
        match &reason {
            Some(e) => tracing::warn!(
                "client[{}] subscription terminated in {}: {}",
                self.id,
                self.state,
                e
            ),
            None => tracing::debug!("client[{}] subscription ended in {}", self.id, self.state),
        }

        self.epoch += 1;
        self.move_to(ClientState::Aborting);
        self.flush_exchange(true);
        self.timers.cancel(TimerKind::Subscription);
        self.liveness.disarm();
        self.subscription_id = None;
        self.partial_change = None;
        self.awaiting_binding = false;
        if notify_sinks {
            if let Some(catalog) = self.catalog.clone() {
                catalog.for_each(&mut |_, sink| sink.on_subscription_terminated());
            }
        }

        if will_retry {
            self.requeue_updates();
            let attempt = ResubscribeAttempt {
                reason: reason
                    .as_ref()
                    .map_or(FailureKind::Transport, ClientError::failure_kind),
                retry_count: self.retry_count,
                request_type: RequestType::Subscription,
            };
            let interval = self
                .policy
                .as_mut()
                .map_or(Duration::ZERO, |policy| policy.next_interval(&attempt));
            self.retry_count = self.retry_count.saturating_add(1);
            self.move_to(ClientState::ResubscribeHoldoff);
            self.timers.start(TimerKind::Subscription, interval);
            tracing::info!(
                "client[{}] resubscribing in {:?} (attempt {})",
                self.id,
                interval,
                self.retry_count
            );
        } else {
            self.config = ClientConfig::Down;
            self.move_to(ClientState::Initialized);
        }

        if !notify {
            if !will_retry {
                self.discard_updates();
            }
            return;
        }

        let epoch = self.epoch;
        if !will_retry {
            let cause = reason
                .clone()
                .unwrap_or(ClientError::InvalidState("subscription ended"));
            self.abort_updates(cause);
        }
        if self.epoch == epoch && self.state != ClientState::Free {
            self.notify(InEventParam::SubscriptionTerminated {
                reason,
                status,
                will_retry,
            });
        }
    }

    // =========================================================================
    // Exchanges
    // =========================================================================

    fn open_exchange(&mut self) -> Result<(ExchangeId, Duration), ClientError> {
        let binding = self
            .binding
            .clone()
            .ok_or(ClientError::InvalidState("client has no binding"))?;
        let exchange = binding.allocate_exchange()?;
        self.add_ref();

        let mut response_timeout = self.options.response_timeout();
        let directive = self.callback(
            InEventParam::ExchangeStart {
                exchange,
                response_timeout: &mut response_timeout,
            },
            &mut OutEventParam::None,
        );
        if directive != Directive::Continue {
            tracing::warn!(
                "client[{}] {:?} ignored from ExchangeStart",
                self.id,
                directive
            );
        }
        Ok((exchange, response_timeout))
    }

    fn replace_exchange(&mut self) -> Result<(ExchangeId, Duration), ClientError> {
        self.flush_exchange(true);
        let (exchange, timeout) = self.open_exchange()?;
        self.exchange = Some(exchange);
        self.response_timeout = timeout;
        Ok((exchange, timeout))
    }

    fn flush_exchange(&mut self, abort: bool) {
        if let Some(exchange) = self.exchange.take() {
            self.end_exchange(exchange, abort);
        }
    }

    fn end_exchange(&mut self, exchange: ExchangeId, abort: bool) {
        if let Some(binding) = &self.binding {
            if abort {
                binding.abort_exchange(exchange);
            } else {
                binding.close_exchange(exchange);
            }
        }
        self.release();
    }

    fn send_on(
        &self,
        exchange: ExchangeId,
        message: &Message,
        expect_response: bool,
        response_timeout: Duration,
    ) -> Result<(), ClientError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or(ClientError::InvalidState("client has no binding"))?;
        binding
            .send(exchange, message, expect_response, response_timeout)
            .map_err(|e| ClientError::TransportFailure(e.to_string()))
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    fn callback(&mut self, event: InEventParam<'_>, out: &mut OutEventParam) -> Directive {
        let id = event.id();
        let permits_free = event.permits_free();
        let directive = self.events.on_event(event, out);
        if directive == Directive::Free && !permits_free {
            tracing::warn!("client[{}] Free ignored from {} callback", self.id, id);
            return Directive::Continue;
        }
        directive
    }

    fn notify(&mut self, event: InEventParam<'_>) {
        let directive = self.callback(event, &mut OutEventParam::None);
        self.apply(directive);
    }

    fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::Continue => {}
            Directive::EndSubscription => {
                if let Err(e) = self.end_subscription() {
                    tracing::debug!("client[{}] end requested by callback: {}", self.id, e);
                }
            }
            Directive::AbortSubscription => self.abort_subscription(),
            Directive::Free => self.free(),
        }
    }

    fn move_to(&mut self, state: ClientState) {
        if self.state != state {
            tracing::debug!("client[{}] {} -> {}", self.id, self.state, state);
            self.state = state;
        }
    }
}

impl std::fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("ref_count", &self.ref_count)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
