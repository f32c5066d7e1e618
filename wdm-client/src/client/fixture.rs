//! Shared harness for the client tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wdm_core::{SchemaRef, StaticSchema};
use wdm_types::{
    DataElement, DataVersion, ElementValue, ExchangeId, Message, NotificationRequest,
    PropertyPathHandle, StatusReport, SubscribeResponse, SubscriptionId, TraitDataHandle,
    TraitPath, UpdateRequest, UpdateResponse,
};

use super::SubscriptionClient;
use crate::binding::MockBinding;
use crate::catalog::{MemoryCatalog, MemorySink};
use crate::config::Config;
use crate::error::ClientError;
use crate::event::{
    Directive, EventId, EventSink, InEventParam, OutEventParam, SubscribeRequestParams,
};
use crate::mutex::UpdateMutexRef;
use crate::timer::ManualTimers;

/// Updatable traits.
pub(crate) const T1: TraitDataHandle = TraitDataHandle(1);
pub(crate) const T2: TraitDataHandle = TraitDataHandle(2);
/// Read-only trait.
pub(crate) const T3: TraitDataHandle = TraitDataHandle(3);

pub(crate) const SUBSCRIPTION: SubscriptionId = SubscriptionId(0x5A);

pub(crate) fn h(schema: u16) -> PropertyPathHandle {
    PropertyPathHandle::from_schema(schema)
}

// root(1) -> p1(2), p2(3), dict(4) -> elem(5)
pub(crate) fn schema() -> SchemaRef {
    Arc::new(
        StaticSchema::builder()
            .property(2, 1)
            .property(3, 1)
            .dictionary(4, 1)
            .property(5, 4)
            .build(),
    )
}

/// What the application saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seen {
    Terminated {
        reason: Option<ClientError>,
        will_retry: bool,
    },
    ExchangeStart(ExchangeId),
    PrepareNeeded(u32),
    Established(SubscriptionId),
    NotificationRequest,
    NotificationProcessed,
    Events(usize),
    Activity,
    UpdateComplete {
        path: TraitPath,
        result: Result<(), ClientError>,
        will_retry: bool,
    },
    NoMorePendingUpdates,
}

#[derive(Default)]
struct RecorderState {
    seen: Vec<Seen>,
    params: SubscribeRequestParams,
    directives: HashMap<EventId, Directive>,
    exchange_timeout: Option<Duration>,
}

/// Event handler recording every event.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    inner: Arc<Mutex<RecorderState>>,
}

impl Recorder {
    pub(crate) fn set_params(&self, params: SubscribeRequestParams) {
        self.inner.lock().unwrap().params = params;
    }

    /// Return `directive` from the next `event` callback only.
    pub(crate) fn direct_once(&self, event: EventId, directive: Directive) {
        self.inner.lock().unwrap().directives.insert(event, directive);
    }

    pub(crate) fn set_exchange_timeout(&self, timeout: Duration) {
        self.inner.lock().unwrap().exchange_timeout = Some(timeout);
    }

    pub(crate) fn seen(&self) -> Vec<Seen> {
        self.inner.lock().unwrap().seen.clone()
    }

    pub(crate) fn take(&self) -> Vec<Seen> {
        std::mem::take(&mut self.inner.lock().unwrap().seen)
    }

    pub(crate) fn terminations(&self) -> Vec<(Option<ClientError>, bool)> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Terminated { reason, will_retry } => Some((reason, will_retry)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn updates(&self) -> Vec<(TraitPath, Result<(), ClientError>, bool)> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::UpdateComplete {
                    path,
                    result,
                    will_retry,
                } => Some((path, result, will_retry)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, wanted: &Seen) -> usize {
        self.seen().iter().filter(|seen| *seen == wanted).count()
    }
}

impl EventSink for Recorder {
    fn on_event(&mut self, event: InEventParam<'_>, out: &mut OutEventParam) -> Directive {
        let mut state = self.inner.lock().unwrap();
        let id = event.id();
        let seen = match event {
            InEventParam::SubscriptionTerminated {
                reason, will_retry, ..
            } => Seen::Terminated { reason, will_retry },
            InEventParam::ExchangeStart {
                exchange,
                response_timeout,
            } => {
                if let Some(timeout) = state.exchange_timeout {
                    *response_timeout = timeout;
                }
                Seen::ExchangeStart(exchange)
            }
            InEventParam::SubscribeRequestPrepareNeeded { retry_count } => {
                *out = OutEventParam::SubscribeRequestPrepared(state.params.clone());
                Seen::PrepareNeeded(retry_count)
            }
            InEventParam::SubscriptionEstablished {
                subscription_id, ..
            } => Seen::Established(subscription_id),
            InEventParam::NotificationRequest { .. } => Seen::NotificationRequest,
            InEventParam::NotificationProcessed { .. } => Seen::NotificationProcessed,
            InEventParam::EventStreamReceived { events } => Seen::Events(events.len()),
            InEventParam::SubscriptionActivity => Seen::Activity,
            InEventParam::UpdateComplete {
                path,
                result,
                will_retry,
                ..
            } => Seen::UpdateComplete {
                path,
                result,
                will_retry,
            },
            InEventParam::NoMorePendingUpdates => Seen::NoMorePendingUpdates,
        };
        state.seen.push(seen);
        state.directives.remove(&id).unwrap_or_default()
    }
}

pub(crate) fn element(path: TraitPath, version: u64, bytes: &[u8]) -> DataElement {
    DataElement {
        path,
        version: DataVersion(version),
        is_partial_change: false,
        value: ElementValue::Encoded(bytes.to_vec()),
    }
}

/// A client wired to a mock binding, manual timers and three memory sinks.
pub(crate) struct Harness {
    pub(crate) client: SubscriptionClient,
    pub(crate) binding: MockBinding,
    pub(crate) timers: ManualTimers,
    pub(crate) recorder: Recorder,
    pub(crate) sink1: Arc<MemorySink>,
    pub(crate) sink2: Arc<MemorySink>,
    pub(crate) sink3: Arc<MemorySink>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Backoff jitter is always disabled.
    pub(crate) fn with_config(config: Config) -> Self {
        Self::build(config, None)
    }

    pub(crate) fn with_mutex(mutex: UpdateMutexRef) -> Self {
        Self::build(Config::default(), Some(mutex))
    }

    fn build(mut config: Config, mutex: Option<UpdateMutexRef>) -> Self {
        config.resubscribe.jitter_ms = 0;
        let timers = ManualTimers::new();
        let mut client = SubscriptionClient::new(0, &config, Arc::new(timers.clone()));
        let binding = MockBinding::new();
        let recorder = Recorder::default();
        recorder.set_params(SubscribeRequestParams {
            paths: vec![TraitPath::root(T1), TraitPath::root(T2), TraitPath::root(T3)],
            ..SubscribeRequestParams::default()
        });

        let sink1 = Arc::new(MemorySink::updatable(schema()));
        let sink2 = Arc::new(MemorySink::updatable(schema()));
        let sink3 = Arc::new(MemorySink::new(schema()));
        let catalog = MemoryCatalog::new()
            .with(T1, sink1.clone())
            .with(T2, sink2.clone())
            .with(T3, sink3.clone());

        client
            .init(
                Arc::new(binding.clone()),
                Arc::new(catalog),
                Box::new(recorder.clone()),
                mutex,
            )
            .unwrap();

        Self {
            client,
            binding,
            timers,
            recorder,
            sink1,
            sink2,
            sink3,
        }
    }

    /// Start subscribing; returns the exchange the request went out on.
    pub(crate) fn subscribe(&mut self) -> ExchangeId {
        self.client.initiate_subscription().unwrap();
        self.binding.last_sent().unwrap().exchange
    }

    pub(crate) fn respond(&mut self, exchange: ExchangeId, timeout_sec: Option<u32>) {
        self.client.on_message(
            exchange,
            Message::SubscribeResponse(SubscribeResponse {
                subscription_id: SUBSCRIPTION,
                timeout_sec,
            }),
        );
    }

    /// Subscribe and confirm without a liveness timeout.
    pub(crate) fn establish(&mut self) {
        self.establish_with_timeout(None);
    }

    pub(crate) fn establish_with_timeout(&mut self, timeout_sec: Option<u32>) {
        let exchange = self.subscribe();
        self.respond(exchange, timeout_sec);
        assert!(self.client.is_established());
    }

    /// Move time forward, delivering every timer that came due.
    pub(crate) fn advance(&mut self, by: Duration) {
        for kind in self.timers.advance(by) {
            self.client.on_timer(kind);
        }
    }

    /// Deliver a notification on a fresh peer exchange.
    pub(crate) fn notify(&mut self, data_list: Vec<DataElement>) -> ExchangeId {
        let exchange = self.binding.open_peer_exchange();
        self.client.on_peer_request(
            exchange,
            Message::NotificationRequest(NotificationRequest {
                subscription_id: SUBSCRIPTION,
                data_list,
                events: Vec::new(),
            }),
        );
        exchange
    }

    /// The last update request sent.
    pub(crate) fn last_update(&self) -> (ExchangeId, UpdateRequest) {
        let sent = self
            .binding
            .sent_messages()
            .into_iter()
            .rev()
            .find(|sent| matches!(sent.message, Message::UpdateRequest(_)))
            .unwrap();
        match sent.message {
            Message::UpdateRequest(request) => (sent.exchange, request),
            _ => unreachable!(),
        }
    }

    pub(crate) fn update_requests(&self) -> usize {
        self.binding
            .sent_messages()
            .iter()
            .filter(|sent| matches!(sent.message, Message::UpdateRequest(_)))
            .count()
    }

    /// Answer the last update request, one status per element.
    pub(crate) fn respond_update(&mut self, statuses: Vec<StatusReport>, versions: Vec<Option<u64>>) {
        let (exchange, _) = self.last_update();
        self.client.on_message(
            exchange,
            Message::UpdateResponse(UpdateResponse {
                statuses,
                versions: versions.into_iter().map(|v| v.map(DataVersion)).collect(),
            }),
        );
    }

    /// Answer the last update request with success for every element.
    pub(crate) fn accept_update(&mut self, version: u64) {
        let (_, request) = self.last_update();
        let count = request.elements.len();
        self.respond_update(vec![StatusReport::success(); count], vec![Some(version); count]);
    }
}
