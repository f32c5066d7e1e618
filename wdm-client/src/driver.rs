//! Tokio processing loop for one subscription client.
//!
//! The driver owns the client and is the only place it is called from.
//! Each turn of the loop handles one of:
//!
//! - a command from a [`DriverHandle`], run against the client,
//! - work the client queued on its [`ChannelBinding`],
//! - a frame from the [`Transport`],
//! - the earliest timer or response deadline.
//!
//! The loop ends when every handle is dropped; the client is freed and the
//! transport closed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use wdm_types::{ExchangeId, Message};

use crate::binding::{BindingError, BindingEvent, ChannelBinding, Outbound};
use crate::catalog::CatalogRef;
use crate::client::SubscriptionClient;
use crate::config::Config;
use crate::error::ClientError;
use crate::event::EventSink;
use crate::mutex::UpdateMutexRef;
use crate::timer::{TimerKind, TimerService};
use crate::transport::{Frame, Transport, TransportError};

/// Driver errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The driver loop has exited.
    #[error("driver stopped")]
    Stopped,

    /// Transport error on shutdown.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

type Command = Box<dyn FnOnce(&mut SubscriptionClient) + Send>;

/// Handle for calling into a driven client.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DriverHandle {
    /// Run `f` against the client on the driver's loop and return its result.
    ///
    /// # Errors
    ///
    /// `Stopped` if the driver has exited.
    pub async fn call<F, R>(&self, f: F) -> Result<R, DriverError>
    where
        F: FnOnce(&mut SubscriptionClient) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let command: Command = Box::new(move |client| {
            // the caller may have stopped waiting
            let _ = reply.send(f(client));
        });
        self.commands
            .send(command)
            .map_err(|_| DriverError::Stopped)?;
        result.await.map_err(|_| DriverError::Stopped)
    }
}

/// Timer table read by the driver loop.
#[derive(Debug, Default)]
pub struct DriverTimers {
    armed: Mutex<HashMap<TimerKind, Instant>>,
}

impl DriverTimers {
    fn armed(&self) -> MutexGuard<'_, HashMap<TimerKind, Instant>> {
        self.armed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Earliest deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed().values().min().copied()
    }

    /// Disarm and return the timers due at `now`, earliest first.
    pub fn take_due(&self, now: Instant) -> Vec<TimerKind> {
        let mut armed = self.armed();
        let mut due: Vec<(Instant, TimerKind)> = armed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, deadline)| (*deadline, *kind))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, kind) in &due {
            armed.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

impl TimerService for DriverTimers {
    fn start(&self, kind: TimerKind, delay: Duration) {
        self.armed().insert(kind, Instant::now() + delay);
    }

    fn cancel(&self, kind: TimerKind) {
        self.armed().remove(&kind);
    }

    fn now(&self) -> std::time::Instant {
        Instant::now().into_std()
    }
}

/// Drives one client over one transport.
pub struct ClientDriver<T: Transport> {
    client: SubscriptionClient,
    transport: T,
    timers: Arc<DriverTimers>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Exchanges the client opened.
    local: HashSet<ExchangeId>,
    /// Exchanges the peer opened that the client has not closed.
    peer: HashSet<ExchangeId>,
    /// Response deadlines of local exchanges awaiting an answer.
    responses: HashMap<ExchangeId, Instant>,
    connected: bool,
}

impl<T: Transport> ClientDriver<T> {
    /// Create and initialize a client bound to `transport`.
    ///
    /// # Errors
    ///
    /// Any error from [`SubscriptionClient::init`].
    pub fn new(
        id: usize,
        config: &Config,
        transport: T,
        peer_node_id: u64,
        catalog: CatalogRef,
        events: Box<dyn EventSink>,
        update_mutex: Option<UpdateMutexRef>,
    ) -> Result<(Self, DriverHandle), ClientError> {
        let timers = Arc::new(DriverTimers::default());
        let (binding, outbound) = ChannelBinding::new(peer_node_id);
        let mut client = SubscriptionClient::new(id, config, timers.clone());
        client.init(Arc::new(binding), catalog, events, update_mutex)?;

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let driver = Self {
            client,
            transport,
            timers,
            outbound,
            commands,
            local: HashSet::new(),
            peer: HashSet::new(),
            responses: HashMap::new(),
            connected: true,
        };
        Ok((driver, DriverHandle { commands: commands_tx }))
    }

    /// Run until every [`DriverHandle`] is dropped.
    ///
    /// # Errors
    ///
    /// A transport error while closing.
    pub async fn run(mut self) -> Result<(), DriverError> {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => command(&mut self.client),
                    None => break,
                },
                Some(work) = self.outbound.recv() => self.perform(work).await,
                frame = self.transport.recv(), if self.connected => match frame {
                    Ok(frame) => self.deliver(frame),
                    Err(e) => self.on_transport_lost(e),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due();
                }
            }
        }

        tracing::debug!("driver stopping");
        self.client.free();
        self.transport.close().await?;
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        let response = self.responses.values().min().copied();
        match (self.timers.next_deadline(), response) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        for kind in self.timers.take_due(now) {
            self.client.on_timer(kind);
        }
        let expired: Vec<ExchangeId> = self
            .responses
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(exchange, _)| *exchange)
            .collect();
        for exchange in expired {
            if self.responses.remove(&exchange).is_some() {
                tracing::debug!("response timeout on {:?}", exchange);
                self.client.on_response_timeout(exchange);
            }
        }
    }

    async fn perform(&mut self, work: Outbound) {
        match work {
            Outbound::Send {
                exchange,
                message,
                expect_response,
                response_timeout,
            } => {
                if !self.peer.contains(&exchange) {
                    self.local.insert(exchange);
                }
                let sent = match message.to_bytes() {
                    Ok(bytes) => self
                        .transport
                        .send(exchange, &bytes)
                        .await
                        .map_err(|e| BindingError::SendFailed(e.to_string())),
                    Err(e) => Err(BindingError::SendFailed(e.to_string())),
                };
                match sent {
                    Ok(()) if expect_response => {
                        self.responses
                            .insert(exchange, Instant::now() + response_timeout);
                    }
                    Ok(()) => {}
                    Err(e) => {
                        tracing::warn!("send on {:?} failed: {}", exchange, e);
                        self.client.on_send_error(exchange, e);
                    }
                }
            }
            Outbound::Close(exchange) | Outbound::Abort(exchange) => {
                self.local.remove(&exchange);
                self.peer.remove(&exchange);
                self.responses.remove(&exchange);
            }
        }
    }

    fn deliver(&mut self, frame: Frame) {
        let exchange = frame.exchange;
        let decoded = Message::from_bytes(&frame.bytes);
        if self.local.contains(&exchange) {
            self.responses.remove(&exchange);
            match decoded {
                Ok(message) => self.client.on_message(exchange, message),
                Err(e) => self
                    .client
                    .on_exchange_error(exchange, ClientError::MalformedMessage(e.to_string())),
            }
            return;
        }
        match decoded {
            Ok(message) => {
                self.peer.insert(exchange);
                self.client.on_peer_request(exchange, message);
            }
            Err(e) => tracing::debug!("dropping undecodable peer frame on {:?}: {}", exchange, e),
        }
    }

    fn on_transport_lost(&mut self, error: TransportError) {
        tracing::warn!("transport lost: {}", error);
        self.connected = false;
        self.local.clear();
        self.peer.clear();
        self.responses.clear();
        self.client
            .on_binding_event(BindingEvent::Failed(BindingError::Failed(error.to_string())));
    }
}

impl<T: Transport> std::fmt::Debug for ClientDriver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDriver")
            .field("client", &self.client)
            .field("local", &self.local.len())
            .field("peer", &self.peer.len())
            .field("connected", &self.connected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataSink, MemoryCatalog, MemorySink};
    use crate::client::fixture::{self, Recorder, SUBSCRIPTION, T1};
    use crate::event::SubscribeRequestParams;
    use crate::transport::MockTransport;
    use wdm_types::{
        status::{common, PROFILE_COMMON}, DataElement, DataVersion, ElementValue, NotificationRequest,
        StatusReport, SubscribeResponse, TraitPath,
    };

    struct Running {
        handle: DriverHandle,
        transport: MockTransport,
        recorder: Recorder,
        sink: Arc<MemorySink>,
        task: tokio::task::JoinHandle<Result<(), DriverError>>,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn start() -> Running {
        init_tracing();
        let mut config = Config::default();
        config.resubscribe.jitter_ms = 0;
        let transport = MockTransport::new();
        let recorder = Recorder::default();
        recorder.set_params(SubscribeRequestParams {
            paths: vec![TraitPath::root(T1)],
            ..SubscribeRequestParams::default()
        });
        let sink = Arc::new(MemorySink::updatable(fixture::schema()));
        let catalog = MemoryCatalog::new().with(T1, sink.clone());

        let (driver, handle) = ClientDriver::new(
            0,
            &config,
            transport.clone(),
            42,
            Arc::new(catalog),
            Box::new(recorder.clone()),
            None,
        )
        .unwrap();
        let task = tokio::spawn(driver.run());
        Running {
            handle,
            transport,
            recorder,
            sink,
            task,
        }
    }

    /// Let the driver drain everything it can.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn establish(running: &Running) {
        running
            .handle
            .call(|client| client.initiate_subscription())
            .await
            .unwrap()
            .unwrap();
        let (exchange, message) = running.transport.wait_for_sent(1).await;
        assert!(matches!(message, Message::SubscribeRequest(_)));
        running.transport.deliver(
            exchange,
            &Message::SubscribeResponse(SubscribeResponse {
                subscription_id: SUBSCRIPTION,
                timeout_sec: None,
            }),
        );
        settle().await;
    }

    // ===========================================
    // Subscribing
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn establishes_over_transport() {
        let running = start();
        establish(&running).await;

        let id = running
            .handle
            .call(|client| client.subscription_id())
            .await
            .unwrap();
        assert_eq!(id, Ok(SUBSCRIPTION));
        assert_eq!(
            running.handle.call(|client| client.peer_node_id()).await,
            Ok(Some(42))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let running = start();
        running
            .handle
            .call(|client| client.initiate_subscription())
            .await
            .unwrap()
            .unwrap();
        running.transport.wait_for_sent(1).await;

        // default response timeout is 10s, holdoff 1s after that
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        settle().await;

        assert_eq!(
            running.recorder.terminations(),
            vec![(Some(ClientError::Timeout), true)]
        );
        assert_eq!(
            running
                .handle
                .call(|client| client.is_in_resubscribe_holdoff())
                .await,
            Ok(true)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn holdoff_timer_resubscribes() {
        let running = start();
        running
            .handle
            .call(|client| client.initiate_subscription())
            .await
            .unwrap()
            .unwrap();
        let (first, _) = running.transport.wait_for_sent(1).await;
        running.transport.deliver(
            first,
            &Message::StatusReport(StatusReport::new(PROFILE_COMMON, common::BUSY)),
        );
        settle().await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let (second, message) = running.transport.wait_for_sent(2).await;
        assert!(matches!(message, Message::SubscribeRequest(_)));
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_response_is_malformed() {
        let running = start();
        running
            .handle
            .call(|client| {
                client.disable_resubscribe();
                client.initiate_subscription()
            })
            .await
            .unwrap()
            .unwrap();
        let (exchange, _) = running.transport.wait_for_sent(1).await;
        running.transport.deliver_bytes(exchange, vec![0xC1]);
        settle().await;

        let terminations = running.recorder.terminations();
        assert_eq!(terminations.len(), 1);
        assert!(matches!(
            terminations[0],
            (Some(ClientError::MalformedMessage(_)), false)
        ));
    }

    // ===========================================
    // Peer requests
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn notification_applied_and_acknowledged() {
        let running = start();
        establish(&running).await;

        let exchange = running.transport.open_peer_exchange();
        let path = TraitPath::new(T1, fixture::h(2));
        running.transport.deliver(
            exchange,
            &Message::NotificationRequest(NotificationRequest {
                subscription_id: SUBSCRIPTION,
                data_list: vec![DataElement {
                    path,
                    version: DataVersion(7),
                    is_partial_change: false,
                    value: ElementValue::Encoded(vec![9]),
                }],
                events: Vec::new(),
            }),
        );

        let (acked, message) = running.transport.wait_for_sent(2).await;
        assert_eq!(acked, exchange);
        assert_eq!(message, Message::StatusReport(StatusReport::success()));
        assert_eq!(running.sink.version(), Some(DataVersion(7)));
        assert_eq!(running.sink.value(fixture::h(2)), Some(vec![9]));
    }

    // ===========================================
    // Transport failures
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn lost_transport_terminates() {
        let running = start();
        establish(&running).await;
        running
            .handle
            .call(|client| client.disable_resubscribe())
            .await
            .unwrap();

        running.transport.disconnect();
        settle().await;

        let terminations = running.recorder.terminations();
        assert!(matches!(
            terminations[..],
            [(Some(ClientError::Binding(BindingError::Failed(_))), false)]
        ));
        assert_eq!(running.sink.terminations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_reported_to_client() {
        let running = start();
        running.transport.fail_next_send("buffer full");
        running
            .handle
            .call(|client| {
                client.disable_resubscribe();
                client.initiate_subscription()
            })
            .await
            .unwrap()
            .unwrap();
        settle().await;

        assert!(matches!(
            running.recorder.terminations()[..],
            [(Some(ClientError::TransportFailure(_)), false)]
        ));
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_stops_driver() {
        let running = start();
        establish(&running).await;
        let Running {
            handle,
            transport,
            task,
            ..
        } = running;
        drop(handle);

        assert_eq!(task.await.unwrap(), Ok(()));
        assert!(!transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn call_after_stop_fails() {
        let running = start();
        let handle = running.handle.clone();
        running.task.abort();
        let _ = running.task.await;

        assert_eq!(
            handle.call(|client| client.is_free()).await,
            Err(DriverError::Stopped)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_in_deadline_order() {
        let timers = DriverTimers::default();
        timers.start(TimerKind::UpdateRetry, Duration::from_secs(2));
        timers.start(TimerKind::Subscription, Duration::from_secs(1));
        assert_eq!(
            timers.next_deadline(),
            Some(Instant::now() + Duration::from_secs(1))
        );

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(
            timers.take_due(Instant::now()),
            vec![TimerKind::Subscription, TimerKind::UpdateRetry]
        );
        assert_eq!(timers.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let timers = DriverTimers::default();
        timers.start(TimerKind::Subscription, Duration::from_secs(1));
        timers.cancel(TimerKind::Subscription);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(timers.take_due(Instant::now()).is_empty());
    }
}
