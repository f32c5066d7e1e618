//! Mock binding for testing.
//!
//! Captures sent messages and exchange lifecycle calls, and allows forcing
//! failures on the next call.

use super::{Binding, BindingError, BindingState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wdm_types::{ExchangeId, Message};

/// A message captured by [`MockBinding`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Exchange the message was sent on.
    pub exchange: ExchangeId,
    /// The message.
    pub message: Message,
    /// Whether a response was expected.
    pub expect_response: bool,
    /// Response timeout requested.
    pub response_timeout: Duration,
}

/// Mock binding for testing.
#[derive(Debug, Default)]
pub struct MockBinding {
    inner: Arc<Mutex<MockBindingInner>>,
}

#[derive(Debug, Default)]
struct MockBindingInner {
    ready: bool,
    prepare_pending: bool,
    next_exchange: u32,
    open_exchanges: Vec<ExchangeId>,
    closed_exchanges: Vec<ExchangeId>,
    aborted_exchanges: Vec<ExchangeId>,
    sent_messages: Vec<SentMessage>,
    prepare_calls: usize,
    peer_node_id: u64,
    fail_next_prepare: Option<String>,
    fail_next_allocate: bool,
    fail_next_send: Option<String>,
}

impl MockBinding {
    /// Create a new mock binding. `prepare()` succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `prepare()` return [`BindingState::Pending`] until
    /// [`MockBinding::complete_prepare`] is called.
    pub fn set_prepare_pending(&self, pending: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepare_pending = pending;
    }

    /// Finish a pending preparation.
    pub fn complete_prepare(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.prepare_pending = false;
        inner.ready = true;
    }

    /// Open an exchange as if the peer had initiated it; requests on it are
    /// delivered through `on_peer_request`.
    pub fn open_peer_exchange(&self) -> ExchangeId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_exchange += 1;
        let exchange = ExchangeId(inner.next_exchange);
        inner.open_exchanges.push(exchange);
        exchange
    }

    /// Set the peer node id.
    pub fn set_peer_node_id(&self, node_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.peer_node_id = node_id;
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.clone()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<SentMessage> {
        let inner = self.inner.lock().unwrap();
        inner.sent_messages.last().cloned()
    }

    /// Remove and return all messages sent so far.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.sent_messages)
    }

    /// Exchanges allocated and not yet closed or aborted.
    pub fn open_exchanges(&self) -> Vec<ExchangeId> {
        let inner = self.inner.lock().unwrap();
        inner.open_exchanges.clone()
    }

    /// Exchanges closed gracefully.
    pub fn closed_exchanges(&self) -> Vec<ExchangeId> {
        let inner = self.inner.lock().unwrap();
        inner.closed_exchanges.clone()
    }

    /// Exchanges aborted.
    pub fn aborted_exchanges(&self) -> Vec<ExchangeId> {
        let inner = self.inner.lock().unwrap();
        inner.aborted_exchanges.clone()
    }

    /// Number of `prepare()` calls.
    pub fn prepare_calls(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.prepare_calls
    }

    /// Cause the next prepare() to fail with the given error.
    pub fn fail_next_prepare(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_prepare = Some(error.to_string());
    }

    /// Cause the next allocate_exchange() to fail.
    pub fn fail_next_allocate(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_allocate = true;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    fn release(inner: &mut MockBindingInner, exchange: ExchangeId) -> bool {
        let before = inner.open_exchanges.len();
        inner.open_exchanges.retain(|e| *e != exchange);
        before != inner.open_exchanges.len()
    }
}

impl Clone for MockBinding {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Binding for MockBinding {
    fn prepare(&self) -> Result<BindingState, BindingError> {
        let mut inner = self.inner.lock().unwrap();
        inner.prepare_calls += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_prepare.take() {
            return Err(BindingError::PrepareFailed(error));
        }

        if inner.prepare_pending {
            return Ok(BindingState::Pending);
        }
        inner.ready = true;
        Ok(BindingState::Ready)
    }

    fn is_ready(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.ready
    }

    fn allocate_exchange(&self) -> Result<ExchangeId, BindingError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.ready {
            return Err(BindingError::NotReady);
        }
        if std::mem::take(&mut inner.fail_next_allocate) {
            return Err(BindingError::ExchangeExhausted);
        }

        inner.next_exchange += 1;
        let exchange = ExchangeId(inner.next_exchange);
        inner.open_exchanges.push(exchange);
        Ok(exchange)
    }

    fn send(
        &self,
        exchange: ExchangeId,
        message: &Message,
        expect_response: bool,
        response_timeout: Duration,
    ) -> Result<(), BindingError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.open_exchanges.contains(&exchange) {
            return Err(BindingError::UnknownExchange(exchange));
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(BindingError::SendFailed(error));
        }

        inner.sent_messages.push(SentMessage {
            exchange,
            message: message.clone(),
            expect_response,
            response_timeout,
        });
        Ok(())
    }

    fn close_exchange(&self, exchange: ExchangeId) {
        let mut inner = self.inner.lock().unwrap();
        if Self::release(&mut inner, exchange) {
            inner.closed_exchanges.push(exchange);
        }
    }

    fn abort_exchange(&self, exchange: ExchangeId) {
        let mut inner = self.inner.lock().unwrap();
        if Self::release(&mut inner, exchange) {
            inner.aborted_exchanges.push(exchange);
        }
    }

    fn peer_node_id(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.peer_node_id
    }
}
