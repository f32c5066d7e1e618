//! Channel-backed binding used by the driver.
//!
//! Sends are queued on an unbounded channel and returned to the caller
//! immediately; the driver drains the channel and performs the actual I/O.

use super::{Binding, BindingError, BindingState};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use wdm_types::{ExchangeId, Message};

/// Work queued by a [`ChannelBinding`] for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send a message.
    Send {
        /// Exchange to send on.
        exchange: ExchangeId,
        /// The message.
        message: Message,
        /// Whether a response is expected.
        expect_response: bool,
        /// How long to wait for it.
        response_timeout: Duration,
    },
    /// Close an exchange.
    Close(ExchangeId),
    /// Abort an exchange.
    Abort(ExchangeId),
}

/// Binding that forwards all work to a channel.
#[derive(Debug)]
pub struct ChannelBinding {
    tx: mpsc::UnboundedSender<Outbound>,
    next_exchange: AtomicU32,
    ready: AtomicBool,
    peer_node_id: u64,
}

impl ChannelBinding {
    /// Create a binding and the receiver the driver drains.
    pub fn new(peer_node_id: u64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let binding = Self {
            tx,
            next_exchange: AtomicU32::new(0),
            ready: AtomicBool::new(false),
            peer_node_id,
        };
        (binding, rx)
    }

    fn queue(&self, work: Outbound) -> Result<(), BindingError> {
        self.tx
            .send(work)
            .map_err(|_| BindingError::Failed("driver stopped".into()))
    }
}

impl Binding for ChannelBinding {
    fn prepare(&self) -> Result<BindingState, BindingError> {
        if self.tx.is_closed() {
            return Err(BindingError::PrepareFailed("driver stopped".into()));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(BindingState::Ready)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn allocate_exchange(&self) -> Result<ExchangeId, BindingError> {
        if !self.is_ready() {
            return Err(BindingError::NotReady);
        }
        let id = self.next_exchange.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ExchangeId(id))
    }

    fn send(
        &self,
        exchange: ExchangeId,
        message: &Message,
        expect_response: bool,
        response_timeout: Duration,
    ) -> Result<(), BindingError> {
        self.queue(Outbound::Send {
            exchange,
            message: message.clone(),
            expect_response,
            response_timeout,
        })
        .map_err(|e| BindingError::SendFailed(e.to_string()))
    }

    fn close_exchange(&self, exchange: ExchangeId) {
        if let Err(e) = self.queue(Outbound::Close(exchange)) {
            tracing::debug!("close of {:?} dropped: {}", exchange, e);
        }
    }

    fn abort_exchange(&self, exchange: ExchangeId) {
        if let Err(e) = self.queue(Outbound::Abort(exchange)) {
            tracing::debug!("abort of {:?} dropped: {}", exchange, e);
        }
    }

    fn peer_node_id(&self) -> u64 {
        self.peer_node_id
    }
}
