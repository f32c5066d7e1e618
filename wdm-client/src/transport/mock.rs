//! In-memory transport playing the publisher's side in tests.
//!
//! Frames the driver sends are captured; frames the test delivers are handed
//! to the next `recv()`.

use super::{Frame, Transport, TransportError, MAX_FRAME_SIZE};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use wdm_types::{ExchangeId, Message};

/// First exchange id handed out by [`MockTransport::open_peer_exchange`].
const PEER_EXCHANGE_BASE: u32 = 0x8000_0000;

/// In-memory transport.
///
/// Clones share state, so a test keeps one clone while the driver owns
/// another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    inbound: Arc<Notify>,
    outbound: Arc<Notify>,
}

#[derive(Debug)]
struct MockTransportInner {
    connected: bool,
    sent: Vec<Frame>,
    receive_queue: VecDeque<Frame>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    next_peer_exchange: u32,
}

impl Default for MockTransportInner {
    fn default() -> Self {
        Self {
            connected: true,
            sent: Vec::new(),
            receive_queue: VecDeque::new(),
            fail_next_send: None,
            fail_next_recv: None,
            next_peer_exchange: PEER_EXCHANGE_BASE,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a connected transport.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            inbound: Arc::new(Notify::new()),
            outbound: Arc::new(Notify::new()),
        }
    }

    /// Queue raw bytes for the next `recv()`.
    pub fn deliver_bytes(&self, exchange: ExchangeId, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.receive_queue.push_back(Frame { exchange, bytes });
        drop(inner);
        self.inbound.notify_one();
    }

    /// Encode and queue a message for the next `recv()`.
    pub fn deliver(&self, exchange: ExchangeId, message: &Message) {
        let bytes = message.to_bytes().unwrap();
        self.deliver_bytes(exchange, bytes);
    }

    /// Allocate an exchange id as the peer would for a request of its own.
    pub fn open_peer_exchange(&self) -> ExchangeId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_peer_exchange;
        inner.next_peer_exchange += 1;
        ExchangeId(id)
    }

    /// All frames sent so far.
    pub fn sent_frames(&self) -> Vec<Frame> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// All messages sent so far, decoded.
    pub fn sent_messages(&self) -> Vec<(ExchangeId, Message)> {
        self.sent_frames()
            .into_iter()
            .map(|frame| (frame.exchange, Message::from_bytes(&frame.bytes).unwrap()))
            .collect()
    }

    /// Wait until at least `count` frames were sent; returns the `count`th.
    pub async fn wait_for_sent(&self, count: usize) -> (ExchangeId, Message) {
        loop {
            let notified = self.outbound.notified();
            let messages = self.sent_messages();
            if messages.len() >= count {
                return messages[count - 1].clone();
            }
            notified.await;
        }
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_recv = Some(error.to_string());
        drop(inner);
        self.inbound.notify_one();
    }

    /// Drop the connection; a pending `recv()` fails.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        drop(inner);
        self.inbound.notify_one();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, exchange: ExchangeId, bytes: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(bytes.len()));
        }

        inner.sent.push(Frame {
            exchange,
            bytes: bytes.to_vec(),
        });
        drop(inner);
        self.outbound.notify_one();
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.connected {
                    return Err(TransportError::ConnectionClosed);
                }
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(frame) = inner.receive_queue.pop_front() {
                    return Ok(frame);
                }
            }
            self.inbound.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.disconnect();
        Ok(())
    }
}
