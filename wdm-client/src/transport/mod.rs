//! Transport seam under the driver.
//!
//! A transport moves encoded messages between this node and the publisher.
//! Every frame is tagged with the exchange it belongs to; exchanges the client
//! opens are allocated by the binding, exchanges the peer opens are named by
//! the peer and must not collide with them.
//!
//! # Design
//!
//! The transport trait is async and message-oriented:
//! - `send()` transmits one encoded message on an exchange
//! - `recv()` waits for the next inbound frame
//! - `close()` gracefully terminates
//!
//! `recv()` must be cancel-safe: the driver polls it inside `tokio::select!`.

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;
use wdm_types::ExchangeId;

/// Largest frame a transport must carry: a full update payload plus framing.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 + 256;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame above [`MAX_FRAME_SIZE`].
    #[error("frame of {0} bytes too large")]
    FrameTooLarge(usize),
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Exchange the bytes belong to.
    pub exchange: ExchangeId,
    /// Encoded message.
    pub bytes: Vec<u8>,
}

/// Connection to the publisher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an encoded message on an exchange.
    async fn send(&self, exchange: ExchangeId, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
