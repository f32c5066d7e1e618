//! Binding abstraction: the connection a subscription runs over.
//!
//! A binding supplies exchanges and sends messages on them. Sends return
//! immediately; the outcome is reported back into the client later through
//! [`SubscriptionClient::on_message`], [`SubscriptionClient::on_response_timeout`]
//! or [`SubscriptionClient::on_send_error`], tagged with the exchange.
//!
//! Bindings are shared between the application and every subscription using
//! them, so all methods take `&self`.
//!
//! [`SubscriptionClient::on_message`]: crate::SubscriptionClient::on_message
//! [`SubscriptionClient::on_response_timeout`]: crate::SubscriptionClient::on_response_timeout
//! [`SubscriptionClient::on_send_error`]: crate::SubscriptionClient::on_send_error

mod channel;
mod mock;

pub use channel::{ChannelBinding, Outbound};
pub use mock::{MockBinding, SentMessage};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use wdm_types::{ExchangeId, Message};

/// Binding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The binding is not ready for exchanges.
    #[error("binding not ready")]
    NotReady,

    /// Preparing the binding failed.
    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    /// No exchange could be allocated.
    #[error("no exchange available")]
    ExchangeExhausted,

    /// The exchange is not open.
    #[error("unknown exchange {0:?}")]
    UnknownExchange(ExchangeId),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The binding failed after being ready.
    #[error("binding failed: {0}")]
    Failed(String),
}

/// Result of [`Binding::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Exchanges can be allocated now.
    Ready,
    /// Preparation continues; [`BindingEvent::Ready`] or
    /// [`BindingEvent::PrepareFailed`] follows.
    Pending,
}

/// Binding lifecycle events forwarded into the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingEvent {
    /// Preparation finished.
    Ready,
    /// Preparation failed.
    PrepareFailed(BindingError),
    /// The binding failed; every exchange on it is gone.
    Failed(BindingError),
}

/// Connection supplying exchanges to subscriptions.
pub trait Binding: Send + Sync {
    /// Start preparing the binding for use.
    fn prepare(&self) -> Result<BindingState, BindingError>;

    /// Check whether exchanges can be allocated.
    fn is_ready(&self) -> bool;

    /// Allocate a new exchange. Identities are never reused.
    fn allocate_exchange(&self) -> Result<ExchangeId, BindingError>;

    /// Send a message on an exchange.
    ///
    /// When `expect_response` is set the binding reports a response timeout
    /// for the exchange if nothing arrives within `response_timeout`.
    fn send(
        &self,
        exchange: ExchangeId,
        message: &Message,
        expect_response: bool,
        response_timeout: Duration,
    ) -> Result<(), BindingError>;

    /// Close an exchange gracefully.
    fn close_exchange(&self, exchange: ExchangeId);

    /// Abort an exchange; nothing more is delivered for it.
    fn abort_exchange(&self, exchange: ExchangeId);

    /// Node id of the peer.
    fn peer_node_id(&self) -> u64;
}

/// Shared binding handle.
pub type BindingRef = Arc<dyn Binding>;
