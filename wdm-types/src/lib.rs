//! # wdm-types
//!
//! Wire-level types for the WDM trait subscription protocol.
//!
//! This crate provides the foundational types used across all wdm crates:
//! - [`TraitDataHandle`], [`PropertyPathHandle`], [`TraitPath`] - Addressing
//!   of trait instances and properties within them
//! - [`SubscriptionId`], [`DataVersion`], [`ExchangeId`] - Identity and ordering types
//! - [`Message`] - Protocol messages (SubscribeRequest, NotificationRequest, UpdateRequest, etc.)
//! - [`StatusReport`] - Peer status codes and their classification
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
pub mod status;

pub use error::WireError;
pub use ids::{
    DataVersion, ExchangeId, PropertyDictionaryKey, PropertyPathHandle, PropertySchemaHandle,
    SubscriptionId, TraitDataHandle, TraitPath, VersionedTraitPath,
};
pub use messages::{
    DataElement, ElementValue, EventRecord, LastObservedEvent, Message, MessageType,
    NotificationRequest, SubscribeCancelRequest, SubscribeRequest, SubscribeResponse,
    UpdateElement, UpdateRequest, UpdateResponse,
};
pub use status::StatusReport;
