//! # wdm-client
//!
//! Subscription client for the WDM trait data-management protocol.
//!
//! A [`SubscriptionClient`] keeps a live, versioned copy of remote trait data
//! in local [`DataSink`]s and pushes local changes back to the publisher.
//!
//! ## Features
//!
//! - **Subscription lifecycle**: establish, liveness, cancel, abort, and
//!   resubscribe with backoff
//! - **Updates**: bounded pending and in-progress path sets, payloads under a
//!   size budget, per-path outcome reporting and retries
//! - **Conflict detection**: notifications overlapping an outstanding update
//!   force a resync
//! - **Pluggable seams**: [`Binding`], [`TraitCatalog`], [`TimerService`],
//!   [`EventSink`] and [`Transport`]
//!
//! ## Example
//!
//! ```ignore
//! use wdm_client::{ClientDriver, Config, MemoryCatalog, DefaultEventHandler};
//!
//! let config = Config::from_file("client.toml")?;
//! let (driver, handle) = ClientDriver::new(
//!     0, &config, transport, peer_node_id,
//!     Arc::new(catalog), Box::new(DefaultEventHandler), None,
//! )?;
//! tokio::spawn(driver.run());
//!
//! handle.call(|client| client.initiate_subscription()).await??;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binding;
pub mod catalog;
mod client;
pub mod config;
pub mod driver;
mod error;
pub mod event;
pub mod mutex;
pub mod pool;
pub mod timer;
pub mod transport;

pub use binding::{Binding, BindingError, BindingEvent, BindingRef, BindingState, MockBinding};
pub use catalog::{CatalogRef, DataSink, MemoryCatalog, MemorySink, SinkError, SinkRef, TraitCatalog};
pub use client::SubscriptionClient;
pub use config::{Config, ConfigError, SubscriptionTimeouts, MAX_TIMEOUT_SECS};
pub use driver::{ClientDriver, DriverError, DriverHandle};
pub use error::ClientError;
pub use event::{
    DefaultEventHandler, Directive, EventId, EventSink, InEventParam, OutEventParam,
    SubscribeRequestParams,
};
pub use mutex::{RecursiveMutex, UpdateMutex, UpdateMutexRef};
pub use pool::{ClientHandle, ClientPool};
pub use timer::{ManualTimers, TimerKind, TimerRef, TimerService};
pub use transport::{MockTransport, Transport, TransportError};
