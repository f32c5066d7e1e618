//! # wdm-core
//!
//! Pure logic for the WDM subscription client (no I/O, instant tests).
//!
//! This crate implements the bookkeeping and algorithms behind a trait
//! subscription without any network access, clock, or callbacks:
//!
//! - [`path_set`] - bounded, ordered path records (the pending and
//!   in-progress sets)
//! - [`update`] - moves between the two sets, conflict flags, and the
//!   resumable update request context
//! - [`batcher`] - packing in-progress paths into size-bounded update payloads
//! - [`resubscribe`] - backoff policies for subscribe and update retries
//! - [`liveness`] - the liveness timer discipline
//! - [`state`] - client states, roles, and their range predicates
//! - [`schema`] - the property tree used for the "contains" relation
//!
//! The actual I/O (exchanges, timers, application callbacks) is performed by
//! `wdm-client`, which drives these types from its processing loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batcher;
pub mod liveness;
pub mod path_set;
pub mod resubscribe;
pub mod schema;
pub mod state;
pub mod update;

pub use batcher::{
    effective_max_update_size, form_payload, BatchError, ElementSource, Payload,
    DEFAULT_MAX_UPDATE_SIZE,
};
pub use liveness::{LivenessCheck, LivenessTimer};
pub use path_set::{PathFlags, PathRecord, PathSet, PathSetError};
pub use resubscribe::{
    BackoffConfig, ExponentialBackoff, FailureKind, RequestType, ResubscribeAttempt,
    ResubscribePolicy,
};
pub use schema::{SchemaEngine, SchemaRef, StaticSchema};
pub use state::{ClientConfig, ClientState};
pub use update::{PendingSetState, UpdateError, UpdateRequestContext, UpdateSets};
