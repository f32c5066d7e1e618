//! Error types for the subscription client.

use thiserror::Error;
use wdm_core::{BatchError, FailureKind, PathSetError, UpdateError};
use wdm_types::{StatusReport, TraitDataHandle, TraitPath, WireError};

use crate::binding::BindingError;

/// Client errors.
///
/// Errors are `Clone` so they can be carried in events and reported once per
/// affected path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A pool or path set is full.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation invoked outside its legal state range.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// No response within the exchange or liveness timeout.
    #[error("timeout")]
    Timeout,

    /// The peer answered with a failure status report.
    #[error("rejected by peer (profile {:#x}, code {:#x})", .status.profile_id, .status.status_code)]
    PeerRejected {
        /// The status report received.
        status: StatusReport,
    },

    /// The peer sent a message that could not be processed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Application-supplied parameters are out of range.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// The exchange could not send.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Conditional and unconditional changes mixed on one trait.
    #[error("inconsistent conditionality for trait {0}")]
    InconsistentConditionality(TraitDataHandle),

    /// The trait is not updatable from this client.
    #[error("trait {0} is not updatable")]
    NotUpdatable(TraitDataHandle),

    /// A conditional update was made against a stale version.
    #[error("version mismatch on trait {0}")]
    VersionMismatch(TraitDataHandle),

    /// A notification changed data an outstanding update was writing.
    #[error("potential data loss")]
    PotentialDataLoss,

    /// A path cannot be encoded within the maximum update size.
    #[error("{path} too large for an update of {budget} bytes")]
    PayloadTooLarge {
        /// The offending path.
        path: TraitPath,
        /// The payload budget.
        budget: usize,
    },

    /// The binding failed or could not be prepared.
    #[error("binding error: {0}")]
    Binding(#[from] BindingError),
}

impl ClientError {
    /// Classification passed to retry policies.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::Timeout => FailureKind::Timeout,
            ClientError::TransportFailure(_) => FailureKind::Transport,
            ClientError::PeerRejected { .. } | ClientError::VersionMismatch(_) => {
                FailureKind::PeerRejected
            }
            ClientError::MalformedMessage(_) => FailureKind::MalformedMessage,
            ClientError::ResourceExhausted(_) | ClientError::PayloadTooLarge { .. } => {
                FailureKind::ResourceExhausted
            }
            ClientError::Binding(_) => FailureKind::Binding,
            ClientError::PotentialDataLoss => FailureKind::PotentialDataLoss,
            ClientError::InvalidState(_)
            | ClientError::ConfigurationInvalid(_)
            | ClientError::InconsistentConditionality(_)
            | ClientError::NotUpdatable(_) => FailureKind::InvalidParameters,
        }
    }
}

impl From<PathSetError> for ClientError {
    fn from(err: PathSetError) -> Self {
        ClientError::ResourceExhausted(err.to_string())
    }
}

impl From<UpdateError> for ClientError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Capacity(err) => err.into(),
            UpdateError::InconsistentConditionality { trait_handle } => {
                ClientError::InconsistentConditionality(trait_handle)
            }
            UpdateError::PayloadInFlight => ClientError::InvalidState("update payload in flight"),
        }
    }
}

impl From<BatchError> for ClientError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::PayloadTooLarge { path, budget } => {
                ClientError::PayloadTooLarge { path, budget }
            }
            BatchError::Sink { .. } => ClientError::ConfigurationInvalid(err.to_string()),
            BatchError::Encoding(reason) => ClientError::MalformedMessage(reason),
        }
    }
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::MalformedMessage(err.to_string())
    }
}
