//! Status reports sent by the responder.
//!
//! A status report is a `(profile, code)` pair. Codes in the common profile
//! apply to any request; codes in the WDM profile are specific to
//! subscriptions and updates.

use serde::{Deserialize, Serialize};

/// Profile for status codes shared by every request type.
pub const PROFILE_COMMON: u32 = 0x0000_0000;
/// Profile for data-management status codes.
pub const PROFILE_WDM: u32 = 0x0000_000B;

/// Common profile status codes.
pub mod common {
    /// Request succeeded.
    pub const SUCCESS: u16 = 0x0000;
    /// Request was canceled.
    pub const CANCELED: u16 = 0x0001;
    /// Request was malformed.
    pub const BAD_REQUEST: u16 = 0x0010;
    /// Message type not supported.
    pub const UNSUPPORTED_MESSAGE: u16 = 0x0011;
    /// Message was not expected in the current state.
    pub const UNEXPECTED_MESSAGE: u16 = 0x0012;
    /// Requester is not allowed to perform the operation.
    pub const ACCESS_DENIED: u16 = 0x0014;
    /// Responder ran out of memory.
    pub const OUT_OF_MEMORY: u16 = 0x0015;
    /// Responder is busy; try again later.
    pub const BUSY: u16 = 0x0019;
    /// Responder timed out processing the request.
    pub const TIMEOUT: u16 = 0x001A;
    /// Unspecified internal error.
    pub const INTERNAL_ERROR: u16 = 0x001B;
}

/// WDM profile status codes.
pub mod wdm {
    /// A path in the request does not exist in the schema.
    pub const INVALID_PATH: u16 = 0x0021;
    /// Conditional update was issued against a stale version.
    pub const VERSION_MISMATCH: u16 = 0x0030;
    /// Subscription id is not known to the publisher.
    pub const INVALID_SUBSCRIPTION: u16 = 0x0041;
    /// Value in an update does not match the schema.
    pub const INVALID_VALUE: u16 = 0x0050;
}

/// A status report received from (or sent to) a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Profile the code belongs to.
    pub profile_id: u32,
    /// Status code within the profile.
    pub status_code: u16,
    /// Optional profile-specific detail.
    pub additional_info: Option<Vec<u8>>,
}

impl StatusReport {
    /// Create a status report without additional info.
    pub fn new(profile_id: u32, status_code: u16) -> Self {
        Self {
            profile_id,
            status_code,
            additional_info: None,
        }
    }

    /// The success report.
    pub fn success() -> Self {
        Self::new(PROFILE_COMMON, common::SUCCESS)
    }

    /// Check whether this report signals success.
    pub fn is_success(&self) -> bool {
        self.profile_id == PROFILE_COMMON && self.status_code == common::SUCCESS
    }

    /// Check whether the condition reported is transient.
    ///
    /// Transient conditions (busy, out of resources, responder timeout) may
    /// succeed if the same request is sent again later.
    pub fn is_transient(&self) -> bool {
        self.profile_id == PROFILE_COMMON
            && matches!(
                self.status_code,
                common::BUSY | common::OUT_OF_MEMORY | common::TIMEOUT
            )
    }
}
