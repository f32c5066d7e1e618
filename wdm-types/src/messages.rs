//! Protocol messages for the WDM subscription client.
//!
//! These are the payloads carried on an exchange. The byte layout is
//! MessagePack; nothing above this crate depends on it.

use serde::{Deserialize, Serialize};

use crate::{
    DataVersion, PropertyDictionaryKey, StatusReport, SubscriptionId, TraitPath,
    VersionedTraitPath, WireError,
};

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Status report (ack or rejection)
    StatusReport = 0,
    /// Request to establish a subscription
    SubscribeRequest = 1,
    /// Publisher confirmation of a subscription
    SubscribeResponse = 2,
    /// Request to end a subscription
    SubscribeCancelRequest = 3,
    /// Data change notification
    NotificationRequest = 4,
    /// Request to change trait data on the publisher
    UpdateRequest = 5,
    /// Per-element outcome of an update
    UpdateResponse = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::StatusReport),
            1 => Ok(MessageType::SubscribeRequest),
            2 => Ok(MessageType::SubscribeResponse),
            3 => Ok(MessageType::SubscribeCancelRequest),
            4 => Ok(MessageType::NotificationRequest),
            5 => Ok(MessageType::UpdateRequest),
            6 => Ok(MessageType::UpdateResponse),
            _ => Err(WireError::InvalidMessageType(value)),
        }
    }
}

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Status report
    StatusReport(StatusReport),
    /// Subscribe request
    SubscribeRequest(SubscribeRequest),
    /// Subscribe response
    SubscribeResponse(SubscribeResponse),
    /// Cancel request
    SubscribeCancelRequest(SubscribeCancelRequest),
    /// Notification
    NotificationRequest(NotificationRequest),
    /// Update request
    UpdateRequest(UpdateRequest),
    /// Update response
    UpdateResponse(UpdateResponse),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Size of the encoded message in bytes.
    pub fn encoded_len(&self) -> Result<usize, WireError> {
        self.to_bytes().map(|bytes| bytes.len())
    }

    /// The discriminator of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::StatusReport(_) => MessageType::StatusReport,
            Message::SubscribeRequest(_) => MessageType::SubscribeRequest,
            Message::SubscribeResponse(_) => MessageType::SubscribeResponse,
            Message::SubscribeCancelRequest(_) => MessageType::SubscribeCancelRequest,
            Message::NotificationRequest(_) => MessageType::NotificationRequest,
            Message::UpdateRequest(_) => MessageType::UpdateRequest,
            Message::UpdateResponse(_) => MessageType::UpdateResponse,
        }
    }
}

/// Last event the subscriber has seen from one event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastObservedEvent {
    /// Node that produced the event
    pub source_id: u64,
    /// Importance level of the event stream
    pub importance: u8,
    /// Id of the last event seen
    pub event_id: u64,
}

/// Request to establish a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Subscription id to reuse, for a mutual subscription
    pub subscription_id: Option<SubscriptionId>,
    /// Paths to subscribe to, with versions already held
    pub paths: Vec<VersionedTraitPath>,
    /// Events already seen, per source
    pub last_observed_events: Vec<LastObservedEvent>,
    /// Lower bound of the liveness timeout, seconds
    pub timeout_sec_min: Option<u32>,
    /// Upper bound of the liveness timeout, seconds
    pub timeout_sec_max: Option<u32>,
    /// Whether the subscriber wants the event stream
    pub need_all_events: bool,
}

/// Publisher confirmation that a subscription is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// Id assigned to the subscription
    pub subscription_id: SubscriptionId,
    /// Liveness timeout chosen by the publisher, seconds
    pub timeout_sec: Option<u32>,
}

/// Request to end a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeCancelRequest {
    /// The subscription to end
    pub subscription_id: SubscriptionId,
}

/// Value carried by a data element.
///
/// Property values are opaque to this crate; data sinks encode and decode
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementValue {
    /// Encoded value of the property sub-tree
    Encoded(Vec<u8>),
    /// Dictionary elements, each encoded separately
    Dictionary(Vec<(PropertyDictionaryKey, Vec<u8>)>),
}

impl ElementValue {
    /// Number of payload bytes carried by the value.
    pub fn payload_len(&self) -> usize {
        match self {
            ElementValue::Encoded(bytes) => bytes.len(),
            ElementValue::Dictionary(items) => items.iter().map(|(_, v)| v.len()).sum(),
        }
    }
}

/// One changed path in a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
    /// Path the value belongs to
    pub path: TraitPath,
    /// Version of the trait after this change
    pub version: DataVersion,
    /// More elements of the same change follow
    pub is_partial_change: bool,
    /// The new value
    pub value: ElementValue,
}

/// An event delivered in a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Node that produced the event
    pub source_id: u64,
    /// Importance level
    pub importance: u8,
    /// Event id, monotonic per source and importance
    pub event_id: u64,
    /// Encoded event payload
    pub data: Vec<u8>,
}

/// Data change notification from the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Subscription this notification belongs to
    pub subscription_id: SubscriptionId,
    /// Changed data
    pub data_list: Vec<DataElement>,
    /// Events, if the subscriber asked for them
    pub events: Vec<EventRecord>,
}

/// One changed path in an update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateElement {
    /// Path being written
    pub path: TraitPath,
    /// Version the update was made against, for conditional updates
    pub required_version: Option<DataVersion>,
    /// Merge dictionary contents instead of replacing them
    pub merge: bool,
    /// The new value
    pub value: ElementValue,
}

/// Request to change trait data on the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Sequence number of the logical update this payload belongs to
    pub update_request_index: u32,
    /// More payloads of the same logical update follow
    pub is_partial: bool,
    /// The changed paths
    pub elements: Vec<UpdateElement>,
}

impl UpdateRequest {
    /// Size of this request once wrapped in a [`Message`] and encoded.
    pub fn encoded_len(&self) -> Result<usize, WireError> {
        // the tag of the enclosing message is part of the payload budget
        #[derive(Serialize)]
        #[serde(tag = "type")]
        enum Framed<'a> {
            UpdateRequest(&'a UpdateRequest),
        }
        rmp_serde::to_vec(&Framed::UpdateRequest(self))
            .map(|bytes| bytes.len())
            .map_err(WireError::Serialization)
    }
}

/// Per-element outcome of an update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// One status per element, in request order
    pub statuses: Vec<StatusReport>,
    /// New trait version per element, for successful elements
    pub versions: Vec<Option<DataVersion>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropertyPathHandle, TraitDataHandle};

    fn path(t: u16, p: u16) -> TraitPath {
        TraitPath::new(TraitDataHandle(t), PropertyPathHandle::from_schema(p))
    }

    #[test]
    fn notification_roundtrip() {
        let msg = Message::NotificationRequest(NotificationRequest {
            subscription_id: SubscriptionId(0x1234),
            data_list: vec![DataElement {
                path: path(1, 2),
                version: DataVersion(7),
                is_partial_change: false,
                value: ElementValue::Encoded(vec![1, 2, 3]),
            }],
            events: vec![],
        });

        let bytes = msg.to_bytes().unwrap();
        let restored = Message::from_bytes(&bytes).unwrap();

        assert_eq!(msg, restored);
        assert_eq!(restored.message_type(), MessageType::NotificationRequest);
    }

    #[test]
    fn update_request_roundtrip() {
        let msg = Message::UpdateRequest(UpdateRequest {
            update_request_index: 3,
            is_partial: true,
            elements: vec![UpdateElement {
                path: path(2, 5),
                required_version: Some(DataVersion(9)),
                merge: true,
                value: ElementValue::Dictionary(vec![(1, vec![0xAA]), (2, vec![0xBB])]),
            }],
        });

        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn encoded_len_grows_with_elements() {
        let element = UpdateElement {
            path: path(1, 2),
            required_version: None,
            merge: false,
            value: ElementValue::Encoded(vec![0; 16]),
        };
        let one = Message::UpdateRequest(UpdateRequest {
            update_request_index: 0,
            is_partial: false,
            elements: vec![element.clone()],
        });
        let two = Message::UpdateRequest(UpdateRequest {
            update_request_index: 0,
            is_partial: false,
            elements: vec![element.clone(), element],
        });

        assert!(two.encoded_len().unwrap() > one.encoded_len().unwrap());
    }

    #[test]
    fn update_request_len_matches_message_len() {
        let request = UpdateRequest {
            update_request_index: 1,
            is_partial: false,
            elements: vec![UpdateElement {
                path: path(1, 2),
                required_version: None,
                merge: false,
                value: ElementValue::Encoded(vec![7; 10]),
            }],
        };
        let framed = Message::UpdateRequest(request.clone()).encoded_len().unwrap();
        assert_eq!(request.encoded_len().unwrap(), framed);
    }

    #[test]
    fn message_type_from_u8() {
        assert_eq!(MessageType::try_from(4).unwrap(), MessageType::NotificationRequest);
        assert!(matches!(
            MessageType::try_from(99),
            Err(WireError::InvalidMessageType(99))
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(Message::from_bytes(&[0xFF, 0x00, 0x13]).is_err());
    }

    #[test]
    fn dictionary_payload_len_sums_items() {
        let value = ElementValue::Dictionary(vec![(1, vec![0; 3]), (2, vec![0; 4])]);
        assert_eq!(value.payload_len(), 7);
    }

    #[test]
    fn subscribe_request_json_shape() {
        // serde tag keeps messages self-describing in any serde format
        let msg = Message::SubscribeCancelRequest(SubscribeCancelRequest {
            subscription_id: SubscriptionId(1),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"SubscribeCancelRequest\""));
    }
}
