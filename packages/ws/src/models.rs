//! Wire-level message envelopes for the subscription protocol.
//!
//! Two frame shapes travel over the socket, both JSON text frames:
//!
//! * Outbound: `{"type":"data","payload":{"action":...,"resource_type":...,
//!   "resource_uids":[...]}}` or `{"type":"heartbeat"}`
//! * Inbound: `{"type":"success","message":...,"payload":...}` or
//!   `{"type":"error","message":...}`
//!
//! The inbound `payload` stays a raw [`Value`] here. The multiplexed
//! subscription endpoint nests a [`ResourceEvent`](modelboard_models::ResourceEvent)
//! inside it, while the dedicated watch endpoints put the entity payload there
//! directly; the consumers decide how to interpret it.

use modelboard_models::ResourceType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};

/// Subscription state change requested from the server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Subscribe,
    Unsubscribe,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Payload of an outbound `data` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAction {
    /// Whether the listed uids are being subscribed or unsubscribed.
    pub action: ActionKind,
    /// The kind of entity the uids identify.
    pub resource_type: ResourceType,
    /// The uids affected by this action.
    pub resource_uids: Vec<String>,
}

/// A frame sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A subscription state change.
    Data {
        /// The action to apply.
        payload: SubscriptionAction,
    },
    /// A keepalive frame, sent on a fixed cadence while the socket is open.
    Heartbeat,
}

impl OutboundMessage {
    /// Builds a `subscribe` frame for the given uids.
    #[must_use]
    pub fn subscribe(resource_type: ResourceType, resource_uids: Vec<String>) -> Self {
        Self::Data {
            payload: SubscriptionAction {
                action: ActionKind::Subscribe,
                resource_type,
                resource_uids,
            },
        }
    }

    /// Builds an `unsubscribe` frame for the given uids.
    #[must_use]
    pub fn unsubscribe(resource_type: ResourceType, resource_uids: Vec<String>) -> Self {
        Self::Data {
            payload: SubscriptionAction {
                action: ActionKind::Unsubscribe,
                resource_type,
                resource_uids,
            },
        }
    }
}

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A live-update or acknowledgement frame.
    Success {
        /// Human-readable detail, often empty.
        #[serde(default)]
        message: String,
        /// The update payload, absent on bare acknowledgements.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// An application-level failure. Receiving one closes the connection.
    Error {
        /// Human-readable failure detail.
        #[serde(default)]
        message: String,
    },
}
