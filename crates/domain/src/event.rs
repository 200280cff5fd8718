//! Events — capability changes forwarded to the relay, and relay event names.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ValidationError;
use crate::id::ThingKey;
use crate::time::{Timestamp, now};

/// Event names used on the relay channel.
pub mod names {
    /// Outbound: a capability changed, or a device sync request.
    pub const STATE_CHANGED: &str = "state_changed";
    /// Outbound: correlated reply to a command.
    pub const MESSAGE_RESPONSE: &str = "message_response";
    /// Inbound: a command to execute.
    pub const COMMAND: &str = "command";
    /// Inbound: settings pushed from the cloud.
    pub const UPDATE_SETTINGS: &str = "update_settings";
    /// Inbound: a previously requested device sync finished.
    pub const LOCATION_SYNC_COMPLETED: &str = "location_sync_completed";
}

/// Platform tag carried by sync requests and the identity header.
pub const PLATFORM: &str = "homey";

/// A capability value change, ready to be forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    pub device_id: String,
    pub capability: String,
    pub value: Value,
    #[serde(with = "crate::time::iso_millis")]
    pub timestamp: Timestamp,
    #[serde(
        rename = "__isCustom",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_custom: bool,
    #[serde(
        rename = "__stAttributes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub st_attributes: Option<Value>,
}

impl OutboundEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(device_id: impl Into<String>, capability: impl Into<String>, value: Value) -> Self {
        Self {
            device_id: device_id.into(),
            capability: capability.into(),
            value,
            timestamp: now(),
            is_custom: false,
            st_attributes: None,
        }
    }

    /// Flag as a custom capability event carrying its attribute mapping.
    #[must_use]
    pub fn with_custom(mut self, attributes: Value) -> Self {
        self.is_custom = true;
        self.st_attributes = Some(attributes);
        self
    }

    /// Parse the addressed thing.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when `device_id` is not a valid thing key.
    pub fn thing_key(&self) -> Result<ThingKey, ValidationError> {
        ThingKey::parse(&self.device_id)
    }
}

/// Payload of the outbound device sync request.
#[must_use]
pub fn app_updated_payload() -> Value {
    json!({
        "platform": PLATFORM,
        "data": {
            "source": "CUSTOM",
            "value": "APP_UPDATED",
        },
    })
}
