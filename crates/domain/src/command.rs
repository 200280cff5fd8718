//! Commands — requests received from the relay, and the replies sent back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::subscription::SubscriptionAction;

/// Field carrying the correlation id on commands and replies.
pub const MESSAGE_ID_FIELD: &str = "__messageId";

/// A command as it arrives on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(
        rename = "__messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<Value>,
}

impl CommandEnvelope {
    /// Read an envelope from an arbitrary payload.
    ///
    /// # Errors
    ///
    /// Fails when a known field has the wrong JSON type.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// One `{capability, value}` entry of a `send_command`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityCommand {
    pub capability: String,
    pub value: Value,
}

impl CapabilityCommand {
    /// Accept an entry only when it names a capability and carries a non-null value.
    #[must_use]
    pub fn from_entry(entry: &Value) -> Option<Self> {
        let capability = entry.get("capability")?.as_str()?;
        let value = entry.get("value").filter(|v| !v.is_null())?;
        Some(Self {
            capability: capability.to_string(),
            value: value.clone(),
        })
    }
}

/// A parsed relay command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute one or more capability changes on a device.
    SendCommand {
        device_id: Option<String>,
        entries: Vec<Value>,
    },
    GetDevice {
        device_id: Option<String>,
    },
    GetDevices,
    GetSubscriptions,
    /// `entries` is `None` when the command carried no data at all.
    UpdateSubscriptions {
        action: SubscriptionAction,
        entries: Option<Vec<Value>>,
    },
    LocationCommand {
        command: Option<String>,
        payload: Value,
    },
    GetLocationProperty {
        property: Option<String>,
    },
    GetEventUrl,
    SetEventUrl {
        url: Option<String>,
    },
    Unknown(String),
}

fn string_field(data: &Value, field: &str) -> Option<String> {
    data.get(field).and_then(Value::as_str).map(str::to_string)
}

fn entries_of(data: Value) -> Vec<Value> {
    match data {
        Value::Array(entries) => entries,
        Value::Null => vec![Value::Object(Map::new())],
        single => vec![single],
    }
}

impl Command {
    /// Interpret an envelope. Unrecognized types become [`Command::Unknown`].
    #[must_use]
    pub fn parse(envelope: CommandEnvelope) -> Self {
        let CommandEnvelope {
            kind,
            data,
            device_id,
            ..
        } = envelope;
        let kind = kind.unwrap_or_default();
        match kind.as_str() {
            "send_command" | "call_service" => Self::SendCommand {
                device_id,
                entries: entries_of(data),
            },
            "get_device" | "get_entity" | "get_thing" => Self::GetDevice {
                device_id: string_field(&data, "deviceId"),
            },
            "get_devices" | "get_entities" | "get_things" => Self::GetDevices,
            "get_subscriptions" => Self::GetSubscriptions,
            "add_subscriptions" => Self::UpdateSubscriptions {
                action: SubscriptionAction::Add,
                entries: subscription_entries(data),
            },
            "remove_subscriptions" => Self::UpdateSubscriptions {
                action: SubscriptionAction::Remove,
                entries: subscription_entries(data),
            },
            "send_location_command" => Self::LocationCommand {
                command: string_field(&data, "command"),
                payload: data.get("payload").cloned().unwrap_or(Value::Null),
            },
            "get_location_property" => Self::GetLocationProperty {
                property: string_field(&data, "property"),
            },
            "get_event_url" => Self::GetEventUrl,
            "set_event_url" => Self::SetEventUrl {
                url: string_field(&data, "url"),
            },
            _ => Self::Unknown(kind),
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::SendCommand { .. } => "send_command",
            Self::GetDevice { .. } => "get_device",
            Self::GetDevices => "get_devices",
            Self::GetSubscriptions => "get_subscriptions",
            Self::UpdateSubscriptions {
                action: SubscriptionAction::Add,
                ..
            } => "add_subscriptions",
            Self::UpdateSubscriptions {
                action: SubscriptionAction::Remove,
                ..
            } => "remove_subscriptions",
            Self::LocationCommand { .. } => "send_location_command",
            Self::GetLocationProperty { .. } => "get_location_property",
            Self::GetEventUrl => "get_event_url",
            Self::SetEventUrl { .. } => "set_event_url",
            Self::Unknown(kind) => kind,
        }
    }
}

fn subscription_entries(data: Value) -> Option<Vec<Value>> {
    match data {
        Value::Null | Value::Bool(false) => None,
        Value::Array(entries) => Some(entries),
        _ => Some(Vec::new()),
    }
}

/// Reply to a relay command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CommandResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            url: None,
        }
    }

    #[must_use]
    pub fn failure() -> Self {
        Self {
            success: false,
            data: None,
            url: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Wire payload of the reply, echoing the command's correlation id.
    #[must_use]
    pub fn into_payload(self, message_id: Option<Value>) -> Value {
        let mut payload = Map::new();
        payload.insert("success".to_string(), Value::Bool(self.success));
        if let Some(data) = self.data {
            payload.insert("data".to_string(), data);
        }
        if let Some(url) = self.url {
            payload.insert("url".to_string(), Value::String(url));
        }
        if let Some(id) = message_id {
            payload.insert(MESSAGE_ID_FIELD.to_string(), id);
        }
        Value::Object(payload)
    }
}
