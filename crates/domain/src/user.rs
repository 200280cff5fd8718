//! Users — hub members projected into the thing namespace.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::capability::{Capability, USER_ASLEEP, USER_PRESENT};
use crate::device::Device;
use crate::id::ThingKey;

/// A hub user with presence and sleep state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asleep: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            present: None,
            asleep: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ThingKey {
        ThingKey::User(self.id.clone())
    }

    #[must_use]
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            present: self.present,
            asleep: self.asleep,
        }
    }

    /// Render the user as a device-shaped thing.
    ///
    /// The thing id carries the user marker and exposes the two
    /// synthesized read-only capabilities. `last_updated_ms` is stamped on both.
    #[must_use]
    pub fn to_thing(&self, last_updated_ms: i64) -> Device {
        let key = self.key();
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Unknown User {}", self.id));
        let capabilities_obj = [
            (USER_PRESENT, "present", self.present),
            (USER_ASLEEP, "asleep", self.asleep),
        ]
        .into_iter()
        .map(|(id, title, value)| {
            let cap = user_capability(id, title, value, last_updated_ms);
            (id.to_string(), cap)
        })
        .collect();

        Device {
            id: key.to_string(),
            name,
            capabilities: vec![USER_PRESENT.to_string(), USER_ASLEEP.to_string()],
            capabilities_obj,
            metadata: None,
            extra: Map::new(),
        }
    }
}

fn user_capability(id: &str, title: &str, value: Option<bool>, last_updated_ms: i64) -> Capability {
    let kind = if value.is_some() { "boolean" } else { "undefined" };
    let mut cap =
        Capability::new(id, kind, value.map_or(Value::Null, Value::Bool)).with_title(title);
    cap.last_updated = Some(json!(last_updated_ms));
    cap.extra.insert("iconObj".to_string(), Value::Null);
    cap.extra.insert("units".to_string(), Value::Null);
    cap.extra.insert("insightsTitleTrue".to_string(), Value::String(String::new()));
    cap.extra.insert("insightsTitleFalse".to_string(), Value::String(String::new()));
    cap
}

/// Last observed presence and sleep state of a monitored user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserSnapshot {
    pub present: Option<bool>,
    pub asleep: Option<bool>,
}

impl UserSnapshot {
    /// Record `user`'s current state and return the capabilities that changed.
    ///
    /// Changed values are reported with unknown read as `false`.
    pub fn update(&mut self, user: &User) -> Vec<(&'static str, bool)> {
        let mut changes = Vec::new();
        if self.present != user.present {
            changes.push((USER_PRESENT, user.present.unwrap_or(false)));
        }
        if self.asleep != user.asleep {
            changes.push((USER_ASLEEP, user.asleep.unwrap_or(false)));
        }
        self.present = user.present;
        self.asleep = user.asleep;
        changes
    }
}
