//! Authorization documents — which things the cloud side may see and control.
//!
//! A thing is authorized only when its flag is exactly JSON `true`; any
//! other value (missing, `"true"`, `1`, …) reads as unauthorized.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::id::ThingKey;

fn exactly_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

/// Authorization record for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingSelection {
    #[serde(default, deserialize_with = "exactly_true")]
    pub authorized: bool,
    /// Per sub-capability flags for `<capability>.<sub>` children.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThingSelection {
    #[must_use]
    pub fn authorized() -> Self {
        Self {
            authorized: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_child_authorized(&self, sub: &str) -> bool {
        matches!(self.children.get(sub), Some(Value::Bool(true)))
    }
}

/// The `selectedThings` document, keyed by device id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectedThings(BTreeMap<String, ThingSelection>);

/// Outcome of converting a legacy list-shaped `selectedThings` document.
#[derive(Debug, Default)]
pub struct LegacyConversion {
    pub things: SelectedThings,
    /// Entries that were not strings and were dropped.
    pub skipped: Vec<Value>,
}

impl SelectedThings {
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&ThingSelection> {
        self.0.get(device_id)
    }

    #[must_use]
    pub fn is_authorized(&self, device_id: &str) -> bool {
        self.0.get(device_id).is_some_and(|s| s.authorized)
    }

    pub fn insert(&mut self, device_id: impl Into<String>, selection: ThingSelection) {
        self.0.insert(device_id.into(), selection);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert the old list-of-ids shape into the keyed shape.
    ///
    /// Every string entry becomes an authorized selection; anything else
    /// is reported in [`LegacyConversion::skipped`].
    #[must_use]
    pub fn from_legacy_list(entries: Vec<Value>) -> LegacyConversion {
        let mut conversion = LegacyConversion::default();
        for entry in entries {
            match entry {
                Value::String(id) => conversion.things.insert(id, ThingSelection::authorized()),
                other => conversion.skipped.push(other),
            }
        }
        conversion
    }
}

/// The `selectedUsers` document, keyed by user id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectedUsers(BTreeMap<String, Value>);

impl SelectedUsers {
    #[must_use]
    pub fn is_authorized(&self, user_id: &str) -> bool {
        matches!(self.0.get(user_id), Some(Value::Bool(true)))
    }

    pub fn authorize(&mut self, user_id: impl Into<String>) {
        self.0.insert(user_id.into(), Value::Bool(true));
    }
}

/// Both authorization documents, read together.
#[derive(Debug, Clone, Default)]
pub struct Authorizations {
    pub things: SelectedThings,
    pub users: SelectedUsers,
}

impl Authorizations {
    /// Whether the thing addressed by `key` is authorized in its own map.
    #[must_use]
    pub fn permits(&self, key: &ThingKey) -> bool {
        match key {
            ThingKey::Device(id) => self.things.is_authorized(id),
            ThingKey::User(id) => self.users.is_authorized(id),
        }
    }

    /// Like [`Self::permits`], for a raw wire id. Unparsable ids are denied.
    #[must_use]
    pub fn permits_raw(&self, raw: &str) -> bool {
        ThingKey::parse(raw).is_ok_and(|key| self.permits(&key))
    }
}
