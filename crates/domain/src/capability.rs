//! Capabilities — named, typed state slots exposed by a thing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Presence capability synthesized for users.
pub const USER_PRESENT: &str = "$user_present";

/// Sleep capability synthesized for users.
pub const USER_ASLEEP: &str = "$user_asleep";

/// Legacy subscription name for battery level.
pub const LEGACY_BATTERY: &str = "battery";

/// Hub capability that replaced [`LEGACY_BATTERY`].
pub const MEASURE_BATTERY: &str = "measure_battery";

/// Field injected into composite events by enrichment.
pub const ALBUM_ART_FIELD: &str = "albumArtUrl";

/// One capability of a device, as reported by the hub.
///
/// Fields the bridge does not interpret are kept in `extra` and passed
/// through to the relay unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub getable: bool,
    #[serde(default)]
    pub setable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Value>,
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
    #[serde(
        rename = "__authorized",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub authorized: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Capability {
    /// Create a readable capability with the given JSON type and value.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            kind: Some(kind.into()),
            value,
            title: None,
            getable: true,
            setable: false,
            last_updated: None,
            is_custom: false,
            st_attributes: None,
            authorized: false,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn setable(mut self) -> Self {
        self.setable = true;
        self
    }

    /// Mark as a custom capability carrying the given attribute mapping.
    pub fn mark_custom(&mut self, attributes: Value) {
        self.is_custom = true;
        self.st_attributes = Some(attributes);
    }
}

/// A capability whose relay-side value is assembled from several hub capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeCapability {
    /// Name used on the relay side.
    pub name: &'static str,
    /// `(hub capability, merged field)` pairs.
    pub parts: &'static [(&'static str, &'static str)],
}

/// Track metadata of a media player, merged into one object.
pub const AUDIO_TRACK_DATA: CompositeCapability = CompositeCapability {
    name: "audio_track_data",
    parts: &[
        ("speaker_track", "title"),
        ("speaker_artist", "artist"),
        ("speaker_album", "album"),
    ],
};

const COMPOSITES: &[CompositeCapability] = &[AUDIO_TRACK_DATA];

impl CompositeCapability {
    /// Find the composite with the given relay-side name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<&'static Self> {
        COMPOSITES.iter().find(|composite| composite.name == name)
    }

    /// Merged field name for a contributing hub capability.
    #[must_use]
    pub fn field_for(&self, capability: &str) -> Option<&'static str> {
        self.parts
            .iter()
            .find(|(part, _)| *part == capability)
            .map(|(_, field)| *field)
    }

    /// Hub capabilities contributing to this composite.
    pub fn capabilities(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parts.iter().map(|(part, _)| *part)
    }
}

/// Custom capability attribute mappings, keyed by device id then capability id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomCapabilities(BTreeMap<String, BTreeMap<String, Value>>);

impl CustomCapabilities {
    /// Attribute mapping for one capability of one device.
    #[must_use]
    pub fn get(&self, device_id: &str, capability: &str) -> Option<&Value> {
        self.0.get(device_id).and_then(|caps| caps.get(capability))
    }

    /// All custom capabilities of one device.
    #[must_use]
    pub fn for_device(&self, device_id: &str) -> Option<&BTreeMap<String, Value>> {
        self.0.get(device_id)
    }

    pub fn insert(
        &mut self,
        device_id: impl Into<String>,
        capability: impl Into<String>,
        attributes: Value,
    ) {
        self.0
            .entry(device_id.into())
            .or_default()
            .insert(capability.into(), attributes);
    }
}
