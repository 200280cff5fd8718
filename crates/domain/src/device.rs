//! Device — a thing managed by the hub, exposing a set of capabilities.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::authorization::ThingSelection;
use crate::capability::{Capability, CustomCapabilities};
use crate::error::{BridgeError, ValidationError};

/// A device as reported by the hub.
///
/// `capabilities_obj` maps capability id to its current descriptor. The
/// hub occasionally reports it as `null`; that is read as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub capabilities_obj: BTreeMap<String, Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] when `id` or `name` is empty.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId.into());
        }
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        Ok(())
    }

    /// Whether the device currently exposes `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities_obj.contains_key(capability)
    }

    #[must_use]
    pub fn capability(&self, capability: &str) -> Option<&Capability> {
        self.capabilities_obj.get(capability)
    }

    /// Decorate the descriptor before it is sent to the relay.
    ///
    /// - capabilities with a custom mapping are flagged and carry it
    /// - the custom map is copied into `metadata.customCapabilities`
    /// - `<capability>.<sub>` children authorized in `selection` are flagged
    pub fn inject_metadata(
        &mut self,
        custom: &CustomCapabilities,
        selection: Option<&ThingSelection>,
    ) {
        if let Some(device_custom) = custom.for_device(&self.id) {
            for (capability, attributes) in device_custom {
                if let Some(cap) = self.capabilities_obj.get_mut(capability) {
                    cap.mark_custom(attributes.clone());
                }
            }
            let custom_map: Map<String, Value> = device_custom
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.metadata
                .get_or_insert_with(Map::new)
                .insert("customCapabilities".to_string(), Value::Object(custom_map));
        }

        let Some(selection) = selection else {
            return;
        };
        for (id, cap) in &mut self.capabilities_obj {
            if let Some((_, sub)) = id.split_once('.')
                && selection.is_child_authorized(sub)
            {
                cap.authorized = true;
            }
        }
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<String>,
    name: Option<String>,
    capabilities: Vec<Capability>,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Validation`] if `id` or `name` is missing or empty.
    pub fn build(self) -> Result<Device, BridgeError> {
        let capabilities = self.capabilities.iter().map(|c| c.id.clone()).collect();
        let capabilities_obj = self
            .capabilities
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let device = Device {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            capabilities,
            capabilities_obj,
            metadata: None,
            extra: Map::new(),
        };
        device.validate()?;
        Ok(device)
    }
}
