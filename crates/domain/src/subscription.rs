//! Subscriptions — which capabilities of which things the relay wants to hear about.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::{LEGACY_BATTERY, MEASURE_BATTERY};

/// Subscription record for one capability of one thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    #[serde(default)]
    pub subscribed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_capability: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Capability subscriptions of a single thing.
pub type ThingSubscriptions = BTreeMap<String, SubscriptionEntry>;

/// An add/remove request received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub device_id: String,
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub st_capability: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Add,
    Remove,
}

/// The `eventSubscriptions` document, keyed by thing key then capability id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionMap(BTreeMap<String, ThingSubscriptions>);

impl SubscriptionMap {
    #[must_use]
    pub fn get(&self, thing_key: &str) -> Option<&ThingSubscriptions> {
        self.0.get(thing_key)
    }

    /// Whether `capability` of `thing_key` is present and subscribed.
    #[must_use]
    pub fn is_subscribed(&self, thing_key: &str, capability: &str) -> bool {
        self.get(thing_key)
            .and_then(|caps| caps.get(capability))
            .is_some_and(|entry| entry.subscribed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ThingSubscriptions)> {
        self.0.iter()
    }

    /// Keep only things for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|key, _| keep(key));
    }

    /// Apply a batch of requests.
    ///
    /// Adding creates the record when absent, otherwise only re-marks it
    /// subscribed. Removing deletes the record and drops the thing when it
    /// has no capabilities left.
    pub fn apply(&mut self, requests: &[SubscriptionRequest], action: SubscriptionAction) {
        for request in requests {
            match action {
                SubscriptionAction::Add => self.add(request),
                SubscriptionAction::Remove => self.remove(request),
            }
        }
    }

    fn add(&mut self, request: &SubscriptionRequest) {
        let caps = self.0.entry(request.device_id.clone()).or_default();
        caps.entry(request.capability.clone())
            .and_modify(|entry| entry.subscribed = true)
            .or_insert_with(|| SubscriptionEntry {
                subscribed: true,
                st_attribute: request.st_attribute.clone(),
                st_capability: request.st_capability.clone(),
                extra: Map::new(),
            });
    }

    fn remove(&mut self, request: &SubscriptionRequest) {
        let Some(caps) = self.0.get_mut(&request.device_id) else {
            return;
        };
        caps.remove(&request.capability);
        if caps.is_empty() {
            self.0.remove(&request.device_id);
        }
    }

    /// Whether one thing still carries the legacy battery record.
    #[must_use]
    pub fn has_legacy_battery(&self, thing_key: &str) -> bool {
        self.get(thing_key)
            .is_some_and(|caps| caps.contains_key(LEGACY_BATTERY))
    }

    /// Rename the legacy battery subscription of one thing.
    ///
    /// Returns `true` when the document changed.
    pub fn patch_legacy_battery(&mut self, thing_key: &str) -> bool {
        let Some(caps) = self.0.get_mut(thing_key) else {
            return false;
        };
        let Some(entry) = caps.remove(LEGACY_BATTERY) else {
            return false;
        };
        caps.insert(MEASURE_BATTERY.to_string(), entry);
        true
    }
}
