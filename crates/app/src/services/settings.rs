//! Settings service — typed access to the persisted settings documents.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};

use hubrelay_domain::authorization::{Authorizations, SelectedThings, SelectedUsers};
use hubrelay_domain::capability::CustomCapabilities;
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::id::ThingKey;
use hubrelay_domain::session::SessionCredentials;
use hubrelay_domain::subscription::{
    SubscriptionAction, SubscriptionMap, SubscriptionRequest, ThingSubscriptions,
};

use crate::ports::SettingsStore;

/// Well-known settings keys.
pub mod keys {
    pub const SELECTED_THINGS: &str = "selectedThings";
    pub const SELECTED_USERS: &str = "selectedUsers";
    pub const EVENT_SUBSCRIPTIONS: &str = "eventSubscriptions";
    pub const CUSTOM_CAPABILITIES: &str = "customCapabilities";
    pub const UID: &str = "uid";
    pub const LOCATION_ID: &str = "locationId";
    pub const TOKEN: &str = "token";
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Typed view over a [`SettingsStore`].
///
/// Missing or `null` documents read as empty. Every write is announced on
/// [`Settings::changes`] with the key that was written.
pub struct Settings<S> {
    store: S,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<String>,
}

impl<S: SettingsStore> Settings<S> {
    pub fn new(store: S) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Subscribe to the keys of subsequent writes.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Read a raw document.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, BridgeError> {
        self.store.get(key).await
    }

    /// Write a raw document and announce the change.
    ///
    /// Serialized with the read-modify-write updates of this service.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    #[tracing::instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: Value) -> Result<(), BridgeError> {
        let _guard = self.write_lock.lock().await;
        self.write(key, value).await
    }

    /// Caller holds `write_lock`.
    async fn write(&self, key: &str, value: Value) -> Result<(), BridgeError> {
        self.store.set(key, value).await?;
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    async fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, BridgeError> {
        match self.store.get(key).await? {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, document: &T) -> Result<(), BridgeError> {
        let value = serde_json::to_value(document)?;
        self.write(key, value).await
    }

    async fn load_string(&self, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(match self.store.get(key).await? {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn selected_things(&self) -> Result<SelectedThings, BridgeError> {
        self.load(keys::SELECTED_THINGS).await
    }

    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn selected_users(&self) -> Result<SelectedUsers, BridgeError> {
        self.load(keys::SELECTED_USERS).await
    }

    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn custom_capabilities(&self) -> Result<CustomCapabilities, BridgeError> {
        self.load(keys::CUSTOM_CAPABILITIES).await
    }

    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn event_subscriptions(&self) -> Result<SubscriptionMap, BridgeError> {
        self.load(keys::EVENT_SUBSCRIPTIONS).await
    }

    /// Both authorization documents.
    ///
    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn authorizations(&self) -> Result<Authorizations, BridgeError> {
        Ok(Authorizations {
            things: self.selected_things().await?,
            users: self.selected_users().await?,
        })
    }

    /// Whether `device_id` is authorized (flag exactly `true`).
    ///
    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn is_device_authorized(&self, device_id: &str) -> Result<bool, BridgeError> {
        Ok(self.selected_things().await?.is_authorized(device_id))
    }

    /// Whether the user is authorized. Accepts a bare id or a `<id>|user` key.
    ///
    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn is_user_authorized(&self, user: &str) -> Result<bool, BridgeError> {
        let id = match ThingKey::parse(user) {
            Ok(ThingKey::User(id)) => id,
            _ => user.to_string(),
        };
        Ok(self.selected_users().await?.is_authorized(&id))
    }

    /// Relay credentials, when all of them are configured.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn socket_credentials(&self) -> Result<Option<SessionCredentials>, BridgeError> {
        Ok(SessionCredentials::from_parts(
            self.load_string(keys::UID).await?,
            self.load_string(keys::LOCATION_ID).await?,
            self.load_string(keys::TOKEN).await?,
        ))
    }

    /// Apply add/remove requests to the subscription document and persist it.
    ///
    /// Returns the resulting document.
    ///
    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    #[tracing::instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn update_event_subscriptions(
        &self,
        requests: &[SubscriptionRequest],
        action: SubscriptionAction,
    ) -> Result<SubscriptionMap, BridgeError> {
        let _guard = self.write_lock.lock().await;
        let mut subscriptions = self.event_subscriptions().await?;
        subscriptions.apply(requests, action);
        self.save(keys::EVENT_SUBSCRIPTIONS, &subscriptions).await?;
        Ok(subscriptions)
    }

    /// Subscriptions of one thing.
    ///
    /// The legacy `battery` record is renamed to `measure_battery` and the
    /// document persisted the first time it is seen, so later reads never
    /// observe it.
    ///
    /// # Errors
    ///
    /// Storage errors, or a serialization error for a mis-shaped document.
    pub async fn device_subscriptions(
        &self,
        thing_key: &str,
    ) -> Result<Option<ThingSubscriptions>, BridgeError> {
        let mut subscriptions = self.event_subscriptions().await?;
        if subscriptions.has_legacy_battery(thing_key) {
            let _guard = self.write_lock.lock().await;
            subscriptions = self.event_subscriptions().await?;
            if subscriptions.patch_legacy_battery(thing_key) {
                tracing::info!(
                    thing = thing_key,
                    "patching battery -> measure_battery subscription"
                );
                self.save(keys::EVENT_SUBSCRIPTIONS, &subscriptions).await?;
            }
        }
        Ok(subscriptions.get(thing_key).cloned())
    }

    /// Convert a list-shaped `selectedThings` document into the keyed shape.
    ///
    /// Returns `true` when a conversion was written. Non-string entries are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Propagates storage and serialization errors.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<bool, BridgeError> {
        let _guard = self.write_lock.lock().await;
        let Some(Value::Array(entries)) = self.store.get(keys::SELECTED_THINGS).await? else {
            tracing::debug!("selected things already keyed; nothing to migrate");
            return Ok(false);
        };
        tracing::info!(count = entries.len(), "migrating selected things to keyed form");
        let conversion = SelectedThings::from_legacy_list(entries);
        for skipped in &conversion.skipped {
            tracing::warn!(entry = %skipped, "skipping non-string selected thing");
        }
        self.save(keys::SELECTED_THINGS, &conversion.things).await?;
        Ok(true)
    }

    /// Apply a batch of settings pushed by the cloud, one key at a time.
    ///
    /// The whole batch is written under the same lock as local updates.
    /// Non-object payloads are ignored.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first storage error.
    pub async fn apply_remote(&self, payload: Value) -> Result<usize, BridgeError> {
        let Value::Object(entries) = payload else {
            tracing::warn!("ignoring settings update that is not an object");
            return Ok(0);
        };
        let count = entries.len();
        let _guard = self.write_lock.lock().await;
        for (key, value) in entries {
            tracing::info!(%key, "updating setting from relay");
            self.write(&key, value).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemorySettingsStore;
    use serde_json::json;
    use std::time::Duration;

    fn settings(entries: &[(&str, Value)]) -> Settings<InMemorySettingsStore> {
        Settings::new(InMemorySettingsStore::with(entries))
    }

    fn request(device_id: &str, capability: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            device_id: device_id.to_string(),
            capability: capability.to_string(),
            st_attribute: None,
            st_capability: None,
        }
    }

    #[tokio::test]
    async fn should_read_missing_documents_as_empty() {
        let svc = settings(&[]);
        assert!(svc.selected_things().await.unwrap().is_empty());
        assert!(svc.event_subscriptions().await.unwrap().is_empty());
        assert!(!svc.is_device_authorized("d1").await.unwrap());
    }

    #[tokio::test]
    async fn should_authorize_user_by_key_or_bare_id() {
        let svc = settings(&[(keys::SELECTED_USERS, json!({"u1": true}))]);
        assert!(svc.is_user_authorized("u1").await.unwrap());
        assert!(svc.is_user_authorized("u1|user").await.unwrap());
        assert!(!svc.is_user_authorized("u2|user").await.unwrap());
    }

    #[tokio::test]
    async fn should_require_all_credentials() {
        let svc = settings(&[(keys::UID, json!("uid")), (keys::TOKEN, json!("tok"))]);
        assert!(svc.socket_credentials().await.unwrap().is_none());

        svc.set(keys::LOCATION_ID, json!("loc")).await.unwrap();
        let creds = svc.socket_credentials().await.unwrap().unwrap();
        assert_eq!(creds.location_id, "loc");
    }

    #[tokio::test]
    async fn should_announce_written_keys() {
        let svc = settings(&[]);
        let mut changes = svc.changes();

        svc.update_event_subscriptions(&[request("d1", "onoff")], SubscriptionAction::Add)
            .await
            .unwrap();

        assert_eq!(changes.recv().await.unwrap(), keys::EVENT_SUBSCRIPTIONS);
    }

    #[tokio::test]
    async fn should_persist_subscription_updates() {
        let svc = settings(&[]);
        svc.update_event_subscriptions(
            &[request("d1", "onoff"), request("d1", "dim")],
            SubscriptionAction::Add,
        )
        .await
        .unwrap();
        svc.update_event_subscriptions(&[request("d1", "dim")], SubscriptionAction::Remove)
            .await
            .unwrap();

        let stored = svc.event_subscriptions().await.unwrap();
        assert!(stored.is_subscribed("d1", "onoff"));
        assert!(!stored.is_subscribed("d1", "dim"));
    }

    #[tokio::test]
    async fn should_patch_legacy_battery_once_and_persist() {
        let store = InMemorySettingsStore::with(&[(
            keys::EVENT_SUBSCRIPTIONS,
            json!({"d1": {"battery": {"subscribed": true}}}),
        )]);
        let svc = Settings::new(store);

        let caps = svc.device_subscriptions("d1").await.unwrap().unwrap();
        assert!(caps.contains_key("measure_battery"));
        assert!(!caps.contains_key("battery"));

        let stored = svc.event_subscriptions().await.unwrap();
        assert!(stored.is_subscribed("d1", "measure_battery"));

        svc.device_subscriptions("d1").await.unwrap();
        assert_eq!(
            svc.store.writes.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn should_migrate_legacy_list_of_things() {
        let svc = settings(&[(keys::SELECTED_THINGS, json!(["a", 7, "b"]))]);

        assert!(svc.migrate().await.unwrap());

        assert_eq!(
            svc.get(keys::SELECTED_THINGS).await.unwrap().unwrap(),
            json!({"a": {"authorized": true}, "b": {"authorized": true}})
        );
        assert!(!svc.migrate().await.unwrap());
    }

    #[tokio::test]
    async fn should_migrate_empty_list_to_empty_map() {
        let svc = settings(&[(keys::SELECTED_THINGS, json!([]))]);
        assert!(svc.migrate().await.unwrap());
        assert_eq!(
            svc.get(keys::SELECTED_THINGS).await.unwrap().unwrap(),
            json!({})
        );
    }

    #[tokio::test]
    async fn should_apply_each_remote_setting() {
        let svc = settings(&[]);
        let count = svc
            .apply_remote(json!({"uid": "u", "token": "t"}))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(svc.get(keys::UID).await.unwrap(), Some(json!("u")));
        assert_eq!(svc.apply_remote(json!([1])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_not_lose_remote_subscriptions_pushed_during_update() {
        let store = InMemorySettingsStore::default().with_read_delay(Duration::from_millis(50));
        let svc = std::sync::Arc::new(Settings::new(store));

        let local = tokio::spawn({
            let svc = std::sync::Arc::clone(&svc);
            async move {
                svc.update_event_subscriptions(&[request("d1", "onoff")], SubscriptionAction::Add)
                    .await
                    .unwrap();
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        svc.apply_remote(json!({
            (keys::EVENT_SUBSCRIPTIONS): {"d2": {"dim": {"subscribed": true}}}
        }))
        .await
        .unwrap();
        local.await.unwrap();

        let stored = svc.store.value(keys::EVENT_SUBSCRIPTIONS).unwrap();
        assert_eq!(stored, json!({"d2": {"dim": {"subscribed": true}}}));
    }
}
