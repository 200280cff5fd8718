//! Authorization filter — decides what may cross the bridge.
//!
//! Outbound events need both an authorized thing and an active
//! subscription. Inbound subscription requests and subscription listings
//! are narrowed to authorized things.

use std::sync::Arc;

use hubrelay_domain::error::BridgeError;
use hubrelay_domain::event::OutboundEvent;
use hubrelay_domain::id::ThingKey;
use hubrelay_domain::subscription::{SubscriptionMap, SubscriptionRequest};

use crate::ports::SettingsStore;
use crate::services::settings::Settings;

pub struct AuthorizationFilter<S> {
    settings: Arc<Settings<S>>,
}

impl<S> Clone for AuthorizationFilter<S> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S: SettingsStore> AuthorizationFilter<S> {
    pub fn new(settings: Arc<Settings<S>>) -> Self {
        Self { settings }
    }

    /// Whether `event` may be forwarded.
    ///
    /// The thing must be authorized in the map matching its kind, and the
    /// event's capability must be subscribed for that thing.
    ///
    /// # Errors
    ///
    /// Propagates settings read errors.
    pub async fn permits_event(&self, event: &OutboundEvent) -> Result<bool, BridgeError> {
        let key = match event.thing_key() {
            Ok(key) => key,
            Err(err) => {
                tracing::debug!(device_id = %event.device_id, error = %err, "unaddressable event");
                return Ok(false);
            }
        };
        let authorized = match &key {
            ThingKey::Device(id) => self.settings.is_device_authorized(id).await?,
            ThingKey::User(id) => self.settings.is_user_authorized(id).await?,
        };
        if !authorized {
            tracing::debug!(thing = %key, "thing not authorized");
            return Ok(false);
        }
        let subscribed = self
            .settings
            .device_subscriptions(&key.to_string())
            .await?
            .and_then(|caps| caps.get(&event.capability).map(|entry| entry.subscribed))
            .unwrap_or(false);
        Ok(subscribed)
    }

    /// Keep only requests addressing authorized things.
    ///
    /// # Errors
    ///
    /// Propagates settings read errors.
    pub async fn filter_requests(
        &self,
        requests: Vec<SubscriptionRequest>,
    ) -> Result<Vec<SubscriptionRequest>, BridgeError> {
        let auth = self.settings.authorizations().await?;
        Ok(requests
            .into_iter()
            .filter(|request| {
                let permitted = auth.permits_raw(&request.device_id);
                if !permitted {
                    tracing::debug!(
                        device_id = %request.device_id,
                        "dropping request for unauthorized thing"
                    );
                }
                permitted
            })
            .collect())
    }

    /// Keep only subscriptions of authorized things.
    ///
    /// # Errors
    ///
    /// Propagates settings read errors.
    pub async fn filter_subscriptions(
        &self,
        mut subscriptions: SubscriptionMap,
    ) -> Result<SubscriptionMap, BridgeError> {
        let auth = self.settings.authorizations().await?;
        subscriptions.retain(|key| auth.permits_raw(key));
        Ok(subscriptions)
    }
}
