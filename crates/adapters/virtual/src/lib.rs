//! # hubrelay-adapter-virtual
//!
//! Simulated hub implementing [`HubApi`] so the bridge can run without a
//! real home-automation controller.
//!
//! ## Provided things
//!
//! | Thing | Capabilities |
//! |-------|--------------|
//! | Virtual Light | `onoff`, `dim` (settable) |
//! | Virtual Sensor | `measure_temperature`, `measure_battery` (read-only) |
//! | Virtual Speaker | `speaker_playing`, `volume_set` (settable), `speaker_track`, `speaker_artist`, `speaker_album` |
//! | Users | Alice (home, awake), Bob (away) |
//! | Flows | one basic, one advanced |
//!
//! Value changes are fanned out on a broadcast channel; every attached
//! listener is a task filtering that stream, aborted when its handle drops.
//!
//! ## Dependency rule
//!
//! Depends on `hubrelay-app` (port traits) and `hubrelay-domain` only.

mod devices;
pub mod error;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use hubrelay_app::ports::{CapabilityCallback, HubApi, ListenerHandle, UserCallback};
use hubrelay_domain::capability::Capability;
use hubrelay_domain::device::Device;
use hubrelay_domain::error::{BridgeError, NotFoundError};
use hubrelay_domain::flow::FlowCommand;
use hubrelay_domain::session::HubInfo;
use hubrelay_domain::time::now;
use hubrelay_domain::user::User;

pub use devices::VirtualDeviceKind;
use error::VirtualHubError;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct CapabilityChange {
    device_id: String,
    capability: String,
    value: Value,
}

/// Id of a simulated user, stable across restarts.
#[must_use]
pub fn virtual_user_id(slug: &str) -> String {
    devices::stable_id(&format!("user.{slug}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_value(capability: &Capability, value: &Value) -> Result<(), VirtualHubError> {
    let valid = match capability.kind.as_deref() {
        Some("boolean") => value.is_boolean(),
        Some("number") => value.is_number(),
        Some("string") => value.is_string(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(VirtualHubError::InvalidValue {
            capability: capability.id.clone(),
            expected: capability.kind.clone().unwrap_or_default(),
        })
    }
}

pub struct VirtualHub {
    info: HubInfo,
    devices: Mutex<BTreeMap<String, Device>>,
    users: Mutex<BTreeMap<String, User>>,
    flows: Map<String, Value>,
    advanced_flows: Map<String, Value>,
    capability_changes: broadcast::Sender<CapabilityChange>,
    user_changes: broadcast::Sender<User>,
}

impl VirtualHub {
    /// Build the simulated hub reporting `info` in the relay handshake.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a simulated device descriptor is invalid.
    pub fn new(info: HubInfo) -> Result<Self, BridgeError> {
        let mut devices = BTreeMap::new();
        for kind in VirtualDeviceKind::ALL {
            let device = kind.describe()?;
            devices.insert(device.id.clone(), device);
        }

        let mut alice = User::new(virtual_user_id("alice"), "Alice");
        alice.present = Some(true);
        alice.asleep = Some(false);
        let mut bob = User::new(virtual_user_id("bob"), "Bob");
        bob.present = Some(false);
        let users = [alice, bob]
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();

        let morning = devices::stable_id("flow.morning");
        let night = devices::stable_id("flow.night");
        let flows = Map::from_iter([(
            morning.clone(),
            json!({"id": morning, "name": "Good morning", "enabled": true}),
        )]);
        let advanced_flows = Map::from_iter([(
            night.clone(),
            json!({"id": night, "name": "Night routine", "enabled": true}),
        )]);

        Ok(Self {
            info,
            devices: Mutex::new(devices),
            users: Mutex::new(users),
            flows,
            advanced_flows,
            capability_changes: broadcast::channel(CHANGE_CHANNEL_CAPACITY).0,
            user_changes: broadcast::channel(CHANGE_CHANNEL_CAPACITY).0,
        })
    }

    /// Change a capability as the device itself would, ignoring `setable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or capability is unknown, or the value
    /// does not match the capability type.
    pub fn simulate_update(
        &self,
        device_id: &str,
        capability: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        self.apply(device_id, capability, value, false)
    }

    /// Update a user's presence and sleep state and notify user listeners.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown user.
    pub fn set_user_state(
        &self,
        user_id: &str,
        present: Option<bool>,
        asleep: Option<bool>,
    ) -> Result<(), BridgeError> {
        let user = {
            let mut users = lock(&self.users);
            let user = users.get_mut(user_id).ok_or_else(|| NotFoundError {
                entity: "User",
                id: user_id.to_string(),
            })?;
            user.present = present;
            user.asleep = asleep;
            user.clone()
        };
        tracing::debug!(user_id, ?present, ?asleep, "virtual user updated");
        let _ = self.user_changes.send(user);
        Ok(())
    }

    fn apply(
        &self,
        device_id: &str,
        capability: &str,
        value: Value,
        require_setable: bool,
    ) -> Result<(), BridgeError> {
        {
            let mut devices = lock(&self.devices);
            let device = devices
                .get_mut(device_id)
                .ok_or_else(|| VirtualHubError::UnknownDevice(device_id.to_string()))?;
            let cap = device.capabilities_obj.get_mut(capability).ok_or_else(|| {
                VirtualHubError::UnknownCapability {
                    device_id: device_id.to_string(),
                    capability: capability.to_string(),
                }
            })?;
            if require_setable && !cap.setable {
                return Err(VirtualHubError::ReadOnly(capability.to_string()).into());
            }
            check_value(cap, &value)?;
            cap.value = value.clone();
            cap.last_updated = Some(Value::from(now().timestamp_millis()));
        }
        tracing::debug!(device_id, capability, %value, "virtual capability changed");
        let _ = self.capability_changes.send(CapabilityChange {
            device_id: device_id.to_string(),
            capability: capability.to_string(),
            value,
        });
        Ok(())
    }

    fn ensure_capability(&self, device_id: &str, capability: &str) -> Result<(), VirtualHubError> {
        let devices = lock(&self.devices);
        let device = devices
            .get(device_id)
            .ok_or_else(|| VirtualHubError::UnknownDevice(device_id.to_string()))?;
        if device.has_capability(capability) {
            Ok(())
        } else {
            Err(VirtualHubError::UnknownCapability {
                device_id: device_id.to_string(),
                capability: capability.to_string(),
            })
        }
    }
}

impl HubApi for VirtualHub {
    fn get_devices(&self) -> impl Future<Output = Result<Vec<Device>, BridgeError>> + Send {
        let devices = lock(&self.devices).values().cloned().collect();
        async move { Ok(devices) }
    }

    fn get_device(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send {
        let device = lock(&self.devices).get(device_id).cloned();
        async move { Ok(device) }
    }

    fn set_capability_value(
        &self,
        device_id: &str,
        capability: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let result = self.apply(device_id, capability, value, true);
        async move { result }
    }

    fn get_users(&self) -> impl Future<Output = Result<Vec<User>, BridgeError>> + Send {
        let users = lock(&self.users).values().cloned().collect();
        async move { Ok(users) }
    }

    fn get_flows(&self) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send {
        let flows = self.flows.clone();
        async move { Ok(flows) }
    }

    fn get_advanced_flows(
        &self,
    ) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send {
        let flows = self.advanced_flows.clone();
        async move { Ok(flows) }
    }

    fn run_flow_command(
        &self,
        command: FlowCommand,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let flows = match command {
            FlowCommand::TriggerFlow => &self.flows,
            FlowCommand::TriggerAdvancedFlow => &self.advanced_flows,
        };
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = if flows.contains_key(&id) {
            tracing::info!(%command, flow_id = %id, "virtual flow triggered");
            Ok(())
        } else {
            Err(VirtualHubError::UnknownFlow(id).into())
        };
        async move { result }
    }

    fn hub_info(&self) -> impl Future<Output = Result<HubInfo, BridgeError>> + Send {
        let info = self.info.clone();
        async move { Ok(info) }
    }

    fn album_art_url(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<String>, BridgeError>> + Send {
        let url = (device_id == VirtualDeviceKind::Speaker.id())
            .then(|| format!("http://virtual-hub.local/album-art/{device_id}.png"));
        async move { Ok(url) }
    }

    fn listen_capability(
        &self,
        device_id: &str,
        capability: &str,
        callback: CapabilityCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send {
        let checked = self.ensure_capability(device_id, capability);
        let receiver = self.capability_changes.subscribe();
        let device_id = device_id.to_string();
        let capability = capability.to_string();
        async move {
            checked?;
            let mut stream = BroadcastStream::new(receiver);
            let task = tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(change)
                            if change.device_id == device_id && change.capability == capability =>
                        {
                            callback(change.value);
                        }
                        Ok(_) => {}
                        Err(BroadcastStreamRecvError::Lagged(missed)) => {
                            tracing::warn!(
                                %device_id,
                                %capability,
                                missed,
                                "capability listener lagged"
                            );
                        }
                    }
                }
            });
            Ok(ListenerHandle::new(move || task.abort()))
        }
    }

    fn listen_users(
        &self,
        callback: UserCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send {
        let mut stream = BroadcastStream::new(self.user_changes.subscribe());
        async move {
            let task = tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(user) => callback(user),
                        Err(BroadcastStreamRecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "user listener lagged");
                        }
                    }
                }
            });
            Ok(ListenerHandle::new(move || task.abort()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn hub() -> VirtualHub {
        VirtualHub::new(HubInfo {
            app_version: "0.1.0".to_string(),
            system_version: "virtual".to_string(),
            platform: "local".to_string(),
            sdk: 3,
        })
        .unwrap()
    }

    fn channel_callback() -> (CapabilityCallback, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: CapabilityCallback = Arc::new(move |value| {
            let _ = tx.send(value);
        });
        (callback, rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn should_list_three_devices_and_two_users() {
        let hub = hub();
        assert_eq!(hub.get_devices().await.unwrap().len(), 3);
        assert_eq!(hub.get_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn should_notify_listener_of_matching_capability_only() {
        let hub = hub();
        let light = VirtualDeviceKind::Light.id();
        let (callback, mut rx) = channel_callback();
        let _handle = hub.listen_capability(&light, "onoff", callback).await.unwrap();

        hub.set_capability_value(&light, "dim", json!(0.2)).await.unwrap();
        hub.set_capability_value(&light, "onoff", json!(true)).await.unwrap();

        assert_eq!(next(&mut rx).await, json!(true));
        let stored = hub.get_device(&light).await.unwrap().unwrap();
        assert_eq!(stored.capability("onoff").unwrap().value, json!(true));
        assert!(stored.capability("onoff").unwrap().last_updated.is_some());
    }

    #[tokio::test]
    async fn should_stop_notifying_after_handle_drop() {
        let hub = hub();
        let light = VirtualDeviceKind::Light.id();
        let (callback, mut rx) = channel_callback();
        let handle = hub.listen_capability(&light, "onoff", callback).await.unwrap();
        drop(handle);
        tokio::task::yield_now().await;

        hub.set_capability_value(&light, "onoff", json!(true)).await.unwrap();

        assert!(next_or_closed(&mut rx).await.is_none());
    }

    async fn next_or_closed(rx: &mut mpsc::UnboundedReceiver<Value>) -> Option<Value> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn should_reject_unknown_device_and_capability() {
        let hub = hub();
        let light = VirtualDeviceKind::Light.id();
        let (callback, _rx) = channel_callback();

        assert!(matches!(
            hub.set_capability_value("nope", "onoff", json!(true)).await,
            Err(BridgeError::NotFound(_))
        ));
        assert!(matches!(
            hub.listen_capability(&light, "volume", callback).await,
            Err(BridgeError::Hub(_))
        ));
    }

    #[tokio::test]
    async fn should_refuse_read_only_and_mistyped_values() {
        let hub = hub();
        let sensor = VirtualDeviceKind::Sensor.id();
        let light = VirtualDeviceKind::Light.id();

        assert!(
            hub.set_capability_value(&sensor, "measure_temperature", json!(30))
                .await
                .is_err()
        );
        assert!(hub.set_capability_value(&light, "onoff", json!("on")).await.is_err());
        hub.simulate_update(&sensor, "measure_temperature", json!(30))
            .unwrap();
    }

    #[tokio::test]
    async fn should_notify_user_listeners() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = hub
            .listen_users(Arc::new(move |user| {
                let _ = tx.send(user);
            }))
            .await
            .unwrap();

        let bob = virtual_user_id("bob");
        hub.set_user_state(&bob, Some(true), Some(true)).unwrap();

        let user = next(&mut rx).await;
        assert_eq!(user.id, bob);
        assert_eq!(user.present, Some(true));
        assert!(hub.set_user_state("ghost", None, None).is_err());
    }

    #[tokio::test]
    async fn should_trigger_known_flows_only() {
        let hub = hub();
        let flows = hub.get_flows().await.unwrap();
        let id = flows.keys().next().unwrap().clone();

        hub.run_flow_command(FlowCommand::TriggerFlow, json!({"id": id}))
            .await
            .unwrap();
        assert!(
            hub.run_flow_command(FlowCommand::TriggerAdvancedFlow, json!({"id": id}))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn should_provide_album_art_for_speaker_only() {
        let hub = hub();
        let speaker = VirtualDeviceKind::Speaker.id();
        assert!(hub.album_art_url(&speaker).await.unwrap().is_some());
        assert!(
            hub.album_art_url(&VirtualDeviceKind::Light.id())
                .await
                .unwrap()
                .is_none()
        );
    }
}
