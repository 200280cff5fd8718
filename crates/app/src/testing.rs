//! In-memory fakes shared by the service tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};

use hubrelay_domain::capability::Capability;
use hubrelay_domain::device::Device;
use hubrelay_domain::error::{BridgeError, NotFoundError};
use hubrelay_domain::flow::FlowCommand;
use hubrelay_domain::session::HubInfo;
use hubrelay_domain::user::User;

use tokio::sync::mpsc;

use crate::ports::{
    CapabilityCallback, ConnectRequest, HubApi, InboundFrame, ListenerHandle, OutboundFrame,
    RealtimePublisher, RelayConnector, RelayLink, SettingsStore, UserCallback,
};

#[derive(Default)]
pub(crate) struct InMemorySettingsStore {
    pub values: Mutex<HashMap<String, Value>>,
    pub writes: AtomicUsize,
    pub read_delay: Option<Duration>,
}

impl InMemorySettingsStore {
    pub fn with(entries: &[(&str, Value)]) -> Self {
        let store = Self::default();
        {
            let mut values = store.values.lock().unwrap();
            for (key, value) in entries {
                values.insert((*key).to_string(), value.clone());
            }
        }
        store
    }

    /// Hold every read for `delay` after taking its snapshot.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, BridgeError>> + Send {
        let result = self.values.lock().unwrap().get(key).cloned();
        let delay = self.read_delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(result)
        }
    }

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<(), BridgeError>> + Send {
        self.values.lock().unwrap().insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    }
}

struct CapabilityListener {
    device_id: String,
    capability: String,
    callback: CapabilityCallback,
    active: Arc<AtomicBool>,
}

struct UserListener {
    callback: UserCallback,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct FakeHub {
    pub devices: Mutex<Vec<Device>>,
    pub users: Mutex<Vec<User>>,
    pub flows: Mutex<Map<String, Value>>,
    pub advanced_flows: Mutex<Map<String, Value>>,
    pub set_calls: Mutex<Vec<(String, String, Value)>>,
    pub failing_capabilities: Mutex<Vec<String>>,
    pub flow_runs: Mutex<Vec<(FlowCommand, Value)>>,
    pub album_art: Mutex<Option<String>>,
    pub album_art_delay: Mutex<Option<Duration>>,
    pub album_art_calls: AtomicUsize,
    capability_listeners: Mutex<Vec<CapabilityListener>>,
    user_listeners: Mutex<Vec<UserListener>>,
    pub user_listen_calls: AtomicUsize,
}

impl FakeHub {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let hub = Self::default();
        *hub.devices.lock().unwrap() = devices;
        hub
    }

    pub fn with_users(self, users: Vec<User>) -> Self {
        *self.users.lock().unwrap() = users;
        self
    }

    /// Invoke every active listener attached to `device_id`/`capability`.
    pub fn emit_capability(&self, device_id: &str, capability: &str, value: Value) {
        let callbacks: Vec<CapabilityCallback> = self
            .capability_listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                l.active.load(Ordering::SeqCst)
                    && l.device_id == device_id
                    && l.capability == capability
            })
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn emit_user(&self, user: &User) {
        let callbacks: Vec<UserCallback> = self
            .user_listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.active.load(Ordering::SeqCst))
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(user.clone());
        }
    }

    pub fn active_capability_listeners(&self) -> usize {
        self.capability_listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.active.load(Ordering::SeqCst))
            .count()
    }
}

impl HubApi for FakeHub {
    fn get_devices(&self) -> impl Future<Output = Result<Vec<Device>, BridgeError>> + Send {
        let devices = self.devices.lock().unwrap().clone();
        async { Ok(devices) }
    }

    fn get_device(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send {
        let device = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == device_id)
            .cloned();
        async { Ok(device) }
    }

    fn set_capability_value(
        &self,
        device_id: &str,
        capability: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let fails = self
            .failing_capabilities
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == capability);
        self.set_calls.lock().unwrap().push((
            device_id.to_string(),
            capability.to_string(),
            value,
        ));
        let capability = capability.to_string();
        async move {
            if fails {
                return Err(NotFoundError {
                    entity: "Capability",
                    id: capability,
                }
                .into());
            }
            Ok(())
        }
    }

    fn get_users(&self) -> impl Future<Output = Result<Vec<User>, BridgeError>> + Send {
        let users = self.users.lock().unwrap().clone();
        async { Ok(users) }
    }

    fn get_flows(&self) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send {
        let flows = self.flows.lock().unwrap().clone();
        async { Ok(flows) }
    }

    fn get_advanced_flows(
        &self,
    ) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send {
        let flows = self.advanced_flows.lock().unwrap().clone();
        async { Ok(flows) }
    }

    fn run_flow_command(
        &self,
        command: FlowCommand,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        self.flow_runs.lock().unwrap().push((command, payload));
        async { Ok(()) }
    }

    fn hub_info(&self) -> impl Future<Output = Result<HubInfo, BridgeError>> + Send {
        async {
            Ok(HubInfo {
                app_version: "1.0.0".to_string(),
                system_version: "12.0.0".to_string(),
                platform: "local".to_string(),
                sdk: 3,
            })
        }
    }

    fn album_art_url(
        &self,
        _device_id: &str,
    ) -> impl Future<Output = Result<Option<String>, BridgeError>> + Send {
        self.album_art_calls.fetch_add(1, Ordering::SeqCst);
        let url = self.album_art.lock().unwrap().clone();
        let delay = *self.album_art_delay.lock().unwrap();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(url)
        }
    }

    fn listen_capability(
        &self,
        device_id: &str,
        capability: &str,
        callback: CapabilityCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send {
        let active = Arc::new(AtomicBool::new(true));
        self.capability_listeners
            .lock()
            .unwrap()
            .push(CapabilityListener {
                device_id: device_id.to_string(),
                capability: capability.to_string(),
                callback,
                active: Arc::clone(&active),
            });
        let handle = ListenerHandle::new(move || active.store(false, Ordering::SeqCst));
        async { Ok(handle) }
    }

    fn listen_users(
        &self,
        callback: UserCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send {
        self.user_listen_calls.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        self.user_listeners.lock().unwrap().push(UserListener {
            callback,
            active: Arc::clone(&active),
        });
        let handle = ListenerHandle::new(move || active.store(false, Ordering::SeqCst));
        async { Ok(handle) }
    }
}

#[derive(Default)]
pub(crate) struct RecordingRealtime {
    pub signals: Mutex<Vec<(String, Value)>>,
}

impl RecordingRealtime {
    pub fn recorded(&self) -> Vec<(String, Value)> {
        self.signals.lock().unwrap().clone()
    }
}

impl RealtimePublisher for RecordingRealtime {
    fn publish(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        self.signals
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        async { Ok(()) }
    }
}

/// Relay-side ends of a link opened by [`FakeConnector`].
pub(crate) struct LinkEnd {
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
}

/// Connector handing every opened link to the test through a channel.
pub(crate) struct FakeConnector {
    pub requests: Mutex<Vec<ConnectRequest>>,
    links: mpsc::UnboundedSender<LinkEnd>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEnd>) {
        let (links, opened) = mpsc::unbounded_channel();
        (
            Self {
                requests: Mutex::new(Vec::new()),
                links,
            },
            opened,
        )
    }
}

impl RelayConnector for FakeConnector {
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<RelayLink, BridgeError>> + Send {
        self.requests.lock().unwrap().push(request);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.links.send(LinkEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
        });
        async move {
            Ok(RelayLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
                task: None,
            })
        }
    }
}

pub(crate) fn lamp(id: &str) -> Device {
    Device::builder()
        .id(id)
        .name("Lamp")
        .capability(Capability::new("onoff", "boolean", json!(false)).setable())
        .capability(Capability::new("dim", "number", json!(0.5)).setable())
        .capability(Capability::new("measure_battery", "number", json!(80)))
        .build()
        .unwrap()
}

pub(crate) fn speaker(id: &str) -> Device {
    Device::builder()
        .id(id)
        .name("Speaker")
        .capability(Capability::new("speaker_playing", "boolean", json!(false)).setable())
        .capability(Capability::new("speaker_track", "string", json!("")))
        .capability(Capability::new("speaker_artist", "string", json!("")))
        .capability(Capability::new("speaker_album", "string", json!("")))
        .build()
        .unwrap()
}
