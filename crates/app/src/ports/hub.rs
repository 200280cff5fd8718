//! Hub port — the home-automation hub the bridge mirrors.
//!
//! The hub owns devices, users and flows. The bridge reads them, changes
//! capability values, and attaches listeners that push value changes back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::flow::FlowCommand;
use hubrelay_domain::session::HubInfo;
use hubrelay_domain::user::User;

/// Invoked with the new value each time a capability changes.
pub type CapabilityCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Invoked with the updated user each time any user changes.
pub type UserCallback = Arc<dyn Fn(User) + Send + Sync>;

/// Keeps a hub listener attached. Dropping it detaches the listener.
pub struct ListenerHandle {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Wrap a detach action that runs exactly once, on drop.
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A handle with nothing to detach.
    #[must_use]
    pub fn noop() -> Self {
        Self { detach: None }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Access to the hub's devices, users and flows.
pub trait HubApi: Send + Sync {
    /// List every device known to the hub.
    fn get_devices(&self) -> impl Future<Output = Result<Vec<Device>, BridgeError>> + Send;

    /// Look up one device.
    fn get_device(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<Device>, BridgeError>> + Send;

    /// Change one capability value.
    fn set_capability_value(
        &self,
        device_id: &str,
        capability: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// List every user of the hub.
    fn get_users(&self) -> impl Future<Output = Result<Vec<User>, BridgeError>> + Send;

    /// Basic flows, keyed by flow id.
    fn get_flows(&self) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send;

    /// Advanced flows, keyed by flow id.
    fn get_advanced_flows(
        &self,
    ) -> impl Future<Output = Result<Map<String, Value>, BridgeError>> + Send;

    /// Trigger a flow.
    fn run_flow_command(
        &self,
        command: FlowCommand,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Version information used in the relay handshake.
    fn hub_info(&self) -> impl Future<Output = Result<HubInfo, BridgeError>> + Send;

    /// Artwork URL for a media device, when it has any.
    fn album_art_url(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<String>, BridgeError>> + Send;

    /// Attach a listener to one capability of one device.
    fn listen_capability(
        &self,
        device_id: &str,
        capability: &str,
        callback: CapabilityCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send;

    /// Attach a listener to user updates.
    fn listen_users(
        &self,
        callback: UserCallback,
    ) -> impl Future<Output = Result<ListenerHandle, BridgeError>> + Send;
}
