//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod hub;
pub mod realtime;
pub mod relay;
pub mod settings_store;

pub use hub::{CapabilityCallback, HubApi, ListenerHandle, UserCallback};
pub use realtime::RealtimePublisher;
pub use relay::{
    ConnectRequest, InboundFrame, OutboundFrame, ReconnectPolicy, RelayConnector, RelayLink,
};
pub use settings_store::SettingsStore;
