//! Simulated device catalogue.
//!
//! Device ids are UUID v5 values derived from a fixed slug, so they stay the
//! same across restarts and settings keyed by them keep working.

mod light;
mod sensor;
mod speaker;

use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;
use uuid::Uuid;

/// Stable id for a simulated thing.
pub(crate) fn stable_id(slug: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("hubrelay.virtual.{slug}").as_bytes()).to_string()
}

/// The simulated devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualDeviceKind {
    Light,
    Sensor,
    Speaker,
}

impl VirtualDeviceKind {
    pub const ALL: [Self; 3] = [Self::Light, Self::Sensor, Self::Speaker];

    fn slug(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Sensor => "sensor",
            Self::Speaker => "speaker",
        }
    }

    /// Id of the device, stable across restarts.
    #[must_use]
    pub fn id(self) -> String {
        stable_id(self.slug())
    }

    pub(crate) fn describe(self) -> Result<Device, BridgeError> {
        let id = self.id();
        match self {
            Self::Light => light::describe(id),
            Self::Sensor => sensor::describe(id),
            Self::Speaker => speaker::describe(id),
        }
    }
}
