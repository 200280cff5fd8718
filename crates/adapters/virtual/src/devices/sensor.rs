//! Virtual sensor — read-only temperature and battery readings.

use serde_json::json;

use hubrelay_domain::capability::{Capability, MEASURE_BATTERY};
use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;

pub(super) fn describe(id: String) -> Result<Device, BridgeError> {
    Device::builder()
        .id(id)
        .name("Virtual Sensor")
        .capability(
            Capability::new("measure_temperature", "number", json!(21.5)).with_title("Temperature"),
        )
        .capability(Capability::new(MEASURE_BATTERY, "number", json!(87)).with_title("Battery"))
        .build()
}
