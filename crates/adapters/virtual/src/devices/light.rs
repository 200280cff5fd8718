//! Virtual light — on/off and dim level, both settable.

use serde_json::json;

use hubrelay_domain::capability::Capability;
use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;

pub(super) fn describe(id: String) -> Result<Device, BridgeError> {
    Device::builder()
        .id(id)
        .name("Virtual Light")
        .capability(
            Capability::new("onoff", "boolean", json!(false))
                .with_title("Turned on")
                .setable(),
        )
        .capability(
            Capability::new("dim", "number", json!(1.0))
                .with_title("Dim level")
                .setable(),
        )
        .build()
}
