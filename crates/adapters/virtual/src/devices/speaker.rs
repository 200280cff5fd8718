//! Virtual speaker — playback control plus read-only track metadata.

use serde_json::json;

use hubrelay_domain::capability::Capability;
use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;

pub(super) fn describe(id: String) -> Result<Device, BridgeError> {
    Device::builder()
        .id(id)
        .name("Virtual Speaker")
        .capability(
            Capability::new("speaker_playing", "boolean", json!(false))
                .with_title("Playing")
                .setable(),
        )
        .capability(
            Capability::new("volume_set", "number", json!(0.3))
                .with_title("Volume")
                .setable(),
        )
        .capability(Capability::new("speaker_track", "string", json!("")).with_title("Track"))
        .capability(Capability::new("speaker_artist", "string", json!("")).with_title("Artist"))
        .capability(Capability::new("speaker_album", "string", json!("")).with_title("Album"))
        .build()
}
