//! Errors raised by the simulated hub.

use hubrelay_domain::error::{BridgeError, NotFoundError};

#[derive(Debug, thiserror::Error)]
pub enum VirtualHubError {
    #[error("device `{0}` not found")]
    UnknownDevice(String),

    #[error("device `{device_id}` has no capability `{capability}`")]
    UnknownCapability {
        device_id: String,
        capability: String,
    },

    #[error("capability `{0}` is read-only")]
    ReadOnly(String),

    #[error("capability `{capability}` expects a {expected} value")]
    InvalidValue {
        capability: String,
        expected: String,
    },

    #[error("flow `{0}` not found")]
    UnknownFlow(String),
}

impl From<VirtualHubError> for BridgeError {
    fn from(err: VirtualHubError) -> Self {
        match err {
            VirtualHubError::UnknownDevice(id) => NotFoundError {
                entity: "Device",
                id,
            }
            .into(),
            VirtualHubError::UnknownFlow(id) => NotFoundError { entity: "Flow", id }.into(),
            other => Self::Hub(Box::new(other)),
        }
    }
}
