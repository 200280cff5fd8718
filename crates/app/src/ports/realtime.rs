//! Realtime port — status signals for a locally attached UI.

use std::future::Future;

use serde_json::Value;

use hubrelay_domain::error::BridgeError;

/// Signal names published by the connection manager.
pub mod signals {
    /// Payload is `"connected"` or `"disconnected"`.
    pub const SOCKET_STATUS: &str = "stio.socket.status";
    /// Payload names an inbound relay event.
    pub const SOCKET_MESSAGE: &str = "stio.socket.message";
    /// Payload names an outbound request that was acknowledged.
    pub const SOCKET_EMIT: &str = "stio.socket.emit";
    /// Payload names an outbound request that failed.
    pub const SOCKET_ERROR: &str = "stio.socket.error";
}

/// Publishes named status signals to local observers.
pub trait RealtimePublisher: Send + Sync {
    fn publish(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;
}

impl<T: RealtimePublisher> RealtimePublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        (**self).publish(event, payload)
    }
}
