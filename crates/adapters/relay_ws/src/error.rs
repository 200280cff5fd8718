//! Relay transport error types.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

use hubrelay_domain::error::BridgeError;

/// Errors specific to the WebSocket relay transport.
#[derive(Debug, thiserror::Error)]
pub enum RelayWsError {
    /// The relay URL or a handshake header could not be used.
    #[error("invalid handshake request: {0}")]
    Handshake(String),

    /// The connection attempt did not complete in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The WebSocket layer failed.
    #[error("websocket error")]
    WebSocket(#[source] Box<tungstenite::Error>),

    /// A frame could not be encoded or decoded.
    #[error("malformed frame")]
    Frame(#[source] serde_json::Error),
}

impl From<tungstenite::Error> for RelayWsError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<RelayWsError> for BridgeError {
    fn from(err: RelayWsError) -> Self {
        Self::Transport(Box::new(err))
    }
}
