//! # hubrelay-adapter-relay-ws
//!
//! Relay transport over a WebSocket, implementing [`RelayConnector`].
//!
//! ## Responsibilities
//! - Open the socket with the session headers, bounded by the connect timeout
//! - Frame events as JSON text messages and correlate acknowledgements
//! - Reconnect with a doubling, jittered delay and report every outcome
//!
//! ## Dependency rule
//! Depends on `hubrelay-app` (port traits) and `hubrelay-domain` only.

pub mod config;
pub mod error;
pub mod frame;
mod session;

use std::future::Future;

use tokio::sync::mpsc;

use hubrelay_app::ports::{ConnectRequest, RelayConnector, RelayLink};
use hubrelay_domain::error::BridgeError;

pub use config::RelayWsConfig;
pub use error::RelayWsError;

/// Connector spawning one transport task per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsRelayConnector;

impl RelayConnector for WsRelayConnector {
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<RelayLink, BridgeError>> + Send {
        async move {
            session::handshake_request(&request)?;
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            tracing::debug!(url = %request.url, "spawning relay transport");
            let task = tokio::spawn(session::run(request, outbound_rx, inbound_tx));
            Ok(RelayLink {
                outbound,
                inbound,
                task: Some(task),
            })
        }
    }
}
