//! Relay port — the persistent, bidirectional channel to the cloud relay.
//!
//! A connector opens a *link*: a pair of channels plus the task driving the
//! underlying transport. The transport reconnects on its own; connection
//! status changes arrive on the inbound channel as [`InboundFrame`]s.
//! Dropping the outbound sender tears the link down.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use hubrelay_domain::error::BridgeError;

/// Reconnection back-off of the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Relative jitter, clamped to `0.0..=1.0`.
    pub randomization_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            randomization_factor: 0.25,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt number `attempt` (0-based).
    ///
    /// The base delay doubles per attempt up to `max_delay`; `unit_random`
    /// (in `0.0..1.0`) spreads it by ± the randomization factor.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, unit_random: f64) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_delay);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        let spread = 1.0 + factor * (2.0 * unit_random.clamp(0.0, 1.0) - 1.0);
        base.mul_f64(spread).min(self.max_delay)
    }
}

/// Everything a connector needs to open a link.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    /// Handshake headers, as `(name, value)` pairs.
    pub headers: Vec<(String, String)>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

/// A frame queued for the relay.
#[derive(Debug)]
pub struct OutboundFrame {
    pub event: String,
    pub payload: Value,
    /// Receives the relay's acknowledgement payload, when one is expected.
    pub ack: Option<oneshot::Sender<Value>>,
}

impl OutboundFrame {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            ack: None,
        }
    }

    #[must_use]
    pub fn with_ack(mut self, ack: oneshot::Sender<Value>) -> Self {
        self.ack = Some(ack);
        self
    }
}

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    Event { name: String, payload: Value },
}

/// An open link to the relay.
#[derive(Debug)]
pub struct RelayLink {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
    /// Task driving the transport, aborted when the link is closed.
    pub task: Option<JoinHandle<()>>,
}

/// Opens links to the relay.
pub trait RelayConnector: Send + Sync {
    /// Open a link. Connection progress is reported on the link itself.
    ///
    /// Errors are reserved for requests that can never succeed, such as an
    /// invalid URL or header.
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<RelayLink, BridgeError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            randomization_factor: 0.5,
        }
    }

    #[test]
    fn should_double_delay_per_attempt_without_jitter() {
        let policy = policy();
        assert_eq!(policy.delay_for(0, 0.5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, 0.5), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, 0.5), Duration::from_millis(800));
    }

    #[test]
    fn should_cap_delay_at_maximum() {
        let policy = policy();
        assert_eq!(policy.delay_for(20, 0.5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX, 0.99), Duration::from_secs(10));
    }

    #[test]
    fn should_spread_delay_by_randomization_factor() {
        let policy = policy();
        assert_eq!(policy.delay_for(0, 0.0), Duration::from_millis(50));
        assert!(policy.delay_for(0, 0.999) < Duration::from_millis(150));
        assert!(policy.delay_for(0, 0.999) > Duration::from_millis(140));
    }
}
