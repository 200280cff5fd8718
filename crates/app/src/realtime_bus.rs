//! In-process realtime bus backed by a tokio broadcast channel.

use std::future::Future;

use serde_json::Value;
use tokio::sync::broadcast;

use hubrelay_domain::error::BridgeError;

use crate::ports::RealtimePublisher;

/// One published status signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSignal {
    pub event: String,
    pub payload: Value,
}

/// In-process realtime bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the signal is simply dropped).
pub struct InProcessRealtimeBus {
    sender: broadcast::Sender<RealtimeSignal>,
}

impl InProcessRealtimeBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to signals published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeSignal> {
        self.sender.subscribe()
    }
}

impl RealtimePublisher for InProcessRealtimeBus {
    fn publish(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let _ = self.sender.send(RealtimeSignal {
            event: event.to_string(),
            payload,
        });
        async { Ok(()) }
    }
}
