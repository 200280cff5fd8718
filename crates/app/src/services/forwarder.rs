//! Event forwarder — drains the event pipeline into the relay.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use hubrelay_domain::event::OutboundEvent;
use hubrelay_domain::event::names::STATE_CHANGED;

use crate::ports::SettingsStore;
use crate::services::authorization::AuthorizationFilter;

/// Producer side of the event pipeline, held by listener callbacks.
pub type EventSink = mpsc::UnboundedSender<OutboundEvent>;

/// Consumer side of the event pipeline.
pub type EventSource = mpsc::UnboundedReceiver<OutboundEvent>;

/// Create the channel carrying events from hub listeners to the forwarder.
#[must_use]
pub fn event_pipeline() -> (EventSink, EventSource) {
    mpsc::unbounded_channel()
}

/// Fire-and-forget emission to the relay.
pub trait RelayEmitter: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

impl<T: RelayEmitter> RelayEmitter for Arc<T> {
    fn emit(&self, event: &str, payload: Value) {
        (**self).emit(event, payload);
    }
}

/// Forwards authorized, subscribed events as `state_changed`.
pub struct EventForwarder<S, E> {
    filter: AuthorizationFilter<S>,
    emitter: E,
}

impl<S, E> EventForwarder<S, E>
where
    S: SettingsStore,
    E: RelayEmitter,
{
    pub fn new(filter: AuthorizationFilter<S>, emitter: E) -> Self {
        Self { filter, emitter }
    }

    /// Process events until every sink has been dropped.
    pub async fn run(self, mut source: EventSource) {
        while let Some(event) = source.recv().await {
            self.forward(event).await;
        }
        tracing::debug!("event pipeline closed");
    }

    /// Gate one event and emit it when permitted.
    #[tracing::instrument(
        skip(self, event),
        fields(device_id = %event.device_id, capability = %event.capability)
    )]
    pub async fn forward(&self, event: OutboundEvent) {
        match self.filter.permits_event(&event).await {
            Ok(true) => match serde_json::to_value(&event) {
                Ok(payload) => {
                    tracing::info!("sending state change to relay");
                    self.emitter.emit(STATE_CHANGED, payload);
                }
                Err(err) => tracing::error!(error = %err, "failed to encode state change"),
            },
            Ok(false) => tracing::debug!("state change not authorized or not subscribed; dropped"),
            Err(err) => tracing::error!(error = %err, "failed to check state change"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::settings::{Settings, keys};
    use crate::testing::InMemorySettingsStore;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmitter {
        emitted: Mutex<Vec<(String, Value)>>,
    }

    impl RelayEmitter for RecordingEmitter {
        fn emit(&self, event: &str, payload: Value) {
            self.emitted
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
        }
    }

    fn forwarder(
        entries: &[(&str, Value)],
    ) -> (
        EventForwarder<InMemorySettingsStore, Arc<RecordingEmitter>>,
        Arc<RecordingEmitter>,
    ) {
        let settings = Arc::new(Settings::new(InMemorySettingsStore::with(entries)));
        let emitter = Arc::new(RecordingEmitter::default());
        let forwarder =
            EventForwarder::new(AuthorizationFilter::new(settings), Arc::clone(&emitter));
        (forwarder, emitter)
    }

    #[tokio::test]
    async fn should_emit_authorized_subscribed_event() {
        let (forwarder, emitter) = forwarder(&[
            (keys::SELECTED_THINGS, json!({"d1": {"authorized": true}})),
            (
                keys::EVENT_SUBSCRIPTIONS,
                json!({"d1": {"onoff": {"subscribed": true}}}),
            ),
        ]);

        forwarder
            .forward(OutboundEvent::new("d1", "onoff", json!(true)))
            .await;

        let emitted = emitter.emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, STATE_CHANGED);
        assert_eq!(emitted[0].1["deviceId"], json!("d1"));
        assert_eq!(emitted[0].1["value"], json!(true));
    }

    #[tokio::test]
    async fn should_drop_event_for_unsubscribed_capability() {
        let (forwarder, emitter) = forwarder(&[
            (keys::SELECTED_THINGS, json!({"d1": {"authorized": true}})),
            (
                keys::EVENT_SUBSCRIPTIONS,
                json!({"d1": {"onoff": {"subscribed": true}}}),
            ),
        ]);

        forwarder
            .forward(OutboundEvent::new("d1", "dim", json!(0.3)))
            .await;

        assert!(emitter.emitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_drain_pipeline_until_closed() {
        let (forwarder, emitter) = forwarder(&[
            (keys::SELECTED_USERS, json!({"u1": true})),
            (
                keys::EVENT_SUBSCRIPTIONS,
                json!({"u1|user": {"$user_present": {"subscribed": true}}}),
            ),
        ]);
        let (sink, source) = event_pipeline();

        sink.send(OutboundEvent::new("u1|user", "$user_present", json!(true)))
            .unwrap();
        sink.send(OutboundEvent::new("u2|user", "$user_present", json!(true)))
            .unwrap();
        drop(sink);
        forwarder.run(source).await;

        assert_eq!(emitter.emitted.lock().unwrap().len(), 1);
    }
}
