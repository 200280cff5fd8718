//! Event aggregator — merges composite capability parts into one debounced event.
//!
//! Parts of a composite (e.g. track title, artist and album) usually change
//! together. Each part restarts a per-device quiet timer; when it expires the
//! merged value is enriched (best effort, bounded by a timeout) and emitted
//! once. The merged value persists across emissions so a later part update
//! still carries the other fields.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use hubrelay_domain::capability::{ALBUM_ART_FIELD, CompositeCapability};
use hubrelay_domain::event::OutboundEvent;

use crate::ports::HubApi;
use crate::services::forwarder::EventSink;

/// Timing of the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub debounce: Duration,
    pub enrichment_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            enrichment_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompositeKey {
    device_id: String,
    composite: &'static str,
}

struct PendingEmission {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct AggregatorState {
    merged: HashMap<CompositeKey, OutboundEvent>,
    pending: HashMap<CompositeKey, PendingEmission>,
    next_generation: u64,
}

pub struct EventAggregator<H> {
    hub: Arc<H>,
    sink: EventSink,
    config: AggregatorConfig,
    state: Arc<Mutex<AggregatorState>>,
}

fn lock(state: &Mutex<AggregatorState>) -> MutexGuard<'_, AggregatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H: HubApi + 'static> EventAggregator<H> {
    pub fn new(hub: Arc<H>, sink: EventSink, config: AggregatorConfig) -> Self {
        Self {
            hub,
            sink,
            config,
            state: Arc::new(Mutex::new(AggregatorState::default())),
        }
    }

    /// Fold a part update into its composite and (re)start the quiet timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, composite: &'static CompositeCapability, part: OutboundEvent) {
        let Some(field) = composite.field_for(&part.capability) else {
            tracing::warn!(
                capability = %part.capability,
                composite = composite.name,
                "capability is not part of composite"
            );
            return;
        };
        let key = CompositeKey {
            device_id: part.device_id.clone(),
            composite: composite.name,
        };

        let mut state = lock(&self.state);
        if let Some(previous) = state.pending.remove(&key) {
            previous.task.abort();
        }
        let merged = state.merged.entry(key.clone()).or_insert_with(|| {
            OutboundEvent::new(
                part.device_id.clone(),
                composite.name,
                Value::Object(Map::new()),
            )
        });
        if !merged.value.is_object() {
            merged.value = Value::Object(Map::new());
        }
        if let Value::Object(fields) = &mut merged.value {
            fields.insert(field.to_string(), part.value);
        }
        merged.timestamp = part.timestamp;

        state.next_generation += 1;
        let generation = state.next_generation;
        let task = tokio::spawn(emit_after_quiet_period(
            Arc::clone(&self.state),
            Arc::clone(&self.hub),
            self.sink.clone(),
            key.clone(),
            generation,
            self.config,
        ));
        state.pending.insert(key, PendingEmission { generation, task });
    }

    /// Number of composites waiting for their quiet period to end.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

async fn emit_after_quiet_period<H: HubApi>(
    state: Arc<Mutex<AggregatorState>>,
    hub: Arc<H>,
    sink: EventSink,
    key: CompositeKey,
    generation: u64,
    config: AggregatorConfig,
) {
    tokio::time::sleep(config.debounce).await;

    let event = {
        let mut state = lock(&state);
        let current = state
            .pending
            .get(&key)
            .is_some_and(|pending| pending.generation == generation);
        if !current {
            return;
        }
        state.pending.remove(&key);
        state.merged.get(&key).cloned()
    };
    let Some(mut event) = event else {
        return;
    };

    match tokio::time::timeout(config.enrichment_timeout, hub.album_art_url(&key.device_id)).await {
        Ok(Ok(Some(url))) => {
            if let Value::Object(fields) = &mut event.value {
                fields.insert(ALBUM_ART_FIELD.to_string(), Value::String(url));
            }
        }
        Ok(Ok(None)) => {}
        Ok(Err(err)) => {
            tracing::debug!(device_id = %key.device_id, error = %err, "album art lookup failed");
        }
        Err(_) => {
            tracing::debug!(device_id = %key.device_id, "album art lookup timed out");
        }
    }

    tracing::debug!(
        device_id = %key.device_id,
        composite = key.composite,
        "emitting merged composite event"
    );
    if sink.send(event).is_err() {
        tracing::debug!("event pipeline closed; dropping composite event");
    }
}
