//! Bridge — wires the services together and owns their background tasks.
//!
//! Start-up runs the settings migration, a first registration pass and the
//! relay session, then spawns the event forwarder and a watcher that
//! re-runs registration whenever the subscription document changes.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use hubrelay_domain::error::BridgeError;

use crate::ports::{HubApi, RealtimePublisher, RelayConnector, SettingsStore};
use crate::services::aggregator::{AggregatorConfig, EventAggregator};
use crate::services::authorization::AuthorizationFilter;
use crate::services::connection::{ConnectionConfig, ConnectionManager};
use crate::services::forwarder::{EventForwarder, EventSource, event_pipeline};
use crate::services::registrar::{Registrar, RegistrationReport};
use crate::services::settings::{Settings, keys};
use crate::services::user_monitor::UserMonitor;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeConfig {
    pub connection: ConnectionConfig,
    pub aggregator: AggregatorConfig,
}

/// What happened during [`Bridge::start`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Startup {
    /// A legacy `selectedThings` document was converted.
    pub migrated: bool,
    /// `None` when the first registration pass failed.
    pub registration: Option<RegistrationReport>,
    /// Whether a relay session was opened.
    pub session: bool,
}

pub struct Bridge<C, H, S, R> {
    settings: Arc<Settings<S>>,
    registrar: Arc<Registrar<H, S>>,
    connection: Arc<ConnectionManager<C, H, S, R>>,
    source: Mutex<Option<EventSource>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, H, S, R> Bridge<C, H, S, R>
where
    C: RelayConnector + 'static,
    H: HubApi + 'static,
    S: SettingsStore + 'static,
    R: RealtimePublisher + 'static,
{
    pub fn new(hub: Arc<H>, store: S, realtime: R, connector: C, config: BridgeConfig) -> Self {
        let settings = Arc::new(Settings::new(store));
        let (sink, source) = event_pipeline();
        let aggregator = Arc::new(EventAggregator::new(
            Arc::clone(&hub),
            sink.clone(),
            config.aggregator,
        ));
        let users = Arc::new(UserMonitor::new(sink.clone()));
        let registrar = Arc::new(Registrar::new(
            Arc::clone(&hub),
            Arc::clone(&settings),
            aggregator,
            users,
            sink,
        ));
        let connection = Arc::new(ConnectionManager::new(
            connector,
            hub,
            Arc::clone(&settings),
            realtime,
            config.connection,
        ));
        Self {
            settings,
            registrar,
            connection,
            source: Mutex::new(Some(source)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bring the bridge up.
    ///
    /// A failed registration pass or relay session is logged and reported
    /// in the returned [`Startup`]; both are retried later (on the next
    /// subscription change and on reinitialisation respectively).
    ///
    /// # Errors
    ///
    /// Returns the settings error when the migration cannot run.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<Startup, BridgeError> {
        let changes = self.settings.changes();
        let migrated = self.settings.migrate().await?;

        let registration = match self.registrar.run().await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::error!(error = %err, "initial registration pass failed");
                None
            }
        };
        let session = match self.connection.init().await {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(error = %err, "failed to open relay session");
                false
            }
        };

        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(source) = source {
            let forwarder = EventForwarder::new(
                AuthorizationFilter::new(Arc::clone(&self.settings)),
                Arc::clone(&self.connection),
            );
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push(tokio::spawn(forwarder.run(source)));
            tasks.push(tokio::spawn(watch_subscriptions(
                Arc::clone(&self.registrar),
                changes,
            )));
        } else {
            tracing::warn!("bridge already started; background tasks left as they are");
        }

        tracing::info!(migrated, session, "bridge started");
        Ok(Startup {
            migrated,
            registration,
            session,
        })
    }

    /// Stop the background tasks and close the relay session.
    pub fn shutdown(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        self.connection.disconnect();
        tracing::info!("bridge stopped");
    }

    /// Ask the relay to resynchronise this location's devices.
    ///
    /// The returned future owns its handles and can be spawned; a failed
    /// request has already been published on the realtime channel and is
    /// only logged here.
    pub fn request_device_sync(&self) -> impl Future<Output = ()> + Send + 'static {
        let connection = Arc::clone(&self.connection);
        async move {
            if let Err(err) = connection.request_device_sync().await {
                tracing::warn!(error = %err, "device sync not completed");
            }
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<Settings<S>> {
        &self.settings
    }

    #[must_use]
    pub fn registrar(&self) -> &Arc<Registrar<H, S>> {
        &self.registrar
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager<C, H, S, R>> {
        &self.connection
    }
}

async fn watch_subscriptions<H, S>(
    registrar: Arc<Registrar<H, S>>,
    mut changes: broadcast::Receiver<String>,
) where
    H: HubApi + 'static,
    S: SettingsStore,
{
    loop {
        match changes.recv().await {
            Ok(key) if key == keys::EVENT_SUBSCRIPTIONS => {
                tracing::info!("subscriptions changed; re-running registration");
            }
            Ok(key) => {
                tracing::debug!(%key, "setting changed");
                continue;
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "settings watcher lagged; re-running registration");
            }
            Err(RecvError::Closed) => break,
        }
        if let Err(err) = registrar.run().await {
            tracing::error!(error = %err, "registration pass failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InboundFrame;
    use crate::testing::{
        FakeConnector, FakeHub, InMemorySettingsStore, LinkEnd, RecordingRealtime, lamp,
    };
    use hubrelay_domain::event::names::STATE_CHANGED;
    use hubrelay_domain::session::ConnectionState;
    use hubrelay_domain::subscription::{SubscriptionAction, SubscriptionRequest};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::mpsc;

    type TestBridge = Bridge<FakeConnector, FakeHub, InMemorySettingsStore, Arc<RecordingRealtime>>;

    fn bridge(
        entries: &[(&str, Value)],
    ) -> (TestBridge, Arc<FakeHub>, mpsc::UnboundedReceiver<LinkEnd>) {
        let hub = Arc::new(FakeHub::with_devices(vec![lamp("d1")]));
        let (connector, links) = FakeConnector::new();
        let config = BridgeConfig {
            connection: ConnectionConfig {
                url: "wss://relay.test/socket".to_string(),
                ..ConnectionConfig::default()
            },
            ..BridgeConfig::default()
        };
        let bridge = Bridge::new(
            Arc::clone(&hub),
            InMemorySettingsStore::with(entries),
            Arc::new(RecordingRealtime::default()),
            connector,
            config,
        );
        (bridge, hub, links)
    }

    fn configured(extra: &[(&'static str, Value)]) -> Vec<(&'static str, Value)> {
        let mut entries = vec![
            (keys::UID, json!("uid-1")),
            (keys::LOCATION_ID, json!("loc-1")),
            (keys::TOKEN, json!("secret")),
            (keys::SELECTED_THINGS, json!({"d1": {"authorized": true}})),
        ];
        entries.extend_from_slice(extra);
        entries
    }

    #[tokio::test]
    async fn should_forward_subscribed_events_after_start() {
        let (bridge, hub, mut links) = bridge(&configured(&[(
            keys::EVENT_SUBSCRIPTIONS,
            json!({"d1": {"onoff": {"subscribed": true}}}),
        )]));

        let startup = bridge.start().await.unwrap();
        assert!(startup.session);
        assert_eq!(startup.registration.unwrap().installed, 1);

        let mut link = links.recv().await.unwrap();
        link.inbound.send(InboundFrame::Connected).unwrap();
        hub.emit_capability("d1", "onoff", json!(true));

        let frame = tokio::time::timeout(Duration::from_secs(5), link.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.event, STATE_CHANGED);
        assert_eq!(frame.payload["deviceId"], json!("d1"));
        assert_eq!(frame.payload["value"], json!(true));
        bridge.shutdown();
    }

    #[tokio::test]
    async fn should_register_listener_when_subscription_is_added() {
        let (bridge, hub, _links) = bridge(&configured(&[]));
        bridge.start().await.unwrap();
        assert_eq!(hub.active_capability_listeners(), 0);

        bridge
            .settings()
            .update_event_subscriptions(
                &[SubscriptionRequest {
                    device_id: "d1".to_string(),
                    capability: "dim".to_string(),
                    st_attribute: None,
                    st_capability: None,
                }],
                SubscriptionAction::Add,
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.active_capability_listeners() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(bridge.registrar().registry().is_registered("d1", "dim"));
        bridge.shutdown();
    }

    #[tokio::test]
    async fn should_migrate_and_start_without_credentials() {
        let (bridge, _hub, mut links) = bridge(&[(keys::SELECTED_THINGS, json!(["d1", 5]))]);

        let startup = bridge.start().await.unwrap();

        assert!(startup.migrated);
        assert!(!startup.session);
        assert!(links.try_recv().is_err());
        assert!(bridge.settings().is_device_authorized("d1").await.unwrap());
    }

    #[tokio::test]
    async fn should_send_device_sync_request_on_demand() {
        let (bridge, _hub, mut links) = bridge(&configured(&[]));
        bridge.start().await.unwrap();
        let mut link = links.recv().await.unwrap();
        let mut state = bridge.connection().subscribe_state();
        link.inbound.send(InboundFrame::Connected).unwrap();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let sync = tokio::spawn(bridge.request_device_sync());
        let frame = tokio::time::timeout(Duration::from_secs(5), link.outbound.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(frame.event, STATE_CHANGED);
        assert_eq!(frame.payload["data"]["value"], json!("APP_UPDATED"));
        frame.ack.unwrap().send(Value::Null).unwrap();
        tokio::time::timeout(Duration::from_secs(5), sync)
            .await
            .unwrap()
            .unwrap();
        bridge.shutdown();
    }
}
