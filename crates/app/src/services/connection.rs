//! Connection manager — owns the single relay session.
//!
//! At most one session is live at a time: `init` tears down any previous
//! session before opening a new link. Inbound frames are processed by a
//! task that only holds a weak reference to the manager, so dropping the
//! manager ends the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use hubrelay_domain::command::{CommandEnvelope, CommandResponse, MESSAGE_ID_FIELD};
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::event::app_updated_payload;
use hubrelay_domain::event::names::{
    COMMAND, LOCATION_SYNC_COMPLETED, MESSAGE_RESPONSE, STATE_CHANGED, UPDATE_SETTINGS,
};
use hubrelay_domain::session::{
    ConnectionState, LocationSyncStatus, SessionCredentials, SessionIdentity,
};

use crate::ports::realtime::signals;
use crate::ports::{
    ConnectRequest, HubApi, InboundFrame, OutboundFrame, RealtimePublisher, ReconnectPolicy,
    RelayConnector, SettingsStore,
};
use crate::services::dispatcher::{CommandDispatcher, Dispatched, SessionDirective};
use crate::services::forwarder::RelayEmitter;
use crate::services::settings::Settings;

/// Header carrying the base64-encoded session identity.
pub const METADATA_HEADER: &str = "x-sharptools-metadata";

/// Header carrying the relay credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Payload of the sync request signals.
const APP_UPDATE: &str = "APP_UPDATE";

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    /// Default window of [`ConnectionManager::request`].
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// How long a completed location sync is reported before reverting to idle.
    pub sync_reset: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            sync_reset: Duration::from_secs(6),
        }
    }
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    inbound_task: JoinHandle<()>,
    transport: Option<JoinHandle<()>>,
}

impl Session {
    fn close(self) {
        self.inbound_task.abort();
        if let Some(transport) = self.transport {
            transport.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConnectionManager<C, H, S, R> {
    connector: C,
    hub: Arc<H>,
    settings: Arc<Settings<S>>,
    realtime: R,
    dispatcher: CommandDispatcher<H, S>,
    config: ConnectionConfig,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    init_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<ConnectionState>,
    location_sync: watch::Sender<LocationSyncStatus>,
    last_error: Mutex<Option<String>>,
}

impl<C, H, S, R> ConnectionManager<C, H, S, R>
where
    C: RelayConnector + 'static,
    H: HubApi + 'static,
    S: SettingsStore + 'static,
    R: RealtimePublisher + 'static,
{
    pub fn new(
        connector: C,
        hub: Arc<H>,
        settings: Arc<Settings<S>>,
        realtime: R,
        config: ConnectionConfig,
    ) -> Self {
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&hub), Arc::clone(&settings), config.url.clone());
        Self {
            connector,
            hub,
            settings,
            realtime,
            dispatcher,
            config,
            session: Mutex::new(None),
            next_session: AtomicU64::new(0),
            init_lock: tokio::sync::Mutex::new(()),
            state: watch::channel(ConnectionState::default()).0,
            location_sync: watch::channel(LocationSyncStatus::default()).0,
            last_error: Mutex::new(None),
        }
    }

    /// Open a new relay session, replacing the current one.
    ///
    /// Returns `Ok(false)` without touching the current session when the
    /// credentials or the relay URL are not configured.
    ///
    /// # Errors
    ///
    /// Settings or hub read failures, and connector rejections of the request.
    #[tracing::instrument(skip(self))]
    pub async fn init(self: &Arc<Self>) -> Result<bool, BridgeError> {
        let _guard = self.init_lock.lock().await;
        let Some(credentials) = self.settings.socket_credentials().await? else {
            tracing::info!("relay credentials not configured; session not initialized");
            return Ok(false);
        };
        if self.config.url.is_empty() {
            tracing::info!("relay url not configured; session not initialized");
            return Ok(false);
        }

        let hub = self.hub.hub_info().await?;
        tracing::info!(app_version = %hub.app_version, "hub identified");
        let request = ConnectRequest {
            url: self.config.url.clone(),
            headers: handshake_headers(&credentials, &SessionIdentity::new(&credentials, &hub))?,
            reconnect: self.config.reconnect,
            connect_timeout: self.config.connect_timeout,
        };

        if self.close_session() {
            tracing::info!("closed previous relay session");
        }
        self.state.send_replace(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "establishing relay session");
        let link = match self.connector.connect(request).await {
            Ok(link) => link,
            Err(err) => {
                *lock(&self.last_error) = Some(err.to_string());
                self.state.send_replace(ConnectionState::Error);
                return Err(err);
            }
        };

        let id = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let mut session = lock(&self.session);
        let inbound_task = tokio::spawn(Self::run_inbound(Arc::downgrade(self), id, link.inbound));
        *session = Some(Session {
            id,
            outbound: link.outbound,
            inbound_task,
            transport: link.task,
        });
        drop(session);
        Ok(true)
    }

    /// Tear the current session down, if any.
    pub fn disconnect(&self) {
        if self.close_session() {
            tracing::info!("relay session disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn close_session(&self) -> bool {
        let previous = lock(&self.session).take();
        previous.map(Session::close).is_some()
    }

    fn is_current(&self, session: u64) -> bool {
        lock(&self.session).as_ref().is_some_and(|s| s.id == session)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    #[must_use]
    pub fn location_sync(&self) -> LocationSyncStatus {
        *self.location_sync.borrow()
    }

    #[must_use]
    pub fn subscribe_location_sync(&self) -> watch::Receiver<LocationSyncStatus> {
        self.location_sync.subscribe()
    }

    /// Send `payload` and wait for the relay to acknowledge it, within the
    /// configured request timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::request_with_timeout`].
    pub async fn request(&self, event: &str, payload: Value) -> Result<Value, BridgeError> {
        self.request_with_timeout(event, payload, self.config.request_timeout)
            .await
    }

    /// Send `payload` and wait at most `timeout` for its acknowledgement.
    ///
    /// The outcome is settled once; an acknowledgement arriving after the
    /// timeout is discarded.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotInitialized`] when there is no session
    /// - [`BridgeError::NotConnected`] when the link closed before acknowledging
    /// - [`BridgeError::Timeout`] when no acknowledgement arrived in time
    pub async fn request_with_timeout(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let (ack, acked) = oneshot::channel();
        {
            let session = lock(&self.session);
            let Some(session) = session.as_ref() else {
                return Err(BridgeError::NotInitialized);
            };
            session
                .outbound
                .send(OutboundFrame::new(event, payload).with_ack(ack))
                .map_err(|_| BridgeError::NotConnected)?;
        }
        match tokio::time::timeout(timeout, acked).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BridgeError::NotConnected),
            Err(_) => {
                tracing::warn!(event, ?timeout, "relay request timed out");
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    /// Ask the relay to resynchronise this location's devices.
    ///
    /// # Errors
    ///
    /// Propagates the request failure after publishing it locally.
    pub async fn request_device_sync(&self) -> Result<(), BridgeError> {
        self.location_sync.send_replace(LocationSyncStatus::InProgress);
        tracing::info!("requesting device sync from relay");
        match self.request(STATE_CHANGED, app_updated_payload()).await {
            Ok(_) => {
                tracing::debug!("device sync request acknowledged");
                self.publish(signals::SOCKET_EMIT, Value::from(APP_UPDATE))
                    .await;
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "device sync request failed");
                self.publish(signals::SOCKET_ERROR, Value::from(APP_UPDATE))
                    .await;
                Err(err)
            }
        }
    }

    async fn run_inbound(
        manager: Weak<Self>,
        session: u64,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) {
        while let Some(frame) = inbound.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            manager.handle_frame(session, frame).await;
        }
        tracing::debug!(session, "relay inbound stream ended");
    }

    async fn handle_frame(self: &Arc<Self>, session: u64, frame: InboundFrame) {
        if !self.is_current(session) {
            tracing::debug!(session, "ignoring frame from a closed session");
            return;
        }
        match frame {
            InboundFrame::Connected => {
                tracing::info!(session, "relay session established");
                *lock(&self.last_error) = None;
                self.publish(signals::SOCKET_STATUS, Value::from("connected"))
                    .await;
                self.state.send_replace(ConnectionState::Connected);
            }
            InboundFrame::Disconnected { reason } => {
                tracing::info!(session, %reason, "relay session disconnected");
                self.state.send_replace(ConnectionState::Disconnected);
            }
            InboundFrame::ConnectError { message } => {
                tracing::error!(session, %message, "relay connect error");
                *lock(&self.last_error) = Some(message);
                self.publish(signals::SOCKET_STATUS, Value::from("disconnected"))
                    .await;
                self.state.send_replace(ConnectionState::Error);
            }
            InboundFrame::Event { name, payload } => self.handle_event(&name, payload).await,
        }
    }

    async fn handle_event(self: &Arc<Self>, name: &str, payload: Value) {
        match name {
            COMMAND => {
                tokio::spawn(Arc::clone(self).handle_command(payload));
            }
            UPDATE_SETTINGS => {
                tracing::info!("received settings update from relay");
                if let Err(err) = self.settings.apply_remote(payload).await {
                    tracing::error!(error = %err, "failed to apply settings update");
                }
            }
            LOCATION_SYNC_COMPLETED => {
                tracing::info!("relay reported location sync completed");
                self.publish(signals::SOCKET_MESSAGE, Value::from(LOCATION_SYNC_COMPLETED))
                    .await;
                self.location_sync
                    .send_replace(LocationSyncStatus::Completed);
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(manager.config.sync_reset).await;
                    manager.location_sync.send_if_modified(|status| {
                        let completed = *status == LocationSyncStatus::Completed;
                        if completed {
                            *status = LocationSyncStatus::Idle;
                        }
                        completed
                    });
                });
            }
            other => tracing::debug!(event = other, "ignoring relay event"),
        }
    }

    async fn handle_command(self: Arc<Self>, payload: Value) {
        let message_id = payload.get(MESSAGE_ID_FIELD).cloned();
        let Dispatched {
            response,
            directive,
        } = match CommandEnvelope::from_value(payload) {
            Ok(envelope) => {
                tracing::info!(
                    command = envelope.kind.as_deref().unwrap_or_default(),
                    "received command from relay"
                );
                self.dispatcher.dispatch(envelope).await
            }
            Err(err) => {
                tracing::warn!(error = %err, "malformed command envelope");
                Dispatched {
                    response: CommandResponse::failure(),
                    directive: SessionDirective::Continue,
                }
            }
        };
        self.emit(MESSAGE_RESPONSE, response.into_payload(message_id));
        if directive == SessionDirective::Reinitialize {
            self.reinitialize().await;
        }
    }

    fn reinitialize(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match self.init().await {
                Ok(true) => tracing::info!("relay session reinitialized"),
                Ok(false) => {
                    tracing::warn!("relay session not reinitialized; configuration incomplete");
                }
                Err(err) => tracing::error!(error = %err, "failed to reinitialize relay session"),
            }
        })
    }

    async fn publish(&self, signal: &str, payload: Value) {
        if let Err(err) = self.realtime.publish(signal, payload).await {
            tracing::warn!(signal, error = %err, "failed to publish realtime signal");
        }
    }
}

impl<C, H, S, R> RelayEmitter for ConnectionManager<C, H, S, R>
where
    C: Send + Sync,
    H: Send + Sync,
    S: Send + Sync,
    R: Send + Sync,
{
    fn emit(&self, event: &str, payload: Value) {
        let session = lock(&self.session);
        let Some(session) = session.as_ref() else {
            tracing::debug!(event, "no relay session; dropping frame");
            return;
        };
        if session
            .outbound
            .send(OutboundFrame::new(event, payload))
            .is_err()
        {
            tracing::debug!(event, "relay link closed; dropping frame");
        }
    }
}

fn handshake_headers(
    credentials: &SessionCredentials,
    identity: &SessionIdentity,
) -> Result<Vec<(String, String)>, BridgeError> {
    let metadata = BASE64.encode(serde_json::to_vec(identity)?);
    Ok(vec![
        (
            AUTHORIZATION_HEADER.to_string(),
            format!("apikey {}", credentials.token),
        ),
        (METADATA_HEADER.to_string(), metadata),
    ])
}
