//! User monitor — one global user listener, re-scoped on each registration pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use hubrelay_domain::error::BridgeError;
use hubrelay_domain::event::OutboundEvent;
use hubrelay_domain::user::{User, UserSnapshot};

use crate::ports::{HubApi, ListenerHandle, UserCallback};
use crate::services::forwarder::EventSink;

type Watched = Arc<Mutex<HashMap<String, UserSnapshot>>>;

fn lock_watched(
    watched: &Mutex<HashMap<String, UserSnapshot>>,
) -> MutexGuard<'_, HashMap<String, UserSnapshot>> {
    watched.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct UserMonitor {
    watched: Watched,
    sink: EventSink,
    installing: AtomicBool,
    handle: Mutex<Option<ListenerHandle>>,
}

impl UserMonitor {
    #[must_use]
    pub fn new(sink: EventSink) -> Self {
        Self {
            watched: Arc::new(Mutex::new(HashMap::new())),
            sink,
            installing: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Replace the set of monitored users and their baseline state.
    pub fn rescope(&self, users: HashMap<String, UserSnapshot>) {
        tracing::debug!(count = users.len(), "rescoping monitored users");
        *lock_watched(&self.watched) = users;
    }

    #[must_use]
    pub fn monitored(&self) -> usize {
        lock_watched(&self.watched).len()
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Attach the global user listener unless it is already attached.
    ///
    /// Returns `true` when this call attached it.
    ///
    /// # Errors
    ///
    /// Propagates the hub error when attaching fails; a later call retries.
    pub async fn ensure_installed<H: HubApi>(&self, hub: &H) -> Result<bool, BridgeError> {
        if self
            .installing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }
        match hub.listen_users(self.callback()).await {
            Ok(handle) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                tracing::info!("registered listener for user events");
                Ok(true)
            }
            Err(err) => {
                self.installing.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    fn callback(&self) -> UserCallback {
        let watched = Arc::clone(&self.watched);
        let sink = self.sink.clone();
        Arc::new(move |user: User| on_user_update(&watched, &sink, &user))
    }
}

fn on_user_update(watched: &Mutex<HashMap<String, UserSnapshot>>, sink: &EventSink, user: &User) {
    let changes = {
        let mut watched = lock_watched(watched);
        let Some(snapshot) = watched.get_mut(&user.id) else {
            return;
        };
        snapshot.update(user)
    };
    let thing = user.key().to_string();
    for (capability, value) in changes {
        tracing::debug!(%thing, capability, value, "user state changed");
        let event = OutboundEvent::new(thing.clone(), capability, Value::Bool(value));
        if sink.send(event).is_err() {
            tracing::debug!("event pipeline closed; dropping user event");
        }
    }
}
