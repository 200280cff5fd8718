//! Listener registry — at most one live hub listener per (device, capability).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ports::ListenerHandle;

/// Outcome of [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The handle is now the live listener for the pair.
    Installed,
    /// A listener was already live; the offered handle was dropped (detached).
    Skipped,
}

/// Tracks the live capability listeners.
///
/// Entries are only ever added; a listener stays attached for the lifetime
/// of the registry.
#[derive(Default)]
pub struct ListenerRegistry {
    handles: Mutex<HashMap<String, HashMap<String, ListenerHandle>>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, ListenerHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `handle` as the listener for the pair, unless one is already live.
    pub fn register(
        &self,
        device_id: &str,
        capability: &str,
        handle: ListenerHandle,
    ) -> Registration {
        let mut handles = self.lock();
        let capabilities = handles.entry(device_id.to_string()).or_default();
        if capabilities.contains_key(capability) {
            tracing::warn!(
                device_id,
                capability,
                "listener already registered; skipping duplicate"
            );
            return Registration::Skipped;
        }
        capabilities.insert(capability.to_string(), handle);
        Registration::Installed
    }

    #[must_use]
    pub fn is_registered(&self, device_id: &str, capability: &str) -> bool {
        self.lock()
            .get(device_id)
            .is_some_and(|caps| caps.contains_key(capability))
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
