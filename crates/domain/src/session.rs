//! Relay session — credentials, hub identity, and observable status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::PLATFORM;

/// Credentials required before a relay session can be opened.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub uid: String,
    pub location_id: String,
    pub token: String,
}

impl SessionCredentials {
    /// Build credentials when all three parts are present and non-empty.
    #[must_use]
    pub fn from_parts(
        uid: Option<String>,
        location_id: Option<String>,
        token: Option<String>,
    ) -> Option<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Some(Self {
            uid: non_empty(uid)?,
            location_id: non_empty(location_id)?,
            token: non_empty(token)?,
        })
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("uid", &self.uid)
            .field("location_id", &self.location_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Version information reported by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInfo {
    pub app_version: String,
    pub system_version: String,
    pub platform: String,
    pub sdk: u32,
}

/// Identity document sent with the relay handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub platform: &'static str,
    pub uid: String,
    pub location_id: String,
    pub smartapp_version: String,
    pub metadata: IdentityMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub system_version: String,
    pub platform: String,
    pub sdk: u32,
}

impl SessionIdentity {
    #[must_use]
    pub fn new(credentials: &SessionCredentials, hub: &HubInfo) -> Self {
        Self {
            platform: PLATFORM,
            uid: credentials.uid.clone(),
            location_id: credentials.location_id.clone(),
            smartapp_version: hub.app_version.clone(),
            metadata: IdentityMetadata {
                system_version: hub.system_version.clone(),
                platform: hub.platform.clone(),
                sdk: hub.sdk,
            },
        }
    }
}

/// Observable state of the relay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Progress of a cloud-side device sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationSyncStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
}
