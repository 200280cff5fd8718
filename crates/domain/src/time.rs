//! Time and timestamp helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC timestamp used for event times and `lastUpdated` fields.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Render a timestamp as ISO-8601 with millisecond precision (`2024-01-01T00:00:00.000Z`).
#[must_use]
pub fn to_iso_millis(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter writing timestamps with millisecond precision and a `Z` suffix.
pub mod iso_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Timestamp;

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso_millis(ts))
    }

    /// # Errors
    ///
    /// Fails when the input is not an RFC 3339 timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        chrono::DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&chrono::Utc))
            .map_err(serde::de::Error::custom)
    }
}
