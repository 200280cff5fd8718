//! # hubrelay-app
//!
//! Application layer — use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `HubApi` — devices, users, flows and change notifications of the hub
//!   - `SettingsStore` — persistent key/value settings
//!   - `RealtimePublisher` — status signals for a local UI
//!   - `RelayConnector` — the bidirectional relay transport
//! - Define the **use-case services** that make up the bridge:
//!   - `Settings` — typed access to the settings documents, migrations
//!   - `Registrar` — keeps hub listeners in line with subscriptions
//!   - `EventAggregator` — debounces and enriches composite capabilities
//!   - `AuthorizationFilter` — gates everything that crosses the bridge
//!   - `ConnectionManager` — relay session lifecycle and correlation
//!   - `CommandDispatcher` — executes relay commands against the hub
//! - Provide **in-process infrastructure** (realtime bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `hubrelay-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod bridge;
pub mod ports;
pub mod realtime_bus;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
