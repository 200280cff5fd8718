//! # hubrelay-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the [`SettingsStore`](hubrelay_app::ports::SettingsStore) port
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//!
//! ## Dependency rule
//! Depends on `hubrelay-app` (for port traits) and `hubrelay-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

pub mod error;
pub mod pool;
pub mod settings_store;

pub use pool::{Config, Database};
pub use settings_store::SqliteSettingsStore;
