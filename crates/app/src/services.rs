//! Application services — use-case implementations.
//!
//! Each service struct accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod aggregator;
pub mod authorization;
pub mod connection;
pub mod dispatcher;
pub mod forwarder;
pub mod listener_registry;
pub mod registrar;
pub mod settings;
pub mod user_monitor;
