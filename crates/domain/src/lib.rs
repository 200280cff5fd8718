//! # hubrelay-domain
//!
//! Pure domain model for the hubrelay hub ↔ cloud bridge.
//!
//! ## Responsibilities
//! - Foundational types: thing keys, error conventions, timestamps
//! - Define **Devices** and their **Capabilities** as the hub reports them
//! - Define **Users** and their projection into device-shaped things
//! - Define the **Subscription** and **Authorization** documents
//! - Define outbound **Events** and inbound **Commands** exchanged with the relay
//! - Contain all invariant enforcement and pure domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod authorization;
pub mod capability;
pub mod command;
pub mod device;
pub mod event;
pub mod flow;
pub mod session;
pub mod subscription;
pub mod user;
