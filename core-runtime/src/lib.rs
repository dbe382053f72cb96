//! # Core Runtime Module
//!
//! Shared runtime infrastructure for the replication engine:
//! - [`config`]: `CoreConfig` builder with fail-fast validation
//! - [`logging`]: `tracing` subscriber setup and host log forwarding
//! - [`events`]: typed broadcast event bus for observers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
