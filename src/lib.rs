//! Umbrella crate for the kiosk replication engine.
//!
//! Hosts depend on `kiosk-replication-workspace` and pick features instead of
//! wiring `core-service` and the desktop bridges by hand.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
