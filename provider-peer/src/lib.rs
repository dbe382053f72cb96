//! # Peer Instance Provider
//!
//! Implements the `PeerTransport` bridge trait over the kiosk replication
//! HTTP API.
//!
//! ## Overview
//!
//! This crate provides:
//! - Session negotiation with a manifest of content hashes
//! - Offset-addressed chunk uploads that a peer can resume
//! - Per-file commit, session completion and abort
//! - Settings document push

pub mod connector;
pub mod error;

pub use connector::HttpPeerTransport;
pub use error::{PeerError, Result};
