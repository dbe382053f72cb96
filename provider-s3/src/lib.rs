//! # S3 Object Store Provider
//!
//! Implements the `ObjectStore` bridge trait against S3-compatible services.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`S3ObjectStore`]: path-style REST client authenticated with an access grant
//! - Bucket creation with versioning and object lock
//! - Single-shot and multipart uploads with SHA-256 payload checksums
//! - Paginated object and version listing
//! - Compliance-mode retention headers
//! - [`MemoryObjectStore`]: in-process store with the same versioning and
//!   retention semantics, for offline kiosks and tests

pub mod connector;
pub mod error;
pub mod memory;
pub mod types;

pub use connector::S3ObjectStore;
pub use error::{Result, S3Error};
pub use memory::MemoryObjectStore;
