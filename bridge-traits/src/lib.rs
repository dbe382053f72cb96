//! # Host Bridge Traits
//!
//! Capabilities the replication engine needs from its host, expressed as
//! object-safe async traits.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - single-attempt HTTP used by the S3 and peer clients
//! - [`FileSystemAccess`](storage::FileSystemAccess) - blob storage and home-directory writes
//!
//! ### Transfer transports
//! - [`PeerTransport`](peer::PeerTransport) - chunked push to another kiosk instance
//! - [`ObjectStore`](object_store::ObjectStore) - S3-compatible bucket and object operations
//!
//! ### External signals
//! - [`UserDirectory`](users::UserDirectory) - local OS accounts and their music folders
//! - [`HealthProbe`](users::HealthProbe) - peer reachability
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - time source for deterministic tests
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Every trait returns [`BridgeError`](error::BridgeError). Implementations must
//! map their native failures onto the variant that carries the right retry
//! semantics (see [`BridgeError::is_transient`]).
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; the engine shares them across worker tasks
//! behind `Arc<dyn Trait>`.

pub mod error;
pub mod http;
pub mod object_store;
pub mod peer;
pub mod storage;
pub mod time;
pub mod users;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use object_store::{
    BucketInfo, BucketSettings, CompletedPart, ObjectInfo, ObjectStore, PutOptions,
};
pub use peer::{ChunkAck, ManifestEntry, PeerSession, PeerTransport, TransferManifest};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
pub use users::{HealthProbe, InstanceStatus, OsUserAccount, UserDirectory};
