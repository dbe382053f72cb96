//! # Desktop Bridge Implementations
//!
//! Default implementations of the host bridge traits for Linux kiosk hardware:
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `UserDirectory` from a fixed list or by scanning `/home`
//! - `HealthProbe` as an HTTP `GET /health`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new());
//! let fs = Arc::new(TokioFileSystem::new());
//! let config = CoreConfig::builder()
//!     .http_client(http)
//!     .file_system(fs)
//!     .build()?;
//! ```

mod filesystem;
mod health;
mod http;
mod users;

pub use filesystem::TokioFileSystem;
pub use health::HttpHealthProbe;
pub use http::ReqwestHttpClient;
pub use users::{HomeDirUserDirectory, StaticUserDirectory};
