//! # Bridge Traits
//!
//! Collaborator contracts consumed by the sync engine.
//!
//! ## Overview
//!
//! The engine never talks to a remote service or a host logging pipeline
//! directly. Everything outside the process boundary is reached through the
//! traits in this crate, so providers can be swapped and tests can inject
//! in-memory fakes.
//!
//! ## Traits
//!
//! - [`RemoteLibrary`](remote::RemoteLibrary) - paginated listing and streaming fetch of remote media
//! - [`Clock`](time::Clock) - time source for persisted timestamps and thresholds
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to a host
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Providers must map
//! their transport failures onto it so the engine can tell retryable
//! failures from fatal session problems:
//!
//! ```ignore
//! match response.status().as_u16() {
//!     401 | 403 => Err(BridgeError::AuthExpired("session rejected".into())),
//!     404 => Err(BridgeError::NotFound { remote_id }),
//!     429 | 500..=599 => Err(BridgeError::Transient(format!("HTTP {status}"))),
//!     _ => Err(BridgeError::OperationFailed(body)),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; the download pool shares one
//! `RemoteLibrary` across its workers.

pub mod error;
pub mod remote;
pub mod time;

pub use error::BridgeError;

pub use remote::{ByteStream, Page, PageRequest, RemoteItemDescriptor, RemoteLibrary};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
