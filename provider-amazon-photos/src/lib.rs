//! # Amazon Photos Provider
//!
//! Implements `RemoteLibrary` for the Amazon Photos drive API.
//!
//! ## Overview
//!
//! This module provides:
//! - Session loading from a browser storage-state export (cookies)
//! - Paginated node listing with an optional modification-date filter
//! - Streaming downloads through the content redirection endpoint
//! - Mapping of HTTP failures onto the engine's error taxonomy
//!
//! Logging in is out of scope: an expired session surfaces as
//! `BridgeError::AuthExpired` and must be refreshed by the operator.

pub mod connector;
pub mod error;
pub mod session;
pub mod types;

pub use connector::AmazonPhotosConnector;
pub use error::{AmazonPhotosError, Result};
pub use session::Session;
