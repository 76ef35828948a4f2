//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the media vault:
//! - Logging and tracing initialisation
//! - Engine configuration and retry policy
//!
//! ## Overview
//!
//! Every other crate reads its tunables from [`VaultConfig`](config::VaultConfig)
//! and logs through `tracing`; this crate is where both are set up.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{EnumerationMode, RetryPolicy, VaultConfig, VaultConfigBuilder};
pub use error::{Error, Result};
