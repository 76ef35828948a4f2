//! # Media Vault
//!
//! Umbrella crate for the workspace. Host applications depend on
//! `media-vault` and pick a remote provider through feature flags instead of
//! wiring each crate individually.
//!
//! ## Features
//!
//! - `amazon-photos` (default): the Amazon Photos connector
//!
//! ## Usage
//!
//! ```rust,ignore
//! use media_vault::prelude::*;
//! use media_vault::amazon_photos::{AmazonPhotosConnector, Session};
//!
//! init_logging(LoggingConfig::default())?;
//!
//! let config = VaultConfig::builder()
//!     .database_path("/srv/vault/manifest.db")
//!     .storage_root("/srv/vault/content")
//!     .build()?;
//!
//! let session = Session::from_storage_state_file(path, "www.amazon.com", now).await?;
//! let remote = Arc::new(AmazonPhotosConnector::new(session)?);
//!
//! let vault = SyncController::open(config, remote).await?;
//! vault.enumerate(EnumerationMode::Incremental).await?;
//! let report = vault.download(DownloadOptions::from_config(vault.config())).await?;
//! std::process::exit(report.outcome().exit_code());
//! ```

pub use bridge_traits as bridge;
pub use core_manifest as manifest;
pub use core_runtime as runtime;
pub use core_sync as sync;

#[cfg(feature = "amazon-photos")]
pub use provider_amazon_photos as amazon_photos;

/// The types most callers need to drive a vault.
pub mod prelude {
    pub use bridge_traits::{Clock, RemoteLibrary, SystemClock};
    pub use core_runtime::logging::{init_logging, LoggingConfig};
    pub use core_runtime::{EnumerationMode, VaultConfig};
    pub use core_sync::{
        AbortedPass, DownloadOptions, DownloadReport, DriftReport, EnumerationReport, RunOutcome,
        StatusReport, SyncController, SyncError,
    };
}
