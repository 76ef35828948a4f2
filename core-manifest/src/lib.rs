//! # Manifest Store
//!
//! Owns the persisted state of the sync engine.
//!
//! ## Overview
//!
//! This crate manages:
//! - The SQLite schema and its embedded migrations
//! - [`RemoteItemRecord`](models::RemoteItemRecord): every remote item ever observed and its sync state
//! - [`ContentEntry`](models::ContentEntry): every unique content hash and its reference count
//! - The `sync_runs` journal table used by the sync layer
//!
//! Records are never deleted. Content entries are created once per hash and
//! afterwards only have their reference count incremented.

pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{ManifestError, Result};
pub use models::{
    CommitOutcome, ContentEntry, ContentSummary, RemoteItemRecord, StateCounts, SyncState,
    UpsertChange, UpsertOutcome,
};
pub use store::{ManifestStore, SqliteManifestStore, StatePager};
