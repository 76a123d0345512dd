//! # sync-types
//!
//! Data model for the tidesync reconciliation and caching layer.
//!
//! This crate provides the foundational types used across all tidesync crates:
//! - [`LocalChange`], [`RemoteChange`], [`ChangeOperation`] - Ledger records
//! - [`UploadPayload`], [`UploadItem`], [`UploadStats`] - Upload wire format
//! - [`NetworkRequest`], [`RequestId`] - Offline request queue records
//! - [`CacheEntry`], [`CacheExport`] - Cache records and the export blob
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod change;
mod error;
mod ids;
mod request;

pub use cache::{
    CacheCounters, CacheEntry, CacheExport, CacheMetadata, CachePriority, CACHE_EXPORT_VERSION,
};
pub use change::{
    ChangeOperation, LocalChange, RemoteChange, UploadItem, UploadPayload, UploadStats,
};
pub use error::TypesError;
pub use ids::{RequestId, Timestamp};
pub use request::{HttpMethod, NetworkRequest};
