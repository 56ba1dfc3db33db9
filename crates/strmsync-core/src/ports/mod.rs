//! Port definitions
//!
//! The traversal engine depends only on these traits; adapters implement
//! them in the outer crates.
//!
//! ## Ports Overview
//!
//! - [`StorageBackend`] - listing, directory creation and references for one backend
//! - [`CatalogSink`] - idempotent entry store written by the traversal
//! - [`FileAcceptancePolicy`] - exclusion and classification rules
//! - [`StatsSink`] / [`CredentialListener`] - hooks fired by the request executor

pub mod catalog;
pub mod policy;
pub mod storage_backend;
pub mod telemetry;

pub use catalog::{CatalogError, CatalogSink};
pub use policy::FileAcceptancePolicy;
pub use storage_backend::{create_missing_directories, StorageBackend};
pub use telemetry::{CredentialListener, RequestRecord, StatsSink};
