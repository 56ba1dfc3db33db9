//! strmsync Core - Domain types, ports and configuration
//!
//! This crate contains everything the synchronization engine and the backend
//! adapters agree on:
//! - **Domain types** - `SyncFileEntry`, `PathQueueItem`, `IncrementalBatch`
//! - **Error taxonomy** - `BackendError`, shared by every adapter
//! - **Port definitions** - `StorageBackend`, `CatalogSink`,
//!   `FileAcceptancePolicy`, `StatsSink`, `CredentialListener`
//! - **Configuration** - YAML-backed `Config` with defaults and validation
//! - **Policy** - `ExtensionPolicy`, the config-driven file acceptance rules
//!
//! # Architecture
//!
//! Ports are trait interfaces that the traversal engine depends on; the
//! concrete adapters live in `strmsync-remote` (cloud drives) and
//! `strmsync-sync` (local filesystem, in-memory catalog).

pub mod config;
pub mod domain;
pub mod policy;
pub mod ports;
