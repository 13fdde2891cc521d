//! syncq Core - Domain types and ports
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `LocalFileMetadata`, `PendingChange`, `EngineMode`
//! - **Port definitions** - Traits for adapters: `IMetadataStore`, `ITransport`,
//!   `INetworkState`, `IAuthentication`, `ISyncDelegate`
//! - **Configuration** - YAML-backed settings for auto-commit, retry, storage and logging
//!
//! # Architecture
//!
//! The domain module holds pure data and rules with no I/O. Ports define
//! trait interfaces that adapter crates implement. The engine that drives
//! them lives in `syncq-sync`.

pub mod config;
pub mod domain;
pub mod ports;
