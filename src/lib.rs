//! # Gateway Sync - Core Library Crate
//!
//! Declarative configuration management for an API gateway control plane.
//! The library reads the gateway's current configuration through its admin API,
//! loads the desired configuration from state files, computes the difference and
//! applies it in an order that respects references between entities.
//!
//! ## Flow
//! 1. [`dump::dump`] pages through the admin API into a [`KongState`] (current)
//! 2. [`file::load_files`] parses state files into a second [`KongState`] (target)
//! 3. [`Syncer::run`] diffs the two type by type and drives creates, updates and
//!    deletes through the admin API, mirroring each result into the current state
//!
//! ## Module Layout
//! - `entities`: typed records, natural keys and equality rules per entity type
//! - `state`: indexed in-memory container with reference resolution and cascades
//! - `diff`: per-type change computation
//! - `crud`: mapping of changes onto admin API calls
//! - `sync`: the orchestrator and its report

/// Error types and configuration
pub mod core;

/// Admin API client abstraction and its HTTP implementation
pub mod client;

/// Entity model: every gateway object the engine manages
pub mod entities;

/// In-memory state container
pub mod state;

/// Change computation between two states
pub mod diff;

/// Create, update and delete of entities against the admin API
pub mod crud;

/// Reconciliation orchestrator
pub mod sync;

/// Reading the current state from a running gateway
pub mod dump;

/// Declarative state files
pub mod file;

/// Logging setup
pub mod observability;

// Re-exports for convenience
pub use crate::core::config::SyncConfig;
pub use crate::core::error::{SyncError, SyncResult};
pub use client::{AdminApi, AdminClient};
pub use diff::{Change, Differ, Event};
pub use entities::{Entity, EntityType, EntityVariant, ForeignRef};
pub use state::KongState;
pub use sync::{SyncReport, Syncer};
