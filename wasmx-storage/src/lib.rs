//! Storage abstraction for the wasmx execution core.
//!
//! Provides a [`KvStore`](traits::KvStore) trait with ordered range scans, an
//! in-memory backend, a branching savepoint store used for nested calls, a
//! per-contract prefixed view, and a registry of contract descriptors.

pub mod branch;
pub mod error;
pub mod memory;
pub mod prefix;
pub mod registry;
pub mod traits;
