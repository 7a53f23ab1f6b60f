//! Record lifecycle and commit-ordering engine for recordstore.
//!
//! `recordstore-session` is the **engine layer**. It tracks in-memory records,
//! groups uncommitted records into transactions, orders their creation so a
//! referenced record is always persisted before the records referencing it,
//! and drives find requests that populate association collections.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one record per `(model, id)`; finds are deduplicated.
//! - **Dependency graph**: per transaction, recomputed on every association
//!   mutation from the records' association data.
//! - **Request queue**: adapter calls are queued and dispatched one at a time,
//!   never while engine state is borrowed.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: nothing commits unless `commit()` is called,
//!   or `StoreConfig::auto_commit` is switched on.
//! - **Handles, not references**: `Record`, `Transaction` and `ManyArray` are
//!   cheap `Clone` handles carrying an ephemeral id and the store.
//! - **Single-threaded**: the store is `!Send`; asynchrony comes only from the
//!   adapter calling back at a later point.
//!
//! # Example
//!
//! ```ignore
//! let store = Store::new(adapter);
//! let tx = store.transaction();
//! let child = tx.create_record(&comment)?;
//! let parent = tx.create_record(&comment)?;
//! parent.has_many("comments")?.push_object(&child)?;
//!
//! // create(parent) is issued first; create(child) once the adapter
//! // calls store.did_create_record(&parent, ..)
//! tx.commit()?;
//! ```

pub mod adapter;
pub mod dependency;
pub mod identity_map;
mod many_array;
mod record;
mod registry;
mod store;
mod transaction;

pub use adapter::{Adapter, AdapterRequest};
pub use dependency::{CommitPlan, DependencyGraph};
pub use identity_map::{IdentityKey, IdentityMap};
pub use many_array::ManyArray;
pub use record::Record;
pub use store::{Store, StoreDebugInfo};
pub use transaction::{BlockedRecord, CommitResult, Transaction};

// ============================================================================
// Store Configuration
// ============================================================================

/// Configuration for store behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Commit the default transaction after an association mutation touching
    /// one of its records.
    pub auto_commit: bool,
    /// Refuse to start a commit whose records depend on each other in a loop.
    pub detect_cycles: bool,
    /// Attach `DependencyUnresolved` to the dependents of a failed create.
    pub mark_stalled_dependents: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_commit: false,
            detect_cycles: true,
            mark_stalled_dependents: true,
        }
    }
}

impl StoreConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `auto_commit` option (builder pattern).
    #[must_use]
    pub fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    /// Set the `detect_cycles` option (builder pattern).
    #[must_use]
    pub fn detect_cycles(mut self, value: bool) -> Self {
        self.detect_cycles = value;
        self
    }

    /// Set the `mark_stalled_dependents` option (builder pattern).
    #[must_use]
    pub fn mark_stalled_dependents(mut self, value: bool) -> Self {
        self.mark_stalled_dependents = value;
        self
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert!(!config.auto_commit);
        assert!(config.detect_cycles);
        assert!(config.mark_stalled_dependents);
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new()
            .auto_commit(true)
            .detect_cycles(false)
            .mark_stalled_dependents(false);
        assert!(config.auto_commit);
        assert!(!config.detect_cycles);
        assert!(!config.mark_stalled_dependents);
    }
}
