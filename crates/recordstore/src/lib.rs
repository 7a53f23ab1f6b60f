//! recordstore - a client-side record lifecycle engine.
//!
//! recordstore tracks in-memory records, groups uncommitted records into
//! transactions and persists them through an [`Adapter`] in dependency order:
//!
//! - A record is never handed to the adapter before the uncommitted records
//!   of its own transaction that it references
//! - Committing one transaction never submits records of another
//! - Records created while a commit is running wait for the next commit
//! - `find_many` returns a collection that reports loaded exactly when every
//!   requested record has arrived
//!
//! # Quick Start
//!
//! ```ignore
//! use recordstore::prelude::*;
//!
//! let comment = ModelType::new("comment")
//!     .attribute("body")
//!     .has_many("comments", "comment")
//!     .inverse("comment")
//!     .belongs_to("comment", "comment")
//!     .inverse("comments");
//!
//! let store = StoreBuilder::new().adapter(adapter).model(&comment).build()?;
//!
//! let tx = store.transaction();
//! let parent = tx.create_record(&comment)?;
//! let child = tx.create_record(&comment)?;
//! parent.has_many("comments")?.push_object(&child)?;
//! tx.commit()?;
//!
//! // Later, from the adapter:
//! store.did_create_record(&parent, Attributes::with_id(1))?;
//! ```
//!
//! # Crates
//!
//! - `recordstore-core`: values, ids, models, errors
//! - `recordstore-session`: the engine (`Store`, `Transaction`, `Record`,
//!   `ManyArray`, `Adapter`)

mod builder;

pub use builder::StoreBuilder;

pub use recordstore_core::{
    Attributes, ClientId, CollectionId, Error, Id, ModelType, RecordState, RelationshipInfo,
    RelationshipKind, Result, TransactionId, Value,
};
pub use recordstore_session::{
    Adapter, AdapterRequest, BlockedRecord, CommitPlan, CommitResult, DependencyGraph,
    IdentityMap, ManyArray, Record, Store, StoreConfig, StoreDebugInfo, Transaction,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        // Adapter boundary
        Adapter,
        // Core types
        Attributes,
        CommitResult,
        Error,
        Id,
        ManyArray,
        ModelType,
        Record,
        RecordState,
        Result,
        // Engine
        Store,
        StoreBuilder,
        StoreConfig,
        Transaction,
        Value,
    };
}
