//! Core types for recordstore.
//!
//! This crate provides the leaf abstractions the engine is built from:
//!
//! - `Value` and `Attributes` for record data exchanged with the adapter
//! - `Id` (external identity) and the store-local `ClientId`, `TransactionId`
//!   and `CollectionId`
//! - `RecordState` for the record lifecycle
//! - `ModelType` and relationship metadata
//! - `Error` / `Result`

pub mod attributes;
pub mod error;
pub mod identifiers;
pub mod model;
pub mod relationship;
pub mod state;
pub mod value;

pub use attributes::Attributes;
pub use error::{Error, Result};
pub use identifiers::{ClientId, CollectionId, Id, TransactionId};
pub use model::ModelType;
pub use relationship::{RelationshipInfo, RelationshipKind, find_relationship};
pub use state::RecordState;
pub use value::Value;
