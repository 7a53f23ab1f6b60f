//! Record handles.

use crate::many_array::ManyArray;
use crate::store::Store;
use crate::transaction::Transaction;
use recordstore_core::{
    Attributes, ClientId, Error, Id, ModelType, RecordState, RelationshipKind, Result, Value,
};
use std::fmt;
use std::rc::Rc;

/// Handle to one record tracked by a [`Store`].
///
/// Handles are cheap to clone and compare equal when they refer to the same
/// record of the same store. Reads always reflect the current engine state.
#[derive(Clone)]
pub struct Record {
    store: Store,
    id: ClientId,
}

impl Record {
    pub(crate) fn new(store: Store, id: ClientId) -> Self {
        Self { store, id }
    }

    /// Store-local identity, stable for the life of the store.
    pub fn client_id(&self) -> ClientId {
        self.id
    }

    /// The store tracking this record.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The record's model.
    pub fn model(&self) -> Rc<ModelType> {
        Rc::clone(&self.store.state().record(self.id).model)
    }

    /// External id; `None` until the adapter assigns one.
    pub fn id(&self) -> Option<Id> {
        self.store.state().record(self.id).id.clone()
    }

    /// Lifecycle state.
    pub fn state(&self) -> RecordState {
        self.store.state().record(self.id).state
    }

    /// False while a find for this record is outstanding (or failed).
    pub fn is_loaded(&self) -> bool {
        self.store.state().record(self.id).loaded
    }

    /// The failure recorded on this record, if any.
    pub fn error(&self) -> Option<Error> {
        self.store.state().record(self.id).error.clone()
    }

    /// The owning transaction; `None` once saved and for fetched records.
    pub fn transaction(&self) -> Option<Transaction> {
        let id = self.store.state().record(self.id).transaction?;
        Some(Transaction::new(self.store.clone(), id))
    }

    /// Read an attribute.
    ///
    /// `"id"` reads the external id (`Value::Null` before it is assigned).
    /// Declared attributes that were never set read as `Value::Null`.
    pub fn get(&self, name: &str) -> Result<Value> {
        let state = self.store.state();
        let data = state.record(self.id);
        if name == "id" {
            return Ok(data.id.as_ref().map_or(Value::Null, Id::to_value));
        }
        if let Some(value) = data.attributes.get(name) {
            return Ok(value.clone());
        }
        data.model.check_attribute(name)?;
        Ok(Value::Null)
    }

    /// Write an attribute.
    ///
    /// Allowed while the record is `new`, or `error` after a rejected create
    /// (to correct it before the next commit).
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut state = self.store.state_mut();
        let data = state.record_mut(self.id);
        if !matches!(data.state, RecordState::New | RecordState::Error) || data.transaction.is_none()
        {
            return Err(Error::InvalidState {
                record: self.id,
                state: data.state,
                operation: "set an attribute on",
            });
        }
        let name = data.model.check_attribute(name)?;
        let value = value.into();
        tracing::trace!(record = %self.id, attribute = name, value = ?value, "Set attribute");
        data.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Snapshot of all attributes, `id` included when assigned.
    pub fn attributes(&self) -> Attributes {
        let state = self.store.state();
        let data = state.record(self.id);
        let mut attributes: Attributes = data
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(id) = &data.id {
            attributes.insert("id", id.to_value());
        }
        attributes
    }

    /// The record `name` points at.
    pub fn belongs_to(&self, name: &str) -> Result<Option<Record>> {
        let target = {
            let state = self.store.state();
            let data = state.record(self.id);
            let info = data
                .model
                .relationship_of_kind(name, RelationshipKind::BelongsTo, |k| {
                    k == RelationshipKind::BelongsTo
                })?;
            data.belongs_to.get(info.name).copied()
        };
        Ok(target.map(|t| self.store.record_handle(t)))
    }

    /// Point `name` at `target`, or clear it with `None`.
    ///
    /// When the relationship declares an inverse has-many, the record is
    /// moved into the target's collection. If `target` belongs to the same
    /// transaction and is uncommitted, this record will not be submitted
    /// before it.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` when the link would change after the record was
    /// handed to the adapter; find placeholders may still be linked.
    #[tracing::instrument(level = "debug", skip_all, fields(record = %self.id, relationship = name))]
    pub fn set_belongs_to(&self, name: &str, target: Option<&Record>) -> Result<()> {
        let target = target.map(|t| self.store.check_record(t)).transpose()?;
        let due = self.store.state_mut().set_belongs_to(self.id, name, target)?;
        let mut touched = vec![self.id];
        touched.extend(target);
        self.store.after_association_change(due, &touched)
    }

    /// The collection backing has-many or many-to-many `name`.
    ///
    /// Created empty (and loaded) on first access.
    pub fn has_many(&self, name: &str) -> Result<ManyArray> {
        let collection = self.store.state_mut().collection_for(self.id, name)?;
        Ok(self.store.collection_handle(collection))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store.same_store(&other.store)
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Record").field(&self.id).finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
