//! Association collections.
//!
//! A `ManyArray` backs a has-many or many-to-many relationship, or holds the
//! result of `Store::find_many`. It tracks whether every record in it has
//! been loaded: `is_loaded()` flips to `true` the moment the last outstanding
//! find is answered, and observers registered with `on_loaded` fire exactly
//! once at that point. Reading the flag never issues a request.

use crate::record::Record;
use crate::store::Store;
use recordstore_core::{CollectionId, Result};
use std::fmt;

/// Ordered, observable collection of records.
#[derive(Clone)]
pub struct ManyArray {
    store: Store,
    id: CollectionId,
}

impl ManyArray {
    pub(crate) fn new(store: Store, id: CollectionId) -> Self {
        Self { store, id }
    }

    /// Store-local identity of this collection.
    pub fn collection_id(&self) -> CollectionId {
        self.id
    }

    /// Whether every record in the collection has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.store.state().collection(self.id).is_loaded
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.store.state().collection(self.id).records.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<Record> {
        let record = self
            .store
            .state()
            .collection(self.id)
            .records
            .get(index)
            .copied()?;
        Some(self.store.record_handle(record))
    }

    /// All records, in order.
    pub fn records(&self) -> Vec<Record> {
        let records = self.store.state().collection(self.id).records.clone();
        records
            .into_iter()
            .map(|r| self.store.record_handle(r))
            .collect()
    }

    /// Whether `record` is in the collection.
    pub fn contains(&self, record: &Record) -> bool {
        self.store.same_store(record.store())
            && self
                .store
                .state()
                .collection(self.id)
                .records
                .contains(&record.client_id())
    }

    /// The record owning this collection; `None` for `find_many` results.
    pub fn owner(&self) -> Option<Record> {
        let (owner, _) = self.store.state().collection(self.id).owner?;
        Some(self.store.record_handle(owner))
    }

    /// Name of the relationship this collection backs.
    pub fn relationship(&self) -> Option<&'static str> {
        self.store
            .state()
            .collection(self.id)
            .owner
            .map(|(_, info)| info.name)
    }

    /// Append `record`.
    ///
    /// Appending a record that is already a member does nothing. When the
    /// relationship declares an inverse it is updated too: a has-many child
    /// is moved out of its previous owner's collection. The pushed record
    /// will not be submitted before the owner when both are uncommitted
    /// members of one transaction.
    ///
    /// # Errors
    ///
    /// `Error::ModelMismatch` when `record` is of another model, and the
    /// relationship lookup errors when the declared inverse is missing or of
    /// the wrong kind. `Error::InvalidState` when the push would relink a
    /// has-many child that is already in flight or saved. Nothing is changed
    /// in any of these cases.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = %self.id, record = %record.client_id()))]
    pub fn push_object(&self, record: &Record) -> Result<()> {
        let child = self.store.check_record(record)?;
        let (due, owner) = {
            let mut state = self.store.state_mut();
            let due = state.push_object(self.id, child)?;
            (due, state.collection(self.id).owner.map(|(o, _)| o))
        };
        let mut touched = vec![child];
        touched.extend(owner);
        self.store.after_association_change(due, &touched)
    }

    /// Remove `record`; returns whether it was a member.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = %self.id, record = %record.client_id()))]
    pub fn remove_object(&self, record: &Record) -> Result<bool> {
        let child = self.store.check_record(record)?;
        let (removed, due, owner) = {
            let mut state = self.store.state_mut();
            let (removed, due) = state.remove_object(self.id, child)?;
            (removed, due, state.collection(self.id).owner.map(|(o, _)| o))
        };
        if removed {
            let mut touched = vec![child];
            touched.extend(owner);
            self.store.after_association_change(due, &touched)?;
        }
        Ok(removed)
    }

    /// Run `callback` once the collection is loaded.
    ///
    /// Fires immediately when it already is.
    pub fn on_loaded(&self, callback: impl FnOnce(&ManyArray) + 'static) {
        {
            let mut state = self.store.state_mut();
            let data = state.collection_mut(self.id);
            if !data.is_loaded {
                data.observers.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }
}

impl PartialEq for ManyArray {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.store.same_store(&other.store)
    }
}

impl fmt::Debug for ManyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManyArray")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("is_loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Adapter;
    use recordstore_core::{Attributes, Error, Id, ModelType, RecordState};
    use std::cell::Cell;
    use std::rc::Rc;

    struct NullAdapter;

    impl Adapter for NullAdapter {
        fn create_record(&self, _store: &Store, _model: &ModelType, _record: &Record) {}
        fn find(&self, _store: &Store, _model: &ModelType, _id: &Id) {}
    }

    fn comment() -> ModelType {
        ModelType::new("comment")
            .attribute("body")
            .has_many("comments", "comment")
            .inverse("comment")
            .belongs_to("comment", "comment")
            .inverse("comments")
    }

    #[test]
    fn test_has_many_is_created_loaded_and_cached() {
        let store = Store::new(NullAdapter);
        let parent = store.create_record(&comment()).unwrap();
        let comments = parent.has_many("comments").unwrap();
        assert!(comments.is_loaded());
        assert!(comments.is_empty());
        assert_eq!(comments.owner(), Some(parent.clone()));
        assert_eq!(comments.relationship(), Some("comments"));
        assert_eq!(parent.has_many("comments").unwrap(), comments);
    }

    #[test]
    fn test_push_moves_child_between_owners() {
        let store = Store::new(NullAdapter);
        let first = store.create_record(&comment()).unwrap();
        let second = store.create_record(&comment()).unwrap();
        let child = store.create_record(&comment()).unwrap();

        first.has_many("comments").unwrap().push_object(&child).unwrap();
        second.has_many("comments").unwrap().push_object(&child).unwrap();

        assert!(first.has_many("comments").unwrap().is_empty());
        assert_eq!(
            second.has_many("comments").unwrap().records(),
            vec![child.clone()]
        );
        assert_eq!(child.belongs_to("comment").unwrap(), Some(second));
    }

    #[test]
    fn test_remove_object() {
        let store = Store::new(NullAdapter);
        let parent = store.create_record(&comment()).unwrap();
        let child = store.create_record(&comment()).unwrap();
        let comments = parent.has_many("comments").unwrap();
        comments.push_object(&child).unwrap();

        assert!(comments.remove_object(&child).unwrap());
        assert!(!comments.remove_object(&child).unwrap());
        assert_eq!(child.belongs_to("comment").unwrap(), None);
    }

    #[test]
    fn test_find_many_loads_when_all_arrive() {
        let store = Store::new(NullAdapter);
        let array = store.find_many(&comment(), [1, 2, 2]).unwrap();
        assert_eq!(array.len(), 2);
        assert!(!array.is_loaded());
        assert_eq!(array.owner(), None);

        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        array.on_loaded(move |a| {
            assert!(a.is_loaded());
            counter.set(counter.get() + 1);
        });

        store.load(&comment(), Attributes::with_id(1)).unwrap();
        assert!(!array.is_loaded());
        store.load(&comment(), Attributes::with_id(2)).unwrap();
        assert!(array.is_loaded());
        assert_eq!(fired.get(), 1);

        // Reloading does not fire again
        store.load(&comment(), Attributes::with_id(2)).unwrap();
        assert_eq!(fired.get(), 1);

        // Late observers fire immediately
        let late = Rc::new(Cell::new(false));
        let flag = Rc::clone(&late);
        array.on_loaded(move |_| flag.set(true));
        assert!(late.get());
    }

    #[test]
    fn test_pushing_placeholder_unloads_collection() {
        let store = Store::new(NullAdapter);
        let parent = store.create_record(&comment()).unwrap();
        let comments = parent.has_many("comments").unwrap();
        let placeholder = store.find(&comment(), 5).unwrap();

        comments.push_object(&placeholder).unwrap();
        assert!(!comments.is_loaded());
        assert_eq!(placeholder.state(), RecordState::InFlight);

        store.load(&comment(), Attributes::with_id(5)).unwrap();
        assert!(comments.is_loaded());
    }

    #[test]
    fn test_push_rejects_other_models() {
        let store = Store::new(NullAdapter);
        let tag = ModelType::new("tag").attribute("name");
        let parent = store.create_record(&comment()).unwrap();
        let other = store.create_record(&tag).unwrap();
        let err = parent
            .has_many("comments")
            .unwrap()
            .push_object(&other)
            .unwrap_err();
        assert!(matches!(err, Error::ModelMismatch { .. }));
    }
}
