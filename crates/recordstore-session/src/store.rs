//! The store: record registry and bridge to the adapter.

use crate::StoreConfig;
use crate::adapter::{Adapter, AdapterRequest, RequestQueue};
use crate::many_array::ManyArray;
use crate::record::Record;
use crate::registry::{DEFAULT_TRANSACTION, DueObservers, RecordData, StoreState, TransactionData};
use crate::transaction::{CommitResult, Transaction};
use recordstore_core::{
    Attributes, ClientId, CollectionId, Error, Id, ModelType, RecordState, Result, TransactionId,
};
use serde::Serialize;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Registry of every known record and the dispatch point for commits and
/// finds.
///
/// `Store` is a cheap handle: clones share the same registry. The adapter
/// receives a `&Store` with every request and reports back through
/// [`did_create_record`](Self::did_create_record) /
/// [`did_fail_create`](Self::did_fail_create) and [`load`](Self::load) /
/// [`did_fail_find`](Self::did_fail_find).
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

struct StoreInner {
    state: RefCell<StoreState>,
    adapter: Box<dyn Adapter>,
    queue: RequestQueue,
    config: StoreConfig,
}

impl Store {
    /// Create a store with the default configuration.
    pub fn new(adapter: impl Adapter + 'static) -> Self {
        Self::with_config(adapter, StoreConfig::default())
    }

    /// Create a store with custom configuration.
    pub fn with_config(adapter: impl Adapter + 'static, config: StoreConfig) -> Self {
        tracing::debug!(?config, "Creating store");
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(StoreState::new()),
                adapter: Box::new(adapter),
                queue: RequestQueue::default(),
                config,
            }),
        }
    }

    /// Get the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Register a model definition up front.
    ///
    /// Models are also registered on first use; registering a different
    /// definition under a known name fails with `Error::InvalidModel`.
    pub fn register_model(&self, model: &ModelType) -> Result<()> {
        self.state_mut().register_model(model).map(|_| ())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Start a new, empty transaction.
    pub fn transaction(&self) -> Transaction {
        let id = {
            let mut state = self.state_mut();
            let id = TransactionId::new(state.transactions.len());
            state.transactions.push(TransactionData::default());
            id
        };
        tracing::trace!(transaction = %id, "Started transaction");
        Transaction::new(self.clone(), id)
    }

    /// The implicit transaction records land in when none is given.
    pub fn default_transaction(&self) -> Transaction {
        Transaction::new(self.clone(), DEFAULT_TRANSACTION)
    }

    /// Create a record owned by the default transaction.
    pub fn create_record(&self, model: &ModelType) -> Result<Record> {
        self.default_transaction().create_record(model)
    }

    /// Commit the default transaction.
    pub fn commit(&self) -> Result<CommitResult> {
        self.default_transaction().commit()
    }

    // ========================================================================
    // Finds
    // ========================================================================

    /// Find one record by id.
    ///
    /// Returns the identity-mapped record when the id is already known;
    /// otherwise a loading placeholder (`InFlight`, not loaded) and a find
    /// request to the adapter. A placeholder whose find failed is requested
    /// again.
    #[tracing::instrument(level = "debug", skip_all, fields(model = model.name()))]
    pub fn find(&self, model: &ModelType, id: impl Into<Id>) -> Result<Record> {
        let id = id.into();
        let record = {
            let mut state = self.state_mut();
            let model = state.register_model(model)?;
            self.lookup_or_request(&mut state, &model, id)
        };
        self.dispatch();
        Ok(self.record_handle(record))
    }

    /// Find several records at once.
    ///
    /// The returned collection holds one record per distinct id, in request
    /// order, and reports `is_loaded() == false` until every one of them has
    /// been loaded.
    #[tracing::instrument(level = "debug", skip_all, fields(model = model.name()))]
    pub fn find_many<I>(&self, model: &ModelType, ids: I) -> Result<ManyArray>
    where
        I: IntoIterator,
        I::Item: Into<Id>,
    {
        let collection = {
            let mut state = self.state_mut();
            let model = state.register_model(model)?;
            let mut records: Vec<ClientId> = Vec::new();
            for id in ids {
                let record = self.lookup_or_request(&mut state, &model, id.into());
                if !records.contains(&record) {
                    records.push(record);
                }
            }
            let count = records.len();
            let collection = state.alloc_collection(model.name(), records);
            tracing::debug!(
                collection = %collection,
                records = count,
                loaded = state.collection(collection).is_loaded,
                "Created find_many collection"
            );
            collection
        };
        self.dispatch();
        Ok(self.collection_handle(collection))
    }

    /// Look up a record by identity without issuing a request.
    pub fn record_for_id(&self, model: &ModelType, id: impl Into<Id>) -> Option<Record> {
        let id = id.into();
        let record = self.state().identity_map.get(model.name(), &id)?;
        Some(self.record_handle(record))
    }

    fn lookup_or_request(&self, state: &mut StoreState, model: &Rc<ModelType>, id: Id) -> ClientId {
        if let Some(record) = state.identity_map.get(model.name(), &id) {
            let data = state.record_mut(record);
            if data.state == RecordState::Error && !data.loaded && data.transaction.is_none() {
                tracing::debug!(record = %record, id = %id, "Retrying failed find");
                data.transition(record, RecordState::InFlight);
                data.error = None;
                self.inner.queue.push(AdapterRequest::Find { record });
            } else {
                tracing::trace!(record = %record, id = %id, "Identity map hit");
            }
            return record;
        }

        let record = state.alloc_identified(Rc::clone(model), id, RecordState::InFlight);
        tracing::trace!(record = %record, "Created loading placeholder");
        self.inner.queue.push(AdapterRequest::Find { record });
        record
    }

    // ========================================================================
    // Adapter callbacks
    // ========================================================================

    /// Acknowledge a successful create.
    ///
    /// Merges `attributes` into the record, assigns its id (taken from
    /// `attributes`, or kept if the record already has one), marks it saved,
    /// removes it from its transaction and submits whatever was waiting on it.
    #[tracing::instrument(level = "debug", skip_all, fields(record = %record.client_id()))]
    pub fn did_create_record(&self, record: &Record, attributes: Attributes) -> Result<()> {
        let client_id = self.check_record(record)?;
        {
            let mut state = self.state_mut();
            let data = state.record(client_id);
            let model = data.model_name();
            if data.state != RecordState::InFlight || data.transaction.is_none() {
                return Err(Error::InvalidState {
                    record: client_id,
                    state: data.state,
                    operation: "acknowledge the create of",
                });
            }
            let id = match attributes.id()? {
                Some(id) => id,
                None => data.id.clone().ok_or(Error::MissingId { model })?,
            };
            let previous_id = data.id.clone();

            if let Err(holder) = state.identity_map.insert(model, id.clone(), client_id) {
                tracing::warn!(record = %client_id, holder = %holder, id = %id, "Duplicate identity");
                return Err(Error::DuplicateIdentity { model, id });
            }
            if let Some(previous_id) = previous_id.filter(|p| *p != id) {
                state.identity_map.remove(model, &previous_id);
            }

            let data = state.record_mut(client_id);
            for (name, value) in attributes.into_iter().filter(|(k, _)| k != "id") {
                data.attributes.insert(name, value);
            }
            data.id = Some(id);
            data.error = None;
            data.loaded = true;
            data.transition(client_id, RecordState::Saved);

            if let Some(transaction) = state.detach_from_transaction(client_id) {
                let plan = state.advance(transaction, &self.inner.queue);
                tracing::debug!(
                    transaction = %transaction,
                    unblocked = plan.ready.len(),
                    still_blocked = plan.blocked.len(),
                    "Record saved"
                );
            }
        }
        self.dispatch();
        Ok(())
    }

    /// Report a rejected create.
    ///
    /// The record moves to `error` carrying `Error::CreateFailed`. Records of
    /// the same commit waiting on it stay blocked; with
    /// `mark_stalled_dependents` they carry `Error::DependencyUnresolved`.
    /// A later `commit()` submits the record again.
    #[tracing::instrument(level = "debug", skip_all, fields(record = %record.client_id()))]
    pub fn did_fail_create(&self, record: &Record, reason: impl Into<String>) -> Result<()> {
        let client_id = self.check_record(record)?;
        let mark = self.config().mark_stalled_dependents;
        let mut state = self.state_mut();
        state.fail_create(client_id, reason.into(), mark)
    }

    /// Deliver the result of a find.
    ///
    /// Resolves the identity-mapped record by `attributes["id"]` (allocating
    /// one if the id is unknown), merges the attributes, marks it loaded and
    /// re-evaluates every collection holding it.
    #[tracing::instrument(level = "debug", skip_all, fields(model = model.name()))]
    pub fn load(&self, model: &ModelType, attributes: Attributes) -> Result<Record> {
        let id = attributes
            .id()?
            .ok_or(Error::MissingId { model: model.name() })?;
        let (record, due) = {
            let mut state = self.state_mut();
            let model = state.register_model(model)?;
            let record = match state.identity_map.get(model.name(), &id) {
                Some(record) => {
                    let data = state.record(record);
                    if data.state == RecordState::Error {
                        return Err(Error::InvalidState {
                            record,
                            state: data.state,
                            operation: "load",
                        });
                    }
                    record
                }
                None => state.alloc_identified(model, id.clone(), RecordState::Saved),
            };

            let data = state.record_mut(record);
            for (name, value) in attributes.into_iter().filter(|(k, _)| k != "id") {
                data.attributes.insert(name, value);
            }
            if data.state != RecordState::Saved {
                data.transition(record, RecordState::Saved);
            }
            data.loaded = true;
            tracing::debug!(record = %record, id = %id, "Record loaded");
            (record, state.recompute_memberships(record))
        };
        self.notify(due);
        Ok(self.record_handle(record))
    }

    /// Report a rejected find.
    ///
    /// The placeholder moves to `error` with `Error::FindFailed`; collections
    /// holding it stay unloaded. Finding the id again retries.
    #[tracing::instrument(level = "debug", skip_all, fields(model = model.name()))]
    pub fn did_fail_find(
        &self,
        model: &ModelType,
        id: impl Into<Id>,
        reason: impl Into<String>,
    ) -> Result<()> {
        let id = id.into();
        let mut state = self.state_mut();
        let Some(record) = state.identity_map.get(model.name(), &id) else {
            return Err(Error::UnknownRecord {
                model: model.name(),
                id,
            });
        };
        let data = state.record_mut(record);
        if data.state != RecordState::InFlight || data.loaded {
            return Err(Error::InvalidState {
                record,
                state: data.state,
                operation: "fail the find of",
            });
        }
        let error = Error::FindFailed {
            model: data.model_name(),
            id,
            reason: reason.into(),
        };
        tracing::warn!(record = %record, error = %error, "Find failed");
        data.transition(record, RecordState::Error);
        data.error = Some(error);
        Ok(())
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Dump store state for debugging.
    pub fn debug_info(&self) -> StoreDebugInfo {
        let state = self.state();
        StoreDebugInfo {
            records: state.records.len(),
            new: state.count_in_state(RecordState::New),
            in_flight: state.count_in_state(RecordState::InFlight),
            saved: state.count_in_state(RecordState::Saved),
            error: state.count_in_state(RecordState::Error),
            transactions: state.transactions.len(),
            committing: state
                .transactions
                .iter()
                .filter(|t| t.is_committing())
                .count(),
            collections: state.collections.len(),
            identities: state.identity_map.len(),
            pending_requests: self.inner.queue.len(),
        }
    }

    /// Requests queued but not yet handed to the adapter.
    ///
    /// Empty except while the adapter is executing a request.
    pub fn pending_requests(&self) -> Vec<AdapterRequest> {
        self.inner.queue.snapshot()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    pub(crate) fn state(&self) -> Ref<'_, StoreState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, StoreState> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn queue(&self) -> &RequestQueue {
        &self.inner.queue
    }

    pub(crate) fn same_store(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The id of `record`, if it belongs to this store.
    pub(crate) fn check_record(&self, record: &Record) -> Result<ClientId> {
        if self.same_store(record.store()) {
            Ok(record.client_id())
        } else {
            Err(Error::ForeignRecord)
        }
    }

    pub(crate) fn record_handle(&self, id: ClientId) -> Record {
        Record::new(self.clone(), id)
    }

    pub(crate) fn collection_handle(&self, id: CollectionId) -> ManyArray {
        ManyArray::new(self.clone(), id)
    }

    /// Fire loaded observers. Must be called with no borrow held.
    pub(crate) fn notify(&self, due: DueObservers) {
        for (collection, observer) in due {
            let handle = self.collection_handle(collection);
            observer(&handle);
        }
    }

    /// Finish an association mutation: fire observers, then auto-commit when
    /// a touched record belongs to the default transaction.
    pub(crate) fn after_association_change(
        &self,
        due: DueObservers,
        touched: &[ClientId],
    ) -> Result<()> {
        self.notify(due);
        if !self.config().auto_commit {
            return Ok(());
        }
        let touches_default = {
            let state = self.state();
            touched
                .iter()
                .any(|r| state.record(*r).transaction == Some(DEFAULT_TRANSACTION))
        };
        if touches_default {
            tracing::debug!("Auto-committing default transaction");
            self.commit()?;
        }
        Ok(())
    }

    /// Hand queued requests to the adapter, one at a time.
    ///
    /// Re-entrant calls (from inside an adapter method) return immediately;
    /// the outermost loop picks up whatever they queued.
    #[tracing::instrument(level = "trace", skip_all)]
    pub(crate) fn dispatch(&self) {
        let Some(_guard) = self.inner.queue.begin_dispatch() else {
            return;
        };
        while let Some(request) = self.inner.queue.pop() {
            match request {
                AdapterRequest::Create { record } => {
                    let model = {
                        let state = self.state();
                        let data = state.record(record);
                        if data.state != RecordState::InFlight {
                            tracing::trace!(record = %record, state = %data.state, "Skipping stale create");
                            continue;
                        }
                        Rc::clone(&data.model)
                    };
                    tracing::debug!(record = %record, model = model.name(), "Dispatching create");
                    self.inner
                        .adapter
                        .create_record(self, &model, &self.record_handle(record));
                }
                AdapterRequest::Find { record } => {
                    let (model, id) = {
                        let state = self.state();
                        let data: &RecordData = state.record(record);
                        if data.state != RecordState::InFlight || data.loaded {
                            tracing::trace!(record = %record, "Skipping stale find");
                            continue;
                        }
                        let Some(id) = data.id.clone() else {
                            continue;
                        };
                        (Rc::clone(&data.model), id)
                    };
                    tracing::debug!(record = %record, model = model.name(), id = %id, "Dispatching find");
                    self.inner.adapter.find(self, &model, &id);
                }
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("info", &self.debug_info())
            .finish_non_exhaustive()
    }
}

/// Debug information about store state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreDebugInfo {
    /// Records ever allocated.
    pub records: usize,
    /// Records in state `new`.
    pub new: usize,
    /// Records in state `in_flight` (commits and find placeholders).
    pub in_flight: usize,
    /// Records in state `saved`.
    pub saved: usize,
    /// Records in state `error`.
    pub error: usize,
    /// Transactions, the default one included.
    pub transactions: usize,
    /// Transactions with a commit in progress.
    pub committing: usize,
    /// Association collections.
    pub collections: usize,
    /// Identity map entries.
    pub identities: usize,
    /// Requests not yet handed to the adapter.
    pub pending_requests: usize,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use recordstore_core::Value;
    use std::cell::RefCell;

    #[derive(Default)]
    struct MockState {
        creates: Vec<ClientId>,
        finds: Vec<Id>,
    }

    /// Records requests; never calls back.
    #[derive(Default)]
    struct RecordingAdapter {
        state: Rc<RefCell<MockState>>,
    }

    impl Adapter for RecordingAdapter {
        fn create_record(&self, _store: &Store, _model: &ModelType, record: &Record) {
            self.state.borrow_mut().creates.push(record.client_id());
        }

        fn find(&self, _store: &Store, _model: &ModelType, id: &Id) {
            self.state.borrow_mut().finds.push(id.clone());
        }
    }

    fn comment() -> ModelType {
        ModelType::new("comment")
            .attribute("body")
            .has_many("comments", "comment")
            .inverse("comment")
            .belongs_to("comment", "comment")
            .inverse("comments")
    }

    fn store() -> (Store, Rc<RefCell<MockState>>) {
        let adapter = RecordingAdapter::default();
        let state = Rc::clone(&adapter.state);
        (Store::new(adapter), state)
    }

    #[test]
    fn test_find_creates_placeholder_once() {
        let (store, mock) = store();
        let first = store.find(&comment(), 1).unwrap();
        let second = store.find(&comment(), 1).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.state(), RecordState::InFlight);
        assert!(!first.is_loaded());
        assert_eq!(first.id(), Some(Id::Int(1)));
        assert!(first.transaction().is_none());
        assert_eq!(mock.borrow().finds, vec![Id::Int(1)]);
    }

    #[test]
    fn test_load_resolves_placeholder() {
        let (store, _) = store();
        let placeholder = store.find(&comment(), 7).unwrap();

        let loaded = store
            .load(&comment(), Attributes::with_id(7).with("body", "hi"))
            .unwrap();
        assert_eq!(loaded, placeholder);
        assert_eq!(placeholder.state(), RecordState::Saved);
        assert!(placeholder.is_loaded());
        assert_eq!(placeholder.get("body").unwrap(), Value::from("hi"));
    }

    #[test]
    fn test_load_unknown_id_allocates_saved_record() {
        let (store, mock) = store();
        let record = store.load(&comment(), Attributes::with_id("x")).unwrap();
        assert_eq!(record.state(), RecordState::Saved);
        assert_eq!(store.record_for_id(&comment(), "x"), Some(record));
        assert!(mock.borrow().finds.is_empty());
    }

    #[test]
    fn test_load_requires_id() {
        let (store, _) = store();
        assert_eq!(
            store.load(&comment(), Attributes::new().with("body", "x")),
            Err(Error::MissingId { model: "comment" })
        );
    }

    #[test]
    fn test_failed_find_is_retried_by_next_find() {
        let (store, mock) = store();
        let record = store.find(&comment(), 3).unwrap();
        store.did_fail_find(&comment(), 3, "404").unwrap();

        assert_eq!(record.state(), RecordState::Error);
        assert!(matches!(record.error(), Some(Error::FindFailed { .. })));

        // A second failure report for the same request is rejected
        assert!(store.did_fail_find(&comment(), 3, "404").is_err());

        let again = store.find(&comment(), 3).unwrap();
        assert_eq!(again, record);
        assert_eq!(record.state(), RecordState::InFlight);
        assert_eq!(mock.borrow().finds, vec![Id::Int(3), Id::Int(3)]);
    }

    #[test]
    fn test_did_fail_find_unknown_record() {
        let (store, _) = store();
        assert_eq!(
            store.did_fail_find(&comment(), 9, "404"),
            Err(Error::UnknownRecord {
                model: "comment",
                id: Id::Int(9)
            })
        );
    }

    #[test]
    fn test_did_create_record_requires_in_flight() {
        let (store, _) = store();
        let record = store.create_record(&comment()).unwrap();
        let err = store
            .did_create_record(&record, Attributes::with_id(1))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: RecordState::New,
                ..
            }
        ));
    }

    #[test]
    fn test_did_create_record_requires_an_id() {
        let (store, _) = store();
        let record = store.create_record(&comment()).unwrap();
        store.commit().unwrap();
        assert_eq!(
            store.did_create_record(&record, Attributes::new()),
            Err(Error::MissingId { model: "comment" })
        );
        assert_eq!(record.state(), RecordState::InFlight);
    }

    #[test]
    fn test_did_create_record_rejects_duplicate_identity() {
        let (store, _) = store();
        store.load(&comment(), Attributes::with_id(1)).unwrap();
        let record = store.create_record(&comment()).unwrap();
        store.commit().unwrap();
        assert_eq!(
            store.did_create_record(&record, Attributes::with_id(1)),
            Err(Error::DuplicateIdentity {
                model: "comment",
                id: Id::Int(1)
            })
        );
    }

    #[test]
    fn test_foreign_record_is_rejected() {
        let (store, _) = store();
        let (other, _) = self::store();
        let record = other.create_record(&comment()).unwrap();
        assert_eq!(
            store.did_create_record(&record, Attributes::with_id(1)),
            Err(Error::ForeignRecord)
        );
    }

    #[test]
    fn test_debug_info() {
        let (store, _) = store();
        store.create_record(&comment()).unwrap();
        store.find(&comment(), 1).unwrap();
        store.transaction();

        let info = store.debug_info();
        assert_eq!(info.records, 2);
        assert_eq!(info.new, 1);
        assert_eq!(info.in_flight, 1);
        assert_eq!(info.transactions, 2);
        assert_eq!(info.identities, 1);
        assert_eq!(info.pending_requests, 0);
        assert!(store.pending_requests().is_empty());
    }
}
