//! Engine state shared by every handle of one store.
//!
//! Records, transactions and collections live in arenas indexed by their
//! ephemeral ids. Handles (`Record`, `Transaction`, `ManyArray`) only carry an
//! id plus a reference to the store, so every mutation funnels through the
//! methods below while the store's `RefCell` is borrowed.

use crate::dependency::DependencyGraph;
use crate::identity_map::IdentityMap;
use crate::many_array::ManyArray;
use recordstore_core::{
    ClientId, CollectionId, Error, Id, ModelType, RecordState, RelationshipInfo,
    RelationshipKind, Result, TransactionId, Value,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

/// Callback waiting for a collection to finish loading.
pub(crate) type LoadedObserver = Box<dyn FnOnce(&ManyArray)>;

/// Observers that became due, paired with the collection that fired them.
pub(crate) type DueObservers = Vec<(CollectionId, LoadedObserver)>;

/// Everything the store knows about one record.
#[derive(Debug)]
pub(crate) struct RecordData {
    pub(crate) model: Rc<ModelType>,
    /// External id; `None` until the adapter assigns one.
    pub(crate) id: Option<Id>,
    pub(crate) state: RecordState,
    /// False only for find placeholders whose data has not arrived.
    pub(crate) loaded: bool,
    pub(crate) attributes: BTreeMap<String, Value>,
    pub(crate) belongs_to: HashMap<&'static str, ClientId>,
    pub(crate) has_many: HashMap<&'static str, CollectionId>,
    pub(crate) transaction: Option<TransactionId>,
    /// Collections this record is a member of.
    pub(crate) memberships: BTreeSet<CollectionId>,
    pub(crate) error: Option<Error>,
}

impl RecordData {
    fn new(model: Rc<ModelType>, state: RecordState) -> Self {
        Self {
            model,
            id: None,
            state,
            loaded: true,
            attributes: BTreeMap::new(),
            belongs_to: HashMap::new(),
            has_many: HashMap::new(),
            transaction: None,
            memberships: BTreeSet::new(),
            error: None,
        }
    }

    pub(crate) fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Move to `next`, logging transitions the lifecycle does not allow.
    pub(crate) fn transition(&mut self, record: ClientId, next: RecordState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                record = %record,
                from = %self.state,
                to = %next,
                "Unexpected record state transition"
            );
        }
        tracing::debug!(record = %record, from = %self.state, to = %next, "Record state change");
        self.state = next;
    }
}

/// Members and commit bookkeeping of one transaction.
#[derive(Debug, Default)]
pub(crate) struct TransactionData {
    /// Members in insertion order.
    pub(crate) members: Vec<ClientId>,
    pub(crate) graph: DependencyGraph,
    /// Members swept into a commit, with the epoch that captured them.
    pub(crate) captured: BTreeMap<ClientId, u64>,
    /// Number of commits that captured at least one record.
    pub(crate) epoch: u64,
}

impl TransactionData {
    pub(crate) fn is_committing(&self) -> bool {
        !self.captured.is_empty()
    }
}

/// Backing storage of a `ManyArray`.
pub(crate) struct CollectionData {
    /// Owning record and relationship; `None` for `find_many` results,
    /// whose `is_loaded` stays set once it is.
    pub(crate) owner: Option<(ClientId, RelationshipInfo)>,
    pub(crate) model: &'static str,
    pub(crate) records: Vec<ClientId>,
    pub(crate) is_loaded: bool,
    pub(crate) observers: Vec<LoadedObserver>,
}

impl CollectionData {
    pub(crate) fn relationship_name(&self) -> &'static str {
        self.owner.map_or(self.model, |(_, info)| info.name)
    }
}

/// Arena of records, transactions and collections plus the identity map.
pub(crate) struct StoreState {
    pub(crate) records: Vec<RecordData>,
    pub(crate) transactions: Vec<TransactionData>,
    pub(crate) collections: Vec<CollectionData>,
    pub(crate) identity_map: IdentityMap,
    pub(crate) models: HashMap<&'static str, Rc<ModelType>>,
}

/// The transaction every store starts with.
pub(crate) const DEFAULT_TRANSACTION: TransactionId = TransactionId::new(0);

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            transactions: vec![TransactionData::default()],
            collections: Vec::new(),
            identity_map: IdentityMap::new(),
            models: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    pub(crate) fn record(&self, id: ClientId) -> &RecordData {
        &self.records[id.index()]
    }

    pub(crate) fn record_mut(&mut self, id: ClientId) -> &mut RecordData {
        &mut self.records[id.index()]
    }

    pub(crate) fn transaction(&self, id: TransactionId) -> &TransactionData {
        &self.transactions[id.index()]
    }

    pub(crate) fn transaction_mut(&mut self, id: TransactionId) -> &mut TransactionData {
        &mut self.transactions[id.index()]
    }

    pub(crate) fn collection(&self, id: CollectionId) -> &CollectionData {
        &self.collections[id.index()]
    }

    pub(crate) fn collection_mut(&mut self, id: CollectionId) -> &mut CollectionData {
        &mut self.collections[id.index()]
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    /// Register `model`, or return the definition already registered under
    /// its name.
    pub(crate) fn register_model(&mut self, model: &ModelType) -> Result<Rc<ModelType>> {
        if let Some(existing) = self.models.get(model.name()) {
            if **existing == *model {
                return Ok(Rc::clone(existing));
            }
            return Err(Error::InvalidModel {
                model: model.name(),
                message: "a different definition is already registered".to_string(),
            });
        }

        model.validate()?;
        let model = Rc::new(model.clone());
        self.models.insert(model.name(), Rc::clone(&model));
        tracing::trace!(model = model.name(), "Registered model");
        Ok(model)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate a locally created record owned by `transaction`.
    pub(crate) fn alloc_record(
        &mut self,
        model: Rc<ModelType>,
        transaction: TransactionId,
    ) -> ClientId {
        let id = ClientId::new(self.records.len());
        let mut data = RecordData::new(model, RecordState::New);
        data.transaction = Some(transaction);
        self.records.push(data);
        self.transaction_mut(transaction).members.push(id);
        tracing::trace!(record = %id, transaction = %transaction, "Allocated record");
        id
    }

    /// Allocate a record that is known by id but owned by no transaction:
    /// a find placeholder (`InFlight`, not loaded) or a record that arrived
    /// through `load` without a prior find (`Saved`).
    pub(crate) fn alloc_identified(
        &mut self,
        model: Rc<ModelType>,
        id: Id,
        state: RecordState,
    ) -> ClientId {
        let client_id = ClientId::new(self.records.len());
        let mut data = RecordData::new(model, state);
        data.loaded = state == RecordState::Saved;
        data.id = Some(id.clone());
        let model_name = data.model_name();
        self.records.push(data);
        // A fresh ClientId cannot collide with an existing holder.
        let _ = self.identity_map.insert(model_name, id, client_id);
        client_id
    }

    /// Allocate a collection with no owner over `records`.
    pub(crate) fn alloc_collection(
        &mut self,
        model: &'static str,
        records: Vec<ClientId>,
    ) -> CollectionId {
        let id = CollectionId::new(self.collections.len());
        for record in &records {
            self.record_mut(*record).memberships.insert(id);
        }
        let is_loaded = records.iter().all(|r| self.record(*r).loaded);
        self.collections.push(CollectionData {
            owner: None,
            model,
            records,
            is_loaded,
            observers: Vec::new(),
        });
        id
    }

    /// The collection backing `owner.name`, created empty on first access.
    pub(crate) fn collection_for(&mut self, owner: ClientId, name: &str) -> Result<CollectionId> {
        let info = *self
            .record(owner)
            .model
            .relationship_of_kind(name, RelationshipKind::HasMany, |k| k.is_collection())?;

        if let Some(existing) = self.record(owner).has_many.get(info.name) {
            return Ok(*existing);
        }

        let id = CollectionId::new(self.collections.len());
        self.collections.push(CollectionData {
            owner: Some((owner, info)),
            model: info.related_model,
            records: Vec::new(),
            is_loaded: true,
            observers: Vec::new(),
        });
        self.record_mut(owner).has_many.insert(info.name, id);
        tracing::trace!(record = %owner, relationship = info.name, collection = %id, "Created association collection");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Dependency edges
    // ------------------------------------------------------------------

    /// Records `record` references through an ordering relationship.
    fn references_of(&self, record: ClientId) -> BTreeSet<ClientId> {
        let data = self.record(record);
        let mut refs: BTreeSet<ClientId> = data.belongs_to.values().copied().collect();
        for collection in &data.memberships {
            if let Some((owner, info)) = self.collection(*collection).owner {
                if info.kind.orders_commit() {
                    refs.insert(owner);
                }
            }
        }
        refs.remove(&record);
        refs
    }

    /// Recompute the blockers of `record` from its association data.
    pub(crate) fn refresh_edges(&mut self, record: ClientId) {
        let Some(transaction) = self.record(record).transaction else {
            return;
        };
        let blockers: BTreeSet<ClientId> = self
            .references_of(record)
            .into_iter()
            .filter(|r| self.record(*r).transaction == Some(transaction))
            .collect();
        if !blockers.is_empty() {
            tracing::trace!(record = %record, blockers = ?blockers, "Dependency edges");
        }
        self.transaction_mut(transaction)
            .graph
            .set_blockers(record, blockers);
    }

    /// Recompute the blockers of every member of `transaction`.
    pub(crate) fn refresh_transaction(&mut self, transaction: TransactionId) {
        let members = self.transaction(transaction).members.clone();
        for member in members {
            self.refresh_edges(member);
        }
    }

    /// Drop `record` from its transaction, if it has one.
    pub(crate) fn detach_from_transaction(&mut self, record: ClientId) -> Option<TransactionId> {
        let transaction = self.record_mut(record).transaction.take()?;
        let data = self.transaction_mut(transaction);
        data.members.retain(|m| *m != record);
        data.captured.remove(&record);
        data.graph.remove_record(record);
        Some(transaction)
    }

    /// Make `record` a member of `transaction`.
    pub(crate) fn attach_to_transaction(&mut self, record: ClientId, transaction: TransactionId) {
        self.record_mut(record).transaction = Some(transaction);
        self.transaction_mut(transaction).members.push(record);
        self.refresh_transaction(transaction);
    }

    // ------------------------------------------------------------------
    // Loading state
    // ------------------------------------------------------------------

    /// Re-evaluate `is_loaded` of `collection`.
    ///
    /// Returns the observers to fire when the collection just became loaded.
    /// A `find_many` result never goes back to loading once it has loaded.
    pub(crate) fn recompute_loaded(&mut self, collection: CollectionId) -> DueObservers {
        let data = self.collection(collection);
        if data.owner.is_none() && data.is_loaded {
            return Vec::new();
        }
        let now = self
            .collection(collection)
            .records
            .iter()
            .all(|r| self.record(*r).loaded);
        let data = self.collection_mut(collection);
        let was = std::mem::replace(&mut data.is_loaded, now);
        if now && !was {
            tracing::debug!(collection = %collection, "Collection loaded");
            data.observers
                .drain(..)
                .map(|observer| (collection, observer))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Re-evaluate every collection `record` is a member of.
    pub(crate) fn recompute_memberships(&mut self, record: ClientId) -> DueObservers {
        let memberships: Vec<CollectionId> =
            self.record(record).memberships.iter().copied().collect();
        memberships
            .into_iter()
            .flat_map(|c| self.recompute_loaded(c))
            .collect()
    }

    // ------------------------------------------------------------------
    // Association primitives (no inverse handling)
    // ------------------------------------------------------------------

    fn raw_insert(&mut self, collection: CollectionId, record: ClientId) -> bool {
        let data = self.collection_mut(collection);
        if data.records.contains(&record) {
            return false;
        }
        data.records.push(record);
        self.record_mut(record).memberships.insert(collection);
        true
    }

    fn raw_remove(&mut self, collection: CollectionId, record: ClientId) -> bool {
        let data = self.collection_mut(collection);
        let Some(pos) = data.records.iter().position(|r| *r == record) else {
            return false;
        };
        data.records.remove(pos);
        self.record_mut(record).memberships.remove(&collection);
        true
    }

    fn raw_set_belongs_to(
        &mut self,
        record: ClientId,
        name: &'static str,
        target: Option<ClientId>,
    ) -> Option<ClientId> {
        let links = &mut self.record_mut(record).belongs_to;
        match target {
            Some(target) => links.insert(name, target),
            None => links.remove(name),
        }
    }

    // ------------------------------------------------------------------
    // Association operations (inverse kept in sync)
    // ------------------------------------------------------------------

    /// The inverse of `info` as declared on `model`, checked for kind.
    fn inverse_of<'m>(
        model: &'m ModelType,
        info: &RelationshipInfo,
    ) -> Result<Option<&'m RelationshipInfo>> {
        let Some(inverse) = info.inverse else {
            return Ok(None);
        };
        let expected = match info.kind {
            RelationshipKind::HasMany => RelationshipKind::BelongsTo,
            RelationshipKind::BelongsTo => RelationshipKind::HasMany,
            RelationshipKind::ManyToMany => RelationshipKind::ManyToMany,
        };
        model
            .relationship_of_kind(inverse, expected, |k| k == expected)
            .map(Some)
    }

    /// Refuse to relink a record whose data the adapter already holds.
    ///
    /// Uncommitted records may be relinked, and so may find placeholders
    /// whose data has not arrived yet.
    fn check_relinkable(&self, record: ClientId, operation: &'static str) -> Result<()> {
        let data = self.record(record);
        let uncommitted = matches!(data.state, RecordState::New | RecordState::Error)
            && data.transaction.is_some();
        if uncommitted || !data.loaded {
            Ok(())
        } else {
            Err(Error::InvalidState {
                record,
                state: data.state,
                operation,
            })
        }
    }

    fn check_member_model(&self, collection: CollectionId, record: ClientId) -> Result<()> {
        let data = self.collection(collection);
        let actual = self.record(record).model_name();
        if actual == data.model {
            Ok(())
        } else {
            Err(Error::ModelMismatch {
                relationship: data.relationship_name(),
                expected: data.model,
                actual,
            })
        }
    }

    /// Append `child` to `collection`.
    pub(crate) fn push_object(
        &mut self,
        collection: CollectionId,
        child: ClientId,
    ) -> Result<DueObservers> {
        self.check_member_model(collection, child)?;
        let owner = self.collection(collection).owner;
        let inverse = match owner {
            Some((_, info)) => {
                let child_model = Rc::clone(&self.record(child).model);
                Self::inverse_of(&child_model, &info)?.copied()
            }
            None => None,
        };

        let mut due = Vec::new();
        if self.collection(collection).records.contains(&child) {
            return Ok(due);
        }
        if owner.is_some_and(|(_, info)| info.kind.orders_commit()) {
            self.check_relinkable(child, "relink")?;
        }
        self.raw_insert(collection, child);

        if let (Some((owner, info)), Some(inverse)) = (owner, inverse) {
            match info.kind {
                RelationshipKind::ManyToMany => {
                    let back = self.collection_for(child, inverse.name)?;
                    self.raw_insert(back, owner);
                    due.extend(self.recompute_loaded(back));
                    self.refresh_edges(owner);
                }
                _ => {
                    let previous = self.raw_set_belongs_to(child, inverse.name, Some(owner));
                    if let Some(previous) = previous.filter(|p| *p != owner) {
                        if let Some(old) = self.record(previous).has_many.get(info.name).copied() {
                            self.raw_remove(old, child);
                            due.extend(self.recompute_loaded(old));
                        }
                    }
                }
            }
        }

        due.extend(self.recompute_loaded(collection));
        self.refresh_edges(child);
        Ok(due)
    }

    /// Remove `child` from `collection`; `false` when it was not a member.
    pub(crate) fn remove_object(
        &mut self,
        collection: CollectionId,
        child: ClientId,
    ) -> Result<(bool, DueObservers)> {
        let owner = self.collection(collection).owner;
        let inverse = match owner {
            Some((_, info)) => {
                let child_model = Rc::clone(&self.record(child).model);
                Self::inverse_of(&child_model, &info)?.copied()
            }
            None => None,
        };

        if !self.collection(collection).records.contains(&child) {
            return Ok((false, Vec::new()));
        }
        if owner.is_some_and(|(_, info)| info.kind.orders_commit()) {
            self.check_relinkable(child, "unlink")?;
        }
        self.raw_remove(collection, child);

        let mut due = Vec::new();
        if let (Some((owner, info)), Some(inverse)) = (owner, inverse) {
            match info.kind {
                RelationshipKind::ManyToMany => {
                    if let Some(back) = self.record(child).has_many.get(inverse.name).copied() {
                        self.raw_remove(back, owner);
                        due.extend(self.recompute_loaded(back));
                        self.refresh_edges(owner);
                    }
                }
                _ => {
                    if self.record(child).belongs_to.get(inverse.name) == Some(&owner) {
                        self.raw_set_belongs_to(child, inverse.name, None);
                    }
                }
            }
        }

        due.extend(self.recompute_loaded(collection));
        self.refresh_edges(child);
        Ok((true, due))
    }

    /// Point `record.name` at `target`, or clear it.
    pub(crate) fn set_belongs_to(
        &mut self,
        record: ClientId,
        name: &str,
        target: Option<ClientId>,
    ) -> Result<DueObservers> {
        let model = Rc::clone(&self.record(record).model);
        let info = *model.relationship_of_kind(name, RelationshipKind::BelongsTo, |k| {
            k == RelationshipKind::BelongsTo
        })?;

        let mut inverse = None;
        if let Some(target) = target {
            let target_model = Rc::clone(&self.record(target).model);
            if target_model.name() != info.related_model {
                return Err(Error::ModelMismatch {
                    relationship: info.name,
                    expected: info.related_model,
                    actual: target_model.name(),
                });
            }
            inverse = Self::inverse_of(&target_model, &info)?.copied();
        } else if let Some(current) = self.record(record).belongs_to.get(info.name) {
            let current_model = Rc::clone(&self.record(*current).model);
            inverse = Self::inverse_of(&current_model, &info)?.copied();
        }

        let mut due = Vec::new();
        if self.record(record).belongs_to.get(info.name).copied() == target {
            return Ok(due);
        }
        self.check_relinkable(record, "relink")?;
        let previous = self.raw_set_belongs_to(record, info.name, target);

        if let Some(inverse) = inverse {
            if let Some(previous) = previous {
                if let Some(old) = self.record(previous).has_many.get(inverse.name).copied() {
                    self.raw_remove(old, record);
                    due.extend(self.recompute_loaded(old));
                }
            }
            if let Some(target) = target {
                let back = self.collection_for(target, inverse.name)?;
                self.raw_insert(back, record);
                due.extend(self.recompute_loaded(back));
            }
        }

        self.refresh_edges(record);
        Ok(due)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Number of records currently in `state`.
    pub(crate) fn count_in_state(&self, state: RecordState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }
}
