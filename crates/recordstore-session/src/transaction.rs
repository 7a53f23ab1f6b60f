//! Transactions and the commit engine.
//!
//! A commit runs in steps:
//!
//! 1. **Capture**: every member that is `new` (or `error` after a rejected
//!    create) and not yet part of a running commit is stamped with a fresh
//!    epoch. Records that join the transaction later, including ones created
//!    from inside an adapter callback, are not captured until the next
//!    `commit()`.
//! 2. **Advance**: captured records with no unresolved same-transaction
//!    blocker are moved to `in_flight` and queued for the adapter, in
//!    creation order.
//! 3. Each `did_create_record` detaches the saved record from the graph and
//!    advances again, releasing whatever was waiting only on it.
//!
//! A rejected create leaves its dependents captured and blocked; the next
//! commit re-captures the failed record and the branch resumes.

use crate::adapter::{AdapterRequest, RequestQueue};
use crate::dependency::CommitPlan;
use crate::record::Record;
use crate::registry::{DEFAULT_TRANSACTION, StoreState};
use crate::store::Store;
use recordstore_core::{ClientId, Error, ModelType, RecordState, Result, TransactionId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Commit engine
// ============================================================================

impl StoreState {
    /// Whether a member that is not captured should be swept into a commit.
    fn is_commit_candidate(&self, record: ClientId) -> bool {
        let data = self.record(record);
        match data.state {
            RecordState::New => true,
            RecordState::Error => matches!(data.error, Some(Error::CreateFailed { .. })),
            RecordState::InFlight | RecordState::Saved => false,
        }
    }

    /// Capture the commit candidates of `transaction`.
    ///
    /// Returns the epoch and the newly captured records, in creation order.
    pub(crate) fn begin_commit(
        &mut self,
        transaction: TransactionId,
        detect_cycles: bool,
    ) -> Result<(u64, Vec<ClientId>)> {
        let data = self.transaction(transaction);
        let mut candidates: Vec<ClientId> = data
            .members
            .iter()
            .copied()
            .filter(|r| !data.captured.contains_key(r) && self.is_commit_candidate(*r))
            .collect();
        candidates.sort_unstable();

        // Records already handed to the adapter cannot wait on anything
        if detect_cycles && !candidates.is_empty() {
            let nodes: BTreeSet<ClientId> = data
                .captured
                .keys()
                .copied()
                .filter(|r| self.record(*r).state == RecordState::New)
                .chain(candidates.iter().copied())
                .collect();
            if let Some(records) = data.graph.find_cycle(&nodes) {
                tracing::warn!(transaction = %transaction, cycle = ?records, "Refusing to commit");
                return Err(Error::DependencyCycle { records });
            }
        }

        let data = self.transaction_mut(transaction);
        if !candidates.is_empty() {
            data.epoch += 1;
            for record in &candidates {
                data.captured.insert(*record, data.epoch);
            }
        }
        let epoch = data.epoch;
        self.clear_stale_markers(transaction);
        Ok((epoch, candidates))
    }

    /// Submit every captured record of `transaction` that is no longer blocked.
    pub(crate) fn advance(&mut self, transaction: TransactionId, queue: &RequestQueue) -> CommitPlan {
        let data = self.transaction(transaction);
        let waiting: Vec<ClientId> = data
            .captured
            .keys()
            .copied()
            .filter(|r| matches!(self.record(*r).state, RecordState::New | RecordState::Error))
            .collect();
        let plan = data.graph.plan(waiting);

        for record in &plan.ready {
            let data = self.record_mut(*record);
            data.transition(*record, RecordState::InFlight);
            data.error = None;
            queue.push(AdapterRequest::Create { record: *record });
        }
        for (record, blockers) in &plan.blocked {
            tracing::trace!(record = %record, blockers = ?blockers, "Still blocked");
        }
        plan
    }

    /// Record a rejected create of `record`.
    pub(crate) fn fail_create(
        &mut self,
        record: ClientId,
        reason: String,
        mark_dependents: bool,
    ) -> Result<()> {
        let data = self.record(record);
        let Some(transaction) = data.transaction.filter(|_| data.state == RecordState::InFlight)
        else {
            return Err(Error::InvalidState {
                record,
                state: data.state,
                operation: "fail the create of",
            });
        };

        let error = Error::CreateFailed {
            model: data.model_name(),
            record,
            reason,
        };
        tracing::warn!(record = %record, error = %error, "Create failed");
        let data = self.record_mut(record);
        data.transition(record, RecordState::Error);
        data.error = Some(error);

        let tx = self.transaction_mut(transaction);
        tx.captured.remove(&record);
        if !mark_dependents {
            return Ok(());
        }

        let stalled: Vec<ClientId> = tx
            .graph
            .transitive_dependents(record)
            .into_iter()
            .filter(|d| tx.captured.contains_key(d))
            .collect();
        for dependent in stalled {
            let data = self.record_mut(dependent);
            if data.state == RecordState::New {
                tracing::warn!(record = %dependent, blocker = %record, "Dependent stalled");
                data.error = Some(Error::DependencyUnresolved {
                    record: dependent,
                    blocker: record,
                });
            }
        }
        Ok(())
    }

    /// Clear `DependencyUnresolved` markers whose blocker is being retried or
    /// no longer failed.
    fn clear_stale_markers(&mut self, transaction: TransactionId) {
        let members = self.transaction(transaction).members.clone();
        for member in members {
            let blocker = match &self.record(member).error {
                Some(Error::DependencyUnresolved { blocker, .. }) => *blocker,
                _ => continue,
            };
            let retrying = self.transaction(transaction).captured.contains_key(&blocker);
            if retrying || self.record(blocker).state != RecordState::Error {
                tracing::trace!(record = %member, blocker = %blocker, "Clearing stall marker");
                self.record_mut(member).error = None;
            }
        }
    }
}

// ============================================================================
// Transaction handle
// ============================================================================

/// Summary of the part of a commit started by one `commit()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitResult {
    /// Epoch stamped on the records captured by this call.
    pub epoch: u64,
    /// Records newly captured by this call, in creation order.
    pub captured: Vec<ClientId>,
    /// Records handed to the adapter before this call returned.
    pub submitted: Vec<ClientId>,
    /// Captured records still waiting on a blocker.
    pub blocked: Vec<ClientId>,
}

impl CommitResult {
    /// Whether this call had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty() && self.submitted.is_empty() && self.blocked.is_empty()
    }
}

/// A captured record that cannot be submitted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedRecord {
    /// The waiting record.
    pub record: Record,
    /// Records it waits for.
    pub blockers: Vec<Record>,
}

/// A bucket of uncommitted records committed together.
///
/// Cheap handle; clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    store: Store,
    id: TransactionId,
}

impl Transaction {
    pub(crate) fn new(store: Store, id: TransactionId) -> Self {
        Self { store, id }
    }

    /// Store-local id of this transaction.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether this is the store's implicit transaction.
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_TRANSACTION
    }

    /// The store this transaction belongs to.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a record in state `new` owned by this transaction.
    pub fn create_record(&self, model: &ModelType) -> Result<Record> {
        let record = {
            let mut state = self.store.state_mut();
            let model = state.register_model(model)?;
            state.alloc_record(model, self.id)
        };
        tracing::debug!(record = %record, transaction = %self.id, "Created record");
        Ok(self.store.record_handle(record))
    }

    /// Move `record` into this transaction.
    ///
    /// Only records that are `new` (or `error` after a rejected create) and
    /// not part of a running commit can move. Dependency edges are recomputed
    /// in both transactions.
    pub fn add(&self, record: &Record) -> Result<()> {
        let client_id = self.store.check_record(record)?;
        let mut state = self.store.state_mut();
        let data = state.record(client_id);
        if data.transaction == Some(self.id) {
            return Ok(());
        }
        let movable = match data.transaction {
            Some(current) => {
                !state.transaction(current).captured.contains_key(&client_id)
                    && matches!(data.state, RecordState::New | RecordState::Error)
            }
            None => false,
        };
        if !movable {
            return Err(Error::InvalidState {
                record: client_id,
                state: data.state,
                operation: "move",
            });
        }

        let from = state.detach_from_transaction(client_id);
        let data = state.record_mut(client_id);
        if matches!(data.error, Some(Error::DependencyUnresolved { .. })) {
            data.error = None;
        }
        state.attach_to_transaction(client_id, self.id);
        tracing::debug!(record = %client_id, from = ?from, to = %self.id, "Moved record");
        Ok(())
    }

    /// Hand `record` back to the default transaction.
    pub fn remove(&self, record: &Record) -> Result<()> {
        let client_id = self.store.check_record(record)?;
        {
            let state = self.store.state();
            let data = state.record(client_id);
            if data.transaction != Some(self.id) {
                return Err(Error::InvalidState {
                    record: client_id,
                    state: data.state,
                    operation: "remove from another transaction",
                });
            }
        }
        if self.is_default() {
            return Ok(());
        }
        self.store.default_transaction().add(record)
    }

    /// Members in insertion order.
    pub fn records(&self) -> Vec<Record> {
        let members = self.store.state().transaction(self.id).members.clone();
        members
            .into_iter()
            .map(|r| self.store.record_handle(r))
            .collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.store.state().transaction(self.id).members.len()
    }

    /// Whether the transaction has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `record` is a member.
    pub fn contains(&self, record: &Record) -> bool {
        self.store.same_store(record.store())
            && self
                .store
                .state()
                .record(record.client_id())
                .transaction
                == Some(self.id)
    }

    /// Whether captured records are still waiting to be saved.
    pub fn is_committing(&self) -> bool {
        self.store.state().transaction(self.id).is_committing()
    }

    /// Captured records waiting on a blocker, with their blockers.
    pub fn blocked(&self) -> Vec<BlockedRecord> {
        let blocked: Vec<(ClientId, Vec<ClientId>)> = {
            let state = self.store.state();
            let data = state.transaction(self.id);
            data.captured
                .keys()
                .map(|r| (*r, data.graph.blockers_of(*r).collect::<Vec<_>>()))
                .filter(|(_, blockers)| !blockers.is_empty())
                .collect()
        };
        blocked
            .into_iter()
            .map(|(record, blockers)| BlockedRecord {
                record: self.store.record_handle(record),
                blockers: blockers
                    .into_iter()
                    .map(|b| self.store.record_handle(b))
                    .collect(),
            })
            .collect()
    }

    /// Commit the transaction.
    ///
    /// Captures every `new` member, submits the ones with no same-transaction
    /// blocker and returns. The rest are submitted as the adapter
    /// acknowledges their blockers. Members of other transactions are never
    /// submitted, even when referenced.
    ///
    /// # Errors
    ///
    /// `Error::DependencyCycle` (with `detect_cycles`) when the records to
    /// capture depend on each other in a loop; nothing is captured then.
    #[tracing::instrument(level = "debug", skip_all, fields(transaction = %self.id))]
    pub fn commit(&self) -> Result<CommitResult> {
        let result = {
            let mut state = self.store.state_mut();
            let (epoch, captured) = state.begin_commit(self.id, self.store.config().detect_cycles)?;
            let plan = state.advance(self.id, self.store.queue());
            CommitResult {
                epoch,
                captured,
                submitted: plan.ready,
                blocked: plan.blocked.into_iter().map(|(r, _)| r).collect(),
            }
        };
        tracing::info!(
            transaction = %self.id,
            epoch = result.epoch,
            captured = result.captured.len(),
            submitted = result.submitted.len(),
            blocked = result.blocked.len(),
            "Commit started"
        );
        self.store.dispatch();
        Ok(result)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.store.same_store(&other.store) && self.id == other.id
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
