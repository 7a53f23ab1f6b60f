//! The boundary to the persistence layer.
//!
//! The engine never performs I/O itself. Every create and find is handed to
//! an [`Adapter`], which is expected to report the outcome later by calling
//! back into the [`Store`]:
//!
//! | request                          | success callback               | failure callback             |
//! |----------------------------------|--------------------------------|------------------------------|
//! | `create_record(store, model, r)` | `store.did_create_record(r, ..)` | `store.did_fail_create(r, ..)` |
//! | `find(store, model, id)`         | `store.load(model, ..)`          | `store.did_fail_find(model, id, ..)` |
//!
//! Callbacks may happen synchronously, from inside the adapter call, or at
//! any later point. Requests are queued and dispatched one at a time by a
//! single drain loop, so an adapter is never re-entered: a record that
//! becomes ready while `create_record` is still running is dispatched right
//! after that call returns.

use crate::{Record, Store};
use recordstore_core::{ClientId, Id, ModelType};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Persistence adapter consumed by the engine.
pub trait Adapter {
    /// Persist a new record.
    ///
    /// Must eventually call [`Store::did_create_record`] or
    /// [`Store::did_fail_create`] for `record`.
    fn create_record(&self, store: &Store, model: &ModelType, record: &Record);

    /// Fetch the record with `id`.
    ///
    /// Must eventually call [`Store::load`] with attributes whose `id` equals
    /// `id`, or [`Store::did_fail_find`].
    fn find(&self, store: &Store, model: &ModelType, id: &Id);
}

impl<A: Adapter + ?Sized> Adapter for Rc<A> {
    fn create_record(&self, store: &Store, model: &ModelType, record: &Record) {
        (**self).create_record(store, model, record);
    }

    fn find(&self, store: &Store, model: &ModelType, id: &Id) {
        (**self).find(store, model, id);
    }
}

impl<A: Adapter + ?Sized> Adapter for Box<A> {
    fn create_record(&self, store: &Store, model: &ModelType, record: &Record) {
        (**self).create_record(store, model, record);
    }

    fn find(&self, store: &Store, model: &ModelType, id: &Id) {
        (**self).find(store, model, id);
    }
}

/// A request waiting to be handed to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRequest {
    /// Create a record.
    Create {
        /// Record to create.
        record: ClientId,
    },
    /// Fetch the record behind a loading placeholder.
    Find {
        /// Placeholder record; carries the model and the id to fetch.
        record: ClientId,
    },
}

/// FIFO of adapter requests plus the dispatch re-entrancy flag.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    pending: RefCell<VecDeque<AdapterRequest>>,
    dispatching: Cell<bool>,
}

impl RequestQueue {
    pub(crate) fn push(&self, request: AdapterRequest) {
        self.pending.borrow_mut().push_back(request);
    }

    pub(crate) fn pop(&self) -> Option<AdapterRequest> {
        self.pending.borrow_mut().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<AdapterRequest> {
        self.pending.borrow().iter().cloned().collect()
    }

    /// Claim the drain loop.
    ///
    /// Returns `None` when a drain is already running further up the stack;
    /// that loop will pick up whatever was just queued.
    pub(crate) fn begin_dispatch(&self) -> Option<DispatchGuard<'_>> {
        if self.dispatching.replace(true) {
            None
        } else {
            Some(DispatchGuard { queue: self })
        }
    }
}

/// Releases the drain loop on drop, including when an adapter panics.
pub(crate) struct DispatchGuard<'a> {
    queue: &'a RequestQueue,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.queue.dispatching.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let queue = RequestQueue::default();
        queue.push(AdapterRequest::Create {
            record: ClientId::new(0),
        });
        queue.push(AdapterRequest::Find {
            record: ClientId::new(1),
        });
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.pop(),
            Some(AdapterRequest::Create {
                record: ClientId::new(0)
            })
        );
        assert!(matches!(queue.pop(), Some(AdapterRequest::Find { .. })));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_dispatch_is_not_reentrant() {
        let queue = RequestQueue::default();
        let guard = queue.begin_dispatch();
        assert!(guard.is_some());
        assert!(queue.begin_dispatch().is_none());
        drop(guard);
        assert!(queue.begin_dispatch().is_some());
    }
}
