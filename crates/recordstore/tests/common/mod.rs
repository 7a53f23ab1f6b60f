//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use recordstore::prelude::*;
use recordstore::ClientId;
use std::cell::RefCell;
use std::rc::Rc;

/// One call the engine made into the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(ClientId),
    Find(&'static str, Id),
}

type CreateHook = Box<dyn Fn(&Store, &Record, usize)>;
type FindHook = Box<dyn Fn(&Store, &ModelType, &Id)>;

/// Mock adapter recording every call into shared state.
///
/// Hooks run inside the adapter call, so they can acknowledge synchronously
/// or mutate the store the way a real adapter callback would. The `usize`
/// passed to the create hook counts create calls, starting at 1.
#[derive(Default)]
pub struct MockAdapter {
    calls: Rc<RefCell<Vec<Call>>>,
    on_create: Option<CreateHook>,
    on_find: Option<FindHook>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.calls)
    }

    pub fn on_create(mut self, hook: impl Fn(&Store, &Record, usize) + 'static) -> Self {
        self.on_create = Some(Box::new(hook));
        self
    }

    pub fn on_find(mut self, hook: impl Fn(&Store, &ModelType, &Id) + 'static) -> Self {
        self.on_find = Some(Box::new(hook));
        self
    }

    /// Acknowledge every create right away, assigning ids 1, 2, 3...
    pub fn acknowledging() -> Self {
        Self::new().on_create(|store, record, n| {
            store
                .did_create_record(record, Attributes::with_id(n as i64))
                .unwrap();
        })
    }
}

impl Adapter for MockAdapter {
    fn create_record(&self, store: &Store, _model: &ModelType, record: &Record) {
        let n = {
            let mut calls = self.calls.borrow_mut();
            calls.push(Call::Create(record.client_id()));
            calls.iter().filter(|c| matches!(c, Call::Create(_))).count()
        };
        if let Some(hook) = &self.on_create {
            hook(store, record, n);
        }
    }

    fn find(&self, store: &Store, model: &ModelType, id: &Id) {
        self.calls
            .borrow_mut()
            .push(Call::Find(model.name(), id.clone()));
        if let Some(hook) = &self.on_find {
            hook(store, model, id);
        }
    }
}

/// Self-referential comment model: a comment has many child comments and
/// belongs to a parent comment.
pub fn comment() -> ModelType {
    ModelType::new("comment")
        .attribute("body")
        .has_many("comments", "comment")
        .inverse("comment")
        .belongs_to("comment", "comment")
        .inverse("comments")
}

pub fn post() -> ModelType {
    ModelType::new("post")
        .attribute("title")
        .many_to_many("tags", "tag")
        .inverse("posts")
}

pub fn tag() -> ModelType {
    ModelType::new("tag")
        .attribute("name")
        .many_to_many("posts", "post")
        .inverse("tags")
}

pub fn creates(calls: &Rc<RefCell<Vec<Call>>>) -> Vec<ClientId> {
    calls
        .borrow()
        .iter()
        .filter_map(|c| match c {
            Call::Create(id) => Some(*id),
            Call::Find(..) => None,
        })
        .collect()
}

pub fn finds(calls: &Rc<RefCell<Vec<Call>>>) -> Vec<Id> {
    calls
        .borrow()
        .iter()
        .filter_map(|c| match c {
            Call::Find(_, id) => Some(id.clone()),
            Call::Create(_) => None,
        })
        .collect()
}

pub fn store_with(adapter: MockAdapter) -> (Store, Rc<RefCell<Vec<Call>>>) {
    let calls = adapter.calls();
    let store = StoreBuilder::new()
        .adapter(adapter)
        .model(&comment())
        .build()
        .unwrap();
    (store, calls)
}
