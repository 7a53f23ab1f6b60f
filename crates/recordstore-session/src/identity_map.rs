//! Identity Map pattern for tracking one record instance per external id.
//!
//! The identity map ensures that each `(model, id)` pair corresponds to
//! exactly one record within a store. This provides:
//!
//! - **Uniqueness**: the same id always resolves to the same record
//! - **Deduplication**: a find for an id that is already known issues no
//!   adapter request
//! - **Consistency**: a load merges into the record every collection already
//!   references
//!
//! Records without an external id (created locally and not yet saved) are not
//! in the map; they are reachable only through their `ClientId`.

use recordstore_core::{ClientId, Id};
use std::collections::HashMap;

/// Key of an identity map entry.
///
/// Each model has its own id namespace: `comment#1` and `post#1` are
/// different records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    model: &'static str,
    id: Id,
}

impl IdentityKey {
    /// Create a key for `model` / `id`.
    pub fn new(model: &'static str, id: Id) -> Self {
        Self { model, id }
    }

    /// The model name.
    pub fn model(&self) -> &'static str {
        self.model
    }

    /// The external id.
    pub fn id(&self) -> &Id {
        &self.id
    }
}

/// Identity Map from `(model, id)` to the record holding that identity.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, ClientId>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `record` under `model` / `id`.
    ///
    /// If the identity is already held by a *different* record, the map is
    /// left unchanged and that record is returned as the error value.
    /// Re-registering the same record is a no-op.
    pub fn insert(&mut self, model: &'static str, id: Id, record: ClientId) -> Result<(), ClientId> {
        let key = IdentityKey::new(model, id);
        match self.entries.get(&key) {
            Some(existing) if *existing != record => Err(*existing),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(key, record);
                Ok(())
            }
        }
    }

    /// Look up the record holding `model` / `id`.
    pub fn get(&self, model: &'static str, id: &Id) -> Option<ClientId> {
        // The key owns its Id, so lookups clone it; ids are small.
        self.entries
            .get(&IdentityKey::new(model, id.clone()))
            .copied()
    }

    /// Check if an identity is registered.
    pub fn contains(&self, model: &'static str, id: &Id) -> bool {
        self.get(model, id).is_some()
    }

    /// Remove an identity.
    ///
    /// # Returns
    ///
    /// The record that held it, if any.
    pub fn remove(&mut self, model: &'static str, id: &Id) -> Option<ClientId> {
        self.entries.remove(&IdentityKey::new(model, id.clone()))
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_map_insert_and_get() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::Int(1), ClientId::new(0)).unwrap();

        assert_eq!(map.get("comment", &Id::Int(1)), Some(ClientId::new(0)));
        assert_eq!(map.get("comment", &Id::Int(2)), None);
    }

    #[test]
    fn test_identity_map_rejects_second_holder() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::Int(1), ClientId::new(0)).unwrap();

        // Same record again is fine
        assert!(map.insert("comment", Id::Int(1), ClientId::new(0)).is_ok());

        // A different record for the same identity is refused
        assert_eq!(
            map.insert("comment", Id::Int(1), ClientId::new(5)),
            Err(ClientId::new(0))
        );
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_identity_map_remove() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::from("a"), ClientId::new(2)).unwrap();
        assert!(map.contains("comment", &Id::from("a")));

        assert_eq!(
            map.remove("comment", &Id::from("a")),
            Some(ClientId::new(2))
        );
        assert!(!map.contains("comment", &Id::from("a")));

        // Removing again returns None
        assert_eq!(map.remove("comment", &Id::from("a")), None);
    }

    #[test]
    fn test_identity_map_clear() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::Int(1), ClientId::new(0)).unwrap();
        map.insert("comment", Id::Int(2), ClientId::new(1)).unwrap();
        assert_eq!(map.len(), 2);

        map.clear();

        assert!(map.is_empty());
    }

    #[test]
    fn test_different_models_same_id() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::Int(1), ClientId::new(0)).unwrap();
        map.insert("post", Id::Int(1), ClientId::new(1)).unwrap();

        // Both exist independently
        assert_eq!(map.get("comment", &Id::Int(1)), Some(ClientId::new(0)));
        assert_eq!(map.get("post", &Id::Int(1)), Some(ClientId::new(1)));
    }

    #[test]
    fn test_int_and_text_ids_differ() {
        let mut map = IdentityMap::new();

        map.insert("comment", Id::Int(1), ClientId::new(0)).unwrap();

        assert!(!map.contains("comment", &Id::from("1")));
    }
}
