//! Relationship metadata.
//!
//! Relationships are declared on a [`ModelType`](crate::ModelType) and
//! consulted by the store whenever an association is mutated, both to keep
//! inverse sides in sync and to decide which record must be persisted first.

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// Many-to-one: a `Comment` belongs to one parent `Comment`.
    BelongsTo,
    /// One-to-many: a `Comment` has many child `Comment`s.
    HasMany,
    /// Many-to-many: `Post`s have many `Tag`s and vice versa.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether the relationship is backed by an association collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationshipKind::HasMany | RelationshipKind::ManyToMany)
    }

    /// Whether linking two records through this relationship orders their
    /// creation: the referencing side must wait for the referenced side.
    pub const fn orders_commit(self) -> bool {
        matches!(self, RelationshipKind::BelongsTo | RelationshipKind::HasMany)
    }
}

/// Metadata about a relationship between models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Name of the relationship on the owning model.
    pub name: &'static str,

    /// Name of the related model.
    pub related_model: &'static str,

    /// Kind of relationship.
    pub kind: RelationshipKind,

    /// Relationship on the related model that points back, if any.
    pub inverse: Option<&'static str>,
}

impl RelationshipInfo {
    /// Create a new relationship definition.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_model: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_model,
            kind,
            inverse: None,
        }
    }

    /// Set the inverse relationship name.
    #[must_use]
    pub const fn inverse(mut self, inverse: &'static str) -> Self {
        self.inverse = Some(inverse);
        self
    }
}

/// Find a relationship by name in a slice of relationships.
#[must_use]
pub fn find_relationship<'a>(
    relationships: &'a [RelationshipInfo],
    name: &str,
) -> Option<&'a RelationshipInfo> {
    relationships.iter().find(|r| r.name == name)
}
