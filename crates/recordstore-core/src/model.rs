//! Model type definitions.
//!
//! A `ModelType` is the runtime description of a record class: its name,
//! the attribute names it accepts and the relationships it declares.
//!
//! # Example
//!
//! ```
//! use recordstore_core::ModelType;
//!
//! let comment = ModelType::new("comment")
//!     .attribute("body")
//!     .has_many("comments", "comment")
//!     .inverse("comment")
//!     .belongs_to("comment", "comment");
//!
//! assert!(comment.has_attribute("body"));
//! assert_eq!(comment.relationships().len(), 2);
//! ```

use crate::error::{Error, Result};
use crate::relationship::{RelationshipInfo, RelationshipKind, find_relationship};

/// Runtime description of a record class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelType {
    name: &'static str,
    attributes: Vec<&'static str>,
    relationships: Vec<RelationshipInfo>,
}

impl ModelType {
    /// Start a model definition.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Declare an attribute.
    #[must_use]
    pub fn attribute(mut self, name: &'static str) -> Self {
        self.attributes.push(name);
        self
    }

    /// Declare a has-many relationship to `related`.
    #[must_use]
    pub fn has_many(self, name: &'static str, related: &'static str) -> Self {
        self.relationship(RelationshipInfo::new(
            name,
            related,
            RelationshipKind::HasMany,
        ))
    }

    /// Declare a belongs-to relationship to `related`.
    #[must_use]
    pub fn belongs_to(self, name: &'static str, related: &'static str) -> Self {
        self.relationship(RelationshipInfo::new(
            name,
            related,
            RelationshipKind::BelongsTo,
        ))
    }

    /// Declare a many-to-many relationship to `related`.
    #[must_use]
    pub fn many_to_many(self, name: &'static str, related: &'static str) -> Self {
        self.relationship(RelationshipInfo::new(
            name,
            related,
            RelationshipKind::ManyToMany,
        ))
    }

    /// Declare an arbitrary relationship.
    #[must_use]
    pub fn relationship(mut self, info: RelationshipInfo) -> Self {
        self.relationships.push(info);
        self
    }

    /// Name the inverse of the most recently declared relationship.
    #[must_use]
    pub fn inverse(mut self, inverse: &'static str) -> Self {
        if let Some(last) = self.relationships.pop() {
            self.relationships.push(last.inverse(inverse));
        }
        self
    }

    /// Model name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared attribute names.
    pub fn attributes(&self) -> &[&'static str] {
        &self.attributes
    }

    /// Declared relationships.
    pub fn relationships(&self) -> &[RelationshipInfo] {
        &self.relationships
    }

    /// Whether `name` is a declared attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| *a == name)
    }

    /// Check that `name` is a declared attribute.
    pub fn check_attribute(&self, name: &str) -> Result<&'static str> {
        self.attributes
            .iter()
            .copied()
            .find(|a| *a == name)
            .ok_or_else(|| Error::UnknownAttribute {
                model: self.name,
                name: name.to_string(),
            })
    }

    /// Look up a relationship by name.
    pub fn find_relationship(&self, name: &str) -> Result<&RelationshipInfo> {
        find_relationship(&self.relationships, name).ok_or_else(|| Error::UnknownRelationship {
            model: self.name,
            name: name.to_string(),
        })
    }

    /// Look up a relationship and check its kind matches `accept`.
    pub fn relationship_of_kind(
        &self,
        name: &str,
        expected: RelationshipKind,
        accept: impl Fn(RelationshipKind) -> bool,
    ) -> Result<&RelationshipInfo> {
        let info = self.find_relationship(name)?;
        if accept(info.kind) {
            Ok(info)
        } else {
            Err(Error::WrongRelationshipKind {
                model: self.name,
                name: info.name,
                expected,
                actual: info.kind,
            })
        }
    }

    /// Validate the definition in isolation.
    ///
    /// Names must be non-empty and unique across attributes and relationships,
    /// and `id` is reserved for the record identity.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(self.invalid("model name is empty"));
        }

        let mut seen: Vec<&'static str> = Vec::new();
        let names = self
            .attributes
            .iter()
            .copied()
            .chain(self.relationships.iter().map(|r| r.name));
        for name in names {
            if name.is_empty() {
                return Err(self.invalid("empty attribute or relationship name"));
            }
            if name == "id" {
                return Err(self.invalid("'id' is reserved"));
            }
            if seen.contains(&name) {
                return Err(self.invalid(&format!("'{}' is declared twice", name)));
            }
            seen.push(name);
        }
        Ok(())
    }

    fn invalid(&self, message: &str) -> Error {
        Error::InvalidModel {
            model: self.name,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment() -> ModelType {
        ModelType::new("comment")
            .attribute("body")
            .has_many("comments", "comment")
            .inverse("comment")
            .belongs_to("comment", "comment")
    }

    #[test]
    fn test_inverse_applies_to_last_relationship() {
        let model = comment();
        let comments = model.find_relationship("comments").unwrap();
        assert_eq!(comments.inverse, Some("comment"));
        let parent = model.find_relationship("comment").unwrap();
        assert_eq!(parent.inverse, None);
    }

    #[test]
    fn test_check_attribute() {
        let model = comment();
        assert_eq!(model.check_attribute("body").unwrap(), "body");
        assert_eq!(
            model.check_attribute("title"),
            Err(Error::UnknownAttribute {
                model: "comment",
                name: "title".to_string()
            })
        );
    }

    #[test]
    fn test_relationship_of_kind_mismatch() {
        let model = comment();
        let err = model
            .relationship_of_kind("comment", RelationshipKind::HasMany, |k| {
                k.is_collection()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::WrongRelationshipKind {
                actual: RelationshipKind::BelongsTo,
                ..
            }
        ));
    }

    #[test]
    fn test_validate() {
        assert!(comment().validate().is_ok());
        assert!(ModelType::new("").validate().is_err());
        assert!(ModelType::new("post").attribute("id").validate().is_err());
        assert!(
            ModelType::new("post")
                .attribute("title")
                .belongs_to("title", "post")
                .validate()
                .is_err()
        );
    }
}
