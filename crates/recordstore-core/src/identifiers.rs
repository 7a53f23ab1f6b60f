//! Record, transaction and collection identities.
//!
//! Two kinds of identity coexist:
//!
//! - [`Id`] is the external identity assigned by the persistence layer. It is
//!   absent until a record has been created remotely or loaded.
//! - [`ClientId`] is the internal ephemeral identity handed out by a store the
//!   moment a record exists in memory. Reference equality between unsaved
//!   records is decided by it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// External identity of a record, as assigned by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier
    Int(i64),
    /// Opaque string identifier
    Text(String),
}

impl Id {
    /// Convert back into an attribute value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Id::Int(i) => Value::Int(*i),
            Id::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(i) => write!(f, "{}", i),
            Id::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Int(v)
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Id::Int(i64::from(v))
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Text(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Text(v)
    }
}

impl TryFrom<&Value> for Id {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(i) => Ok(Id::Int(*i)),
            Value::Text(s) if !s.is_empty() => Ok(Id::Text(s.clone())),
            other => Err(Error::InvalidId {
                actual: other.type_name(),
            }),
        }
    }
}

macro_rules! ephemeral_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(usize);

        impl $name {
            /// Wrap a raw slot index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            /// The raw slot index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

ephemeral_id!(
    /// Internal identity of a record within one store.
    ///
    /// Client ids are allocated in creation order, so ordering by `ClientId`
    /// is ordering by creation.
    ClientId,
    "record#"
);

ephemeral_id!(
    /// Identity of a transaction within one store.
    TransactionId,
    "tx#"
);

ephemeral_id!(
    /// Identity of an association collection within one store.
    CollectionId,
    "collection#"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_value() {
        assert_eq!(Id::try_from(&Value::Int(3)).unwrap(), Id::Int(3));
        assert_eq!(
            Id::try_from(&Value::Text("abc".into())).unwrap(),
            Id::Text("abc".into())
        );
    }

    #[test]
    fn test_id_rejects_null_and_empty() {
        assert_eq!(
            Id::try_from(&Value::Null),
            Err(Error::InvalidId { actual: "null" })
        );
        assert!(Id::try_from(&Value::Text(String::new())).is_err());
    }

    #[test]
    fn test_id_roundtrips_through_value() {
        let id = Id::from("c-9");
        assert_eq!(Id::try_from(&id.to_value()).unwrap(), id);
    }

    #[test]
    fn test_client_id_orders_by_creation() {
        assert!(ClientId::new(1) < ClientId::new(2));
        assert_eq!(ClientId::new(4).to_string(), "record#4");
        assert_eq!(TransactionId::new(0).to_string(), "tx#0");
    }
}
