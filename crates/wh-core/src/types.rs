//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Unknown activity source string.
    #[error("invalid activity source: {value}")]
    InvalidActivitySource { value: String },

    /// Unknown lifecycle state string.
    #[error("invalid {entity} state: {value}")]
    InvalidState { entity: &'static str, value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated user identifier.
    ///
    /// The daemon tracks a single implicit user, but every session still
    /// carries the owner so that storage relationships stay explicit.
    UserId, "user ID"
);

define_string_id!(
    /// A validated session identifier.
    SessionId, "session ID"
);

define_string_id!(
    /// A validated work block identifier.
    WorkBlockId, "work block ID"
);

define_string_id!(
    /// A validated activity event identifier.
    EventId, "event ID"
);

impl SessionId {
    /// Generates a fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }
}

impl WorkBlockId {
    /// Generates a fresh random work block ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("block-{}", Uuid::new_v4()))
    }
}

impl EventId {
    /// Generates a fresh random event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("activity-{}", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("   ").is_err());
        assert!(UserId::new("default_user").is_ok());
    }

    #[test]
    fn session_id_serde_rejects_empty() {
        let result: Result<SessionId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn work_block_id_serializes_as_plain_string() {
        let id = WorkBlockId::new("block-1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"block-1\"");
        let parsed: WorkBlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert!(a.as_str().starts_with("session-"));
        assert_ne!(a, b);
        assert!(WorkBlockId::generate().as_str().starts_with("block-"));
        assert!(EventId::generate().as_str().starts_with("activity-"));
    }

    #[test]
    fn validation_error_messages() {
        let err = EventId::new("").unwrap_err();
        assert_eq!(err.to_string(), "event ID cannot be empty");
    }
}
