//! Container ID generation and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{KraneError, KraneResult};

/// A validated container ID.
///
/// Container IDs must:
/// - Be 1-64 characters long
/// - Contain only alphanumeric characters, hyphens, and underscores
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Maximum length of a container ID.
    pub const MAX_LENGTH: usize = 64;

    /// Create a new container ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> KraneResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a new random container ID.
    ///
    /// The ID is a 12-character hex string derived from a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let hex = hex::encode(&uuid.as_bytes()[..6]);
        Self(hex)
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate a container ID string.
    fn validate(id: &str) -> KraneResult<()> {
        if id.is_empty() || id.len() > Self::MAX_LENGTH {
            return Err(KraneError::InvalidContainerId { id: id.to_string() });
        }

        if !id.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Err(KraneError::InvalidContainerId { id: id.to_string() });
        }

        for c in id.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
                return Err(KraneError::InvalidContainerId { id: id.to_string() });
            }
        }

        Ok(())
    }

    /// Returns a short version of the ID (first 12 characters).
    ///
    /// This is the form log drivers attach to each message, so that host-side
    /// tooling can match what interactive commands print.
    #[must_use]
    pub fn short(&self) -> &str {
        if self.0.len() <= 12 {
            &self.0
        } else {
            &self.0[..12]
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = KraneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ContainerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_container_ids() {
        assert!(ContainerId::new("abc123").is_ok());
        assert!(ContainerId::new("my-container").is_ok());
        assert!(ContainerId::new("my_container").is_ok());
        assert!(ContainerId::new("Container-123_test").is_ok());
    }

    #[test]
    fn invalid_container_ids() {
        assert!(ContainerId::new("").is_err());
        assert!(ContainerId::new("-invalid").is_err());
        assert!(ContainerId::new("_invalid").is_err());
        assert!(ContainerId::new("invalid!").is_err());
        assert!(ContainerId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn generate_container_id() {
        let id1 = ContainerId::generate();
        let id2 = ContainerId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 12);
    }

    #[test]
    fn short_id() {
        let id = ContainerId::new("0123456789abcdef").unwrap();
        assert_eq!(id.short(), "0123456789ab");

        let id = ContainerId::new("tiny").unwrap();
        assert_eq!(id.short(), "tiny");
    }
}
