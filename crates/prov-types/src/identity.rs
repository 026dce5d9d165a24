use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Persistent identity of a repository backend instance.
///
/// Only backends whose storage survives process restarts carry one. The
/// identity is generated once, when the backing resource is first created,
/// and is read back from storage from then on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryUuid(uuid::Uuid);

impl RepositoryUuid {
    /// Generate a new random identity.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap raw UUID bytes (as stored in binary containers).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RepositoryUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RepositoryUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepositoryUuid({})", self.short_id())
    }
}

impl fmt::Display for RepositoryUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RepositoryUuid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidUuid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        assert_ne!(RepositoryUuid::new(), RepositoryUuid::new());
    }

    #[test]
    fn string_roundtrip() {
        let id = RepositoryUuid::new();
        let parsed: RepositoryUuid = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn bytes_roundtrip() {
        let id = RepositoryUuid::new();
        assert_eq!(RepositoryUuid::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn short_id_is_8_chars() {
        assert_eq!(RepositoryUuid::new().short_id().len(), 8);
    }

    #[test]
    fn parse_garbage_fails() {
        let err = "not-a-uuid".parse::<RepositoryUuid>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidUuid(_)));
    }

    #[test]
    fn serde_is_hyphenated_string() {
        let id = RepositoryUuid::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RepositoryUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
