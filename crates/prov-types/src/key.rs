use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Longest key accepted, matching the common filename limit.
pub const MAX_KEY_LEN: usize = 255;

/// Opaque identifier for one stored object.
///
/// Keys are minted by a repository backend and are only meaningful to the
/// backend instance that produced them. Callers persist and hand them back;
/// they never derive anything from the key text. Every key is also a valid
/// flat filename, which is what lets directory-backed stores use the key as
/// the object's file name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Parse caller-supplied text into a key, validating its shape.
    pub fn parse(s: impl Into<String>) -> Result<Self, TypeError> {
        let s = s.into();
        validate(&s)?;
        Ok(Self(s))
    }

    /// A fresh random key (hyphenated UUID v4).
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key and return the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

fn validate(s: &str) -> Result<(), TypeError> {
    let reason = if s.is_empty() {
        "empty"
    } else if s.len() > MAX_KEY_LEN {
        "longer than 255 bytes"
    } else if s.contains(['/', '\\', '\0']) {
        "contains a path separator or NUL"
    } else if s.starts_with('.') {
        "starts with '.'"
    } else {
        return Ok(());
    };
    Err(TypeError::InvalidKey {
        key: s.to_string(),
        reason,
    })
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ObjectKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

/// Digest algorithm used by a content-addressed backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

/// How a backend mints its keys.
///
/// Only a backend declaring [`KeyFormat::ContentHash`] deduplicates; for any
/// other format, storing the same bytes twice yields two keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum KeyFormat {
    /// Random version-4 UUID strings with no relation to content.
    Uuid4,
    /// Lowercase hex digest of the exact object bytes.
    ContentHash(HashAlgorithm),
}

impl KeyFormat {
    /// Returns `true` if identical content always maps to the same key.
    pub fn is_content_addressed(&self) -> bool {
        matches!(self, Self::ContentHash(_))
    }

    /// Single-byte tag used by binary container formats.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Uuid4 => 0,
            Self::ContentHash(HashAlgorithm::Blake3) => 1,
        }
    }

    /// Inverse of [`KeyFormat::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Uuid4),
            1 => Some(Self::ContentHash(HashAlgorithm::Blake3)),
            _ => None,
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid4 => write!(f, "uuid4"),
            Self::ContentHash(algo) => write!(f, "{algo}"),
        }
    }
}

impl FromStr for KeyFormat {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uuid4" => Ok(Self::Uuid4),
            "blake3" => Ok(Self::ContentHash(HashAlgorithm::Blake3)),
            other => Err(TypeError::UnknownKeyFormat(other.to_string())),
        }
    }
}

impl From<KeyFormat> for String {
    fn from(format: KeyFormat) -> Self {
        format.to_string()
    }
}

impl TryFrom<String> for KeyFormat {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
