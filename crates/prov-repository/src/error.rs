use prov_pack::PackError;
use prov_types::{ObjectKey, TypeError};

/// Errors from repository backend operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// The backend could not be initialised with the given configuration.
    #[error("invalid repository configuration: {0}")]
    InvalidConfig(String),

    /// One or more keys do not resolve to a live object.
    #[error("object not found: {}", join_keys(.0))]
    NotFound(Vec<ObjectKey>),

    /// The input could not be accepted (not a regular file, malformed key).
    #[error("validation error: {0}")]
    Validation(String),

    /// Mutation attempted on a read-only backend.
    #[error("repository is read-only")]
    ReadOnly,

    /// Stored bytes do not hash to their content-addressed key.
    #[error("corrupt object {key}: {reason}")]
    Corrupt { key: ObjectKey, reason: String },

    /// I/O error from the underlying storage medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive container failure.
    #[error("archive error: {0}")]
    Pack(#[from] PackError),

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RepoError {
    pub(crate) fn not_found(key: &ObjectKey) -> Self {
        Self::NotFound(vec![key.clone()])
    }

    /// Returns `true` for a missing object, as opposed to a storage failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<TypeError> for RepoError {
    fn from(e: TypeError) -> Self {
        Self::Validation(e.to_string())
    }
}

fn join_keys(keys: &[ObjectKey]) -> String {
    keys.iter().map(ObjectKey::as_str).collect::<Vec<_>>().join(", ")
}

/// Result alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;
