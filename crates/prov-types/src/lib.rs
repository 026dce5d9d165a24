//! Foundation types for the provenance object repository.
//!
//! Every repository crate depends on `prov-types`. The types here are
//! deliberately small: a repository backend hands out [`ObjectKey`]s, declares
//! how it mints them with a [`KeyFormat`], and optionally carries a stable
//! [`RepositoryUuid`].
//!
//! # Key Types
//!
//! - [`ObjectKey`] -- Opaque identifier for one stored object
//! - [`KeyFormat`] -- Random (UUID v4) or content-addressed keys
//! - [`HashAlgorithm`] -- Digest used by content-addressed backends
//! - [`RepositoryUuid`] -- Persistent identity of a backend instance

pub mod error;
pub mod identity;
pub mod key;

pub use error::TypeError;
pub use identity::RepositoryUuid;
pub use key::{HashAlgorithm, KeyFormat, ObjectKey};
