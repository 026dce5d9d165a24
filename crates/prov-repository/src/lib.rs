//! Object repository backends for provenance metadata.
//!
//! Provenance nodes reference binary artifacts (input files, calculation
//! outputs, retrieved data) by key. This crate stores those artifacts behind
//! one contract so that the metadata layer never depends on where or how the
//! bytes live.
//!
//! # Backends
//!
//! All backends implement the [`RepositoryBackend`] trait:
//!
//! - [`SandboxRepositoryBackend`] -- ephemeral temporary directory with random
//!   UUID v4 keys, used for transient staging
//! - [`DiskRepositoryBackend`] -- durable, content-addressed (BLAKE3) store
//!   with a persisted repository identity
//! - [`ArchiveRepositoryBackend`] -- read-only view of an exported pack
//!
//! Backends are usually obtained from a [`BackendRegistry`] built from a
//! [`RepositoryConfig`].
//!
//! # Design Rules
//!
//! 1. Objects are write-once; a key never resolves to different bytes.
//! 2. Write-then-rename: an object becomes visible only once fully written.
//! 3. Resources are allocated lazily and recreated after `erase`.
//! 4. Missing keys are always [`RepoError::NotFound`], naming every missing key.
//! 5. Bulk deletes are all-or-nothing with respect to missing keys.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod archive;
pub mod config;
pub mod disk;
pub mod error;
pub mod registry;
pub mod sandbox;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use archive::{
    copy_objects, export_archive, import_archive, ArchiveRepositoryBackend, ImportReport,
};
pub use config::{BackendConfig, RepositoryConfig};
pub use disk::DiskRepositoryBackend;
pub use error::{RepoError, RepoResult};
pub use registry::{build_backend, BackendRegistry};
pub use sandbox::SandboxRepositoryBackend;
pub use traits::{
    BackendKind, InitialiseOptions, ObjectKeys, ObjectReader, RepositoryBackend,
    RepositoryBackendExt, RepositoryInfo,
};

pub use prov_types::{KeyFormat, ObjectKey, RepositoryUuid};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Read;

    /// Behaviour every writable backend shares, whatever its key format.
    fn exercise_contract(backend: &dyn RepositoryBackend) {
        // Round trip and membership.
        let k1 = backend.put_object_from_stream(&mut &b"abc"[..]).unwrap();
        assert_eq!(backend.get_object_content(&k1).unwrap(), b"abc");
        assert!(backend.has_object(&k1).unwrap());

        let missing = ObjectKey::parse("nonexistent").unwrap();
        assert_eq!(
            backend.has_objects(&[k1.clone(), missing.clone()]).unwrap(),
            vec![true, false]
        );

        // Readers are scoped and independent.
        let mut first = backend.open(&k1).unwrap();
        let mut second = backend.open(&k1).unwrap();
        let mut a = [0u8; 1];
        first.read_exact(&mut a).unwrap();
        let mut rest = Vec::new();
        second.read_to_end(&mut rest).unwrap();
        assert_eq!(&a, b"a");
        assert_eq!(rest, b"abc");
        drop((first, second));

        // Enumeration matches membership.
        let k2 = backend.put_object_from_stream(&mut &b"def"[..]).unwrap();
        let listed: HashSet<ObjectKey> = backend.collect_keys().unwrap().into_iter().collect();
        assert_eq!(listed, HashSet::from([k1.clone(), k2.clone()]));

        // Strict bulk delete.
        let err = backend
            .delete_objects(&[k1.clone(), missing.clone()])
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound(ref keys) if keys == &vec![missing.clone()]));
        assert!(backend.has_object(&k1).unwrap());
        backend.delete_objects(&[k1.clone(), k2.clone(), k1.clone()]).unwrap();
        assert!(backend.collect_keys().unwrap().is_empty());
        assert!(backend.open(&k1).unwrap_err().is_not_found());

        // Erase is idempotent and the next use reinitialises.
        backend.erase().unwrap();
        backend.erase().unwrap();
        assert!(!backend.is_initialised());
        let k3 = backend.put_object_from_stream(&mut &b"again"[..]).unwrap();
        assert!(backend.is_initialised());
        assert_eq!(backend.get_object_content(&k3).unwrap(), b"again");
        backend.erase().unwrap();
    }

    #[test]
    fn sandbox_honours_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(&SandboxRepositoryBackend::with_parent(dir.path()));
    }

    #[test]
    fn disk_honours_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(&DiskRepositoryBackend::new(dir.path().join("repo")));
    }

    #[test]
    fn registry_backends_honour_contract() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepositoryConfig::from_toml_str(&format!(
            "[profiles.default]\nbackend = \"sandbox\"\nparent = {:?}\n",
            dir.path().display().to_string()
        ))
        .unwrap();
        let registry = BackendRegistry::new(config);
        let backend = registry.default_backend().unwrap();
        exercise_contract(backend.as_ref());
        registry.close().unwrap();
    }

    #[test]
    fn staging_sandbox_into_disk_repository() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskRepositoryBackend::new(dir.path().join("repo"));
        let result = SandboxRepositoryBackend::scoped(|sandbox| {
            sandbox.put_object_from_stream(&mut &b"input.dat"[..])?;
            sandbox.put_object_from_stream(&mut &b"params.json"[..])?;
            copy_objects(sandbox, &disk)
        })
        .unwrap();
        assert_eq!(result.mapping.len(), 2);
        for stored in result.mapping.values() {
            disk.verify_object(stored).unwrap();
        }
    }
}
