use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use prov_crypto::HashingReader;
use prov_pack::{PackFile, PackReader, PackWriter};
use prov_types::{KeyFormat, ObjectKey, RepositoryUuid};
use tracing::{debug, info};

use crate::error::{RepoError, RepoResult};
use crate::traits::{BackendKind, InitialiseOptions, ObjectKeys, ObjectReader, RepositoryBackend};

/// Read-only backend over an exported pack.
///
/// The archive keeps the key format and identity of the repository it was
/// exported from, so content-addressed keys resolve unchanged.
pub struct ArchiveRepositoryBackend {
    pack_path: PathBuf,
    key_format: KeyFormat,
    source_uuid: Option<RepositoryUuid>,
    reader: RwLock<Option<PackReader>>,
}

impl ArchiveRepositoryBackend {
    /// Open the archive at `path`. Either the `.pack` file or the base path
    /// without extension is accepted; the `.idx` must sit next to it.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        let pack_path = pack_path_for(path.as_ref());
        let reader = load(&pack_path)?;
        let header = reader.header();
        Ok(Self {
            key_format: header.key_format,
            source_uuid: header.source_uuid,
            pack_path,
            reader: RwLock::new(Some(reader)),
        })
    }

    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    fn with_reader<R>(&self, f: impl FnOnce(&PackReader) -> RepoResult<R>) -> RepoResult<R> {
        loop {
            {
                let guard = self.reader.read().expect("lock poisoned");
                if let Some(reader) = guard.as_ref() {
                    return f(reader);
                }
            }
            self.initialise(&InitialiseOptions::default())?;
        }
    }
}

fn pack_path_for(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "pack") {
        path.to_path_buf()
    } else {
        path.with_extension("pack")
    }
}

fn load(pack_path: &Path) -> RepoResult<PackReader> {
    if !pack_path.is_file() {
        return Err(RepoError::InvalidConfig(format!(
            "archive {} does not exist",
            pack_path.display()
        )));
    }
    let reader = PackReader::open(pack_path)?;
    reader.verify_checksum()?;
    debug!(
        path = %pack_path.display(),
        objects = reader.object_count(),
        "archive loaded"
    );
    Ok(reader)
}

impl RepositoryBackend for ArchiveRepositoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Archive
    }

    fn uuid(&self) -> Option<RepositoryUuid> {
        self.source_uuid
    }

    fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.pack_path.clone())
    }

    fn initialise(&self, options: &InitialiseOptions) -> RepoResult<()> {
        if options.clear {
            return Err(RepoError::ReadOnly);
        }
        let mut guard = self.reader.write().expect("lock poisoned");
        if guard.is_none() {
            *guard = Some(load(&self.pack_path)?);
        }
        Ok(())
    }

    fn is_initialised(&self) -> bool {
        self.reader.read().expect("lock poisoned").is_some()
    }

    fn erase(&self) -> RepoResult<()> {
        Err(RepoError::ReadOnly)
    }

    fn put_object_from_stream(&self, _reader: &mut dyn Read) -> RepoResult<ObjectKey> {
        Err(RepoError::ReadOnly)
    }

    fn has_objects(&self, keys: &[ObjectKey]) -> RepoResult<Vec<bool>> {
        self.with_reader(|reader| Ok(keys.iter().map(|k| reader.contains(k)).collect()))
    }

    fn open(&self, key: &ObjectKey) -> RepoResult<ObjectReader<'_>> {
        self.with_reader(|reader| match reader.read_object(key)? {
            Some(bytes) => Ok(ObjectReader::new(key.clone(), Cursor::new(bytes))),
            None => Err(RepoError::not_found(key)),
        })
    }

    fn delete_objects(&self, _keys: &[ObjectKey]) -> RepoResult<()> {
        Err(RepoError::ReadOnly)
    }

    fn list_objects(&self) -> RepoResult<ObjectKeys> {
        let keys: Vec<ObjectKey> =
            self.with_reader(|reader| Ok(reader.keys().cloned().collect()))?;
        Ok(ObjectKeys::new(keys.into_iter().map(Ok)))
    }
}

impl fmt::Display for ArchiveRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveRepository: {}", self.pack_path.display())
    }
}

impl fmt::Debug for ArchiveRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveRepositoryBackend")
            .field("pack_path", &self.pack_path)
            .field("key_format", &self.key_format)
            .field("source_uuid", &self.source_uuid)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

/// Outcome of copying objects between repositories.
#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    /// Source key to the key the object received in the target.
    pub mapping: BTreeMap<ObjectKey, ObjectKey>,
    /// Objects the target already held and were not rewritten.
    pub skipped: usize,
    /// Bytes actually written to the target.
    pub bytes_copied: u64,
}

/// Write every object of `source` into a pack at `base` (`.pack` + `.idx`).
pub fn export_archive<S>(source: &S, base: &Path) -> RepoResult<PackFile>
where
    S: RepositoryBackend + ?Sized,
{
    let mut writer = PackWriter::new(base, source.key_format(), source.uuid());
    for key in source.list_objects()? {
        let key = key?;
        let mut reader = source.open(&key)?;
        writer.add_object(key, &mut reader)?;
    }
    let pack = writer.finish()?;
    info!(
        path = %pack.pack_path.display(),
        objects = pack.object_count,
        "archive exported"
    );
    Ok(pack)
}

/// Copy every object of `archive` into `target`.
pub fn import_archive<T>(
    archive: &ArchiveRepositoryBackend,
    target: &T,
) -> RepoResult<ImportReport>
where
    T: RepositoryBackend + ?Sized,
{
    let report = copy_objects(archive, target)?;
    info!(
        archive = %archive.pack_path.display(),
        imported = report.mapping.len() - report.skipped,
        skipped = report.skipped,
        "archive imported"
    );
    Ok(report)
}

/// Copy every object of `source` into `target`, returning the key mapping.
///
/// When both sides mint keys by the same content hash, keys are preserved
/// and objects the target already holds are skipped. Otherwise each object
/// is written again and receives whatever key the target assigns.
pub fn copy_objects<S, T>(source: &S, target: &T) -> RepoResult<ImportReport>
where
    S: RepositoryBackend + ?Sized,
    T: RepositoryBackend + ?Sized,
{
    let shared_hash =
        source.key_format().is_content_addressed() && source.key_format() == target.key_format();
    let mut report = ImportReport::default();

    for key in source.list_objects()? {
        let key = key?;
        if shared_hash && target.has_object(&key)? {
            report.skipped += 1;
            report.mapping.insert(key.clone(), key);
            continue;
        }
        let mut reader = HashingReader::new(source.open(&key)?);
        let new_key = target.put_object_from_stream(&mut reader)?;
        report.bytes_copied += reader.bytes_read();
        report.mapping.insert(key, new_key);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskRepositoryBackend;
    use crate::sandbox::SandboxRepositoryBackend;
    use crate::traits::RepositoryBackendExt;
    use std::fs;

    fn put(backend: &dyn RepositoryBackend, data: &[u8]) -> ObjectKey {
        backend.put_object_from_stream(&mut &data[..]).unwrap()
    }

    fn exported_sandbox(dir: &Path) -> (SandboxRepositoryBackend, Vec<ObjectKey>, PathBuf) {
        let sandbox = SandboxRepositoryBackend::with_parent(dir);
        let keys = vec![
            put(&sandbox, b"alpha"),
            put(&sandbox, b"beta"),
            put(&sandbox, b""),
        ];
        let pack = export_archive(&sandbox, &dir.join("bundle")).unwrap();
        (sandbox, keys, pack.pack_path)
    }

    // -----------------------------------------------------------------------
    // Archive backend
    // -----------------------------------------------------------------------

    #[test]
    fn export_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let (sandbox, keys, pack_path) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(&pack_path).unwrap();

        assert_eq!(archive.kind(), BackendKind::Archive);
        assert_eq!(archive.key_format(), KeyFormat::Uuid4);
        assert!(archive.uuid().is_none());
        assert!(archive.is_initialised());
        for key in &keys {
            assert_eq!(
                archive.get_object_content(key).unwrap(),
                sandbox.get_object_content(key).unwrap()
            );
        }
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(archive.collect_keys().unwrap(), expected);
    }

    #[test]
    fn base_path_and_pack_path_both_open() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, keys, _) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(dir.path().join("bundle")).unwrap();
        assert!(archive.has_object(&keys[0]).unwrap());
    }

    #[test]
    fn archive_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, keys, pack_path) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(&pack_path).unwrap();

        assert!(matches!(
            archive.put_object_from_stream(&mut &b"new"[..]),
            Err(RepoError::ReadOnly)
        ));
        assert!(matches!(archive.delete_objects(&keys), Err(RepoError::ReadOnly)));
        assert!(matches!(archive.erase(), Err(RepoError::ReadOnly)));
        assert!(matches!(
            archive.initialise(&InitialiseOptions { clear: true }),
            Err(RepoError::ReadOnly)
        ));
        assert!(pack_path.exists());
    }

    #[test]
    fn membership_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, keys, pack_path) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(&pack_path).unwrap();
        let missing = ObjectKey::parse("nonexistent").unwrap();

        assert_eq!(
            archive.has_objects(&[keys[1].clone(), missing.clone()]).unwrap(),
            vec![true, false]
        );
        assert!(archive.open(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn missing_archive_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArchiveRepositoryBackend::open(dir.path().join("absent.pack")).unwrap_err();
        assert!(matches!(err, RepoError::InvalidConfig(_)));
    }

    #[test]
    fn corrupted_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, _keys, pack_path) = exported_sandbox(dir.path());
        let mut bytes = fs::read(&pack_path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&pack_path, bytes).unwrap();

        let err = ArchiveRepositoryBackend::open(&pack_path).unwrap_err();
        assert!(matches!(err, RepoError::Pack(_)));
    }

    #[test]
    fn info_counts_objects() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, _keys, pack_path) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(&pack_path).unwrap();
        let info = archive.get_info().unwrap();
        assert_eq!(info.object_count, 3);
        assert_eq!(info.total_bytes, 9);
        assert_eq!(info.location, Some(pack_path));
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    #[test]
    fn disk_export_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskRepositoryBackend::new(dir.path().join("repo"));
        let key = put(&disk, b"persistent");

        let pack = export_archive(&disk, &dir.path().join("snapshot")).unwrap();
        assert_eq!(pack.object_count, 1);

        let archive = ArchiveRepositoryBackend::open(&pack.pack_path).unwrap();
        assert_eq!(archive.uuid(), disk.uuid());
        assert_eq!(archive.key_format(), disk.key_format());
        assert_eq!(archive.get_object_hash(&key).unwrap(), key.as_str());
        archive.verify_object(&key).unwrap();
    }

    #[test]
    fn import_into_random_keyed_target_remaps() {
        let dir = tempfile::tempdir().unwrap();
        let (sandbox, keys, pack_path) = exported_sandbox(dir.path());
        let archive = ArchiveRepositoryBackend::open(&pack_path).unwrap();
        let target = SandboxRepositoryBackend::with_parent(dir.path());

        let report = import_archive(&archive, &target).unwrap();
        assert_eq!(report.mapping.len(), keys.len());
        assert_eq!(report.skipped, 0);
        assert_eq!(report.bytes_copied, 9);
        for (old, new) in &report.mapping {
            assert_ne!(old, new);
            assert_eq!(
                target.get_object_content(new).unwrap(),
                sandbox.get_object_content(old).unwrap()
            );
        }
    }

    #[test]
    fn import_into_content_addressed_target_preserves_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = DiskRepositoryBackend::new(dir.path().join("source"));
        let k1 = put(&source, b"one");
        let k2 = put(&source, b"two");
        let pack = export_archive(&source, &dir.path().join("bundle")).unwrap();
        let archive = ArchiveRepositoryBackend::open(&pack.pack_path).unwrap();

        let target = DiskRepositoryBackend::new(dir.path().join("target"));
        put(&target, b"one");

        let report = import_archive(&archive, &target).unwrap();
        assert_eq!(report.mapping[&k1], k1);
        assert_eq!(report.mapping[&k2], k2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.bytes_copied, 3);
        assert_eq!(target.get_object_content(&k2).unwrap(), b"two");
    }

    #[test]
    fn export_of_empty_repository() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRepositoryBackend::with_parent(dir.path());
        let pack = export_archive(&sandbox, &dir.path().join("empty")).unwrap();
        assert_eq!(pack.object_count, 0);

        let archive = ArchiveRepositoryBackend::open(&pack.pack_path).unwrap();
        assert!(archive.collect_keys().unwrap().is_empty());
    }

    #[test]
    fn copy_between_live_backends() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxRepositoryBackend::with_parent(dir.path());
        let staged = put(&sandbox, b"calc input");
        let disk = DiskRepositoryBackend::new(dir.path().join("repo"));

        let report = copy_objects(&sandbox, &disk).unwrap();
        let stored = &report.mapping[&staged];
        assert_eq!(stored.as_str(), prov_crypto::hash_bytes(b"calc input"));
        assert_eq!(disk.get_object_content(stored).unwrap(), b"calc input");
    }
}
