use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use prov_crypto::hash_reader;
use prov_types::{HashAlgorithm, KeyFormat, ObjectKey, RepositoryUuid};
use serde::Serialize;

use crate::error::{RepoError, RepoResult};

/// The closed set of backend implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral temporary directory, random keys.
    Sandbox,
    /// Durable content-addressed directory store.
    Disk,
    /// Read-only packaged archive.
    Archive,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandbox => write!(f, "sandbox"),
            Self::Disk => write!(f, "disk"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Parameters for [`RepositoryBackend::initialise`].
#[derive(Clone, Debug, Default)]
pub struct InitialiseOptions {
    /// Erase any existing content before (re)creating the backing resource.
    pub clear: bool,
}

/// Scoped read-only stream over one object's bytes.
///
/// The underlying handle is released when the reader is dropped, on every
/// exit path of the caller's scope.
pub struct ObjectReader<'a> {
    key: ObjectKey,
    inner: Box<dyn Read + Send + 'a>,
}

impl<'a> ObjectReader<'a> {
    pub fn new(key: ObjectKey, inner: impl Read + Send + 'a) -> Self {
        Self {
            key,
            inner: Box::new(inner),
        }
    }

    /// The key this reader was opened for.
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }
}

impl Read for ObjectReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for ObjectReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader").field("key", &self.key).finish()
    }
}

/// Lazy enumeration of the keys live when [`RepositoryBackend::list_objects`]
/// was called.
pub struct ObjectKeys {
    inner: Box<dyn Iterator<Item = RepoResult<ObjectKey>> + Send>,
}

impl ObjectKeys {
    pub fn new(inner: impl Iterator<Item = RepoResult<ObjectKey>> + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Iterator for ObjectKeys {
    type Item = RepoResult<ObjectKey>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Summary of a backend instance, for diagnostics and the CLI.
#[derive(Clone, Debug, Serialize)]
pub struct RepositoryInfo {
    pub kind: BackendKind,
    pub location: Option<PathBuf>,
    pub uuid: Option<RepositoryUuid>,
    pub key_format: KeyFormat,
    pub initialised: bool,
    pub object_count: u64,
    pub total_bytes: u64,
}

/// Storage for the binary artifacts referenced by provenance metadata.
///
/// All implementations must satisfy these invariants:
/// - Objects are write-once. A returned key never resolves to different bytes.
/// - An object is either absent or fully present; no reader sees a partial write.
/// - Construction allocates nothing. The first operation (or an explicit
///   [`initialise`](Self::initialise)) creates the backing resource, and any
///   operation after [`erase`](Self::erase) transparently recreates it.
/// - Missing keys surface as [`RepoError::NotFound`], never as a generic I/O
///   error, so callers can tell a dangling reference from a storage outage.
/// - Errors propagate unmodified; nothing is retried or suppressed, except
///   that erasing an already-absent resource succeeds.
///
/// Methods take `&self`: one instance may be shared by many worker threads,
/// and implementations synchronise access to their resource internally.
pub trait RepositoryBackend: Send + Sync + fmt::Debug {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Stable identity, for backends whose storage outlives the process.
    fn uuid(&self) -> Option<RepositoryUuid>;

    /// How this backend mints keys.
    fn key_format(&self) -> KeyFormat;

    /// Where the backing resource lives, if it has a filesystem location.
    fn location(&self) -> Option<PathBuf>;

    /// Allocate the backing resource if absent. Idempotent.
    fn initialise(&self, options: &InitialiseOptions) -> RepoResult<()>;

    fn is_initialised(&self) -> bool;

    /// Irreversibly destroy the backing resource and every object in it.
    ///
    /// Calling this on an uninitialised backend, or when the resource is
    /// already gone, succeeds.
    fn erase(&self) -> RepoResult<()>;

    /// Consume `reader` to the end, store its bytes and return their key.
    fn put_object_from_stream(&self, reader: &mut dyn Read) -> RepoResult<ObjectKey>;

    /// Membership test for many keys at once; the result follows input order.
    fn has_objects(&self, keys: &[ObjectKey]) -> RepoResult<Vec<bool>>;

    /// Open a read-only stream over the object stored under `key`.
    fn open(&self, key: &ObjectKey) -> RepoResult<ObjectReader<'_>>;

    /// Delete every key in `keys`.
    ///
    /// Strict: if any key is missing, nothing is deleted and the call fails
    /// with [`RepoError::NotFound`] naming the missing keys.
    fn delete_objects(&self, keys: &[ObjectKey]) -> RepoResult<()>;

    /// Enumerate the live keys. Each call returns a fresh, independent
    /// iterator; mutation during iteration is not reflected reliably.
    fn list_objects(&self) -> RepoResult<ObjectKeys>;

    fn has_object(&self, key: &ObjectKey) -> RepoResult<bool> {
        let found = self.has_objects(std::slice::from_ref(key))?;
        Ok(found.first().copied().unwrap_or(false))
    }

    fn delete_object(&self, key: &ObjectKey) -> RepoResult<()> {
        self.delete_objects(std::slice::from_ref(key))
    }

    /// Store the contents of a local regular file.
    fn put_object_from_file(&self, path: &Path) -> RepoResult<ObjectKey> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(RepoError::Validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let mut file = File::open(path)?;
        self.put_object_from_stream(&mut file)
    }

    /// Read an entire object into memory.
    fn get_object_content(&self, key: &ObjectKey) -> RepoResult<Vec<u8>> {
        let mut reader = self.open(key)?;
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        Ok(content)
    }

    /// BLAKE3 hex digest of the object's bytes.
    ///
    /// For a BLAKE3 content-addressed backend this is the key itself and the
    /// object is not re-read.
    fn get_object_hash(&self, key: &ObjectKey) -> RepoResult<String> {
        if self.key_format() == KeyFormat::ContentHash(HashAlgorithm::Blake3) {
            if !self.has_object(key)? {
                return Err(RepoError::not_found(key));
            }
            return Ok(key.as_str().to_string());
        }
        let (digest, _) = hash_reader(self.open(key)?)?;
        Ok(digest)
    }

    /// Count objects and bytes. Backends override this with cheaper metadata
    /// lookups; the default reads every object.
    fn get_info(&self) -> RepoResult<RepositoryInfo> {
        let mut info = RepositoryInfo {
            kind: self.kind(),
            location: self.location(),
            uuid: self.uuid(),
            key_format: self.key_format(),
            initialised: self.is_initialised(),
            object_count: 0,
            total_bytes: 0,
        };
        if !info.initialised {
            return Ok(info);
        }
        for key in self.list_objects()? {
            let key = key?;
            let mut reader = self.open(&key)?;
            info.total_bytes += io::copy(&mut reader, &mut io::sink())?;
            info.object_count += 1;
        }
        Ok(info)
    }
}

/// Scoped helpers available on every backend, including trait objects.
pub trait RepositoryBackendExt: RepositoryBackend {
    /// Run `f` with a reader over `key`; the reader is released before this
    /// returns, whether `f` succeeds or fails.
    fn with_object<R, F>(&self, key: &ObjectKey, f: F) -> RepoResult<R>
    where
        F: FnOnce(&mut ObjectReader<'_>) -> RepoResult<R>,
    {
        let mut reader = self.open(key)?;
        f(&mut reader)
    }

    /// Visit `(key, reader)` pairs in order. Each reader is dropped before the
    /// next object is opened.
    fn iter_object_streams<F>(&self, keys: &[ObjectKey], mut f: F) -> RepoResult<()>
    where
        F: FnMut(&ObjectKey, &mut ObjectReader<'_>) -> RepoResult<()>,
    {
        for key in keys {
            let mut reader = self.open(key)?;
            f(key, &mut reader)?;
        }
        Ok(())
    }

    /// Check that a content-addressed object still hashes to its key.
    ///
    /// Backends with random keys have nothing to check against; for those
    /// this only confirms the object is readable.
    fn verify_object(&self, key: &ObjectKey) -> RepoResult<()> {
        let (digest, _) = hash_reader(self.open(key)?)?;
        if self.key_format().is_content_addressed() && digest != key.as_str() {
            return Err(RepoError::Corrupt {
                key: key.clone(),
                reason: format!("content hashes to {digest}"),
            });
        }
        Ok(())
    }

    /// Collect the live keys, failing on the first enumeration error.
    fn collect_keys(&self) -> RepoResult<Vec<ObjectKey>> {
        self.list_objects()?.collect()
    }
}

impl<T: RepositoryBackend + ?Sized> RepositoryBackendExt for T {}
