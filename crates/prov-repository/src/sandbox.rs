use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use prov_types::{KeyFormat, ObjectKey, RepositoryUuid};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};
use crate::traits::{
    BackendKind, InitialiseOptions, ObjectKeys, ObjectReader, RepositoryBackend, RepositoryInfo,
};

const SANDBOX_PREFIX: &str = "prov-sandbox-";

/// Staging files start with '.', which no valid key does.
const STAGING_PREFIX: &str = ".staging-";

/// Ephemeral, non-deduplicating backend over a private temporary directory.
///
/// Intended for transient staging, e.g. assembling calculation inputs before
/// submission. Each `put` mints a fresh UUID v4 key, so storing the same
/// bytes twice yields two keys. The directory is flat: one regular file per
/// key, named by the key.
///
/// The directory is created on first use and removed by [`erase`]. Dropping
/// the backend also removes it, but only as a leak backstop: call `erase` (or
/// use [`SandboxRepositoryBackend::scoped`]) wherever cleanup must happen at
/// a known point.
///
/// [`erase`]: RepositoryBackend::erase
pub struct SandboxRepositoryBackend {
    parent: Option<PathBuf>,
    sandbox: RwLock<Option<TempDir>>,
}

impl SandboxRepositoryBackend {
    /// A sandbox under the system temporary directory.
    pub fn new() -> Self {
        Self {
            parent: None,
            sandbox: RwLock::new(None),
        }
    }

    /// A sandbox created inside `parent`, which must already exist.
    pub fn with_parent(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
            sandbox: RwLock::new(None),
        }
    }

    /// Run `f` against a fresh sandbox and erase it on every return path.
    ///
    /// If `f` fails its error is returned and an erase failure is only
    /// logged; if `f` succeeds an erase failure is returned instead of the
    /// value. A panic in `f` still removes the directory through `Drop`.
    pub fn scoped<R, F>(f: F) -> RepoResult<R>
    where
        F: FnOnce(&SandboxRepositoryBackend) -> RepoResult<R>,
    {
        let backend = Self::new();
        let result = f(&backend);
        let erased = backend.erase();
        match result {
            Ok(value) => erased.map(|()| value),
            Err(e) => {
                if let Err(erase_err) = erased {
                    warn!(error = %erase_err, "failed to erase scoped sandbox");
                }
                Err(e)
            }
        }
    }

    /// Run `f` with the sandbox directory, creating it first if needed.
    ///
    /// The read guard is held for the duration of `f`, so an `erase` waits
    /// for in-flight operations instead of pulling the directory out from
    /// under them.
    fn with_dir<R>(&self, f: impl FnOnce(&Path) -> RepoResult<R>) -> RepoResult<R> {
        loop {
            {
                let guard = self.sandbox.read().expect("lock poisoned");
                if let Some(dir) = guard.as_ref() {
                    return f(dir.path());
                }
            }
            self.create_dir()?;
        }
    }

    fn create_dir(&self) -> RepoResult<()> {
        let mut guard = self.sandbox.write().expect("lock poisoned");
        if guard.is_some() {
            return Ok(());
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix(SANDBOX_PREFIX);
        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent).map_err(|e| {
                RepoError::InvalidConfig(format!(
                    "cannot create sandbox in {}: {e}",
                    parent.display()
                ))
            })?,
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "sandbox created");
        *guard = Some(dir);
        Ok(())
    }

    /// Names present in the directory right now, staging files excluded.
    fn snapshot(dir: &Path) -> RepoResult<HashSet<OsString>> {
        let mut names = HashSet::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name();
            if !name.to_string_lossy().starts_with('.') {
                names.insert(name);
            }
        }
        Ok(names)
    }

    fn remove_dir(dir: TempDir) -> RepoResult<()> {
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => {
                debug!(path = %path.display(), "sandbox erased");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "sandbox already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for SandboxRepositoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryBackend for SandboxRepositoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sandbox
    }

    /// A sandbox has no identity.
    fn uuid(&self) -> Option<RepositoryUuid> {
        None
    }

    fn key_format(&self) -> KeyFormat {
        KeyFormat::Uuid4
    }

    fn location(&self) -> Option<PathBuf> {
        let guard = self.sandbox.read().expect("lock poisoned");
        guard.as_ref().map(|dir| dir.path().to_path_buf())
    }

    fn initialise(&self, options: &InitialiseOptions) -> RepoResult<()> {
        if options.clear {
            self.erase()?;
        }
        self.create_dir()
    }

    fn is_initialised(&self) -> bool {
        self.sandbox.read().expect("lock poisoned").is_some()
    }

    fn erase(&self) -> RepoResult<()> {
        // Take the directory out first: the backend is uninitialised from
        // here on even if removal fails part way.
        let taken = self.sandbox.write().expect("lock poisoned").take();
        match taken {
            Some(dir) => Self::remove_dir(dir),
            None => Ok(()),
        }
    }

    fn put_object_from_stream(&self, reader: &mut dyn Read) -> RepoResult<ObjectKey> {
        self.with_dir(|dir| {
            let key = ObjectKey::random();
            let mut staged = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(dir)?;
            let size = io::copy(reader, &mut staged)?;
            staged.flush()?;
            staged
                .persist_noclobber(dir.join(key.as_str()))
                .map_err(|e| RepoError::Io(e.error))?;
            debug!(key = %key, size, "object stored in sandbox");
            Ok(key)
        })
    }

    fn has_objects(&self, keys: &[ObjectKey]) -> RepoResult<Vec<bool>> {
        self.with_dir(|dir| {
            let names = Self::snapshot(dir)?;
            Ok(keys
                .iter()
                .map(|key| names.contains(OsStr::new(key.as_str())))
                .collect())
        })
    }

    fn open(&self, key: &ObjectKey) -> RepoResult<ObjectReader<'_>> {
        self.with_dir(|dir| match File::open(dir.join(key.as_str())) {
            Ok(file) => Ok(ObjectReader::new(key.clone(), file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RepoError::not_found(key)),
            Err(e) => Err(e.into()),
        })
    }

    fn delete_objects(&self, keys: &[ObjectKey]) -> RepoResult<()> {
        self.with_dir(|dir| {
            let names = Self::snapshot(dir)?;
            let missing: Vec<ObjectKey> = keys
                .iter()
                .filter(|key| !names.contains(OsStr::new(key.as_str())))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(RepoError::NotFound(missing));
            }
            let mut removed = HashSet::with_capacity(keys.len());
            for key in keys {
                if !removed.insert(key) {
                    continue;
                }
                match fs::remove_file(dir.join(key.as_str())) {
                    Ok(()) => debug!(key = %key, "object deleted from sandbox"),
                    // Deleted concurrently.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(RepoError::not_found(key))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    fn list_objects(&self) -> RepoResult<ObjectKeys> {
        let entries = self.with_dir(|dir| Ok(fs::read_dir(dir)?))?;
        Ok(ObjectKeys::new(entries.filter_map(|entry| {
            let name = match entry {
                Ok(entry) => entry.file_name(),
                Err(e) => return Some(Err(e.into())),
            };
            // Staging files and names that are not keys are not objects.
            ObjectKey::parse(name.to_str()?).ok().map(Ok)
        })))
    }

    fn get_info(&self) -> RepoResult<RepositoryInfo> {
        let mut info = RepositoryInfo {
            kind: self.kind(),
            location: self.location(),
            uuid: None,
            key_format: self.key_format(),
            initialised: self.is_initialised(),
            object_count: 0,
            total_bytes: 0,
        };
        if let Some(dir) = self.sandbox.read().expect("lock poisoned").as_ref() {
            for entry in fs::read_dir(dir.path())? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                info.object_count += 1;
                info.total_bytes += entry.metadata()?.len();
            }
        }
        Ok(info)
    }
}

impl Drop for SandboxRepositoryBackend {
    fn drop(&mut self) {
        let slot = self.sandbox.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = slot.take() {
            debug!(path = %dir.path().display(), "sandbox dropped without erase; removing");
            if let Err(e) = Self::remove_dir(dir) {
                warn!(error = %e, "failed to remove sandbox on drop");
            }
        }
    }
}

impl fmt::Display for SandboxRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(path) => write!(f, "SandboxRepository: {}", path.display()),
            None => write!(f, "SandboxRepository: <uninitialised>"),
        }
    }
}

impl fmt::Debug for SandboxRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxRepositoryBackend")
            .field("location", &self.location())
            .finish()
    }
}
