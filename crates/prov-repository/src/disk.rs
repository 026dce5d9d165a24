use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use prov_crypto::{ContentHasher, HashingReader};
use prov_types::{KeyFormat, ObjectKey, RepositoryUuid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RepoError, RepoResult};
use crate::traits::{
    BackendKind, InitialiseOptions, ObjectKeys, ObjectReader, RepositoryBackend, RepositoryInfo,
};

const CONFIG_FILE: &str = "config.json";
const OBJECTS_DIR: &str = "objects";
const STAGING_DIR: &str = "staging";
const LAYOUT_VERSION: u32 = 1;

/// Length of a lowercase hex BLAKE3 digest.
const DIGEST_LEN: usize = 64;

/// Persisted identity and layout metadata of a disk repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub version: u32,
    pub uuid: RepositoryUuid,
    pub key_format: KeyFormat,
    pub created_at: DateTime<Utc>,
}

/// Durable, content-addressed backend over a directory.
///
/// Layout:
/// ```text
/// <root>/config.json                  identity and key format
/// <root>/objects/<2 hex>/<62 hex>     one file per object
/// <root>/staging/                     in-flight writes
/// ```
///
/// Keys are the BLAKE3 digest of the object bytes, so identical content is
/// stored once. Writes land in `staging/` and are renamed into place only
/// once complete and synced.
pub struct DiskRepositoryBackend {
    root: PathBuf,
    config: RwLock<Option<DiskConfig>>,
}

impl DiskRepositoryBackend {
    /// A backend rooted at `root`. Nothing is touched until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Where `key` lives, or `None` if `key` cannot be a digest minted here.
    fn object_path(&self, key: &ObjectKey) -> Option<PathBuf> {
        let (shard, rest) = split_digest(key)?;
        Some(self.objects_dir().join(shard).join(rest))
    }

    /// Run `f` with the loaded configuration, initialising on first use.
    fn with_config<R>(&self, f: impl FnOnce(&DiskConfig) -> RepoResult<R>) -> RepoResult<R> {
        loop {
            {
                let guard = self.config.read().expect("lock poisoned");
                if let Some(config) = guard.as_ref() {
                    return f(config);
                }
            }
            self.initialise(&InitialiseOptions::default())?;
        }
    }

    fn read_config(&self) -> RepoResult<Option<DiskConfig>> {
        let path = self.root.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: DiskConfig = serde_json::from_str(&text).map_err(|e| {
            RepoError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        if config.version != LAYOUT_VERSION {
            return Err(RepoError::InvalidConfig(format!(
                "unsupported repository layout version {}",
                config.version
            )));
        }
        if !config.key_format.is_content_addressed() {
            return Err(RepoError::InvalidConfig(format!(
                "disk repository requires a content-addressed key format, found {}",
                config.key_format
            )));
        }
        Ok(Some(config))
    }

    fn write_config(&self, config: &DiskConfig) -> RepoResult<()> {
        let json = serde_json::to_vec_pretty(config)
            .map_err(|e| RepoError::Config(e.to_string()))?;
        let mut staged = tempfile::NamedTempFile::new_in(self.staging_dir())?;
        staged.write_all(&json)?;
        staged.as_file().sync_all()?;
        staged
            .persist(self.root.join(CONFIG_FILE))
            .map_err(|e| RepoError::Io(e.error))?;
        Ok(())
    }

    fn remove_root(&self) -> RepoResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                info!(path = %self.root.display(), "disk repository erased");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Membership of many keys, reading each shard directory once.
    fn batch_membership(&self, keys: &[ObjectKey]) -> RepoResult<Vec<bool>> {
        let mut shards: HashMap<&str, HashSet<OsString>> = HashMap::new();
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            let Some((shard, rest)) = split_digest(key) else {
                found.push(false);
                continue;
            };
            if !shards.contains_key(shard) {
                shards.insert(shard, list_shard(&self.objects_dir().join(shard))?);
            }
            found.push(shards[shard].contains(OsStr::new(rest)));
        }
        Ok(found)
    }
}

/// Split a digest key into its shard directory and file name.
fn split_digest(key: &ObjectKey) -> Option<(&str, &str)> {
    let s = key.as_str();
    let is_digest = s.len() == DIGEST_LEN
        && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    is_digest.then(|| s.split_at(2))
}

fn list_shard(dir: &Path) -> RepoResult<HashSet<OsString>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = HashSet::new();
    for entry in entries {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

impl RepositoryBackend for DiskRepositoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Disk
    }

    fn uuid(&self) -> Option<RepositoryUuid> {
        if let Some(config) = self.config.read().expect("lock poisoned").as_ref() {
            return Some(config.uuid);
        }
        match self.read_config() {
            Ok(config) => config.map(|c| c.uuid),
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "cannot read repository identity");
                None
            }
        }
    }

    fn key_format(&self) -> KeyFormat {
        KeyFormat::ContentHash(ContentHasher::ALGORITHM)
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }

    fn initialise(&self, options: &InitialiseOptions) -> RepoResult<()> {
        let mut guard = self.config.write().expect("lock poisoned");
        if options.clear {
            *guard = None;
            self.remove_root()?;
        }
        if guard.is_some() && self.root.join(CONFIG_FILE).is_file() {
            return Ok(());
        }
        if self.root.exists() && !self.root.is_dir() {
            return Err(RepoError::InvalidConfig(format!(
                "{} exists and is not a directory",
                self.root.display()
            )));
        }

        fs::create_dir_all(self.objects_dir())?;
        fs::create_dir_all(self.staging_dir())?;

        let config = match self.read_config()? {
            Some(config) => config,
            None => {
                let config = DiskConfig {
                    version: LAYOUT_VERSION,
                    uuid: RepositoryUuid::new(),
                    key_format: self.key_format(),
                    created_at: Utc::now(),
                };
                self.write_config(&config)?;
                info!(path = %self.root.display(), uuid = %config.uuid, "disk repository created");
                config
            }
        };
        *guard = Some(config);
        Ok(())
    }

    fn is_initialised(&self) -> bool {
        self.root.join(CONFIG_FILE).is_file()
    }

    fn erase(&self) -> RepoResult<()> {
        let mut guard = self.config.write().expect("lock poisoned");
        *guard = None;
        self.remove_root()
    }

    fn put_object_from_stream(&self, reader: &mut dyn Read) -> RepoResult<ObjectKey> {
        self.with_config(|_| {
            let mut staged = tempfile::NamedTempFile::new_in(self.staging_dir())?;
            let mut hashing = HashingReader::new(reader);
            io::copy(&mut hashing, &mut staged)?;
            staged.as_file().sync_all()?;

            let key = hashing.digest_key();
            let size = hashing.bytes_read();
            let dest = self.object_path(&key).ok_or_else(|| {
                RepoError::Validation(format!("digest {key} is not a storable key"))
            })?;
            if dest.is_file() {
                debug!(key = %key, "object already present; write skipped");
                return Ok(key);
            }
            if let Some(shard) = dest.parent() {
                fs::create_dir_all(shard)?;
            }
            staged.persist(&dest).map_err(|e| RepoError::Io(e.error))?;
            debug!(key = %key, size, "object stored");
            Ok(key)
        })
    }

    fn has_objects(&self, keys: &[ObjectKey]) -> RepoResult<Vec<bool>> {
        self.with_config(|_| self.batch_membership(keys))
    }

    fn open(&self, key: &ObjectKey) -> RepoResult<ObjectReader<'_>> {
        self.with_config(|_| {
            let path = self.object_path(key).ok_or_else(|| RepoError::not_found(key))?;
            match File::open(path) {
                Ok(file) => Ok(ObjectReader::new(key.clone(), file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RepoError::not_found(key)),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_objects(&self, keys: &[ObjectKey]) -> RepoResult<()> {
        self.with_config(|_| {
            let present = self.batch_membership(keys)?;
            let missing: Vec<ObjectKey> = keys
                .iter()
                .zip(&present)
                .filter(|(_, &found)| !found)
                .map(|(key, _)| key.clone())
                .collect();
            if !missing.is_empty() {
                return Err(RepoError::NotFound(missing));
            }
            let mut removed = HashSet::with_capacity(keys.len());
            for key in keys {
                if !removed.insert(key) {
                    continue;
                }
                let path = self.object_path(key).ok_or_else(|| RepoError::not_found(key))?;
                match fs::remove_file(path) {
                    Ok(()) => debug!(key = %key, "object deleted"),
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
        let objects = self.with_config(|_| Ok(self.objects_dir()))?;
        let walker = WalkDir::new(objects)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter();
        Ok(ObjectKeys::new(walker.filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(RepoError::Io(e.into()))),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let shard = entry.path().parent()?.file_name()?.to_str()?;
            let rest = entry.file_name().to_str()?;
            let key = ObjectKey::parse(format!("{shard}{rest}")).ok()?;
            split_digest(&key)?;
            Some(Ok(key))
        })))
    }

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
            if let Some(path) = self.object_path(&key) {
                info.object_count += 1;
                info.total_bytes += fs::metadata(path)?.len();
            }
        }
        Ok(info)
    }
}

impl fmt::Display for DiskRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskRepository: {}", self.root.display())
    }
}

impl fmt::Debug for DiskRepositoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskRepositoryBackend")
            .field("root", &self.root)
            .finish()
    }
}
