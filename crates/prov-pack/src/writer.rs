use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use prov_crypto::HashingReader;
use prov_types::{KeyFormat, ObjectKey, RepositoryUuid};
use tracing::debug;

use crate::entry::{encode_varint, PackHeader};
use crate::error::{PackError, PackResult};
use crate::index::{IndexEntry, PackIndex};

const COMPRESSION_LEVEL: i32 = 3;

/// Result of writing a pack file.
#[derive(Clone, Debug)]
pub struct PackFile {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub object_count: usize,
    pub checksum: [u8; 32],
}

/// An object already compressed and waiting to be laid out.
struct PendingEntry {
    key: ObjectKey,
    uncompressed_len: u64,
    compressed: Vec<u8>,
}

/// Builds a pack file from a collection of object streams.
///
/// Objects are compressed as they are added, so the writer holds compressed
/// payloads only.
pub struct PackWriter {
    path: PathBuf,
    key_format: KeyFormat,
    source_uuid: Option<RepositoryUuid>,
    entries: Vec<PendingEntry>,
    seen: HashSet<ObjectKey>,
}

impl PackWriter {
    /// Create a new PackWriter targeting the given base path.
    ///
    /// `key_format` and `source_uuid` describe the repository the objects
    /// come from and are recorded in the pack header.
    pub fn new(path: &Path, key_format: KeyFormat, source_uuid: Option<RepositoryUuid>) -> Self {
        Self {
            path: path.to_path_buf(),
            key_format,
            source_uuid,
            entries: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Drain `reader` into the pack under `key`. Returns the uncompressed size.
    pub fn add_object(&mut self, key: ObjectKey, reader: &mut dyn Read) -> PackResult<u64> {
        if self.seen.contains(&key) {
            return Err(PackError::DuplicateKey(key));
        }
        let mut counting = HashingReader::new(reader);
        let compressed = zstd::encode_all(&mut counting, COMPRESSION_LEVEL)
            .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
        let uncompressed_len = counting.bytes_read();

        self.seen.insert(key.clone());
        self.entries.push(PendingEntry {
            key,
            uncompressed_len,
            compressed,
        });
        Ok(uncompressed_len)
    }

    /// Number of objects queued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the pack and index to disk.
    ///
    /// Both files are staged next to their destination and renamed into
    /// place, so a reader never sees a half-written archive.
    pub fn finish(self) -> PackResult<PackFile> {
        let pack_path = self.path.with_extension("pack");
        let index_path = self.path.with_extension("idx");
        let dir = match pack_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (pack_data, index) = self.build_pack_bytes()?;

        write_atomically(&dir, &pack_path, &pack_data)?;
        write_atomically(&dir, &index_path, &index.to_bytes())?;

        debug!(
            path = %pack_path.display(),
            objects = index.object_count(),
            bytes = pack_data.len(),
            "pack written"
        );

        Ok(PackFile {
            pack_path,
            index_path,
            object_count: index.object_count(),
            checksum: index.pack_checksum,
        })
    }

    /// Build pack bytes and index in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        self.build_pack_bytes()
    }

    fn build_pack_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let mut pack_data = Vec::new();
        let mut index_entries = Vec::with_capacity(self.entries.len());

        PackHeader {
            object_count: self.entries.len() as u32,
            key_format: self.key_format,
            source_uuid: self.source_uuid,
        }
        .encode(&mut pack_data);

        for entry in self.entries {
            let offset = pack_data.len() as u64;
            let key = entry.key.as_str().as_bytes();

            encode_varint(&mut pack_data, key.len() as u64);
            pack_data.extend_from_slice(key);
            encode_varint(&mut pack_data, entry.uncompressed_len);
            encode_varint(&mut pack_data, entry.compressed.len() as u64);

            let crc32 = crc32fast::hash(&entry.compressed);
            pack_data.extend_from_slice(&entry.compressed);

            index_entries.push(IndexEntry {
                key: entry.key,
                crc32,
                offset,
            });
        }

        // Pack trailer: BLAKE3 checksum of everything so far
        let checksum = *blake3::hash(&pack_data).as_bytes();
        pack_data.extend_from_slice(&checksum);

        let index = PackIndex::build(index_entries, checksum);
        Ok((pack_data, index))
    }
}

fn write_atomically(dir: &Path, dest: &Path, data: &[u8]) -> PackResult<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(".pack-staging-")
        .tempfile_in(dir)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged.persist(dest).map_err(|e| PackError::Io(e.error))?;
    Ok(())
}
