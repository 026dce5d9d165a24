use prov_types::ObjectKey;

use crate::entry::{read_u32, read_u64, CHECKSUM_LEN};
use crate::error::{PackError, PackResult};

const INDEX_MAGIC: &[u8; 4] = b"PRVI";
const INDEX_VERSION: u32 = 1;

/// Location of one object inside a pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: ObjectKey,
    /// CRC32 of the compressed payload.
    pub crc32: u32,
    /// Byte offset of the entry within the pack file.
    pub offset: u64,
}

/// Pack index for fast random-access lookups.
///
/// Layout:
/// - Magic, version, entry count
/// - Entries sorted by key: key length (u16), key bytes, CRC32, offset
/// - Pack checksum (ties the index to exactly one pack file)
#[derive(Clone, Debug)]
pub struct PackIndex {
    pub entries: Vec<IndexEntry>,
    pub pack_checksum: [u8; 32],
}

impl PackIndex {
    /// Build an index from unsorted entries and a pack checksum.
    pub fn build(mut entries: Vec<IndexEntry>, pack_checksum: [u8; 32]) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            entries,
            pack_checksum,
        }
    }

    /// Look up an object's (offset, crc32) by key.
    pub fn lookup(&self, key: &ObjectKey) -> Option<(u64, u32)> {
        self.entries
            .binary_search_by(|probe| probe.key.cmp(key))
            .ok()
            .map(|pos| (self.entries[pos].offset, self.entries[pos].crc32))
    }

    /// Total object count.
    pub fn object_count(&self) -> usize {
        self.entries.len()
    }

    /// Check if an object exists.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.entries.iter().map(|e| &e.key)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            let key = entry.key.as_str().as_bytes();
            // Keys are at most 255 bytes, so the length always fits.
            buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&entry.crc32.to_be_bytes());
            buf.extend_from_slice(&entry.offset.to_be_bytes());
        }
        buf.extend_from_slice(&self.pack_checksum);
        buf
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 12 {
            return Err(PackError::IndexCorrupted("too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: "PRVI".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(data, 4);
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = read_u32(data, 8) as usize;

        let mut pos = 12;
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            if data.len() < pos + 2 {
                return Err(PackError::IndexCorrupted("entry truncated".into()));
            }
            let key_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if data.len() < pos + key_len + 12 {
                return Err(PackError::IndexCorrupted("entry truncated".into()));
            }
            let key_text = std::str::from_utf8(&data[pos..pos + key_len])
                .map_err(|e| PackError::IndexCorrupted(format!("key is not UTF-8: {e}")))?;
            let key = ObjectKey::parse(key_text)
                .map_err(|e| PackError::IndexCorrupted(e.to_string()))?;
            pos += key_len;
            let crc32 = read_u32(data, pos);
            let offset = read_u64(data, pos + 4);
            pos += 12;
            entries.push(IndexEntry { key, crc32, offset });
        }

        if data.len() < pos + CHECKSUM_LEN {
            return Err(PackError::IndexCorrupted("checksum truncated".into()));
        }
        let mut pack_checksum = [0u8; 32];
        pack_checksum.copy_from_slice(&data[pos..pos + CHECKSUM_LEN]);

        if entries.windows(2).any(|w| w[0].key >= w[1].key) {
            return Err(PackError::IndexCorrupted("entries not sorted".into()));
        }

        Ok(Self {
            entries,
            pack_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, crc32: u32, offset: u64) -> IndexEntry {
        IndexEntry {
            key: ObjectKey::parse(key).unwrap(),
            crc32,
            offset,
        }
    }

    #[test]
    fn build_empty_index() {
        let idx = PackIndex::build(vec![], [0u8; 32]);
        assert_eq!(idx.object_count(), 0);
    }

    #[test]
    fn build_sorts_and_looks_up() {
        let idx = PackIndex::build(
            vec![entry("zeta", 3, 300), entry("alpha", 1, 100), entry("mid", 2, 200)],
            [0u8; 32],
        );
        let keys: Vec<&str> = idx.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
        assert_eq!(idx.lookup(&ObjectKey::parse("mid").unwrap()), Some((200, 2)));
    }

    #[test]
    fn lookup_missing_returns_none() {
        let idx = PackIndex::build(vec![entry("present", 1, 10)], [0u8; 32]);
        assert!(!idx.contains(&ObjectKey::parse("missing").unwrap()));
    }

    #[test]
    fn serialization_roundtrip() {
        let idx = PackIndex::build(
            (0..5).map(|i| entry(&format!("key-{i}"), i * 7, (i * 50) as u64)).collect(),
            [0xAB; 32],
        );
        let idx2 = PackIndex::from_bytes(&idx.to_bytes()).unwrap();
        assert_eq!(idx2.entries, idx.entries);
        assert_eq!(idx2.pack_checksum, [0xAB; 32]);
    }

    #[test]
    fn from_bytes_bad_magic() {
        let err = PackIndex::from_bytes(b"BADMxxxxxxxx").unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }

    #[test]
    fn from_bytes_bad_version() {
        let mut data = Vec::new();
        data.extend_from_slice(b"PRVI");
        data.extend_from_slice(&99u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let err = PackIndex::from_bytes(&data).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedVersion(99)));
    }

    #[test]
    fn from_bytes_truncated() {
        let err = PackIndex::from_bytes(b"PRVI").unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));

        let mut bytes = PackIndex::build(vec![entry("k", 1, 1)], [0u8; 32]).to_bytes();
        bytes.truncate(bytes.len() - 40);
        assert!(matches!(
            PackIndex::from_bytes(&bytes).unwrap_err(),
            PackError::IndexCorrupted(_)
        ));
    }

    #[test]
    fn from_bytes_rejects_invalid_key() {
        let mut data = Vec::new();
        data.extend_from_slice(b"PRVI");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(b"a/b");
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0u8; 32]);
        let err = PackIndex::from_bytes(&data).unwrap_err();
        assert!(matches!(err, PackError::IndexCorrupted(_)));
    }
}
