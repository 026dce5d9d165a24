use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use prov_types::ObjectKey;

use crate::entry::{decode_varint, PackHeader, CHECKSUM_LEN};
use crate::error::{PackError, PackResult};
use crate::index::PackIndex;

/// Backing bytes of an opened pack.
enum PackData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PackData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Reads objects from a pack file using an index for random access.
pub struct PackReader {
    pack_data: PackData,
    header: PackHeader,
    index: PackIndex,
}

impl PackReader {
    /// Open from raw bytes.
    pub fn from_bytes(pack_data: Vec<u8>, index: PackIndex) -> PackResult<Self> {
        Self::from_data(PackData::Owned(pack_data), index)
    }

    /// Open `<base>.pack` and its sibling `<base>.idx`, memory-mapping the pack.
    pub fn open(pack_path: &Path) -> PackResult<Self> {
        let file = File::open(pack_path)?;
        // SAFETY: archives are written once via rename and never modified in
        // place, so the mapping is not mutated underneath us.
        let map = unsafe { Mmap::map(&file)? };
        let index_path = pack_path.with_extension("idx");
        let index_data = std::fs::read(&index_path)?;
        let index = PackIndex::from_bytes(&index_data)?;
        Self::from_data(PackData::Mapped(map), index)
    }

    fn from_data(pack_data: PackData, index: PackIndex) -> PackResult<Self> {
        let (header, _) = PackHeader::decode(&pack_data)?;
        let trailer = &pack_data[pack_data.len() - CHECKSUM_LEN..];
        if trailer != index.pack_checksum {
            return Err(PackError::ChecksumMismatch);
        }
        if header.object_count as usize != index.object_count() {
            return Err(PackError::IndexCorrupted(format!(
                "index lists {} objects, pack header {}",
                index.object_count(),
                header.object_count
            )));
        }
        Ok(Self {
            pack_data,
            header,
            index,
        })
    }

    /// Recompute the BLAKE3 checksum over the whole pack.
    pub fn verify_checksum(&self) -> PackResult<()> {
        let body_end = self.pack_data.len() - CHECKSUM_LEN;
        let computed = blake3::hash(&self.pack_data[..body_end]);
        if computed.as_bytes()[..] != self.pack_data[body_end..] {
            return Err(PackError::ChecksumMismatch);
        }
        Ok(())
    }

    /// Read an object by key.
    pub fn read_object(&self, key: &ObjectKey) -> PackResult<Option<Vec<u8>>> {
        let (offset, expected_crc) = match self.index.lookup(key) {
            Some(v) => v,
            None => return Ok(None),
        };
        self.read_at_offset(key, offset, expected_crc).map(Some)
    }

    /// Check containment.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.index.contains(key)
    }

    /// Object count.
    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// The decoded pack header.
    pub fn header(&self) -> &PackHeader {
        &self.header
    }

    /// Access the index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// All keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.index.keys()
    }

    /// Total size of the pack in bytes.
    pub fn pack_size(&self) -> u64 {
        self.pack_data.len() as u64
    }

    fn read_at_offset(
        &self,
        key: &ObjectKey,
        offset: u64,
        expected_crc: u32,
    ) -> PackResult<Vec<u8>> {
        let body_end = self.pack_data.len() - CHECKSUM_LEN;
        let data = &self.pack_data[..body_end];
        let corrupt = |reason: &str| PackError::CorruptEntry {
            offset,
            reason: reason.to_string(),
        };
        let mut pos = usize::try_from(offset).map_err(|_| corrupt("offset out of range"))?;
        if pos >= data.len() {
            return Err(corrupt("offset beyond pack data"));
        }

        let (key_len, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;
        let key_end = pos
            .checked_add(key_len as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupt("key extends beyond pack"))?;
        if &data[pos..key_end] != key.as_str().as_bytes() {
            return Err(corrupt("entry key does not match index"));
        }
        pos = key_end;

        let (uncompressed_size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;
        let (compressed_size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;

        let end = pos
            .checked_add(compressed_size as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupt("compressed data extends beyond pack"))?;
        let compressed = &data[pos..end];

        if crc32fast::hash(compressed) != expected_crc {
            return Err(PackError::CrcMismatch { key: key.clone() });
        }

        let decompressed = zstd::decode_all(compressed)
            .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;

        if decompressed.len() as u64 != uncompressed_size {
            return Err(corrupt(&format!(
                "size mismatch: expected {uncompressed_size}, got {}",
                decompressed.len()
            )));
        }
        Ok(decompressed)
    }
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("object_count", &self.object_count())
            .field("key_format", &self.header.key_format)
            .field("pack_size", &self.pack_size())
            .finish()
    }
}
