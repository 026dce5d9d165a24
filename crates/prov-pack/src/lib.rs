//! Portable archive container for the provenance object repository.
//!
//! An archive is a pair of files that together hold every object of one
//! repository, so it can be copied to another machine and read back without
//! the original backend.
//!
//! # Architecture
//!
//! - **Pack file** (`.pack`): header, concatenated zstd-compressed objects, BLAKE3 trailer
//! - **Pack index** (`.idx`): keys sorted for O(log n) lookups, with CRC32 and offset per key
//! - **PackWriter**: builds packs from object streams
//! - **PackReader**: memory-mapped random-access reading using the index

pub mod entry;
pub mod error;
pub mod index;
pub mod reader;
pub mod writer;

pub use entry::PackHeader;
pub use error::{PackError, PackResult};
pub use index::{IndexEntry, PackIndex};
pub use reader::PackReader;
pub use writer::{PackFile, PackWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use prov_types::{HashAlgorithm, KeyFormat, ObjectKey, RepositoryUuid};

    fn key(s: &str) -> ObjectKey {
        ObjectKey::parse(s).unwrap()
    }

    fn writer() -> PackWriter {
        PackWriter::new(std::path::Path::new("/tmp/test-pack"), KeyFormat::Uuid4, None)
    }

    #[test]
    fn write_read_roundtrip_single() {
        let mut writer = writer();
        writer.add_object(key("k1"), &mut &b"hello world"[..]).unwrap();

        let (pack_bytes, index) = writer.finish_to_bytes().unwrap();
        let reader = PackReader::from_bytes(pack_bytes, index).unwrap();

        assert_eq!(reader.object_count(), 1);
        assert!(reader.contains(&key("k1")));
        assert_eq!(reader.read_object(&key("k1")).unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn write_read_roundtrip_multiple() {
        let mut writer = writer();
        for i in 0..10 {
            let data = format!("object-{i}");
            writer
                .add_object(key(&format!("key-{i}")), &mut data.as_bytes())
                .unwrap();
        }
        assert_eq!(writer.len(), 10);

        let (pack_bytes, index) = writer.finish_to_bytes().unwrap();
        let reader = PackReader::from_bytes(pack_bytes, index).unwrap();

        assert_eq!(reader.object_count(), 10);
        for i in 0..10 {
            let obj = reader.read_object(&key(&format!("key-{i}"))).unwrap().unwrap();
            assert_eq!(obj, format!("object-{i}").as_bytes());
        }
    }

    #[test]
    fn header_carries_format_and_uuid() {
        let uuid = RepositoryUuid::new();
        let format = KeyFormat::ContentHash(HashAlgorithm::Blake3);
        let writer = PackWriter::new(std::path::Path::new("/tmp/test-pack"), format, Some(uuid));
        let (bytes, idx) = writer.finish_to_bytes().unwrap();
        let reader = PackReader::from_bytes(bytes, idx).unwrap();
        assert_eq!(reader.header().key_format, format);
        assert_eq!(reader.header().source_uuid, Some(uuid));
    }

    #[test]
    fn empty_pack() {
        let writer = writer();
        assert!(writer.is_empty());
        let (bytes, idx) = writer.finish_to_bytes().unwrap();
        let reader = PackReader::from_bytes(bytes, idx).unwrap();
        assert_eq!(reader.object_count(), 0);
        assert_eq!(reader.keys().count(), 0);
    }

    #[test]
    fn read_missing_object() {
        let (bytes, idx) = writer().finish_to_bytes().unwrap();
        let reader = PackReader::from_bytes(bytes, idx).unwrap();
        assert!(reader.read_object(&key("missing")).unwrap().is_none());
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut writer = writer();
        writer.add_object(key("same"), &mut &b"a"[..]).unwrap();
        let err = writer.add_object(key("same"), &mut &b"b"[..]).unwrap_err();
        assert!(matches!(err, PackError::DuplicateKey(_)));
    }

    #[test]
    fn pack_bad_magic() {
        let mut data = vec![0u8; 100];
        data[0..4].copy_from_slice(b"BADM");
        let idx = PackIndex::build(vec![], [0u8; 32]);
        let err = PackReader::from_bytes(data, idx).unwrap_err();
        assert!(matches!(err, PackError::InvalidMagic { .. }));
    }

    #[test]
    fn pack_bad_version() {
        let mut data = vec![0u8; 100];
        data[0..4].copy_from_slice(b"PRVP");
        data[4..8].copy_from_slice(&99u32.to_be_bytes());
        let idx = PackIndex::build(vec![], [0u8; 32]);
        let err = PackReader::from_bytes(data, idx).unwrap_err();
        assert!(matches!(err, PackError::UnsupportedVersion(99)));
    }

    #[test]
    fn pack_too_short() {
        let idx = PackIndex::build(vec![], [0u8; 32]);
        let err = PackReader::from_bytes(vec![1, 2, 3], idx).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { .. }));
    }

    #[test]
    fn index_from_other_pack_rejected() {
        let (bytes, _) = writer().finish_to_bytes().unwrap();
        let idx = PackIndex::build(vec![], [0xEE; 32]);
        let err = PackReader::from_bytes(bytes, idx).unwrap_err();
        assert!(matches!(err, PackError::ChecksumMismatch));
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let mut writer = writer();
        writer.add_object(key("k"), &mut &b"payload bytes"[..]).unwrap();
        let (mut bytes, idx) = writer.finish_to_bytes().unwrap();
        let trailer_start = bytes.len() - 32;
        bytes[trailer_start - 1] ^= 0xFF;
        let reader = PackReader::from_bytes(bytes, idx).unwrap();
        assert!(reader.read_object(&key("k")).is_err());
        assert!(matches!(reader.verify_checksum(), Err(PackError::ChecksumMismatch)));
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pack_base = dir.path().join("archive");

        let mut writer = PackWriter::new(&pack_base, KeyFormat::Uuid4, None);
        writer.add_object(key("disk"), &mut &b"disk roundtrip"[..]).unwrap();
        let pack_file = writer.finish().unwrap();

        assert_eq!(pack_file.object_count, 1);
        assert!(pack_file.pack_path.exists());
        assert!(pack_file.index_path.exists());

        let reader = PackReader::open(&pack_file.pack_path).unwrap();
        reader.verify_checksum().unwrap();
        assert_eq!(reader.read_object(&key("disk")).unwrap().unwrap(), b"disk roundtrip");
    }

    #[test]
    fn large_object_roundtrip() {
        let large_data = vec![0xABu8; 100_000];
        let mut writer = writer();
        writer.add_object(key("large"), &mut large_data.as_slice()).unwrap();
        let (bytes, idx) = writer.finish_to_bytes().unwrap();

        // zstd shrinks the repetitive payload
        assert!(bytes.len() < large_data.len());

        let reader = PackReader::from_bytes(bytes, idx).unwrap();
        assert_eq!(reader.read_object(&key("large")).unwrap().unwrap(), large_data);
    }
}
