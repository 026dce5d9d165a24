use prov_types::{KeyFormat, RepositoryUuid};

use crate::error::{PackError, PackResult};

pub(crate) const PACK_MAGIC: &[u8; 4] = b"PRVP";
pub(crate) const PACK_VERSION: u32 = 1;
pub(crate) const CHECKSUM_LEN: usize = 32;

/// Fixed part of the header: magic + version + count + format tag + uuid flag.
pub(crate) const MIN_HEADER_LEN: usize = 4 + 4 + 4 + 1 + 1;

/// Pack file header.
///
/// On-disk format:
/// ```text
/// [4 bytes: magic "PRVP"]
/// [4 bytes: version (big-endian u32)]
/// [4 bytes: object count (big-endian u32)]
/// [1 byte:  key format tag]
/// [1 byte:  1 if a source uuid follows, else 0]
/// [16 bytes: source repository uuid, optional]
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackHeader {
    /// Number of objects in the pack.
    pub object_count: u32,
    /// Key format of the repository the objects were exported from.
    pub key_format: KeyFormat,
    /// Identity of the source repository, if it had one.
    pub source_uuid: Option<RepositoryUuid>,
}

impl PackHeader {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(PACK_MAGIC);
        buf.extend_from_slice(&PACK_VERSION.to_be_bytes());
        buf.extend_from_slice(&self.object_count.to_be_bytes());
        buf.push(self.key_format.tag());
        match &self.source_uuid {
            Some(uuid) => {
                buf.push(1);
                buf.extend_from_slice(uuid.as_bytes());
            }
            None => buf.push(0),
        }
    }

    /// Decode a header, returning it and the number of bytes consumed.
    pub(crate) fn decode(data: &[u8]) -> PackResult<(Self, usize)> {
        if data.len() < MIN_HEADER_LEN + CHECKSUM_LEN {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "pack data too short".into(),
            });
        }
        if &data[0..4] != PACK_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: "PRVP".into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(data, 4);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let object_count = read_u32(data, 8);
        let key_format = KeyFormat::from_tag(data[12]).ok_or_else(|| PackError::CorruptEntry {
            offset: 12,
            reason: format!("unknown key format tag: {}", data[12]),
        })?;

        let mut pos = MIN_HEADER_LEN;
        let source_uuid = match data[13] {
            0 => None,
            1 => {
                if data.len() < pos + 16 {
                    return Err(PackError::CorruptEntry {
                        offset: pos as u64,
                        reason: "truncated source uuid".into(),
                    });
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&data[pos..pos + 16]);
                pos += 16;
                Some(RepositoryUuid::from_bytes(bytes))
            }
            other => {
                return Err(PackError::CorruptEntry {
                    offset: 13,
                    reason: format!("invalid uuid flag: {other}"),
                })
            }
        };

        Ok((
            Self {
                object_count,
                key_format,
                source_uuid,
            },
            pos,
        ))
    }
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[pos..pos + 4]);
    u32::from_be_bytes(bytes)
}

pub(crate) fn read_u64(data: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[pos..pos + 8]);
    u64::from_be_bytes(bytes)
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(PackError::CorruptEntry {
        offset: 0,
        reason: "truncated varint".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_types::HashAlgorithm;

    fn padded(mut buf: Vec<u8>) -> Vec<u8> {
        buf.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        buf
    }

    #[test]
    fn header_without_uuid() {
        let header = PackHeader {
            object_count: 3,
            key_format: KeyFormat::Uuid4,
            source_uuid: None,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), MIN_HEADER_LEN);
        let (decoded, consumed) = PackHeader::decode(&padded(buf)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, MIN_HEADER_LEN);
    }

    #[test]
    fn header_with_uuid() {
        let header = PackHeader {
            object_count: 0,
            key_format: KeyFormat::ContentHash(HashAlgorithm::Blake3),
            source_uuid: Some(RepositoryUuid::new()),
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        let (decoded, consumed) = PackHeader::decode(&padded(buf)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, MIN_HEADER_LEN + 16);
    }

    #[test]
    fn header_unknown_format_tag() {
        let header = PackHeader {
            object_count: 0,
            key_format: KeyFormat::Uuid4,
            source_uuid: None,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        buf[12] = 42;
        let err = PackHeader::decode(&padded(buf)).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { offset: 12, .. }));
    }

    #[test]
    fn varint_roundtrip_small() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 42);
        let (val, consumed) = decode_varint(&buf).unwrap();
        assert_eq!(val, 42);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn varint_max_u64() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, u64::MAX);
        let (val, _) = decode_varint(&buf).unwrap();
        assert_eq!(val, u64::MAX);
    }

    #[test]
    fn decode_varint_truncated() {
        let err = decode_varint(&[0x80]).unwrap_err();
        assert!(matches!(err, PackError::CorruptEntry { .. }));
    }
}
