use prov_types::ObjectKey;
use thiserror::Error;

/// Failures reading or writing an archive.
#[derive(Debug, Error)]
pub enum PackError {
    /// The file does not start with the expected archive or index magic.
    #[error("not an archive file: magic {actual}, want {expected}")]
    InvalidMagic { expected: String, actual: String },

    #[error("archive format version {0} is not supported")]
    UnsupportedVersion(u32),

    /// The BLAKE3 trailer does not match the archive body or its index.
    #[error("archive checksum does not match its contents")]
    ChecksumMismatch,

    #[error("malformed archive entry at byte {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("compressed payload of {key} fails its CRC32 check")]
    CrcMismatch { key: ObjectKey },

    #[error("key {0} added to the archive twice")]
    DuplicateKey(ObjectKey),

    #[error("zstd decode: {0}")]
    DecompressionFailed(String),

    #[error("zstd encode: {0}")]
    CompressionFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("archive index is damaged: {0}")]
    IndexCorrupted(String),
}

pub type PackResult<T> = Result<T, PackError>;
