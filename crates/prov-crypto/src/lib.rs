//! Content hashing for the provenance object repository.
//!
//! Content-addressed backends key each object by the BLAKE3 digest of its
//! exact bytes. Objects arrive as streams, so hashing is incremental: the
//! [`HashingReader`] adapter digests bytes as they are copied into storage.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{hash_bytes, hash_reader, ContentHasher, HashingReader};
