use std::io::{self, Read};

use prov_types::{HashAlgorithm, ObjectKey};

/// Incremental content hasher.
///
/// Produces the lowercase hex digest used as the key by content-addressed
/// backends. No domain tag is mixed in: the digest of an object is the plain
/// BLAKE3 hash of its bytes, so an object's hash and its key coincide.
pub struct ContentHasher {
    inner: blake3::Hasher,
}

impl ContentHasher {
    /// The algorithm this hasher implements.
    pub const ALGORITHM: HashAlgorithm = HashAlgorithm::Blake3;

    /// Create an empty hasher.
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn finalize_hex(&self) -> String {
        hex::encode(self.inner.finalize().as_bytes())
    }

    /// The digest as an object key.
    pub fn finalize_key(&self) -> ObjectKey {
        ObjectKey::parse(self.finalize_hex()).expect("hex digest is a valid key")
    }

    /// Verify that data produces the expected hex digest.
    pub fn verify(data: &[u8], expected: &str) -> bool {
        hash_bytes(data) == expected
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// A `Read` adapter that hashes and counts every byte read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: ContentHasher,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(),
            bytes_read: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Hex digest of the bytes read so far.
    pub fn digest_hex(&self) -> String {
        self.hasher.finalize_hex()
    }

    /// Digest of the bytes read so far, as a key.
    pub fn digest_key(&self) -> ObjectKey {
        self.hasher.finalize_key()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Hex digest of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Drain a reader, returning its hex digest and length.
pub fn hash_reader<R: Read>(reader: R) -> io::Result<(String, u64)> {
    let mut hashing = HashingReader::new(reader);
    io::copy(&mut hashing, &mut io::sink())?;
    Ok((hashing.digest_hex(), hashing.bytes_read()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_bytes(b"hello world"), hash_bytes(b"hello world"));
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(hash_bytes(b"aaa"), hash_bytes(b"bbb"));
    }

    #[test]
    fn digest_is_64_lowercase_hex() {
        let h = hash_bytes(b"abc");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ").update(b"world");
        assert_eq!(hasher.finalize_hex(), hash_bytes(b"hello world"));
    }

    #[test]
    fn reader_hashes_and_counts() {
        let data = vec![7u8; 100_000];
        let (digest, len) = hash_reader(data.as_slice()).unwrap();
        assert_eq!(len, 100_000);
        assert_eq!(digest, hash_bytes(&data));
    }

    #[test]
    fn empty_input_has_a_digest() {
        let (digest, len) = hash_reader(&b""[..]).unwrap();
        assert_eq!(len, 0);
        assert_eq!(digest, hash_bytes(b""));
    }

    #[test]
    fn key_matches_hex() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"key");
        assert_eq!(hasher.finalize_key().as_str(), hash_bytes(b"key"));
    }

    #[test]
    fn verify_detects_tampering() {
        let expected = hash_bytes(b"original");
        assert!(ContentHasher::verify(b"original", &expected));
        assert!(!ContentHasher::verify(b"tampered", &expected));
    }
}
