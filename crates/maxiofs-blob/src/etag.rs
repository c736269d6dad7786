//! ETag computation.
//!
//! Single-part objects carry the hex MD5 of their plaintext bytes.
//! Multipart objects carry `MD5(concat(part_md5_digests)) + "-" + N`,
//! the AWS composite form.

use md5::{Digest, Md5};

/// Incremental MD5 over a byte stream.
pub struct Md5Writer {
    hasher: Md5,
    len: u64,
}

impl Md5Writer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Md5::new(),
            len: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Total bytes hashed so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consume and return `(hex_etag, raw_digest)`
    #[must_use]
    pub fn finalize(self) -> (String, [u8; 16]) {
        let digest: [u8; 16] = self.hasher.finalize().into();
        (hex::encode(digest), digest)
    }
}

impl Default for Md5Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the composite multipart ETag from the raw part digests, in
/// part-number order.
#[must_use]
pub fn multipart_etag(part_digests: &[[u8; 16]]) -> String {
    let mut hasher = Md5::new();
    for digest in part_digests {
        hasher.update(digest);
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_digests.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_etag() {
        let (etag, _) = Md5Writer::new().finalize();
        assert_eq!(etag, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_hello_etag() {
        let mut w = Md5Writer::new();
        w.update(b"hello");
        assert_eq!(w.len(), 5);
        let (etag, _) = w.finalize();
        assert_eq!(etag, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_multipart_etag_suffix() {
        let mut p1 = Md5Writer::new();
        p1.update(b"part one");
        let mut p2 = Md5Writer::new();
        p2.update(b"part two");
        let (_, d1) = p1.finalize();
        let (_, d2) = p2.finalize();

        let etag = multipart_etag(&[d1, d2]);
        assert!(etag.ends_with("-2"));

        // Composite digest differs from either part digest
        assert!(!etag.starts_with(&hex::encode(d1)));
    }
}
