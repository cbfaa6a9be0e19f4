// src/hash.rs

//! Content hashing for blob addressing
//!
//! Blob filenames embed the MD5 of the *compressed* byte stream, so the
//! hasher is fed incrementally while the stream is written out. MD5 is used
//! for deduplication and stable naming only, never for authenticity (the
//! transport layer is trusted to handle that upstream).

use md5::{Digest, Md5};

/// Incremental MD5 hasher producing lowercase hex
pub struct Hasher {
    state: Md5,
}

impl Hasher {
    pub fn new() -> Self {
        Self { state: Md5::new() }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Finalize and return the hex digest
    pub fn finalize(self) -> String {
        format!("{:x}", self.state.finalize())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the MD5 hex digest of a byte slice
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_value() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Hasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.finalize(), md5_hex(b"Hello, World!"));
    }
}
