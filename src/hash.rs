use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 digest of a source file. Used by the content-based
/// freshness policy to tell whether a source changed since its outputs
/// were last written.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_reader(std::fs::File::open(path)?)?
            .finalize()
            .into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_digest_matches_blake3() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let hash = Hash32::hash_file(&path).unwrap();
        let expected = blake3::hash(b"not really a png");

        assert_eq!(hash, Hash32::from(expected));
        assert_eq!(hash.to_hex(), expected.to_hex().to_string());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Hash32::hash_file("/definitely/not/here.png").is_err());
    }
}
