//! CRC-32 content identity
//!
//! A fast 32-bit checksum is the identity key for file content: two
//! identities never share a checksum, and a binary is recognized by the
//! checksum of its current on-disk image rather than by its path or pid.
//! This is an identity scheme, not a cryptographic verification layer.

use std::path::Path;

use crate::error::{Error, Result};

/// 32-bit content checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub u32);

impl Checksum {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Checksum a byte slice
pub fn of_bytes(data: &[u8]) -> Checksum {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    Checksum(hasher.finalize())
}

/// Checksum a file's current content
pub fn of_file(path: &Path) -> Result<Checksum> {
    let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(of_bytes(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(of_bytes(b"").as_u32(), 0);
    }

    #[test]
    fn test_known_vector() {
        // Standard CRC-32 (IEEE) check value
        assert_eq!(of_bytes(b"123456789").as_u32(), 0xcbf4_3926);
    }

    #[test]
    fn test_content_sensitivity() {
        assert_ne!(of_bytes(b"hello"), of_bytes(b"hellp"));
        assert_eq!(of_bytes(b"hello"), of_bytes(b"hello"));
    }

    #[test]
    fn test_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"\x00\x01\x02ransom").unwrap();

        assert_eq!(of_file(&path).unwrap(), of_bytes(b"\x00\x01\x02ransom"));
    }

    #[test]
    fn test_missing_file_errors() {
        let err = of_file(Path::new("/nonexistent/rampart-test")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
