//! Migration checksums

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the script bytes
pub fn checksum(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_checksum_detects_whitespace_change() {
        let original = checksum(b"CREATE TABLE sessions (id TEXT PRIMARY KEY);");
        let edited = checksum(b"CREATE TABLE sessions (id TEXT PRIMARY KEY); ");
        assert_ne!(original, edited);
        assert_eq!(original.len(), 64);
        assert!(original.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
