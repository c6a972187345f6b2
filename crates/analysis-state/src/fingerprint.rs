use sha2::{Digest, Sha256};
use std::path::Path;

/// Content fingerprint of a byte buffer (hex encoded SHA-256).
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of the file as it currently is on disk.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(fingerprint_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_tracks_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.pas");

        std::fs::write(&file, "unit A;").unwrap();
        let first = fingerprint_file(&file).unwrap();
        assert_eq!(first, fingerprint_bytes(b"unit A;"));
        assert_eq!(first.len(), 64);

        std::fs::write(&file, "unit B;").unwrap();
        assert_ne!(fingerprint_file(&file).unwrap(), first);
    }

    #[test]
    fn test_fingerprint_of_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(fingerprint_file(&temp_dir.path().join("missing.pas")).is_err());
    }
}
