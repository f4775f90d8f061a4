//! Content fingerprints
//!
//! Every fingerprint the engine stores has the form `sha256:<hex>`, whether
//! it was computed from bytes already in memory or streamed from disk.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const PREFIX: &str = "sha256:";

/// Read size used when hashing files
const CHUNK: usize = 64 * 1024;

fn finish(hasher: Sha256) -> String {
    format!("{PREFIX}{:x}", hasher.finalize())
}

/// Fingerprint of `content`.
pub fn compute_content_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    finish(hasher)
}

/// Fingerprint of the file at `path`, read in fixed-size chunks so large
/// files never sit in memory whole.
///
/// # Errors
///
/// Returns the I/O error from opening or reading the file.
pub fn compute_file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        match file.read(&mut buf)? {
            0 => break,
            n => hasher.update(&buf[..n]),
        }
    }
    Ok(finish(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_fingerprint() {
        assert_eq!(
            compute_content_checksum(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn one_byte_changes_fingerprint() {
        assert_ne!(
            compute_content_checksum(b"report v1"),
            compute_content_checksum(b"report v2")
        );
    }

    #[test]
    fn streamed_file_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        // Spans several read chunks with a partial last one.
        let content: Vec<u8> = (0..(CHUNK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        assert_eq!(
            compute_file_checksum(&path).unwrap(),
            compute_content_checksum(&content)
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = compute_file_checksum(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
