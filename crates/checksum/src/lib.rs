//! Streaming SHA-1 digests for segment files.
//!
//! Segments are re-read on every delivery attempt, so nothing is cached
//! here. Files are hashed in fixed-size chunks and never loaded whole.

use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

/// Read buffer size: 1 MiB.
const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Computes SHA-1 of `data` and returns the hex-encoded digest.
pub fn sha1_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-1 of an entire file and returns the lowercase hex digest.
///
/// Reads in 1 MiB chunks. Fails on the first open or read error without
/// retrying; the caller re-reads the same path identically on each outer
/// delivery attempt.
pub fn file_sha1(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn sha1_bytes_known_vector() {
        // FIPS 180-1 test vector.
        assert_eq!(sha1_bytes(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sha1_bytes_deterministic() {
        let c1 = sha1_bytes(b"segment data");
        let c2 = sha1_bytes(b"segment data");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 40); // SHA-1 = 40 hex chars.
    }

    #[test]
    fn sha1_bytes_lowercase_hex() {
        let digest = sha1_bytes(b"abc");
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn file_sha1_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"one finalized media chunk";
        let path = create_test_file(dir.path(), "seg.ts", data);
        assert_eq!(file_sha1(&path).unwrap(), sha1_bytes(data));
    }

    #[test]
    fn file_sha1_chunk_size_independent() {
        // A file larger than the read buffer must hash to the same digest
        // as a single-shot in-memory hash.
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..3 * READ_CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let path = create_test_file(dir.path(), "big.ts", &data);

        // Byte-at-a-time reference digest.
        let mut hasher = Sha1::new();
        for b in &data {
            hasher.update([*b]);
        }
        let reference = hex::encode(hasher.finalize());

        assert_eq!(file_sha1(&path).unwrap(), reference);
        assert_eq!(file_sha1(&path).unwrap(), sha1_bytes(&data));
    }

    #[test]
    fn file_sha1_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_file(dir.path(), "empty.ts", b"");
        assert_eq!(file_sha1(&path).unwrap(), sha1_bytes(b""));
    }

    #[test]
    fn file_sha1_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_sha1(&dir.path().join("gone.ts")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
