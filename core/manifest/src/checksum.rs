//! Content checksums for assets.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use geovault_common::Result;

/// Prefix identifying the hash algorithm in a checksum string.
pub const CHECKSUM_PREFIX: &str = "blake2b:";

const READ_BUF: usize = 64 * 1024;

type Hasher = Blake2b<U32>;

fn render(hasher: Hasher) -> String {
    format!("{}{}", CHECKSUM_PREFIX, hex::encode(hasher.finalize()))
}

/// Checksum of an in-memory buffer.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    render(hasher)
}

/// Checksum of a file's full content, read in fixed-size chunks.
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; READ_BUF];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(render(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_format() {
        let sum = checksum_bytes(b"roads");
        assert!(sum.starts_with(CHECKSUM_PREFIX));
        assert_eq!(sum.len(), CHECKSUM_PREFIX.len() + 64);
        assert_ne!(sum, checksum_bytes(b"rivers"));
    }

    #[tokio::test]
    async fn test_file_matches_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        // Larger than one read buffer so the chunk loop runs more than once.
        let data: Vec<u8> = (0..(READ_BUF * 2 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(checksum_file(&path).await.unwrap(), checksum_bytes(&data));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = checksum_file(&temp.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, geovault_common::Error::Io(_)));
    }
}
