// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! SHA-256 integrity checks for local artifact files.
//!
//! A missing or unreadable file is the normal trigger for a refetch, so
//! [`matches`] reports it as `false` instead of an error.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Computes the lowercase hex SHA-256 of the file's full content.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read to the end.
pub fn digest_of(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Returns true only if the file exists, reads fully, and its digest equals
/// `expected` (case-insensitive).
#[must_use]
pub fn matches(path: &Path, expected: &str) -> bool {
    match digest_of(path) {
        Ok(actual) => {
            let ok = actual.eq_ignore_ascii_case(expected.trim());
            if !ok {
                debug!(
                    "Digest mismatch for {}: expected {}, got {}",
                    path.display(),
                    expected,
                    actual
                );
            }
            ok
        }
        Err(e) => {
            debug!("Cannot verify {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    // SHA-256 of "hello world"
    const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_digest_of_known_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.jar");
        std::fs::write(&file, b"hello world")?;

        assert_eq!(digest_of(&file)?, HELLO_DIGEST);
        Ok(())
    }

    #[test]
    fn test_digest_of_large_file_spans_buffers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("big.jar");
        let content = vec![7u8; READ_BUF_SIZE * 3 + 17];
        std::fs::write(&file, &content)?;

        let expected = format!("{:x}", Sha256::digest(&content));
        assert_eq!(digest_of(&file)?, expected);
        Ok(())
    }

    #[test]
    fn test_matches_is_case_insensitive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.jar");
        std::fs::write(&file, b"hello world")?;

        assert!(matches(&file, HELLO_DIGEST));
        assert!(matches(&file, &HELLO_DIGEST.to_ascii_uppercase()));
        Ok(())
    }

    #[test]
    fn test_matches_rejects_other_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.jar");
        std::fs::write(&file, b"hello world!")?;

        assert!(!matches(&file, HELLO_DIGEST));
        Ok(())
    }

    #[test]
    fn test_matches_missing_file_is_false() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!matches(&dir.path().join("absent.jar"), HELLO_DIGEST));
        Ok(())
    }

    #[test]
    fn test_matches_directory_is_false() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!matches(dir.path(), HELLO_DIGEST));
        Ok(())
    }
}
