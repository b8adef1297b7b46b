//! Small helpers: filename derivation and file integrity checking.
use percent_encoding::percent_decode_str;
use sanitize_filename::sanitize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Integrity check failure.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sha256 mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Derives an output filename from the final URL path segment.
///
/// The segment is percent-decoded and stripped of characters the OS
/// rejects in filenames. "output.bin" stands in whenever that leaves
/// nothing usable.
pub fn filename_from_url(url: &str) -> String {
    const FALLBACK: &str = "output.bin";

    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK.to_string();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let name = sanitize(decoded.as_ref());
    if name.is_empty() {
        FALLBACK.to_string()
    } else {
        name
    }
}

/// Hashes a file and compares it to an expected hex-encoded SHA-256.
///
/// Blocking; run it on a blocking thread from async contexts.
pub fn verify_sha256(path: &Path, expected_hash: &str) -> Result<(), VerifyError> {
    let io_err = |source| VerifyError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let count = file.read(&mut buffer).map_err(io_err)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    let actual = hex::encode(hasher.finalize());
    if actual == expected_hash.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError::Mismatch {
            expected: expected_hash.to_string(),
            actual,
        })
    }
}
