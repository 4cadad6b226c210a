// src/runtime/fingerprint.rs — Content hashing for artifacts

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::infra::errors::FingerprintError;

/// Hex-encoded SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash the current content of the file at `path`.
pub fn fingerprint_file(path: &Path) -> Result<String, FingerprintError> {
    read_fingerprinted(path).map(|(_, hash)| hash)
}

/// Read the file at `path` once, returning its bytes and their hash.
pub fn read_fingerprinted(path: &Path) -> Result<(Vec<u8>, String), FingerprintError> {
    let bytes = std::fs::read(path).map_err(|source| FingerprintError {
        path: path.to_path_buf(),
        source,
    })?;
    let hash = hash_bytes(&bytes);
    Ok((bytes, hash))
}

/// List candidate artifacts in `dir` whose file name matches `pattern`,
/// sorted by file name.
pub fn list_artifacts(dir: &Path, pattern: &glob::Pattern) -> std::io::Result<Vec<PathBuf>> {
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| pattern.matches(name));
        if matches {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}

/// File name of an artifact path, lossily converted.
pub fn artifact_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
