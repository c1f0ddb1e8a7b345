//! Change detection: does a local file differ from what we last pushed?
//!
//! Fingerprints are SHA-512 hex digests, the registry's default multihash
//! algorithm, so a local file can be compared directly with a registry entry.
//! Registries that predate multihash only report an md5 `checksum`; that is
//! compared instead.

use md5::Md5;
use sha2::{Digest, Sha512};
use std::fs::File;
use std::path::Path;

use crate::contract::RegistryEntry;
use crate::error::DetectError;

/// Hash algorithm name as recorded by the registry.
pub const HASH_ALGO: &str = "sha512";

/// Last known state of an artifact.
#[derive(Debug, Clone, Copy)]
pub enum Reference<'a> {
    /// A local copy, e.g. a boot-agent file already placed in the boot dir.
    File(&'a Path),
    /// The registry entry carrying the artifact's name.
    Entry(&'a RegistryEntry),
    /// Nothing recorded yet.
    Absent,
}

/// SHA-512 hex digest of the file at `path`.
pub fn fingerprint(path: &Path) -> Result<String, DetectError> {
    digest_file::<Sha512>(path)
}

/// md5 hex digest of the file at `path`, as in a registry's legacy `checksum`.
pub fn legacy_fingerprint(path: &Path) -> Result<String, DetectError> {
    digest_file::<Md5>(path)
}

fn digest_file<D: Digest + std::io::Write>(path: &Path) -> Result<String, DetectError> {
    let io_err = |source| DetectError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = D::new();
    std::io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Returns true when `local` must be propagated to `reference`.
///
/// A missing local file is only acceptable when there is nothing to compare
/// it with either. Registry entries are compared by sha512 when they carry
/// one, by md5 `checksum` otherwise; an entry with neither counts as changed.
pub fn changed(local: &Path, reference: Reference<'_>) -> Result<bool, DetectError> {
    if !local.is_file() {
        return match reference {
            Reference::Absent => Ok(false),
            Reference::File(other) if !other.is_file() => Ok(false),
            _ => Err(DetectError::MissingFile(local.to_path_buf())),
        };
    }

    match reference {
        Reference::Absent => Ok(true),
        Reference::File(other) => {
            if !other.is_file() {
                return Ok(true);
            }
            Ok(fingerprint(local)? != fingerprint(other)?)
        }
        Reference::Entry(entry) => {
            if let (Some(HASH_ALGO), Some(recorded)) = (entry.os_hash_algo.as_deref(), entry.os_hash_value.as_deref()) {
                return Ok(fingerprint(local)? != recorded);
            }
            if let Some(recorded) = entry.checksum.as_deref() {
                return Ok(legacy_fingerprint(local)? != recorded);
            }
            tracing::debug!(
                image = %entry.name,
                "Registry entry has no comparable fingerprint, treating as changed"
            );
            Ok(true)
        }
    }
}
