//! Content fingerprints: `blake3(bytes || mtime_ns)`.
//!
//! [`FileStat`] is stored next to the fingerprint so a reconciliation scan
//! can skip rehashing files whose size and mtime did not move.

use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Hex-encoded content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough for log lines.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Cheap metadata used to decide whether a file must be rehashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime_ns: i64,
}

impl FileStat {
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self::from_metadata(&meta))
    }

    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| match t.duration_since(UNIX_EPOCH) {
                Ok(d) => Some(d.as_nanos() as i64),
                Err(e) => Some(-(e.duration().as_nanos() as i64)),
            })
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime_ns,
        }
    }
}

/// Fingerprint of an in-memory payload observed with the given mtime.
pub fn fingerprint_bytes(bytes: &[u8], mtime_ns: i64) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    hasher.update(&mtime_ns.to_le_bytes());
    Fingerprint(hasher.finalize().to_hex().to_string())
}

/// Reads a file once and returns its bytes together with stat and fingerprint.
///
/// The stat is taken before and after the read; if the file changed in
/// between the read is reported as `WouldBlock` so callers retry instead of
/// fingerprinting a half-written file.
pub fn read_with_fingerprint(path: &Path) -> io::Result<(Vec<u8>, FileStat, Fingerprint)> {
    let before = FileStat::of(path)?;
    let bytes = fs::read(path)?;
    let after = FileStat::of(path)?;

    if before != after || after.size != bytes.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("{} changed while being read", path.display()),
        ));
    }

    let fp = fingerprint_bytes(&bytes, after.mtime_ns);
    Ok((bytes, after, fp))
}
