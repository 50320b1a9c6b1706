//! Content fingerprint store.
//!
//! Persists the mapping `file_name -> sha256(file bytes)` that records which
//! source files are already fully indexed. The file lives next to the index
//! as `hash_store.txt`, one `"<file_name> <hex_digest>"` record per line.
//!
//! The store is always rewritten in full. [`FingerprintStore::save`] writes a
//! temporary sibling, syncs it, and renames it over the old file, so a crash
//! mid-save leaves either the previous mapping or the new one on disk.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::FingerprintError;

/// File name of the fingerprint store inside the index directory.
pub const HASH_STORE_FILE: &str = "hash_store.txt";

/// Streamed read size used when hashing source files.
const HASH_BUF_SIZE: usize = 8192;

/// `file_name -> hex digest`, ordered by name so saved files are stable.
pub type Fingerprints = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    /// A store backed by `path`, normally `IndexConfig::hash_store_path()`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted mapping. A missing file is the first-run state
    /// and yields an empty mapping.
    pub fn load(&self) -> Result<Fingerprints, FingerprintError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(parse_fingerprints(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Fingerprints::new()),
            Err(source) => Err(FingerprintError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Atomically replaces the persisted mapping with `fingerprints`.
    pub fn save(&self, fingerprints: &Fingerprints) -> Result<(), FingerprintError> {
        let write_err = |source| FingerprintError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.path.with_extension("txt.tmp");
        {
            let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
            file.write_all(render_fingerprints(fingerprints).as_bytes())
                .map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

/// Parses the `hash_store.txt` format.
///
/// The split point is the last whitespace run on the line, so file names may
/// contain inner spaces. Lines without two non-empty fields are skipped.
pub fn parse_fingerprints(text: &str) -> Fingerprints {
    let mut map = Fingerprints::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(split) = line.rfind(char::is_whitespace) else {
            continue;
        };
        let name = line[..split].trim_end();
        let hash = line[split..].trim_start();
        if name.is_empty() || hash.is_empty() {
            continue;
        }
        map.insert(name.to_string(), hash.to_string());
    }
    map
}

pub fn render_fingerprints(fingerprints: &Fingerprints) -> String {
    let mut out = String::new();
    for (name, hash) in fingerprints {
        out.push_str(name);
        out.push(' ');
        out.push_str(hash);
        out.push('\n');
    }
    out
}

/// SHA-256 of an in-memory buffer, in the same hex form as [`hash_file`].
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of a file's bytes, read in fixed-size blocks so memory use does
/// not grow with the file.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
