//! Content fingerprint of the dataset file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::errors::{Result, RgError};
use crate::engine::state::EngineState;

const CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of the file's bytes, or `""` when the path does not exist.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(RgError::io(path, err)),
    };
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(RgError::io(path, err)),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Compare the current fingerprint with the one recorded at the last retrain.
///
/// Returns `(changed, current_fingerprint)`. An unset stored fingerprint
/// always counts as changed.
pub fn has_changed(path: &Path, state: &EngineState) -> Result<(bool, String)> {
    let current = fingerprint(path)?;
    let changed = state
        .last_data_fingerprint
        .as_deref()
        .is_none_or(|stored| stored != current);
    Ok((changed, current))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
