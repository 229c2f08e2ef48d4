//! xxHash64 file hasher with streaming support.
//!
//! # Overview
//!
//! Two hashes are computed per candidate file:
//! - a **prehash** over the first [`PREHASH_SIZE`] bytes, used to split
//!   same-size groups cheaply;
//! - a **full hash** over the whole content, streamed in [`CHUNK_SIZE`]
//!   chunks with a progress callback after every chunk.
//!
//! Both use xxHash64 with seed 0, so a file no longer than the prefix has
//! identical prehash and full hash.

use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;

use twox_hash::XxHash64;

use super::HashError;

/// 64-bit content digest.
pub type Hash = u64;

/// Number of bytes read for the prehash.
pub const PREHASH_SIZE: usize = 4096;

/// Read size for streaming full hashes.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Streaming file hasher.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher that reads in [`CHUNK_SIZE`] chunks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: CHUNK_SIZE,
        }
    }

    /// Override the streaming chunk size (minimum 1 byte).
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Hash the first [`PREHASH_SIZE`] bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn prehash(&self, path: &Path) -> Result<Hash, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let mut prefix = Vec::with_capacity(PREHASH_SIZE);
        file.take(PREHASH_SIZE as u64)
            .read_to_end(&mut prefix)
            .map_err(|e| HashError::from_io(path, e))?;
        Ok(hash_bytes(&prefix))
    }

    /// Hash a whole file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn full_hash(&self, path: &Path) -> Result<Hash, HashError> {
        self.full_hash_with_progress(path, |_, _| {})
    }

    /// Hash a whole file, calling `on_chunk(bytes_so_far, total_bytes)` after
    /// every chunk.
    ///
    /// `total_bytes` is the size reported by the open file handle.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn full_hash_with_progress<F>(&self, path: &Path, mut on_chunk: F) -> Result<Hash, HashError>
    where
        F: FnMut(u64, u64),
    {
        let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let total = file
            .metadata()
            .map_err(|e| HashError::from_io(path, e))?
            .len();

        let mut hasher = XxHash64::with_seed(0);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut done = 0u64;

        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::from_io(path, e)),
            };
            hasher.write(&buffer[..read]);
            done += read as u64;
            on_chunk(done, total.max(done));
        }

        Ok(hasher.finish())
    }
}

/// Hash an in-memory buffer with the same function used for files.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Render a hash as 16 lowercase hex digits.
#[must_use]
pub fn hash_to_hex(hash: Hash) -> String {
    format!("{hash:016x}")
}

/// Parse a hash rendered by [`hash_to_hex`].
#[must_use]
pub fn hex_to_hash(hex: &str) -> Option<Hash> {
    if hex.is_empty() || hex.len() > 16 {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}
