use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};

/// Duplicating tap over a byte stream: each chunk is observed on its way to
/// the destination, feeding a running SHA-256 accumulator and a byte
/// counter. Clones share the same accumulator, so the upload path can hand
/// one handle to the in-flight stream and keep another to read the result.
#[derive(Clone, Default)]
pub struct DigestTap {
    inner: Arc<Mutex<TapState>>,
}

#[derive(Default)]
struct TapState {
    hasher: Sha256,
    bytes: i64,
}

impl DigestTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, chunk: &[u8]) {
        let mut state = self.lock();
        state.hasher.update(chunk);
        state.bytes += chunk.len() as i64;
    }

    pub fn byte_count(&self) -> i64 {
        self.lock().bytes
    }

    /// Hex digest of everything observed so far.
    pub fn hex_digest(&self) -> String {
        let state = self.lock();
        format!("{:x}", state.hasher.clone().finalize())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TapState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
