//! HMAC-SHA256 (RFC 2104) on top of the in-crate [`Sha256`] engine.

use super::constant_time_eq;
use super::sha256::{self, BLOCK_LEN, DIGEST_LEN, Sha256};

const INNER_PAD: u8 = 0x36;
const OUTER_PAD: u8 = 0x5c;

/// Size of the produced authentication code in bytes.
pub const MAC_LEN: usize = DIGEST_LEN;

/// Block-sized inner/outer keys derived once from the secret.
#[derive(Clone)]
struct KeyMaterial {
    inner: [u8; BLOCK_LEN],
    outer: [u8; BLOCK_LEN],
}

impl KeyMaterial {
    fn derive(key: &[u8]) -> Self {
        let mut block = [0u8; BLOCK_LEN];
        if key.len() > BLOCK_LEN {
            block[..DIGEST_LEN].copy_from_slice(&sha256::digest(key));
        } else {
            block[..key.len()].copy_from_slice(key);
        }

        let mut inner = [0u8; BLOCK_LEN];
        let mut outer = [0u8; BLOCK_LEN];
        for ((i, o), k) in inner.iter_mut().zip(outer.iter_mut()).zip(block) {
            *i = k ^ INNER_PAD;
            *o = k ^ OUTER_PAD;
        }
        Self { inner, outer }
    }
}

/// Incremental HMAC-SHA256.
///
/// The inner hash is seeded with the inner key on construction, so the
/// engine is ready for `update` immediately.
#[derive(Clone)]
pub struct HmacSha256 {
    keys: KeyMaterial,
    inner: Sha256,
}

impl std::fmt::Debug for HmacSha256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256").finish_non_exhaustive()
    }
}

impl HmacSha256 {
    /// Accepts a key of any length.
    pub fn new(key: &[u8]) -> Self {
        let keys = KeyMaterial::derive(key);
        let mut inner = Sha256::new();
        inner.update(&keys.inner);
        Self { keys, inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; MAC_LEN] {
        let intermediate = self.inner.finalize();
        let mut outer = Sha256::new();
        outer.update(&self.keys.outer);
        outer.update(&intermediate);
        outer.finalize()
    }

    /// Finalizes and compares against `expected` without early exit.
    pub fn matches(self, expected: &[u8]) -> bool {
        constant_time_eq(&self.finalize(), expected)
    }
}
