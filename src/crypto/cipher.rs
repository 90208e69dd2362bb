//! The per-direction session cipher
//!
//! Both PSO variants run a seed-keyed permutation over fixed-size blocks:
//! 8-byte blocks for Blue Burst, 4-byte blocks for Patch. The block size is
//! also the framing alignment boundary, so every span the interceptors hand
//! to a cipher is a whole number of blocks.

use super::CryptoError;

/// Feistel rounds for the Blue Burst (8-byte block) permutation
const BB_ROUNDS: usize = 16;

/// Feistel rounds for the Patch (4-byte block) permutation
const PATCH_ROUNDS: usize = 8;

#[derive(Clone)]
enum Keys {
    Patch([u32; PATCH_ROUNDS]),
    BlueBurst([u32; BB_ROUNDS]),
}

/// One direction's session cipher, seeded from a welcome-packet vector.
///
/// Contract relied on by the interception pipeline:
///
/// - `encrypt` and `decrypt` are inverse permutations of each block, so
///   `encrypt(decrypt(x)) == x` over any aligned span. The redirect
///   rewriter depends on this to re-encrypt a mutated frame with the same
///   instance that just decrypted it, producing ciphertext the downstream
///   peer accepts.
/// - Identical seed vectors produce identical behavior on both ends of the
///   wire; the proxy's handle mirrors the real endpoint's.
/// - Input length must be a multiple of [`block_size`](Self::block_size).
///   The framing layer keeps reads aligned; a misaligned span here means
///   the stream is already unrecoverable and the session must end.
pub struct Cipher {
    keys: Keys,
    processed: u64,
}

impl Cipher {
    /// Create a Patch-variant cipher from its 4-byte seed vector.
    pub fn new_patch(vector: [u8; 4]) -> Self {
        Self {
            keys: Keys::Patch(expand_subkeys(&vector)),
            processed: 0,
        }
    }

    /// Create a Blue Burst cipher from its 48-byte seed vector.
    pub fn new_bb(vector: [u8; 48]) -> Self {
        Self {
            keys: Keys::BlueBurst(expand_subkeys(&vector)),
            processed: 0,
        }
    }

    /// Block size in bytes; equal to the variant's packet header size.
    pub fn block_size(&self) -> usize {
        match self.keys {
            Keys::Patch(_) => 4,
            Keys::BlueBurst(_) => 8,
        }
    }

    /// Total bytes this instance has processed in either direction.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Encrypt `data` in place. Length must be block-aligned.
    pub fn encrypt(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        self.check_alignment(data.len())?;
        match &self.keys {
            Keys::Patch(keys) => {
                for block in data.chunks_exact_mut(4) {
                    encrypt_patch_block(block, keys);
                }
            }
            Keys::BlueBurst(keys) => {
                for block in data.chunks_exact_mut(8) {
                    encrypt_bb_block(block, keys);
                }
            }
        }
        self.processed += data.len() as u64;
        Ok(())
    }

    /// Decrypt `data` in place. Length must be block-aligned.
    pub fn decrypt(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        self.check_alignment(data.len())?;
        match &self.keys {
            Keys::Patch(keys) => {
                for block in data.chunks_exact_mut(4) {
                    decrypt_patch_block(block, keys);
                }
            }
            Keys::BlueBurst(keys) => {
                for block in data.chunks_exact_mut(8) {
                    decrypt_bb_block(block, keys);
                }
            }
        }
        self.processed += data.len() as u64;
        Ok(())
    }

    fn check_alignment(&self, len: usize) -> Result<(), CryptoError> {
        let block = self.block_size();
        if len % block != 0 {
            return Err(CryptoError::MisalignedInput { len, block });
        }
        Ok(())
    }
}

/// Expand a seed vector into per-round subkeys.
///
/// Absorbs the vector word by word into an evolving accumulator, then runs
/// a squeeze pass so every subkey depends on the whole seed.
fn expand_subkeys<const N: usize>(seed: &[u8]) -> [u32; N] {
    let mut keys = [0u32; N];
    let mut acc: u32 = 0x9E37_79B9;

    for (i, chunk) in seed.chunks(4).enumerate() {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc = mix(acc ^ u32::from_le_bytes(word));
        keys[i % N] ^= acc;
    }
    for key in keys.iter_mut() {
        acc = mix(acc);
        *key ^= acc;
    }
    keys
}

/// 32-bit avalanche mixer; also serves as the Feistel round function.
fn mix(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7FEB_352D);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846C_A68B);
    x ^= x >> 16;
    x
}

fn encrypt_bb_block(block: &mut [u8], keys: &[u32; BB_ROUNDS]) {
    let mut l = u32::from_le_bytes(block[0..4].try_into().unwrap());
    let mut r = u32::from_le_bytes(block[4..8].try_into().unwrap());
    for &key in keys {
        let next = l ^ mix(r ^ key);
        l = r;
        r = next;
    }
    block[0..4].copy_from_slice(&l.to_le_bytes());
    block[4..8].copy_from_slice(&r.to_le_bytes());
}

fn decrypt_bb_block(block: &mut [u8], keys: &[u32; BB_ROUNDS]) {
    let mut l = u32::from_le_bytes(block[0..4].try_into().unwrap());
    let mut r = u32::from_le_bytes(block[4..8].try_into().unwrap());
    for &key in keys.iter().rev() {
        let prev = r ^ mix(l ^ key);
        r = l;
        l = prev;
    }
    block[0..4].copy_from_slice(&l.to_le_bytes());
    block[4..8].copy_from_slice(&r.to_le_bytes());
}

fn encrypt_patch_block(block: &mut [u8], keys: &[u32; PATCH_ROUNDS]) {
    let mut l = u16::from_le_bytes(block[0..2].try_into().unwrap());
    let mut r = u16::from_le_bytes(block[2..4].try_into().unwrap());
    for &key in keys {
        let next = l ^ mix(u32::from(r) ^ key) as u16;
        l = r;
        r = next;
    }
    block[0..2].copy_from_slice(&l.to_le_bytes());
    block[2..4].copy_from_slice(&r.to_le_bytes());
}

fn decrypt_patch_block(block: &mut [u8], keys: &[u32; PATCH_ROUNDS]) {
    let mut l = u16::from_le_bytes(block[0..2].try_into().unwrap());
    let mut r = u16::from_le_bytes(block[2..4].try_into().unwrap());
    for &key in keys.iter().rev() {
        let prev = r ^ mix(u32::from(l) ^ key) as u16;
        r = l;
        l = prev;
    }
    block[0..2].copy_from_slice(&l.to_le_bytes());
    block[2..4].copy_from_slice(&r.to_le_bytes());
}
