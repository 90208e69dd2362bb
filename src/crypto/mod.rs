//! Session ciphers for the PSO protocol family
//!
//! Every PSO session is keyed by two seed vectors carried in the server's
//! welcome packet: a 4-byte vector per direction for the Patch protocol and
//! a 48-byte vector per direction for Blue Burst. This module turns those
//! vectors into [`Cipher`] handles with the exact contract the interception
//! pipeline depends on; the pipeline never assumes anything beyond that
//! contract.

mod cipher;

pub use cipher::Cipher;

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher input of {len} bytes is not a multiple of the {block}-byte block")]
    MisalignedInput { len: usize, block: usize },
}
