//! Wire-level definitions for the PSO protocol family
//!
//! Covers the two on-wire dialects the proxy fronts: the Patch protocol
//! (4-byte headers) and Blue Burst (8-byte headers). Only the welcome and
//! redirect packets are ever interpreted; everything else passes through
//! as opaque aligned frames.

mod names;
mod packets;

pub use names::packet_name;
pub use packets::{
    Header, PatchRedirectPacket, PatchWelcomePkt, RedirectPacket, WelcomePkt,
};

use thiserror::Error;

/// Welcome packet type on the Patch protocol; selects the Patch dialect.
pub const PATCH_WELCOME_TYPE: u16 = 0x02;

/// Redirect command on the Patch protocol.
pub const PATCH_REDIRECT_TYPE: u16 = 0x14;

/// Redirect command on Blue Burst.
pub const REDIRECT_TYPE: u16 = 0x19;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
}

/// Which dialect a session speaks, decided by the welcome packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Patch,
    BlueBurst,
}

impl Variant {
    /// Packet header size; also the cipher block alignment boundary.
    pub fn header_size(&self) -> usize {
        match self {
            Variant::Patch => packets::PATCH_HEADER_SIZE,
            Variant::BlueBurst => packets::BB_HEADER_SIZE,
        }
    }

    /// The redirect command code for this dialect.
    pub fn redirect_type(&self) -> u16 {
        match self {
            Variant::Patch => PATCH_REDIRECT_TYPE,
            Variant::BlueBurst => REDIRECT_TYPE,
        }
    }
}
