//! The packet bus: ordered hand-off from the half-sessions to the consumer
//!
//! Both half-sessions of every active session publish here; a single
//! consumer drains in FIFO order and performs both the logging and the
//! actual forwarding write. Sends block when the consumer falls behind —
//! that backpressure is deliberate, since a dropped message would also
//! drop its forward and stall the peer.

use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex};

/// Bus capacity before producers block.
pub const BUS_CAPACITY: usize = 500;

pub type PacketSender = mpsc::Sender<PacketMsg>;
pub type PacketReceiver = mpsc::Receiver<PacketMsg>;

/// Create the process-wide packet bus.
pub fn channel() -> (PacketSender, PacketReceiver) {
    mpsc::channel(BUS_CAPACITY)
}

/// One intercepted frame, queued for logging and forwarding.
///
/// `data` is the on-wire ciphertext (possibly rewritten by the redirect
/// stage) and is what gets forwarded; `plaintext` is its decrypted mirror
/// and is what gets logged. The two are always the same length. `dest` is
/// the partner socket's write half: deferring the write to the consumer
/// keeps log order and wire order identical within a direction.
pub struct PacketMsg {
    pub command: u16,
    pub size: u16,
    pub data: Vec<u8>,
    pub plaintext: Vec<u8>,
    pub received_at: Instant,
    pub server_name: Arc<str>,
    pub from_name: &'static str,
    pub to_name: &'static str,
    pub dest: Arc<Mutex<OwnedWriteHalf>>,
}
