//! Bus consumer: formats every intercepted frame, then forwards it
//!
//! A single task drains the bus in FIFO order. Because the consumer both
//! logs a frame and performs its forwarding write, the log and the wire
//! agree on ordering within each direction across the whole proxy.

use crate::protocol::packet_name;
use crate::proxy::bus::{PacketMsg, PacketReceiver};
use std::fmt::Write as _;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Bytes shown per hexdump line.
const DISPLAY_WIDTH: usize = 16;

/// Drain the bus until every producer is gone. A failed forward is logged
/// and skipped; the owning half-session observes the broken socket on its
/// next read and tears the session down.
pub async fn run_consumer(mut rx: PacketReceiver, names_only: bool) {
    while let Some(msg) = rx.recv().await {
        info!("{}", format_packet(&msg, names_only));
        debug!(
            "Sending {} bytes from {} to {} (queued for {:?})",
            msg.size,
            msg.from_name,
            msg.to_name,
            msg.received_at.elapsed()
        );

        let mut dest = msg.dest.lock().await;
        if let Err(e) = dest.write_all(&msg.data).await {
            warn!("Failed to send packet to {}: {}", msg.to_name, e);
        }
    }
}

/// Render one frame: a header line, the resolved command name, and (unless
/// `names_only`) a hex+ASCII dump of the plaintext.
fn format_packet(msg: &PacketMsg, names_only: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} packet sent from {} to {}",
        msg.server_name, msg.from_name, msg.to_name
    );

    match packet_name(&msg.server_name, msg.command) {
        Some(name) => out.push_str(name),
        None => {
            let _ = write!(out, "Unknown packet {:2x}", msg.command);
        }
    }

    if !names_only {
        out.push('\n');
        let mut offset = 0;
        while offset < msg.plaintext.len() {
            let end = usize::min(offset + DISPLAY_WIDTH, msg.plaintext.len());
            append_dump_line(&mut out, &msg.plaintext[offset..end], offset);
            offset = end;
        }
        while out.ends_with('\n') {
            out.pop();
        }
    }
    out
}

/// One hexdump line: hex offset, up to 16 bytes with a gutter after the
/// 8th, short lines padded, then the printable-ASCII column.
fn append_dump_line(out: &mut String, data: &[u8], offset: usize) {
    let _ = write!(out, "({:04X}) ", offset);
    for (i, byte) in data.iter().enumerate() {
        if i == 8 {
            out.push_str("  ");
        }
        let _ = write!(out, "{:02x} ", byte);
    }
    for i in data.len()..DISPLAY_WIDTH {
        if i == 8 {
            out.push_str("  ");
        }
        out.push_str("   ");
    }
    out.push_str("    ");
    for &byte in data {
        if (0x20..0x7F).contains(&byte) {
            out.push(byte as char);
        } else {
            out.push('.');
        }
    }
    out.push('\n');
}
