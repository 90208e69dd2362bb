//! Half-session: one direction of an intercepted connection
//!
//! Each session is exactly two half-sessions. One reads frames the client
//! sends and forwards them to the server; the other reads frames the
//! server sends, passes them through the redirect rewriter, and forwards
//! them to the client. Each owns its socket read half and its direction's
//! cipher outright, so no locking is needed on either.

use crate::crypto::{Cipher, CryptoError};
use crate::protocol::{Header, ProtocolError, Variant};
use crate::proxy::bus::{PacketMsg, PacketSender};
use crate::proxy::redirect::RedirectRewriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, trace};

/// Read deadline. Timeouts are the stop-flag polling points, not failures;
/// they also bound teardown latency when the partner dies.
const READ_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session ended")]
    Ended,

    #[error("peer disconnected")]
    Eof,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A decoded frame: the on-wire bytes that will be forwarded plus their
/// decrypted mirror. `size` is the aligned span actually read, never the
/// declared header size.
#[derive(Debug)]
pub(crate) struct Frame {
    pub command: u16,
    pub size: u16,
    pub data: Vec<u8>,
    pub plaintext: Vec<u8>,
}

/// One direction of a session.
pub(crate) struct Interceptor {
    pub server_name: Arc<str>,
    pub from_name: &'static str,
    pub to_name: &'static str,
    pub variant: Variant,
    pub reader: OwnedReadHalf,
    pub cipher: Cipher,
    pub dest: Arc<Mutex<OwnedWriteHalf>>,
    pub bus: PacketSender,
    /// Polled on every read timeout; set by the partner on its teardown.
    pub stop: Arc<AtomicBool>,
    /// Set on our teardown to stop the partner.
    pub partner_stop: Arc<AtomicBool>,
    /// Present only on the server-to-client direction.
    pub rewriter: Option<RedirectRewriter>,
}

impl Interceptor {
    /// Decrypt and forward frames until the session ends. Any error is
    /// fatal to the whole session: the stream-cipher state cannot survive
    /// a gap, so there is no retry.
    pub async fn run(mut self) {
        loop {
            let mut frame = match read_frame(
                &mut self.reader,
                &mut self.cipher,
                self.variant,
                &self.stop,
            )
            .await
            {
                Ok(frame) => frame,
                Err(SessionError::Ended) => break,
                Err(SessionError::Eof) => {
                    info!("{} has disconnected", self.from_name);
                    break;
                }
                Err(e) => {
                    error!(
                        "Error reading from {} on {} session: {}",
                        self.from_name, self.server_name, e
                    );
                    break;
                }
            };

            if let Some(rewriter) = &self.rewriter {
                match rewriter.apply(&mut frame, &mut self.cipher) {
                    Ok(true) => debug!("rewrote {} redirect", self.server_name),
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to rewrite {} redirect: {}", self.server_name, e);
                        break;
                    }
                }
            }

            debug!(
                "read {:#04x} packet ({} bytes) from {}",
                frame.command, frame.size, self.from_name
            );

            let msg = PacketMsg {
                command: frame.command,
                size: frame.size,
                data: frame.data,
                plaintext: frame.plaintext,
                received_at: Instant::now(),
                server_name: self.server_name.clone(),
                from_name: self.from_name,
                to_name: self.to_name,
                dest: self.dest.clone(),
            };
            if self.bus.send(msg).await.is_err() {
                // Consumer is gone; nothing can be forwarded anymore.
                break;
            }
        }

        self.partner_stop.store(true, Ordering::Relaxed);
        debug!(
            "{} half-session closed for {}",
            self.from_name, self.server_name
        );
    }
}

/// Read one aligned frame off the wire and decrypt it.
///
/// PSO servers may declare a size that is not a multiple of the header
/// size; the cipher operates on aligned blocks, so the remainder is padded
/// up to the next multiple. Dropping or miscalculating those bytes desyncs
/// the cipher permanently.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    cipher: &mut Cipher,
    variant: Variant,
    stop: &AtomicBool,
) -> Result<Frame, SessionError>
where
    R: AsyncReadExt + Unpin,
{
    let header_size = variant.header_size();
    let (mut data, mut plaintext) = read_decrypted(reader, cipher, header_size, stop).await?;
    let header = Header::decode(&plaintext)?;

    // A declared size at or under the header size is a header-only frame.
    let mut remainder = (header.size as usize).saturating_sub(header_size);
    remainder += remainder % header_size;

    if remainder > 0 {
        let (body, body_plain) = read_decrypted(reader, cipher, remainder, stop).await?;
        data.extend_from_slice(&body);
        plaintext.extend_from_slice(&body_plain);
    }

    Ok(Frame {
        command: header.ptype,
        size: (header_size + remainder) as u16,
        data,
        plaintext,
    })
}

/// Read exactly `len` ciphertext bytes and return them alongside their
/// decrypted copy. The ciphertext is kept intact for forwarding.
async fn read_decrypted<R>(
    reader: &mut R,
    cipher: &mut Cipher,
    len: usize,
    stop: &AtomicBool,
) -> Result<(Vec<u8>, Vec<u8>), SessionError>
where
    R: AsyncReadExt + Unpin,
{
    let mut data = vec![0u8; len];
    read_exact_polling(reader, &mut data, stop).await?;

    let mut plaintext = data.clone();
    cipher.decrypt(&mut plaintext)?;
    Ok((data, plaintext))
}

/// `read_exact` with a 1-second deadline per attempt. A timeout is the
/// opportunity to notice the partner tore the session down.
async fn read_exact_polling<R>(
    reader: &mut R,
    buf: &mut [u8],
    stop: &AtomicBool,
) -> Result<(), SessionError>
where
    R: AsyncReadExt + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        match timeout(READ_POLL_INTERVAL, reader.read(&mut buf[received..])).await {
            Err(_elapsed) => {
                if stop.load(Ordering::Relaxed) {
                    return Err(SessionError::Ended);
                }
            }
            Ok(Ok(0)) => return Err(SessionError::Eof),
            Ok(Ok(n)) => {
                trace!("read {} of {} bytes", received + n, buf.len());
                received += n;
            }
            Ok(Err(e)) => return Err(SessionError::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn cipher_pair() -> (Cipher, Cipher) {
        let mut vector = [0u8; 48];
        for (i, b) in vector.iter_mut().enumerate() {
            *b = i as u8;
        }
        (Cipher::new_bb(vector), Cipher::new_bb(vector))
    }

    /// Encrypt a frame whose plaintext header declares `declared` bytes
    /// while `total` bytes are actually framed.
    fn encrypted_frame(sender: &mut Cipher, declared: u16, ptype: u16, total: usize) -> Vec<u8> {
        let mut frame = vec![0u8; total];
        frame[0..2].copy_from_slice(&declared.to_le_bytes());
        frame[2..4].copy_from_slice(&ptype.to_le_bytes());
        for (i, b) in frame.iter_mut().enumerate().skip(4) {
            *b = i as u8;
        }
        sender.encrypt(&mut frame).unwrap();
        frame
    }

    #[tokio::test]
    async fn test_declared_size_rounds_up() {
        // declared 14 with an 8-byte header reads 20 bytes off the wire
        let (mut sender, mut receiver) = cipher_pair();
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let wire = encrypted_frame(&mut sender, 14, 0x60, 20);
        tx.write_all(&wire).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 20);
        assert_eq!(frame.command, 0x60);
        assert_eq!(frame.data, wire);
        assert_eq!(frame.plaintext.len(), 20);
        assert_eq!(&frame.plaintext[0..2], &14u16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_aligned_size_reads_exactly() {
        let (mut sender, mut receiver) = cipher_pair();
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let wire = encrypted_frame(&mut sender, 16, 0x93, 16);
        tx.write_all(&wire).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 16);
        assert_eq!(frame.data.len(), 16);
    }

    #[tokio::test]
    async fn test_header_only_frame() {
        let (mut sender, mut receiver) = cipher_pair();
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let wire = encrypted_frame(&mut sender, 8, 0x05, 8);
        tx.write_all(&wire).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 8);
        assert_eq!(frame.command, 0x05);
    }

    #[tokio::test]
    async fn test_declared_size_below_header_clamps_to_header_only() {
        // declared 3 with an 8-byte header must not underflow; the frame
        // is read as header-only
        let (mut sender, mut receiver) = cipher_pair();
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let wire = encrypted_frame(&mut sender, 3, 0x05, 8);
        tx.write_all(&wire).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 8);
        assert_eq!(frame.command, 0x05);
        assert_eq!(frame.data, wire);
        assert_eq!(&frame.plaintext[0..2], &3u16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_patch_declared_size_below_header_clamps() {
        let mut sender = Cipher::new_patch([1, 2, 3, 4]);
        let mut receiver = Cipher::new_patch([1, 2, 3, 4]);
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let mut frame = vec![0u8; 4];
        frame[0..2].copy_from_slice(&2u16.to_le_bytes());
        frame[2..4].copy_from_slice(&0x0Bu16.to_le_bytes());
        sender.encrypt(&mut frame).unwrap();
        tx.write_all(&frame).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::Patch, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 4);
        assert_eq!(frame.command, 0x0B);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_keep_cipher_sync() {
        let (mut sender, mut receiver) = cipher_pair();
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        let first = encrypted_frame(&mut sender, 14, 0x60, 20);
        let second = encrypted_frame(&mut sender, 8, 0x05, 8);
        tx.write_all(&first).await.unwrap();
        tx.write_all(&second).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.command, 0x60);
        let frame = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap();
        assert_eq!(frame.command, 0x05);
        assert_eq!(frame.size, 8);
    }

    #[tokio::test]
    async fn test_patch_variant_aligns_to_four() {
        let mut sender = Cipher::new_patch([1, 2, 3, 4]);
        let mut receiver = Cipher::new_patch([1, 2, 3, 4]);
        let (mut tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);

        // declared 10 with a 4-byte header reads 12 bytes off the wire
        let mut frame = vec![0u8; 12];
        frame[0..2].copy_from_slice(&10u16.to_le_bytes());
        frame[2..4].copy_from_slice(&0x14u16.to_le_bytes());
        sender.encrypt(&mut frame).unwrap();
        tx.write_all(&frame).await.unwrap();

        let frame = read_frame(&mut rx, &mut receiver, Variant::Patch, &stop)
            .await
            .unwrap();
        assert_eq!(frame.size, 12);
        assert_eq!(frame.command, 0x14);
    }

    #[tokio::test]
    async fn test_eof_terminates_cleanly() {
        let (_, mut receiver) = cipher_pair();
        let (tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(false);
        drop(tx);

        let err = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Eof));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_observed_on_timeout() {
        let (_, mut receiver) = cipher_pair();
        let (_tx, mut rx) = tokio::io::duplex(256);
        let stop = AtomicBool::new(true);

        let err = read_frame(&mut rx, &mut receiver, Variant::BlueBurst, &stop)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Ended));
    }
}
