//! Redirect rewriting
//!
//! PSO servers move the client between servers by sending a redirect
//! packet with the next server's address. The server-to-client
//! half-session rewrites that address to the proxy's own, which is what
//! keeps the whole multi-server login flow inside the proxy.

use crate::config::ProxyRegistry;
use crate::crypto::Cipher;
use crate::protocol::{PatchRedirectPacket, RedirectPacket, Variant};
use crate::proxy::interceptor::{Frame, SessionError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rewrites redirect frames in the server-to-client direction.
pub(crate) struct RedirectRewriter {
    registry: Arc<ProxyRegistry>,
    variant: Variant,
}

impl RedirectRewriter {
    pub fn new(registry: Arc<ProxyRegistry>, variant: Variant) -> Self {
        Self { registry, variant }
    }

    /// Rewrite `frame` in place if it is a redirect. The mutated plaintext
    /// is re-encrypted with `cipher` — the same instance that decrypted
    /// the frame — which reproduces ciphertext the client-side peer
    /// accepts (see the [`Cipher`] contract). Returns whether the frame
    /// was rewritten.
    pub fn apply(&self, frame: &mut Frame, cipher: &mut Cipher) -> Result<bool, SessionError> {
        if frame.command != self.variant.redirect_type() {
            return Ok(false);
        }

        match self.variant {
            Variant::BlueBurst => {
                let mut pkt = RedirectPacket::decode(&frame.plaintext)?;
                self.rewrite_addr(&mut pkt.ip, &mut pkt.port);
                pkt.encode_into(&mut frame.plaintext)?;
            }
            Variant::Patch => {
                let mut pkt = PatchRedirectPacket::decode(&frame.plaintext)?;
                self.rewrite_addr(&mut pkt.ip, &mut pkt.port);
                pkt.encode_into(&mut frame.plaintext)?;
            }
        }

        frame.data.copy_from_slice(&frame.plaintext);
        cipher.encrypt(&mut frame.data)?;
        Ok(true)
    }

    fn rewrite_addr(&self, ip: &mut [u8; 4], port: &mut u16) {
        *ip = self.registry.redirect_ip();
        match self.registry.translate_port(*port) {
            Some(proxy_port) => {
                debug!("redirect port {} translated to {}", port, proxy_port);
                *port = proxy_port;
            }
            None => warn!("no proxy mapping for redirect port {}", port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortMap;
    use std::net::Ipv4Addr;

    fn registry() -> Arc<ProxyRegistry> {
        Arc::new(ProxyRegistry::new(
            Ipv4Addr::new(192, 168, 1, 2),
            "10.0.0.5",
            &PortMap::builtin(true),
        ))
    }

    fn bb_cipher() -> Cipher {
        let mut vector = [0u8; 48];
        for (i, b) in vector.iter_mut().enumerate() {
            *b = (i * 3) as u8;
        }
        Cipher::new_bb(vector)
    }

    /// An encrypted frame as it would arrive from the server, plus the
    /// proxy-side cipher positioned as if it had just decrypted it.
    fn arriving_frame(pkt: &RedirectPacket) -> (Frame, Cipher, Cipher) {
        let mut plaintext = vec![0u8; 16];
        pkt.encode_into(&mut plaintext).unwrap();

        let mut data = plaintext.clone();
        bb_cipher().encrypt(&mut data).unwrap();

        let mut proxy_cipher = bb_cipher();
        let mut decrypted = data.clone();
        proxy_cipher.decrypt(&mut decrypted).unwrap();
        assert_eq!(decrypted, plaintext);

        let frame = Frame {
            command: pkt.ptype,
            size: 16,
            data,
            plaintext,
        };
        (frame, proxy_cipher, bb_cipher())
    }

    #[test]
    fn test_rewrites_ip_and_port() {
        let pkt = RedirectPacket {
            size: 0x10,
            ptype: 0x19,
            flags: 0,
            ip: [10, 0, 0, 5],
            port: 15010,
            padding: 0,
        };
        let (mut frame, mut proxy_cipher, mut client_cipher) = arriving_frame(&pkt);

        let rewriter = RedirectRewriter::new(registry(), Variant::BlueBurst);
        assert!(rewriter.apply(&mut frame, &mut proxy_cipher).unwrap());

        // The client decrypts the forwarded bytes with its own mirror of
        // the server cipher and must see the proxy's address.
        let mut seen = frame.data.clone();
        client_cipher.decrypt(&mut seen).unwrap();
        let rewritten = RedirectPacket::decode(&seen).unwrap();
        assert_eq!(rewritten.ip, [192, 168, 1, 2]);
        assert_eq!(rewritten.port, 15000);
        assert_eq!(rewritten.ptype, 0x19);
        assert_eq!(rewritten.size, 0x10);
    }

    #[test]
    fn test_unmapped_port_left_unchanged() {
        let pkt = RedirectPacket {
            size: 0x10,
            ptype: 0x19,
            flags: 0,
            ip: [10, 0, 0, 5],
            port: 4242,
            padding: 0,
        };
        let (mut frame, mut proxy_cipher, mut client_cipher) = arriving_frame(&pkt);

        let rewriter = RedirectRewriter::new(registry(), Variant::BlueBurst);
        assert!(rewriter.apply(&mut frame, &mut proxy_cipher).unwrap());

        let mut seen = frame.data.clone();
        client_cipher.decrypt(&mut seen).unwrap();
        let rewritten = RedirectPacket::decode(&seen).unwrap();
        assert_eq!(rewritten.ip, [192, 168, 1, 2]);
        assert_eq!(rewritten.port, 4242);
    }

    #[test]
    fn test_trailing_bytes_survive_rewrite() {
        // A redirect padded out beyond the fixed struct: only the leading
        // struct-sized span is rewritten, the tail passes through intact.
        let pkt = RedirectPacket {
            size: 0x18,
            ptype: 0x19,
            flags: 0,
            ip: [10, 0, 0, 5],
            port: 15010,
            padding: 0,
        };
        let tail = [0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8];
        let mut plaintext = vec![0u8; 24];
        pkt.encode_into(&mut plaintext).unwrap();
        plaintext[16..24].copy_from_slice(&tail);

        let mut data = plaintext.clone();
        bb_cipher().encrypt(&mut data).unwrap();

        let mut proxy_cipher = bb_cipher();
        let mut decrypted = data.clone();
        proxy_cipher.decrypt(&mut decrypted).unwrap();

        let mut frame = Frame {
            command: 0x19,
            size: 24,
            data,
            plaintext: decrypted,
        };

        let rewriter = RedirectRewriter::new(registry(), Variant::BlueBurst);
        assert!(rewriter.apply(&mut frame, &mut proxy_cipher).unwrap());

        let mut client_cipher = bb_cipher();
        let mut seen = frame.data.clone();
        client_cipher.decrypt(&mut seen).unwrap();
        let rewritten = RedirectPacket::decode(&seen).unwrap();
        assert_eq!(rewritten.ip, [192, 168, 1, 2]);
        assert_eq!(rewritten.port, 15000);
        assert_eq!(&seen[16..24], &tail);
    }

    #[test]
    fn test_non_redirect_frame_untouched() {
        let mut plaintext = vec![0u8; 16];
        plaintext[0] = 0x10;
        plaintext[2] = 0x93;
        let data = plaintext.clone();
        let mut frame = Frame {
            command: 0x93,
            size: 16,
            data: data.clone(),
            plaintext,
        };

        let mut cipher = bb_cipher();
        let rewriter = RedirectRewriter::new(registry(), Variant::BlueBurst);
        assert!(!rewriter.apply(&mut frame, &mut cipher).unwrap());
        assert_eq!(frame.data, data);
    }

    #[test]
    fn test_patch_redirect_rewritten() {
        let pkt = PatchRedirectPacket {
            size: 0x0C,
            ptype: 0x14,
            ip: [10, 0, 0, 5],
            port: 11010,
            padding: 0,
        };
        let mut plaintext = vec![0u8; 12];
        pkt.encode_into(&mut plaintext).unwrap();

        let mut server_cipher = Cipher::new_patch([4, 3, 2, 1]);
        let mut data = plaintext.clone();
        server_cipher.encrypt(&mut data).unwrap();

        let mut proxy_cipher = Cipher::new_patch([4, 3, 2, 1]);
        let mut decrypted = data.clone();
        proxy_cipher.decrypt(&mut decrypted).unwrap();

        let mut frame = Frame {
            command: 0x14,
            size: 12,
            data,
            plaintext: decrypted,
        };

        let rewriter = RedirectRewriter::new(registry(), Variant::Patch);
        assert!(rewriter.apply(&mut frame, &mut proxy_cipher).unwrap());

        let mut client_cipher = Cipher::new_patch([4, 3, 2, 1]);
        let mut seen = frame.data.clone();
        client_cipher.decrypt(&mut seen).unwrap();
        let rewritten = PatchRedirectPacket::decode(&seen).unwrap();
        assert_eq!(rewritten.ip, [192, 168, 1, 2]);
        assert_eq!(rewritten.port, 11000);
    }
}
