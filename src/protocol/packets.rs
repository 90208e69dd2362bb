//! Packet layouts interpreted by the proxy
//!
//! All multi-byte integers are little-endian. A packet's declared size may
//! be smaller than the span actually framed on the wire; the framing layer
//! rounds up to the header-size boundary.

use super::ProtocolError;
use bytes::{Buf, BufMut};

/// Header size on the Patch protocol.
pub const PATCH_HEADER_SIZE: usize = 4;

/// Header size on Blue Burst: the 4-byte common header plus the flags word
/// is treated as one 8-byte unit by both framing and encryption.
pub const BB_HEADER_SIZE: usize = 8;

/// The common packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub size: u16,
    pub ptype: u16,
}

impl Header {
    pub const SIZE: usize = 4;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        Ok(Self {
            size: buf.get_u16_le(),
            ptype: buf.get_u16_le(),
        })
    }
}

/// The Blue Burst welcome packet, first frame of every session. Never
/// encrypted; carries the seed vectors that key both directions.
#[derive(Debug, Clone)]
pub struct WelcomePkt {
    pub header: Header,
    pub flags: u32,
    pub copyright: [u8; 96],
    pub server_vector: [u8; 48],
    pub client_vector: [u8; 48],
}

impl WelcomePkt {
    pub const SIZE: usize = 200;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        let header = Header {
            size: buf.get_u16_le(),
            ptype: buf.get_u16_le(),
        };
        let flags = buf.get_u32_le();
        let mut copyright = [0u8; 96];
        buf.copy_to_slice(&mut copyright);
        let mut server_vector = [0u8; 48];
        buf.copy_to_slice(&mut server_vector);
        let mut client_vector = [0u8; 48];
        buf.copy_to_slice(&mut client_vector);
        Ok(Self {
            header,
            flags,
            copyright,
            server_vector,
            client_vector,
        })
    }
}

/// The Patch protocol welcome packet.
#[derive(Debug, Clone)]
pub struct PatchWelcomePkt {
    pub header: Header,
    pub copyright: [u8; 44],
    pub padding: [u8; 20],
    pub server_vector: [u8; 4],
    pub client_vector: [u8; 4],
}

impl PatchWelcomePkt {
    pub const SIZE: usize = 76;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        let header = Header {
            size: buf.get_u16_le(),
            ptype: buf.get_u16_le(),
        };
        let mut copyright = [0u8; 44];
        buf.copy_to_slice(&mut copyright);
        let mut padding = [0u8; 20];
        buf.copy_to_slice(&mut padding);
        let mut server_vector = [0u8; 4];
        buf.copy_to_slice(&mut server_vector);
        let mut client_vector = [0u8; 4];
        buf.copy_to_slice(&mut client_vector);
        Ok(Self {
            header,
            copyright,
            padding,
            server_vector,
            client_vector,
        })
    }
}

/// The Blue Burst redirect packet (type 0x19): tells the client which
/// address to reconnect to. The one packet the proxy mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPacket {
    pub size: u16,
    pub ptype: u16,
    pub flags: u32,
    pub ip: [u8; 4],
    pub port: u16,
    pub padding: u16,
}

impl RedirectPacket {
    pub const SIZE: usize = 16;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        let size = buf.get_u16_le();
        let ptype = buf.get_u16_le();
        let flags = buf.get_u32_le();
        let mut ip = [0u8; 4];
        buf.copy_to_slice(&mut ip);
        Ok(Self {
            size,
            ptype,
            flags,
            ip,
            port: buf.get_u16_le(),
            padding: buf.get_u16_le(),
        })
    }

    /// Serialize over the first [`Self::SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        buf.put_u16_le(self.size);
        buf.put_u16_le(self.ptype);
        buf.put_u32_le(self.flags);
        buf.put_slice(&self.ip);
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.padding);
        Ok(())
    }
}

/// The Patch protocol redirect packet (type 0x14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRedirectPacket {
    pub size: u16,
    pub ptype: u16,
    pub ip: [u8; 4],
    pub port: u16,
    pub padding: u16,
}

impl PatchRedirectPacket {
    pub const SIZE: usize = 12;

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        let size = buf.get_u16_le();
        let ptype = buf.get_u16_le();
        let mut ip = [0u8; 4];
        buf.copy_to_slice(&mut ip);
        Ok(Self {
            size,
            ptype,
            ip,
            port: buf.get_u16_le(),
            padding: buf.get_u16_le(),
        })
    }

    /// Serialize over the first [`Self::SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::Truncated {
                needed: Self::SIZE,
                have: buf.len(),
            });
        }
        let mut buf = buf;
        buf.put_u16_le(self.size);
        buf.put_u16_le(self.ptype);
        buf.put_slice(&self.ip);
        buf.put_u16_le(self.port);
        buf.put_u16_le(self.padding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_decode() {
        let header = Header::decode(&[0xC8, 0x00, 0x03, 0x00]).unwrap();
        assert_eq!(header.size, 0xC8);
        assert_eq!(header.ptype, 0x03);
    }

    #[test]
    fn test_header_truncated() {
        assert!(matches!(
            Header::decode(&[0xC8, 0x00]),
            Err(ProtocolError::Truncated { needed: 4, have: 2 })
        ));
    }

    #[test]
    fn test_bb_welcome_vector_offsets() {
        let mut blob = vec![0u8; WelcomePkt::SIZE];
        blob[0] = 0xC8;
        blob[2] = 0x03;
        // server vector at 0x68, client vector at 0x98
        for i in 0..48 {
            blob[0x68 + i] = 0xA0 + i as u8;
            blob[0x98 + i] = 0x10 + i as u8;
        }

        let pkt = WelcomePkt::decode(&blob).unwrap();
        assert_eq!(pkt.header.size, 0xC8);
        assert_eq!(pkt.header.ptype, 0x03);
        assert_eq!(pkt.server_vector[0], 0xA0);
        assert_eq!(pkt.server_vector[47], 0xA0 + 47);
        assert_eq!(pkt.client_vector[0], 0x10);
        assert_eq!(pkt.client_vector[47], 0x10 + 47);
    }

    #[test]
    fn test_patch_welcome_vector_offsets() {
        let mut blob = vec![0u8; PatchWelcomePkt::SIZE];
        blob[0] = 0x4C;
        blob[2] = 0x02;
        blob[0x44..0x48].copy_from_slice(&[1, 2, 3, 4]);
        blob[0x48..0x4C].copy_from_slice(&[5, 6, 7, 8]);

        let pkt = PatchWelcomePkt::decode(&blob).unwrap();
        assert_eq!(pkt.header.ptype, 0x02);
        assert_eq!(pkt.server_vector, [1, 2, 3, 4]);
        assert_eq!(pkt.client_vector, [5, 6, 7, 8]);
    }

    #[test]
    fn test_redirect_roundtrip() {
        let pkt = RedirectPacket {
            size: 0x10,
            ptype: 0x19,
            flags: 0,
            ip: [10, 0, 0, 5],
            port: 15010,
            padding: 0,
        };

        let mut buf = [0u8; RedirectPacket::SIZE];
        pkt.encode_into(&mut buf).unwrap();
        assert_eq!(RedirectPacket::decode(&buf).unwrap(), pkt);
    }

    #[test]
    fn test_patch_redirect_roundtrip() {
        let pkt = PatchRedirectPacket {
            size: 0x0C,
            ptype: 0x14,
            ip: [192, 168, 1, 2],
            port: 11010,
            padding: 0,
        };

        let mut buf = [0u8; PatchRedirectPacket::SIZE];
        pkt.encode_into(&mut buf).unwrap();
        assert_eq!(PatchRedirectPacket::decode(&buf).unwrap(), pkt);
    }
}
