//! Join handshake payload

use crate::error::{Error, Result};
use crate::group::Rank;
use crate::tensor::DType;

use super::{Frame, FrameHeader, Opcode, ProtocolVersion, PROTOCOL_VERSION};

/// Handshake sent by the dialing rank and answered by the acceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    pub version: ProtocolVersion,
    pub group_size: u32,
}

impl Hello {
    /// Encoded payload length: `[major:2][minor:2][group_size:4]`
    pub const LEN: usize = 8;

    /// Hello for the current protocol version
    pub fn new(group_size: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            group_size,
        }
    }

    pub fn header(&self, sender: Rank) -> FrameHeader {
        FrameHeader::new(Opcode::Hello, sender, DType::U8, Self::LEN as u64)
    }

    pub fn to_payload(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.version.major.to_be_bytes());
        buf[2..4].copy_from_slice(&self.version.minor.to_be_bytes());
        buf[4..8].copy_from_slice(&self.group_size.to_be_bytes());
        buf
    }

    /// Parse a frame that must be a hello
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.header.opcode != Opcode::Hello {
            return Err(Error::handshake(
                Some(frame.header.sender),
                format!("expected HELLO, got {}", frame.header.opcode),
            ));
        }
        if frame.header.dtype != DType::U8 || frame.payload.len() != Self::LEN {
            return Err(Error::malformed(format!(
                "HELLO payload must be {} u8 elements, got {} {}",
                Self::LEN,
                frame.header.count,
                frame.header.dtype
            )));
        }
        let p = &frame.payload;
        Ok(Self {
            version: ProtocolVersion::new(
                u16::from_be_bytes([p[0], p[1]]),
                u16::from_be_bytes([p[2], p[3]]),
            ),
            group_size: u32::from_be_bytes([p[4], p[5], p[6], p[7]]),
        })
    }

    /// Check a remote hello against the local group
    pub fn check(&self, peer: Rank, group_size: u32) -> Result<()> {
        if !PROTOCOL_VERSION.is_compatible_with(&self.version) {
            return Err(Error::ProtocolVersion {
                expected: PROTOCOL_VERSION.to_string(),
                actual: self.version.to_string(),
            });
        }
        if self.group_size != group_size {
            return Err(Error::handshake(
                Some(peer),
                format!(
                    "rank {} believes the group has {} ranks, expected {}",
                    peer, self.group_size, group_size
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(hello: Hello, sender: Rank) -> Frame {
        Frame::new(hello.header(sender), hello.to_payload().to_vec()).unwrap()
    }

    #[test]
    fn test_hello_payload_layout() {
        let hello = Hello {
            version: ProtocolVersion::new(1, 2),
            group_size: 4,
        };
        assert_eq!(hello.to_payload(), [0, 1, 0, 2, 0, 0, 0, 4]);

        let parsed = Hello::from_frame(&frame_of(hello, 3)).unwrap();
        assert_eq!(parsed, hello);
    }

    #[test]
    fn test_hello_rejects_other_opcode() {
        let frame = Frame::new(
            FrameHeader::new(Opcode::Send, 1, DType::U8, 8),
            vec![0; 8],
        )
        .unwrap();
        assert!(matches!(
            Hello::from_frame(&frame).unwrap_err(),
            Error::Handshake { peer: Some(1), .. }
        ));
    }

    #[test]
    fn test_hello_check() {
        let ok = Hello::new(3);
        assert!(ok.check(1, 3).is_ok());

        assert!(matches!(
            ok.check(1, 4).unwrap_err(),
            Error::Handshake { .. }
        ));

        let future = Hello {
            version: ProtocolVersion::new(PROTOCOL_VERSION.major + 1, 0),
            group_size: 3,
        };
        assert!(matches!(
            future.check(1, 3).unwrap_err(),
            Error::ProtocolVersion { .. }
        ));
    }
}
