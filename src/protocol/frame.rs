//! Frame codec
//!
//! The header is fixed-size so a receiver can read it, validate it and then
//! read exactly the announced payload without peeking.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::group::Rank;
use crate::tensor::{DType, TensorDescriptor};

/// Size of the fixed frame header in bytes
pub const HEADER_LEN: usize = 14;

// ─────────────────────────────────────────────────────────────────
// Opcodes
// ─────────────────────────────────────────────────────────────────

/// Operation a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Join handshake
    Hello = 0,
    /// Point-to-point send, consumed by a receive
    Send = 1,
    Broadcast = 2,
    Reduce = 3,
    AllReduce = 4,
    Barrier = 5,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Opcode::Hello),
            1 => Ok(Opcode::Send),
            2 => Ok(Opcode::Broadcast),
            3 => Ok(Opcode::Reduce),
            4 => Ok(Opcode::AllReduce),
            5 => Ok(Opcode::Barrier),
            other => Err(Error::malformed(format!("unknown opcode {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Hello => "HELLO",
            Opcode::Send => "SEND",
            Opcode::Broadcast => "BROADCAST",
            Opcode::Reduce => "REDUCE",
            Opcode::AllReduce => "ALL_REDUCE",
            Opcode::Barrier => "BARRIER",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Header
// ─────────────────────────────────────────────────────────────────

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub sender: Rank,
    pub dtype: DType,
    pub count: u64,
}

impl FrameHeader {
    pub fn new(opcode: Opcode, sender: Rank, dtype: DType, count: u64) -> Self {
        Self {
            opcode,
            sender,
            dtype,
            count,
        }
    }

    /// Header announcing the contents of `desc`
    pub fn for_tensor(opcode: Opcode, sender: Rank, desc: &TensorDescriptor<'_>) -> Self {
        Self::new(opcode, sender, desc.dtype(), desc.count())
    }

    /// Header of a frame with no payload
    pub fn empty(opcode: Opcode, sender: Rank) -> Self {
        Self::new(opcode, sender, DType::U8, 0)
    }

    /// Payload length in bytes announced by this header
    pub fn payload_len(&self) -> Result<u64> {
        self.dtype.byte_len(self.count).ok_or_else(|| {
            Error::malformed(format!(
                "payload of {} {} elements overflows",
                self.count, self.dtype
            ))
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.opcode as u8;
        buf[1..5].copy_from_slice(&self.sender.to_be_bytes());
        buf[5] = self.dtype.tag();
        buf[6..14].copy_from_slice(&self.count.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let opcode = Opcode::from_u8(buf[0])?;
        let sender = Rank::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let dtype = DType::from_tag(buf[5])?;
        let mut count = [0u8; 8];
        count.copy_from_slice(&buf[6..14]);
        let header = Self::new(opcode, sender, dtype, u64::from_be_bytes(count));
        header.payload_len()?;
        Ok(header)
    }
}

// ─────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────

/// A header with its owned payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking the payload matches the header
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Result<Self> {
        check_payload(&header, payload.len())?;
        Ok(Self { header, payload })
    }
}

fn check_payload(header: &FrameHeader, actual: usize) -> Result<()> {
    let expected = header.payload_len()?;
    if expected != actual as u64 {
        return Err(Error::malformed(format!(
            "{} frame announces {} payload bytes, found {}",
            header.opcode, expected, actual
        )));
    }
    Ok(())
}

/// Encode a header and payload into one contiguous buffer
pub fn encode(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>> {
    check_payload(header, payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode exactly one frame from `bytes`
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::malformed(format!(
            "frame of {} bytes is shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&bytes[..HEADER_LEN]);
    let header = FrameHeader::from_bytes(&raw)?;
    Frame::new(header, bytes[HEADER_LEN..].to_vec())
}

// ─────────────────────────────────────────────────────────────────
// Stream I/O
// ─────────────────────────────────────────────────────────────────

/// Read and validate one header. Payloads above `max_payload` bytes are
/// rejected before anything is allocated.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: u64,
) -> Result<FrameHeader> {
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = FrameHeader::from_bytes(&raw)?;
    let len = header.payload_len()?;
    if len > max_payload {
        return Err(Error::malformed(format!(
            "{} frame payload of {} bytes exceeds limit of {}",
            header.opcode, len, max_payload
        )));
    }
    Ok(header)
}

/// Read one complete frame
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_payload: u64) -> Result<Frame> {
    let header = read_header(reader, max_payload).await?;
    let mut payload = vec![0u8; header.payload_len()? as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Frame { header, payload })
}

/// Skip a payload that was announced but is not wanted
pub async fn discard_payload<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<()> {
    let copied = tokio::io::copy(&mut reader.take(len), &mut tokio::io::sink()).await?;
    if copied != len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

/// Write one frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &FrameHeader,
    payload: &[u8],
) -> Result<()> {
    check_payload(header, payload.len())?;
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
