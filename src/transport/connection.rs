//! A single established peer connection

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::group::Rank;
use crate::protocol::{self, Frame, FrameHeader, HEADER_LEN};

use super::TransportConfig;

// ─────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────

/// Traffic counters of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub peer: Rank,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub closed: bool,
}

// ─────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────

/// Full-duplex framed channel to one peer.
///
/// Reads and writes are serialized by their own async mutexes, so a frame is
/// never interleaved with another one even if the caller misuses the group.
pub struct Connection {
    peer: Rank,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    io_timeout: Option<Duration>,
    max_payload: u64,
    closed: watch::Sender<bool>,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Connection {
    /// Wrap a stream whose handshake already completed
    pub fn new(peer: Rank, stream: TcpStream, config: &TransportConfig) -> Result<Self> {
        stream.set_nodelay(config.nodelay)?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            peer,
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(BufWriter::new(write_half)),
            io_timeout: config.io_timeout,
            max_payload: config.max_frame_bytes,
            closed,
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    /// Rank at the other end
    pub fn peer(&self) -> Rank {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Write one frame, returning once it is handed to the socket
    pub async fn send(&self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        self.guarded("send", async {
            let mut writer = self.writer.lock().await;
            protocol::write_frame(&mut *writer, header, payload).await
        })
        .await?;

        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent
            .fetch_add((HEADER_LEN + payload.len()) as u64, Ordering::Relaxed);
        trace!(peer = self.peer, opcode = %header.opcode, count = header.count, "Frame sent");
        Ok(())
    }

    /// Read the next frame into an owned buffer
    pub async fn recv(&self) -> Result<Frame> {
        let frame = self
            .guarded("recv", async {
                let mut reader = self.reader.lock().await;
                protocol::read_frame(&mut *reader, self.max_payload).await
            })
            .await?;

        self.count_received(frame.payload.len());
        trace!(peer = self.peer, opcode = %frame.header.opcode, count = frame.header.count, "Frame received");
        Ok(frame)
    }

    /// Read the next frame straight into `dst`.
    ///
    /// `check` sees the header first. If it rejects the header the payload
    /// is skipped, so the stream stays aligned on the next frame and `dst`
    /// is left untouched. An accepted header must announce exactly
    /// `dst.len()` bytes.
    pub async fn recv_into<F>(&self, dst: &mut [u8], check: F) -> Result<FrameHeader>
    where
        F: FnOnce(&FrameHeader) -> Result<()>,
    {
        let (header, outcome) = self
            .guarded("recv", async {
                let mut reader = self.reader.lock().await;
                let header = protocol::read_header(&mut *reader, self.max_payload).await?;
                let len = header.payload_len()?;

                if let Err(rejected) = check(&header) {
                    protocol::discard_payload(&mut *reader, len).await?;
                    return Ok((header, Err(rejected)));
                }
                if len != dst.len() as u64 {
                    protocol::discard_payload(&mut *reader, len).await?;
                    return Ok((
                        header,
                        Err(Error::malformed(format!(
                            "{} frame carries {} bytes, buffer holds {}",
                            header.opcode,
                            len,
                            dst.len()
                        ))),
                    ));
                }
                reader.read_exact(dst).await?;
                Ok::<_, Error>((header, Ok(())))
            })
            .await?;

        self.count_received(header.payload_len().unwrap_or(0) as usize);
        if let Err(e) = &outcome {
            debug!(peer = self.peer, opcode = %header.opcode, error = %e, "Frame rejected and drained");
        }
        outcome.map(|()| header)
    }

    /// Close the connection.
    ///
    /// Pending and later I/O on it fails with `ConnectionLost`, and the write
    /// half is shut down so the peer observes end of stream.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(peer = self.peer, "Closing connection");
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            peer: self.peer,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    fn count_received(&self, payload_len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add((HEADER_LEN + payload_len) as u64, Ordering::Relaxed);
    }

    /// Run one I/O step under the close signal and the I/O timeout.
    ///
    /// Stream errors become `ConnectionLost`; codec errors pass through. A
    /// lost connection is closed for good, since a step cut short leaves the
    /// stream in the middle of a frame.
    async fn guarded<T, F>(&self, what: &'static str, io: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Error::connection_lost(self.peer, "connection was closed"));
        }

        let timed = async {
            match self.io_timeout {
                Some(limit) => tokio::time::timeout(limit, io).await.map_err(|_| {
                    Error::connection_lost(
                        self.peer,
                        format!("{} timed out after {}ms", what, limit.as_millis()),
                    )
                })?,
                None => io.await,
            }
        };

        let result = tokio::select! {
            result = timed => result.map_err(|e| match e {
                Error::Io(io_err) => Error::connection_lost(self.peer, format!("{} failed: {}", what, io_err)),
                other => other,
            }),
            _ = wait_closed(&mut closed) => {
                Err(Error::connection_lost(self.peer, format!("connection closed during {}", what)))
            }
        };

        if let Err(Error::ConnectionLost { message, .. }) = &result {
            if !self.is_closed() {
                warn!(peer = self.peer, reason = %message, "Connection lost");
                self.close().await;
            }
        }
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
