//! Full-mesh formation
//!
//! Rank `i` dials ranks `0..i` in ascending order while accepting one
//! connection from each of the ranks `i+1..n`. Both sides run concurrently
//! and share one deadline.

use std::net::SocketAddr;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransportSettings;
use crate::error::{Error, Result};
use crate::group::Rank;
use crate::protocol::{self, Hello};

use super::Connection;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Transport tuning, resolved from [`TransportSettings`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on forming the whole mesh
    pub connect_timeout: Duration,

    /// Per-frame read/write timeout once joined (None = wait forever)
    pub io_timeout: Option<Duration>,

    /// First delay between dial attempts
    pub initial_retry: Duration,

    /// Largest delay between dial attempts
    pub max_retry: Duration,

    /// Largest payload accepted in one frame
    pub max_frame_bytes: u64,

    /// Set TCP_NODELAY on every connection
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&TransportSettings::default())
    }
}

impl From<&TransportSettings> for TransportConfig {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            io_timeout: match settings.io_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            initial_retry: Duration::from_millis(settings.initial_retry_ms),
            max_retry: Duration::from_millis(settings.max_retry_ms),
            max_frame_bytes: settings.max_frame_mb.saturating_mul(1024 * 1024),
            nodelay: settings.nodelay,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Mesh Formation
// ─────────────────────────────────────────────────────────────────

/// Connect `rank` to every other rank listed in `peers`.
///
/// `listener` must already be bound to this rank's address. The returned
/// vector is indexed by rank; the slot for `rank` itself is `None`.
pub async fn open_all(
    listener: TcpListener,
    rank: Rank,
    peers: &[SocketAddr],
    config: &TransportConfig,
) -> Result<Vec<Option<Connection>>> {
    let size = peers.len() as u32;
    if rank >= size {
        return Err(Error::invalid_rank(rank, size, "rank outside the peer list"));
    }

    let deadline = Instant::now() + config.connect_timeout;
    info!(rank, size, "Forming mesh");

    let (lower, higher) = tokio::try_join!(
        dial_lower(rank, peers, config, deadline),
        accept_higher(&listener, rank, size, config, deadline),
    )?;

    let mut connections: Vec<Option<Connection>> = lower.into_iter().map(Some).collect();
    connections.push(None);
    connections.extend(higher.into_iter().map(Some));

    info!(rank, size, "Mesh formed");
    Ok(connections)
}

async fn dial_lower(
    rank: Rank,
    peers: &[SocketAddr],
    config: &TransportConfig,
    deadline: Instant,
) -> Result<Vec<Connection>> {
    let size = peers.len() as u32;
    let mut connections = Vec::with_capacity(rank as usize);

    for peer in 0..rank {
        let addr = peers[peer as usize];
        let mut stream = dial(peer, addr, config, deadline).await?;

        within(deadline, config, format!("handshaking with rank {}", peer), async {
            let hello = Hello::new(size);
            protocol::write_frame(&mut stream, &hello.header(rank), &hello.to_payload())
                .await
                .map_err(|e| handshake_io(Some(peer), e))?;

            let reply = protocol::read_frame(&mut stream, Hello::LEN as u64)
                .await
                .map_err(|e| handshake_io(Some(peer), e))?;
            if reply.header.sender != peer {
                return Err(Error::handshake(
                    Some(peer),
                    format!(
                        "dialed rank {} at {} but rank {} answered",
                        peer, addr, reply.header.sender
                    ),
                ));
            }
            Hello::from_frame(&reply)?.check(peer, size)
        })
        .await?;

        debug!(rank, peer, %addr, "Connected to lower rank");
        connections.push(Connection::new(peer, stream, config)?);
    }

    Ok(connections)
}

async fn accept_higher(
    listener: &TcpListener,
    rank: Rank,
    size: u32,
    config: &TransportConfig,
    deadline: Instant,
) -> Result<Vec<Connection>> {
    let expected = (size - rank - 1) as usize;
    let mut slots: Vec<Option<Connection>> = (0..expected).map(|_| None).collect();

    for _ in 0..expected {
        let waiting: Vec<Rank> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| rank + 1 + i as Rank)
            .collect();

        let (mut stream, remote) = within(
            deadline,
            config,
            format!("waiting for ranks {:?} to connect", waiting),
            async { listener.accept().await.map_err(Error::from) },
        )
        .await?;

        let peer = within(deadline, config, format!("handshaking with {}", remote), async {
            let frame = protocol::read_frame(&mut stream, Hello::LEN as u64)
                .await
                .map_err(|e| handshake_io(None, e))?;
            let hello = Hello::from_frame(&frame)?;
            let peer = frame.header.sender;

            if peer <= rank || peer >= size {
                return Err(Error::handshake(
                    Some(peer),
                    format!("rank {} may not dial rank {} in a group of {}", peer, rank, size),
                ));
            }
            if slots[(peer - rank - 1) as usize].is_some() {
                return Err(Error::handshake(
                    Some(peer),
                    format!("rank {} connected twice", peer),
                ));
            }
            hello.check(peer, size)?;

            let reply = Hello::new(size);
            protocol::write_frame(&mut stream, &reply.header(rank), &reply.to_payload())
                .await
                .map_err(|e| handshake_io(Some(peer), e))?;
            Ok(peer)
        })
        .await?;

        debug!(rank, peer, %remote, "Accepted higher rank");
        slots[(peer - rank - 1) as usize] = Some(Connection::new(peer, stream, config)?);
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| Error::Internal("mesh slot left empty".into())))
        .collect()
}

/// Dial one peer, retrying with exponential backoff until the deadline
async fn dial(
    peer: Rank,
    addr: SocketAddr,
    config: &TransportConfig,
    deadline: Instant,
) -> Result<TcpStream> {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_retry,
        max_interval: config.max_retry,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_error = match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!(peer, %addr, attempts, "Dial succeeded");
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => return Err(timeout_error(config, format!("dialing rank {} at {}", peer, addr))),
        };

        let delay = backoff.next_backoff().unwrap_or(config.max_retry);
        if Instant::now() + delay >= deadline {
            warn!(peer, %addr, attempts, error = %last_error, "Giving up on peer");
            return Err(timeout_error(
                config,
                format!(
                    "dialing rank {} at {} ({} attempts, last error: {})",
                    peer, addr, attempts, last_error
                ),
            ));
        }

        debug!(peer, %addr, attempts, delay_ms = delay.as_millis() as u64, error = %last_error, "Peer not reachable yet");
        tokio::time::sleep(delay).await;
    }
}

async fn within<T, F>(deadline: Instant, config: &TransportConfig, during: String, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(config, during)),
    }
}

fn timeout_error(config: &TransportConfig, during: String) -> Error {
    Error::ConnectionTimeout {
        during,
        timeout_ms: config.connect_timeout.as_millis() as u64,
    }
}

fn handshake_io(peer: Option<Rank>, e: Error) -> Error {
    match e {
        Error::Io(io) => Error::handshake(peer, format!("connection failed during handshake: {}", io)),
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameHeader, Opcode, ProtocolVersion};
    use crate::tensor::DType;

    fn quick() -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(5),
            initial_retry: Duration::from_millis(10),
            max_retry: Duration::from_millis(100),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn test_config_from_settings() {
        let settings = TransportSettings {
            io_timeout_ms: 0,
            max_frame_mb: 2,
            ..TransportSettings::default()
        };
        let config = TransportConfig::from(&settings);
        assert!(config.io_timeout.is_none());
        assert_eq!(config.max_frame_bytes, 2 * 1024 * 1024);
        assert_eq!(config.connect_timeout, Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_three_rank_mesh() {
        let mut listeners = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            peers.push(listener.local_addr().unwrap());
            listeners.push(listener);
        }

        let config = quick();
        let mut it = listeners.into_iter();
        let (l0, l1, l2) = (it.next().unwrap(), it.next().unwrap(), it.next().unwrap());
        let (m0, m1, m2) = tokio::try_join!(
            open_all(l0, 0, &peers, &config),
            open_all(l1, 1, &peers, &config),
            open_all(l2, 2, &peers, &config),
        )
        .unwrap();

        for (rank, mesh) in [m0, m1, m2].iter().enumerate() {
            assert_eq!(mesh.len(), 3);
            for (peer, slot) in mesh.iter().enumerate() {
                match slot {
                    None => assert_eq!(peer, rank),
                    Some(conn) => assert_eq!(conn.peer() as usize, peer),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_single_rank_needs_no_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peers = vec![listener.local_addr().unwrap()];
        let mesh = open_all(listener, 0, &peers, &quick()).await.unwrap();
        assert_eq!(mesh.len(), 1);
        assert!(mesh[0].is_none());
    }

    #[tokio::test]
    async fn test_missing_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peers = vec![listener.local_addr().unwrap(), "127.0.0.1:9".parse().unwrap()];
        let config = TransportConfig {
            connect_timeout: Duration::from_millis(300),
            ..quick()
        };

        let err = open_all(listener, 0, &peers, &config).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_wrong_group_size() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peers = vec![addr, "127.0.0.1:9".parse().unwrap()];

        let rogue = async {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let hello = Hello::new(5);
            protocol::write_frame(&mut stream, &hello.header(1), &hello.to_payload())
                .await
                .unwrap();
            stream
        };

        let config = quick();
        let (result, _stream) = tokio::join!(open_all(listener, 0, &peers, &config), rogue);
        assert!(matches!(result.unwrap_err(), Error::Handshake { .. }));
    }

    #[tokio::test]
    async fn test_rejects_incompatible_version() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peers = vec![addr, "127.0.0.1:9".parse().unwrap()];

        let rogue = async {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let hello = Hello {
                version: ProtocolVersion::new(99, 0),
                group_size: 2,
            };
            protocol::write_frame(&mut stream, &hello.header(1), &hello.to_payload())
                .await
                .unwrap();
            stream
        };

        let config = quick();
        let (result, _stream) = tokio::join!(open_all(listener, 0, &peers, &config), rogue);
        assert!(matches!(result.unwrap_err(), Error::ProtocolVersion { .. }));
    }

    #[tokio::test]
    async fn test_rejects_non_hello_first_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peers = vec![addr, "127.0.0.1:9".parse().unwrap()];

        let rogue = async {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let header = FrameHeader::new(Opcode::Send, 1, DType::U8, 8);
            protocol::write_frame(&mut stream, &header, &[0u8; 8])
                .await
                .unwrap();
            stream
        };

        let config = quick();
        let (result, _stream) = tokio::join!(open_all(listener, 0, &peers, &config), rogue);
        assert!(matches!(result.unwrap_err(), Error::Handshake { .. }));
    }
}
