//! Rendezvous: how a process learns its rank and the peer addresses
//!
//! Process launch lives outside rankmesh. Whatever launched the process hands
//! over a [`Bootstrap`] through one of these providers.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{split_peer_list, MeshConfig};
use crate::error::{Error, Result};

use super::Rank;

/// Rank plus the listen address of every rank, in rank order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub rank: Rank,
    pub peers: Vec<SocketAddr>,
}

impl Bootstrap {
    pub fn new(rank: Rank, peers: Vec<SocketAddr>) -> Result<Self> {
        let bootstrap = Self { rank, peers };
        bootstrap.validate()?;
        Ok(bootstrap)
    }

    pub fn size(&self) -> u32 {
        self.peers.len() as u32
    }

    /// Address this rank listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.validate()?;
        Ok(self.peers[self.rank as usize])
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(Error::config_field_invalid(
                "group.peers",
                "peer list is empty",
            ));
        }
        if self.peers.len() > Rank::MAX as usize {
            return Err(Error::config_field_invalid(
                "group.peers",
                "too many peers",
            ));
        }
        if self.rank >= self.size() {
            return Err(Error::invalid_rank(
                self.rank,
                self.size(),
                "rank outside the peer list",
            ));
        }
        Ok(())
    }
}

/// Source of a [`Bootstrap`]
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Resolve rank and peer addresses. Called once per join.
    async fn resolve(&self) -> Result<Bootstrap>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────
// Static Rendezvous
// ─────────────────────────────────────────────────────────────────

/// A rank and peer list known up front, e.g. from configuration
#[derive(Debug, Clone)]
pub struct StaticRendezvous {
    rank: Rank,
    peers: Vec<String>,
}

impl StaticRendezvous {
    pub fn new(rank: Rank, peers: Vec<String>) -> Self {
        Self { rank, peers }
    }

    /// Use the `[group]` section; the rank must be set
    pub fn from_config(config: &MeshConfig) -> Result<Self> {
        let rank = config.group.rank.ok_or_else(|| {
            Error::config_field_invalid("group.rank", "no rank configured for this process")
        })?;
        Ok(Self::new(rank, config.group.peers.clone()))
    }
}

#[async_trait]
impl Rendezvous for StaticRendezvous {
    async fn resolve(&self) -> Result<Bootstrap> {
        let peers = resolve_peers(&self.peers).await?;
        Bootstrap::new(self.rank, peers)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// ─────────────────────────────────────────────────────────────────
// Environment Rendezvous
// ─────────────────────────────────────────────────────────────────

/// Reads `RANKMESH_RANK` and `RANKMESH_PEERS` (comma separated `host:port`)
#[derive(Debug, Clone, Default)]
pub struct EnvRendezvous;

impl EnvRendezvous {
    pub const RANK_VAR: &'static str = "RANKMESH_RANK";
    pub const PEERS_VAR: &'static str = "RANKMESH_PEERS";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rendezvous for EnvRendezvous {
    async fn resolve(&self) -> Result<Bootstrap> {
        let rank_str = std::env::var(Self::RANK_VAR).map_err(|_| {
            Error::config_field_invalid(Self::RANK_VAR, "environment variable is not set")
        })?;
        let rank: Rank = rank_str.trim().parse().map_err(|_| {
            Error::config_field_invalid(
                Self::RANK_VAR,
                format!("'{}' is not a rank", rank_str),
            )
        })?;
        let peers_str = std::env::var(Self::PEERS_VAR).map_err(|_| {
            Error::config_field_invalid(Self::PEERS_VAR, "environment variable is not set")
        })?;

        let peers = resolve_peers(&split_peer_list(&peers_str)).await?;
        Bootstrap::new(rank, peers)
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// Resolve `host:port` strings, keeping rank order. Each entry must resolve
/// to at least one address; the first one is used.
pub async fn resolve_peers(peers: &[String]) -> Result<Vec<SocketAddr>> {
    let mut resolved = Vec::with_capacity(peers.len());
    for (rank, peer) in peers.iter().enumerate() {
        if let Ok(addr) = peer.parse::<SocketAddr>() {
            resolved.push(addr);
            continue;
        }

        let addr = tokio::net::lookup_host(peer.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed {
                addr: peer.clone(),
                message: format!("cannot resolve address of rank {}: {}", rank, e),
            })?
            .next()
            .ok_or_else(|| Error::ConnectionFailed {
                addr: peer.clone(),
                message: format!("address of rank {} resolved to nothing", rank),
            })?;
        debug!(rank, peer = %peer, %addr, "Resolved peer");
        resolved.push(addr);
    }
    Ok(resolved)
}
