//! A joined process group

use std::net::SocketAddr;

use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collective::{OpStats, OpTracker};
use crate::error::{Error, Result};
use crate::transport::{self, Connection, ConnectionStats, TransportConfig};

use super::{Bootstrap, Rank};

/// One rank's membership in a group.
///
/// Membership is fixed from join to leave: rank and size never change and
/// there is exactly one connection to every other rank.
pub struct ProcessGroup {
    rank: Rank,
    size: u32,
    session_id: Uuid,
    connections: Vec<Option<Connection>>,
    tracker: OpTracker,
}

/// Snapshot of a group's counters
#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    pub session_id: String,
    pub rank: Rank,
    pub size: u32,
    pub operations: OpStats,
    pub connections: Vec<ConnectionStats>,
}

impl ProcessGroup {
    // ─────────────────────────────────────────────────────────────
    // Joining
    // ─────────────────────────────────────────────────────────────

    /// Listen on this rank's address and form the mesh
    pub async fn join(bootstrap: Bootstrap, config: &TransportConfig) -> Result<Self> {
        let addr = bootstrap.listen_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ConnectionFailed {
                addr: addr.to_string(),
                message: format!("cannot listen: {}", e),
            })?;
        Self::join_with_listener(listener, bootstrap.rank, &bootstrap.peers, config).await
    }

    /// Form the mesh on an already bound listener
    pub async fn join_with_listener(
        listener: TcpListener,
        rank: Rank,
        peers: &[SocketAddr],
        config: &TransportConfig,
    ) -> Result<Self> {
        Bootstrap::new(rank, peers.to_vec())?;
        let connections = transport::open_all(listener, rank, peers, config).await?;
        let group = Self {
            rank,
            size: peers.len() as u32,
            session_id: Uuid::new_v4(),
            connections,
            tracker: OpTracker::new(),
        };

        info!(session = %group.session_id, rank, size = group.size, "Joined process group");
        Ok(group)
    }

    /// Form an `n`-rank group inside this process over loopback.
    ///
    /// The groups are returned in rank order. Each one is independent and
    /// can be moved to its own task or thread.
    pub async fn bootstrap_local(n: u32, config: &TransportConfig) -> Result<Vec<ProcessGroup>> {
        if n == 0 {
            return Err(Error::InvalidArgument("a group needs at least one rank".into()));
        }

        let mut listeners = Vec::with_capacity(n as usize);
        let mut peers = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            peers.push(listener.local_addr()?);
            listeners.push(listener);
        }
        debug!(size = n, ?peers, "Bootstrapping local group");

        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    Self::join_with_listener(listener, rank as Rank, &peers, &config).await
                })
            })
            .collect();

        let mut groups = Vec::with_capacity(n as usize);
        for handle in handles {
            let group = handle
                .await
                .map_err(|e| Error::Internal(format!("join task failed: {}", e)))??;
            groups.push(group);
        }
        Ok(groups)
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Identifier of this membership, for correlating logs
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Connection to `peer`; never to self
    pub fn connection_to(&self, peer: Rank) -> Result<&Connection> {
        if peer >= self.size {
            return Err(Error::invalid_rank(peer, self.size, "rank out of range"));
        }
        if peer == self.rank {
            return Err(Error::invalid_rank(peer, self.size, "rank is the caller's own rank"));
        }
        self.connections
            .get(peer as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::Internal(format!("no connection slot for rank {}", peer)))
    }

    /// Check a root rank argument (may be self)
    pub fn check_rank(&self, rank: Rank) -> Result<()> {
        if rank >= self.size {
            return Err(Error::invalid_rank(rank, self.size, "rank out of range"));
        }
        Ok(())
    }

    /// Connections to every other rank, ascending
    pub fn peers(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    pub(crate) fn tracker(&self) -> &OpTracker {
        &self.tracker
    }

    pub fn stats(&self) -> GroupStats {
        GroupStats {
            session_id: self.session_id.to_string(),
            rank: self.rank,
            size: self.size,
            operations: self.tracker.stats(),
            connections: self.peers().map(Connection::stats).collect(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────

    /// Close the connection to `peer`. Operations in flight on it, and any
    /// later ones, fail with `ConnectionLost`.
    pub async fn close_connection(&self, peer: Rank) -> Result<()> {
        let conn = self.connection_to(peer)?;
        conn.close().await;
        info!(session = %self.session_id, rank = self.rank, peer, "Connection closed");
        Ok(())
    }

    /// Close every connection and give up membership
    pub async fn leave(self) {
        for conn in self.peers() {
            conn.close().await;
        }
        let stats = self.tracker.stats();
        info!(
            session = %self.session_id,
            rank = self.rank,
            completed = stats.completed,
            failed = stats.failed,
            "Left process group"
        );
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("session_id", &self.session_id)
            .finish()
    }
}
