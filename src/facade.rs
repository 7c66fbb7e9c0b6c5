//! Blocking entry points
//!
//! Each call checks that a group is joined and validates its arguments,
//! then blocks the calling thread on the session runtime until the
//! operation completes or fails. These functions
//! must not be called from inside another tokio runtime; use the async
//! [`ProcessGroup`](crate::group::ProcessGroup) API there instead.

use crate::error::{Error, Result};
use crate::group::{registry, GroupStats, Rank, Rendezvous};
use crate::tensor::{ReduceOp, TensorDescriptor};
use crate::transport::TransportConfig;

/// Join the process group described by `rendezvous`, returning `(rank, size)`
pub fn join(rendezvous: &dyn Rendezvous, config: &TransportConfig) -> Result<(Rank, u32)> {
    registry::join(rendezvous, config)
}

/// Leave the joined group, closing every connection
pub fn leave() -> Result<()> {
    registry::leave()
}

pub fn is_initialized() -> bool {
    registry::is_initialized()
}

/// This process's rank
pub fn rank() -> Result<Rank> {
    registry::with_session(|s| Ok(s.group().rank()))
}

/// Number of processes in the group
pub fn group_size() -> Result<u32> {
    registry::with_session(|s| Ok(s.group().size()))
}

pub fn send(desc: &TensorDescriptor<'_>, dst: Rank) -> Result<()> {
    registry::with_session(|s| {
        ensure_non_empty(desc)?;
        s.group().connection_to(dst)?;
        s.block_on(s.group().send(desc, dst))
    })
}

pub fn receive(desc: &mut TensorDescriptor<'_>, src: Rank) -> Result<()> {
    registry::with_session(|s| {
        ensure_non_empty(desc)?;
        s.group().connection_to(src)?;
        s.block_on(s.group().receive(desc, src))
    })
}

pub fn broadcast(desc: &mut TensorDescriptor<'_>, src: Rank) -> Result<()> {
    registry::with_session(|s| {
        ensure_non_empty(desc)?;
        s.group().check_rank(src)?;
        s.block_on(s.group().broadcast(desc, src))
    })
}

pub fn reduce(desc: &mut TensorDescriptor<'_>, dst: Rank, op: ReduceOp) -> Result<()> {
    registry::with_session(|s| {
        ensure_non_empty(desc)?;
        s.group().check_rank(dst)?;
        s.block_on(s.group().reduce(desc, dst, op))
    })
}

pub fn all_reduce(desc: &mut TensorDescriptor<'_>, op: ReduceOp) -> Result<()> {
    registry::with_session(|s| {
        ensure_non_empty(desc)?;
        s.block_on(s.group().all_reduce(desc, op))
    })
}

pub fn barrier() -> Result<()> {
    registry::with_session(|s| s.block_on(s.group().barrier()))
}

/// Close the connection to `peer`, failing operations on it with
/// `ConnectionLost`
pub fn close_connection(peer: Rank) -> Result<()> {
    registry::with_session(|s| s.block_on(s.group().close_connection(peer)))
}

pub fn stats() -> Result<GroupStats> {
    registry::with_session(|s| Ok(s.group().stats()))
}

fn ensure_non_empty(desc: &TensorDescriptor<'_>) -> Result<()> {
    if desc.is_empty() {
        return Err(Error::InvalidArgument(
            "tensor descriptor has no elements".into(),
        ));
    }
    Ok(())
}
