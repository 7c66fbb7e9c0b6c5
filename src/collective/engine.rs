//! Collective algorithms over the full mesh
//!
//! - broadcast: the root writes to every other rank in ascending order
//! - reduce: the root reads from every other rank in ascending order and
//!   folds into its own buffer
//! - all-reduce: reduce into rank 0, then broadcast from rank 0
//! - barrier: gather empty frames at rank 0, then release everyone

use std::future::Future;

use tracing::{debug, info_span, warn, Instrument};

use crate::error::{Error, Result};
use crate::group::{ProcessGroup, Rank};
use crate::protocol::{FrameHeader, Opcode};
use crate::tensor::{DType, ReduceOp, TensorDescriptor};

use super::OpKind;

/// Rank that coordinates all-reduce and barrier
const COORDINATOR: Rank = 0;

impl ProcessGroup {
    // ─────────────────────────────────────────────────────────────
    // Point-to-point
    // ─────────────────────────────────────────────────────────────

    /// Send the buffer to `dst`. Completes once the frame is written.
    pub async fn send(&self, desc: &TensorDescriptor<'_>, dst: Rank) -> Result<()> {
        self.tracked(OpKind::Send, desc.count(), async {
            let conn = self.connection_to(dst)?;
            let header = FrameHeader::for_tensor(Opcode::Send, self.rank(), desc);
            conn.send(&header, desc.as_bytes()).await
        })
        .await
    }

    /// Receive the next frame sent by `src` into the buffer.
    ///
    /// The frame must be a send from `src` with the buffer's element type
    /// and count. On a mismatch the frame is consumed and the buffer is left
    /// untouched.
    pub async fn receive(&self, desc: &mut TensorDescriptor<'_>, src: Rank) -> Result<()> {
        let count = desc.count();
        self.tracked(OpKind::Receive, count, self.recv_tensor(desc, src, Opcode::Send))
            .await
    }

    // ─────────────────────────────────────────────────────────────
    // Collectives
    // ─────────────────────────────────────────────────────────────

    /// Replace every rank's buffer with `src`'s. The root's buffer is unchanged.
    pub async fn broadcast(&self, desc: &mut TensorDescriptor<'_>, src: Rank) -> Result<()> {
        let count = desc.count();
        self.tracked(OpKind::Broadcast, count, async {
            self.check_rank(src)?;
            self.broadcast_from(desc, src, Opcode::Broadcast).await
        })
        .await
    }

    /// Fold every rank's buffer into `dst`'s with `op`. Only `dst`'s buffer
    /// changes.
    pub async fn reduce(
        &self,
        desc: &mut TensorDescriptor<'_>,
        dst: Rank,
        op: ReduceOp,
    ) -> Result<()> {
        let count = desc.count();
        self.tracked(OpKind::Reduce, count, async {
            self.check_rank(dst)?;
            self.reduce_into(desc, dst, op, Opcode::Reduce).await
        })
        .await
    }

    /// Fold every rank's buffer with `op` and leave the identical result on
    /// every rank
    pub async fn all_reduce(&self, desc: &mut TensorDescriptor<'_>, op: ReduceOp) -> Result<()> {
        let count = desc.count();
        self.tracked(OpKind::AllReduce, count, async {
            self.reduce_into(desc, COORDINATOR, op, Opcode::AllReduce).await?;
            self.broadcast_from(desc, COORDINATOR, Opcode::AllReduce).await
        })
        .await
    }

    /// Return once every rank has entered the barrier
    pub async fn barrier(&self) -> Result<()> {
        self.tracked(OpKind::Barrier, 0, async {
            let mut empty = [0u8; 0];
            let mut token = TensorDescriptor::from_bytes(DType::U8, &mut empty)?;
            self.reduce_into(&mut token, COORDINATOR, ReduceOp::Sum, Opcode::Barrier)
                .await?;
            self.broadcast_from(&mut token, COORDINATOR, Opcode::Barrier)
                .await
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────
    // Building Blocks
    // ─────────────────────────────────────────────────────────────

    async fn broadcast_from(
        &self,
        desc: &mut TensorDescriptor<'_>,
        root: Rank,
        opcode: Opcode,
    ) -> Result<()> {
        if self.rank() != root {
            return self.recv_tensor(desc, root, opcode).await;
        }

        let header = FrameHeader::for_tensor(opcode, self.rank(), desc);
        for conn in self.peers() {
            conn.send(&header, desc.as_bytes()).await?;
        }
        Ok(())
    }

    async fn reduce_into(
        &self,
        desc: &mut TensorDescriptor<'_>,
        root: Rank,
        op: ReduceOp,
        opcode: Opcode,
    ) -> Result<()> {
        if self.rank() != root {
            let header = FrameHeader::for_tensor(opcode, self.rank(), desc);
            return self.connection_to(root)?.send(&header, desc.as_bytes()).await;
        }

        if self.size() == 1 {
            return Ok(());
        }

        // fold into a copy; the caller's buffer only changes once every rank
        // has contributed
        let (dtype, count) = (desc.dtype(), desc.count());
        let mut acc = desc.as_bytes().to_vec();
        let mut incoming = vec![0u8; desc.byte_len()];
        for conn in self.peers() {
            let peer = conn.peer();
            conn.recv_into(&mut incoming, |h| expect_frame(h, opcode, peer, dtype, count))
                .await?;
            op.fold(dtype, &mut acc, &incoming)?;
        }
        desc.as_bytes_mut().copy_from_slice(&acc);
        Ok(())
    }

    async fn recv_tensor(
        &self,
        desc: &mut TensorDescriptor<'_>,
        src: Rank,
        opcode: Opcode,
    ) -> Result<()> {
        let conn = self.connection_to(src)?;
        let (dtype, count) = (desc.dtype(), desc.count());
        conn.recv_into(desc.as_bytes_mut(), |h| expect_frame(h, opcode, src, dtype, count))
            .await?;
        Ok(())
    }

    /// Run one operation through the tracker inside its own span
    async fn tracked<T, F>(&self, kind: OpKind, count: u64, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut op = self.tracker().begin(kind);
        let span = info_span!("op", rank = self.rank(), kind = %kind, seq = op.seq, count);

        let result = fut.instrument(span.clone()).await;
        self.tracker().finish(&mut op, result.as_ref().err());

        span.in_scope(|| match &result {
            Ok(_) => debug!(elapsed_us = op.elapsed().as_micros() as u64, "Operation completed"),
            Err(e) => warn!(error = %e.format_for_log(), "Operation failed"),
        });
        result
    }
}

/// Validate an incoming header against what the caller expects
fn expect_frame(
    header: &FrameHeader,
    opcode: Opcode,
    src: Rank,
    dtype: DType,
    count: u64,
) -> Result<()> {
    if header.opcode != opcode {
        return Err(Error::malformed(format!(
            "expected {} from rank {}, got {}",
            opcode, src, header.opcode
        )));
    }
    if header.sender != src {
        return Err(Error::malformed(format!(
            "frame on the connection to rank {} claims sender {}",
            src, header.sender
        )));
    }
    if header.dtype != dtype {
        return Err(Error::DTypeMismatch {
            expected: dtype,
            actual: header.dtype,
        });
    }
    if header.count != count {
        return Err(Error::SizeMismatch {
            expected: count,
            actual: header.count,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
