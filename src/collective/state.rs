//! Operation state tracking
//!
//! Every collective call runs as one [`Operation`] moving
//! `Idle -> InProgress -> {Completed, Failed}`. The tracker keeps per-kind
//! outcome counters for group statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{Error, ErrorCode};

// ─────────────────────────────────────────────────────────────────
// Operation Kinds and States
// ─────────────────────────────────────────────────────────────────

/// Kind of group operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Send,
    Receive,
    Broadcast,
    Reduce,
    AllReduce,
    Barrier,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Send => "send",
            OpKind::Receive => "receive",
            OpKind::Broadcast => "broadcast",
            OpKind::Reduce => "reduce",
            OpKind::AllReduce => "all_reduce",
            OpKind::Barrier => "barrier",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpState {
    /// Created, no I/O issued yet
    #[default]
    Idle,
    /// Waiting on transport I/O
    InProgress,
    /// Finished; the caller's buffer holds the result
    Completed,
    /// Finished with an error; no partial result is reported
    Failed,
}

impl OpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpState::Completed | OpState::Failed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────

/// One tracked operation
#[derive(Debug)]
pub struct Operation {
    pub kind: OpKind,

    /// Sequence number within the group, starting at 1
    pub seq: u64,

    pub state: OpState,

    pub started_at: Option<Instant>,

    pub completed_at: Option<Instant>,

    /// Error code if failed
    pub error: Option<ErrorCode>,
}

impl Operation {
    pub fn new(kind: OpKind, seq: u64) -> Self {
        Self {
            kind,
            seq,
            state: OpState::Idle,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.state = OpState::InProgress;
        self.started_at = Some(Instant::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OpState::Completed;
        self.completed_at = Some(Instant::now());
    }

    pub fn mark_failed(&mut self, error: &Error) {
        self.state = OpState::Failed;
        self.completed_at = Some(Instant::now());
        self.error = Some(error.code());
    }

    /// Time spent in progress so far, or in total once terminal
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => end - start,
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────

/// Outcome counters for one kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub completed: u64,
    pub failed: u64,
    /// Total time spent in completed operations, microseconds
    pub total_us: u64,
}

/// Snapshot of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub by_kind: BTreeMap<OpKind, KindStats>,
}

impl OpStats {
    pub fn kind(&self, kind: OpKind) -> KindStats {
        self.by_kind.get(&kind).copied().unwrap_or_default()
    }
}

/// Hands out sequence numbers and records outcomes
#[derive(Debug, Default)]
pub struct OpTracker {
    next_seq: AtomicU64,
    by_kind: RwLock<BTreeMap<OpKind, KindStats>>,
}

impl OpTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation
    pub fn begin(&self, kind: OpKind) -> Operation {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut op = Operation::new(kind, seq);
        op.mark_in_progress();
        op
    }

    /// Move `op` to its terminal state and count it
    pub fn finish(&self, op: &mut Operation, error: Option<&Error>) {
        match error {
            None => op.mark_completed(),
            Some(e) => op.mark_failed(e),
        }

        let mut by_kind = self.by_kind.write();
        let stats = by_kind.entry(op.kind).or_default();
        match op.state {
            OpState::Completed => {
                stats.completed += 1;
                stats.total_us += op.elapsed().as_micros() as u64;
            }
            _ => stats.failed += 1,
        }
    }

    pub fn stats(&self) -> OpStats {
        let by_kind = self.by_kind.read().clone();
        OpStats {
            started: self.next_seq.load(Ordering::Relaxed),
            completed: by_kind.values().map(|s| s.completed).sum(),
            failed: by_kind.values().map(|s| s.failed).sum(),
            by_kind,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
