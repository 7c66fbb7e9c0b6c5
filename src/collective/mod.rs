//! Collective engine
//!
//! Point-to-point and group-wide operations on a [`ProcessGroup`]. Fan-out
//! and fan-in always walk peers in ascending rank order, which fixes the
//! fold order of reductions independently of network arrival order.
//!
//! [`ProcessGroup`]: crate::group::ProcessGroup

mod engine;
mod state;

pub use state::*;
