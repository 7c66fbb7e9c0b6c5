//! Process groups
//!
//! A [`ProcessGroup`] is one rank's view of a joined group: its rank, the
//! group size and one connection to every other rank. The process-wide
//! session registry in [`registry`] holds at most one joined group for the
//! blocking facade.

mod process_group;
pub mod registry;
mod rendezvous;

pub use process_group::*;
pub use rendezvous::*;

/// Position of a process within its group, in `[0, size)`
pub type Rank = u32;
