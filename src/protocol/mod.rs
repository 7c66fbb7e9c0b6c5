//! Wire protocol between ranks
//!
//! Every unit on a connection is a frame: a fixed 14-byte header followed by
//! exactly `count × element size` payload bytes. Integers are big-endian.
//!
//! ```text
//! [opcode:1][sender_rank:4][dtype:1][count:8][payload...]
//! ```

mod frame;
mod hello;
mod version;

pub use frame::*;
pub use hello::*;
pub use version::*;
