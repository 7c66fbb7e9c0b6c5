//! Reliable ordered channels between ranks
//!
//! One TCP connection per pair of ranks, formed once at join:
//! - Rank `i` dials every lower rank and accepts from every higher rank
//! - Each connection starts with a HELLO exchange
//! - Afterwards a connection carries frames in FIFO order, nothing else

mod connection;
mod mesh;

pub use connection::*;
pub use mesh::*;
