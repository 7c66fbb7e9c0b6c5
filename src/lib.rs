//! rankmesh: collective communication for a fixed group of processes
//!
//! Every process joins a group with a stable rank, forms one TCP connection
//! to every other rank and then exchanges flat typed buffers through
//! point-to-point sends and receives or group-wide broadcast, reduce and
//! all-reduce.
//!
//! Two API surfaces:
//! - [`ProcessGroup`]: async, owned by the caller, usable inside tokio
//! - [`facade`]: blocking functions over one process-wide session
//!
//! ```no_run
//! use rankmesh::{facade, ReduceOp, StaticRendezvous, TensorDescriptor, TransportConfig};
//!
//! let rendezvous = StaticRendezvous::new(0, vec!["10.0.0.1:29500".into(), "10.0.0.2:29500".into()]);
//! facade::join(&rendezvous, &TransportConfig::default())?;
//!
//! let mut grads = vec![0.5f32; 1024];
//! facade::all_reduce(&mut TensorDescriptor::new(&mut grads), ReduceOp::Sum)?;
//!
//! facade::leave()?;
//! # Ok::<(), rankmesh::Error>(())
//! ```

pub mod collective;
pub mod config;
pub mod error;
pub mod facade;
pub mod group;
pub mod logging;
pub mod protocol;
pub mod tensor;
pub mod transport;
pub mod version;

pub use collective::{OpKind, OpState, OpStats};
pub use config::MeshConfig;
pub use error::{Error, ErrorCode, Result};
pub use group::{
    Bootstrap, EnvRendezvous, GroupStats, ProcessGroup, Rank, Rendezvous, StaticRendezvous,
};
pub use tensor::{DType, Element, ReduceOp, TensorDescriptor};
pub use transport::TransportConfig;
