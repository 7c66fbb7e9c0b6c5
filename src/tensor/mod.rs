//! Tensor model consumed by the engine
//!
//! The engine never owns tensor memory. Callers hand it a
//! [`TensorDescriptor`] that borrows their buffer for one operation:
//! an element type tag plus contiguous bytes.

mod descriptor;
mod dtype;
mod reduce;

pub use descriptor::*;
pub use dtype::*;
pub use reduce::*;
