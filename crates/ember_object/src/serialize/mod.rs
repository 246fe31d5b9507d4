//! Binary serialization.
//!
//! An [`Archive`] is a positioned byte stream that either reads or writes;
//! values implement [`Serializable`] once and work in both directions. The
//! [`MemoryReader`] and [`MemoryWriter`] archives back the package loader
//! and saver.

mod archive;
mod memory;

pub use archive::*;
pub use memory::*;
