//! Packet buffer memory.
//!
//! The bridge never touches packet payloads. It only needs to turn a slot's
//! buffer index into a device address, which is what [`BufferMap`] does.

pub mod pool;

pub use pool::{BufAddr, BufferMap, BufferPool, RESERVED_BUFFERS};
