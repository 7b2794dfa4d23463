//! MorpheusX netmap bridge
//!
//! Zero-copy reconciliation between a NIC's hardware descriptor rings and
//! netmap-style shared-memory rings.
//!
//! The core is the pair of sync algorithms in [`bridge`]: TX moves packets the
//! user released into hardware descriptors and reclaims completed ones, RX
//! imports completed receive descriptors and hands released buffers back to
//! hardware. Two adapters can be bound so that RX buffers are spliced
//! straight into the peer's TX ring without a trip through user space.
//!
//! Hardware access goes through the [`hw::TxDescRing`] / [`hw::RxDescRing`]
//! traits, one implementation per NIC family ([`hw::igb`]).

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod error;
pub mod config;
pub mod ring;
pub mod mem;
pub mod hw;
pub mod bridge;
pub mod lifecycle;
pub mod adapter;
pub mod registry;

pub use error::{BridgeError, Result};
pub use config::{AttachParams, GuardPolicy, NetmapConfig};
pub use ring::{IndexTranslator, KernelRing, NetmapRing, RingKind, Slot, SlotFlags};
pub use mem::{BufAddr, BufferMap, BufferPool};
pub use hw::{NicDriver, RxDescRing, TxDescRing};
pub use bridge::{RxReport, SyncFlags, TxReport};
pub use adapter::{IfaceId, NetmapAdapter, OpenMode};
pub use registry::AdapterRegistry;
