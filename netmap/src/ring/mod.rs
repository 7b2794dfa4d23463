//! Ring data model.
//!
//! [`KernelRing`] holds the cursors the sync algorithms move, [`NetmapRing`]
//! is the mirror shared with the ring's user, [`IndexTranslator`] maps
//! between NIC and netmap indices.

pub mod index;
pub mod slot;
pub mod kring;

pub use index::IndexTranslator;
pub use kring::{KernelRing, KringFlags, RingKind};
pub use slot::{NetmapRing, Slot, SlotFlags};
