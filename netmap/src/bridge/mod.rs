//! Ring reconciliation.
//!
//! [`txsync`] and [`rxsync`] align a [`KernelRing`](crate::ring::KernelRing)
//! with one hardware queue. Both run to completion on the caller's context,
//! never block, and touch at most one ring's worth of descriptors.
//!
//! # Contract
//! - At most one sync per ring in flight (the adapter holds the ring lock)
//! - `rhead`/`rcur` already read by the ring prologue
//! - Link down: nothing is touched, success is returned

pub mod tx;
pub mod rx;
pub mod forward;

pub use forward::{splice, ForwardTarget};
pub use rx::{rxsync, Completions, RxContext};
pub use tx::txsync;

bitflags::bitflags! {
    /// Per-call sync flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        /// RX: import completions even without a pending interrupt.
        const FORCE_READ = 0x0001;
        /// TX: read the completion register even if the user still has room.
        const FORCE_RECLAIM = 0x0002;
    }
}

/// Outcome of a txsync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxReport {
    /// Link was down, nothing was done.
    pub link_down: bool,
    /// Descriptors handed to the NIC.
    pub queued: u32,
    /// New `hwtail`, if completions were reclaimed.
    pub hwtail: Option<u32>,
}

/// Outcome of an rxsync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxReport {
    /// Link was down, nothing was done.
    pub link_down: bool,
    /// Completed descriptors moved to the user.
    pub imported: u32,
    /// Released slots spliced into the bound TX ring.
    pub forwarded: u32,
    /// Descriptors given back to the NIC.
    pub refilled: u32,
}
