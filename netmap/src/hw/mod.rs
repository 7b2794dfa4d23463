//! Hardware abstraction.
//!
//! The sync algorithms see a NIC queue as a small capability set: write a
//! descriptor, read where the hardware is, move the tail doorbell. Each NIC
//! family implements [`TxDescRing`] and [`RxDescRing`] over its own
//! descriptor layout and register map; the algorithms never see either.
//!
//! # Reference
//! Intel 82576 Datasheet §7.1 (RX), §7.2 (TX)

pub mod barriers;
pub mod mmio;
pub mod igb;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

bitflags::bitflags! {
    /// Family-neutral TX command bits.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TxCmd: u32 {
        /// End of packet.
        const EOP = 0x01;
        /// Insert FCS.
        const IFCS = 0x02;
        /// Report status: write back completion for this descriptor.
        const RS = 0x08;
    }
}

/// Contents of one TX descriptor, before family encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    /// Bus address of the packet buffer.
    pub addr: u64,
    /// Packet length.
    pub len: u16,
    pub cmd: TxCmd,
}

/// A completed RX descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxCompletion {
    /// Bytes written by the NIC.
    pub len: u16,
}

/// One hardware TX queue.
pub trait TxDescRing {
    /// Number of descriptors.
    fn num_desc(&self) -> u32;

    /// Point descriptor `idx` at a buffer without queuing anything.
    fn load(&mut self, idx: u32, paddr: u64);

    /// Fill descriptor `idx` for transmission.
    fn write(&mut self, idx: u32, desc: &TxDescriptor);

    /// Raw head register: first descriptor the NIC has not processed.
    /// May be out of range on misbehaving hardware.
    fn completion_index(&self) -> u32;

    /// Doorbell: the NIC may process descriptors up to `idx` (excluded).
    fn write_tail(&mut self, idx: u32);

    /// Return the queue to index 0 after a restart.
    fn rewind(&mut self);
}

/// One hardware RX queue.
pub trait RxDescRing {
    /// Number of descriptors.
    fn num_desc(&self) -> u32;

    /// Completion state of descriptor `idx`, `None` until the done bit is set.
    fn poll(&self, idx: u32) -> Option<RxCompletion>;

    /// Give descriptor `idx` a buffer. Clears its completion state and the
    /// header buffer address.
    fn refill(&mut self, idx: u32, paddr: u64);

    /// Next descriptor to check for completion.
    fn next_to_clean(&self) -> u32;

    fn set_next_to_clean(&mut self, idx: u32);

    /// Doorbell: descriptors before `idx` belong to the NIC.
    fn write_tail(&mut self, idx: u32);

    /// Return the queue to index 0 after a restart.
    fn rewind(&mut self);
}

/// Services a NIC driver provides to the bridge.
///
/// Methods take `&self`: drivers talk to registers and keep their own
/// interior state, and the bridge may call them from any ring's sync path.
pub trait NicDriver: Send + Sync {
    type TxQueue: TxDescRing + Send;
    type RxQueue: RxDescRing + Send;

    /// Link is up.
    fn carrier_ok(&self) -> bool;

    /// Interface is administratively up.
    fn is_running(&self) -> bool;

    /// Bring the device up (queues enabled, interrupts on).
    fn up(&self);

    /// Bring the device down.
    fn down(&self);

    /// Reset a device that is not running.
    fn reset(&self);

    /// Handle for TX queue `n`.
    fn tx_queue(&self, n: u32) -> Option<Self::TxQueue>;

    /// Handle for RX queue `n`.
    fn rx_queue(&self, n: u32) -> Option<Self::RxQueue>;

    /// Pause between reset-guard attempts.
    fn backoff(&self, min_us: u32, _max_us: u32) {
        for _ in 0..min_us {
            core::hint::spin_loop();
        }
    }
}
