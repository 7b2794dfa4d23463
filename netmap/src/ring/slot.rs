//! Slots and the user-visible ring.

use alloc::vec::Vec;

bitflags::bitflags! {
    /// Per-slot flags shared with the ring owner.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u16 {
        /// Buffer index changed since the last sync; mappings must be reloaded.
        const BUF_CHANGED = 0x0001;
        /// Ask the NIC to report completion for this slot.
        const REPORT = 0x0002;
        /// Pass the packet to the host stack.
        const FORWARD = 0x0004;
    }
}

/// One ring element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    /// Index into the buffer pool.
    pub buf_idx: u32,
    /// Packet length in bytes.
    pub len: u16,
    pub flags: SlotFlags,
}

impl Slot {
    pub const fn new(buf_idx: u32) -> Self {
        Self {
            buf_idx,
            len: 0,
            flags: SlotFlags::empty(),
        }
    }
}

/// The ring as seen by its user.
///
/// `head` is the first slot not yet released, `cur` is the wakeup point,
/// `tail` is the first slot the user does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetmapRing {
    pub head: u32,
    pub cur: u32,
    pub tail: u32,
    pub slots: Vec<Slot>,
}

impl NetmapRing {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            head: 0,
            cur: 0,
            tail: 0,
            slots,
        }
    }

    pub fn num_slots(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Slots between `cur` and `tail` the user may still fill (TX) or read (RX).
    pub fn space(&self) -> u32 {
        super::index::distance(self.cur, self.tail, self.num_slots())
    }

    /// Release everything up to `idx` and move `cur` along.
    pub fn advance_to(&mut self, idx: u32) {
        self.head = idx;
        self.cur = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_space_wraps() {
        let mut ring = NetmapRing::new(vec![Slot::default(); 8]);
        ring.cur = 6;
        ring.tail = 2;
        assert_eq!(ring.space(), 4);
        ring.advance_to(1);
        assert_eq!((ring.head, ring.cur), (1, 1));
        assert_eq!(ring.space(), 1);
    }

    #[test]
    fn test_flags_bits_match_shared_layout() {
        assert_eq!(SlotFlags::BUF_CHANGED.bits(), 1);
        assert_eq!(SlotFlags::REPORT.bits(), 2);
        assert_eq!(SlotFlags::FORWARD.bits(), 4);
    }
}
