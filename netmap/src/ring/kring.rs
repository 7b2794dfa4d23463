//! Kernel-side ring state.
//!
//! # Cursor layout
//! ```text
//!  TX:  hwcur ........ rhead ........ hwtail
//!       |  queued by   |  free for    |  in flight on NIC
//!       |  user, not   |  the user    |  (plus the reserved slot)
//!       |  yet synced  |              |
//!
//!  RX:  hwcur ........ rhead ........ hwtail
//!       |  released    |  owned by    |  owned by NIC
//!       |  by user     |  the user    |
//! ```
//! All cursors are in `[0, num_slots)`; one slot is always reserved so that
//! `hwcur == hwtail` never means "full".

use core::fmt;

use log::warn;

use super::index::{self, IndexTranslator};
use super::slot::{NetmapRing, Slot};
use crate::mem::BufferMap;

/// Direction of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKind {
    Tx,
    Rx,
}

impl fmt::Display for RingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingKind::Tx => write!(f, "tx"),
            RingKind::Rx => write!(f, "rx"),
        }
    }
}

bitflags::bitflags! {
    /// Kernel-private ring flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct KringFlags: u32 {
        /// An interrupt arrived since the last RX import.
        const PENDINTR = 0x0001;
    }
}

/// Kernel view of one ring plus its user-visible mirror.
#[derive(Debug, Clone)]
pub struct KernelRing {
    ring_id: u32,
    kind: RingKind,
    num_slots: u32,
    hwofs: i32,
    /// First slot not yet handed to (TX) or returned to (RX) the NIC.
    pub hwcur: u32,
    /// First slot still owned by the NIC.
    pub hwtail: u32,
    /// `head` as read by the last prologue.
    pub rhead: u32,
    /// `cur` as read by the last prologue.
    pub rcur: u32,
    /// `tail` as published by the last finalize.
    pub rtail: u32,
    pub kflags: KringFlags,
    pub ring: NetmapRing,
}

impl KernelRing {
    /// Create a ring over `slots`. The slot count is the ring size.
    pub fn new(kind: RingKind, ring_id: u32, slots: alloc::vec::Vec<Slot>) -> Self {
        let num_slots = slots.len() as u32;
        let lim = num_slots.saturating_sub(1);
        let hwtail = match kind {
            RingKind::Tx => lim,
            RingKind::Rx => 0,
        };
        let mut ring = NetmapRing::new(slots);
        ring.tail = hwtail;
        Self {
            ring_id,
            kind,
            num_slots,
            hwofs: 0,
            hwcur: 0,
            hwtail,
            rhead: 0,
            rcur: 0,
            rtail: hwtail,
            kflags: KringFlags::empty(),
            ring,
        }
    }

    pub fn id(&self) -> u32 {
        self.ring_id
    }

    pub fn kind(&self) -> RingKind {
        self.kind
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// Highest valid index.
    pub fn lim(&self) -> u32 {
        self.num_slots - 1
    }

    pub fn hwofs(&self) -> i32 {
        self.hwofs
    }

    /// Translator for the current NIC offset.
    pub fn translator(&self) -> IndexTranslator {
        IndexTranslator::new(self.num_slots, self.hwofs)
    }

    /// RX: slots filled by the NIC and not yet released by the user.
    pub fn rx_space(&self) -> u32 {
        index::distance(self.hwcur, self.hwtail, self.num_slots)
    }

    /// TX: the user has no free slot left, completions must be reclaimed.
    pub fn tx_space_exhausted(&self) -> bool {
        self.rcur == self.hwtail
    }

    /// TX: slots handed to the NIC and not reclaimed yet.
    pub fn tx_in_flight(&self) -> u32 {
        let lim = self.lim();
        index::distance(index::next(self.hwtail, lim), self.hwcur, self.num_slots)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SYNC PROLOGUE / FINALIZE
    // ═══════════════════════════════════════════════════════════════════════

    /// Read and validate the user's `head`/`cur` before a txsync.
    ///
    /// Returns `None` if the user moved a cursor outside the region it owns;
    /// the caller must reinit the ring.
    pub fn txsync_prologue(&mut self) -> Option<u32> {
        if self.ring.tail != self.rtail {
            warn!(
                "tx ring {}: tail overwritten ({} was {}), restored",
                self.ring_id, self.ring.tail, self.rtail
            );
            self.ring.tail = self.rtail;
        }
        if !self.tx_cursors_valid() {
            return None;
        }
        self.rhead = self.ring.head;
        self.rcur = self.ring.cur;
        Some(self.rhead)
    }

    /// TX: the user's `head` is in `[rhead, rtail]` and `cur` in
    /// `[head, rtail]`.
    pub fn tx_cursors_valid(&self) -> bool {
        let n = self.num_slots;
        let lim = self.lim();
        let (head, cur) = (self.ring.head, self.ring.cur);
        head <= lim
            && cur <= lim
            && index::in_window(self.rhead, head, self.rtail, n)
            && index::in_window(head, cur, self.rtail, n)
    }

    /// Read the user's `head`/`cur` before an rxsync.
    ///
    /// Range checks happen in rxsync itself so that a bad head takes the
    /// reinit path there.
    pub fn rxsync_prologue(&mut self) -> u32 {
        if self.ring.tail != self.rtail {
            warn!(
                "rx ring {}: tail overwritten ({} was {}), restored",
                self.ring_id, self.ring.tail, self.rtail
            );
            self.ring.tail = self.rtail;
        }
        self.rhead = self.ring.head;
        self.rcur = self.ring.cur;
        self.rhead
    }

    /// Publish the new `hwtail` to the user.
    pub fn finalize(&mut self) {
        self.rtail = self.hwtail;
        self.ring.tail = self.hwtail;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RESET / REINIT
    // ═══════════════════════════════════════════════════════════════════════

    /// Re-align the ring with a NIC whose next index is `new_cur`.
    ///
    /// Called when the NIC queue is (re)started. Cursors keep their netmap
    /// values; only the NIC offset moves. Returns the new translator so the
    /// caller can load descriptors from the right slots.
    pub fn reset(&mut self, new_cur: u32) -> IndexTranslator {
        let lim = self.lim() as i32;
        let mut hwofs = match self.kind {
            RingKind::Tx => self.hwcur as i32 - new_cur as i32,
            RingKind::Rx => self.hwtail as i32 - new_cur as i32,
        };
        if hwofs > lim {
            hwofs -= lim + 1;
        }
        self.hwofs = hwofs;
        if self.kind == RingKind::Tx {
            self.hwtail = index::prev(self.hwcur, self.lim());
        }
        self.kflags.remove(KringFlags::PENDINTR);
        self.translator()
    }

    /// Validate the user ring and repair what can be repaired.
    ///
    /// Slots with a bad buffer index are zeroed, oversized lengths are
    /// cleared. If any user cursor is out of range, user cursors are reset
    /// to the kernel's view. Returns the number of cursor errors found.
    /// Safe to call on a consistent ring.
    pub fn reinit<B: BufferMap + ?Sized>(&mut self, bufs: &B) -> u32 {
        let lim = self.lim();
        let buf_size = bufs.buf_size();

        self.rhead = self.ring.head;
        self.rcur = self.ring.cur;
        self.rtail = self.ring.tail;

        let errors = [self.ring.cur, self.ring.head, self.ring.tail]
            .iter()
            .filter(|&&c| c > lim)
            .count() as u32;

        for (i, slot) in self.ring.slots.iter_mut().enumerate() {
            if !bufs.is_valid(slot.buf_idx) {
                warn!(
                    "{} ring {}: bad index at slot {} idx {} len {}",
                    self.kind, self.ring_id, i, slot.buf_idx, slot.len
                );
                slot.buf_idx = 0;
                slot.len = 0;
            } else if slot.len as u32 > buf_size {
                warn!(
                    "{} ring {}: bad len at slot {} idx {} len {}",
                    self.kind, self.ring_id, i, slot.buf_idx, slot.len
                );
                slot.len = 0;
            }
        }

        if errors > 0 {
            warn!(
                "{} ring {} reinit, cur {} -> {} tail {} -> {}",
                self.kind, self.ring_id, self.ring.cur, self.hwcur, self.ring.tail, self.hwtail
            );
            self.ring.head = self.hwcur;
            self.ring.cur = self.hwcur;
            self.ring.tail = self.hwtail;
            self.rhead = self.hwcur;
            self.rcur = self.hwcur;
            self.rtail = self.hwtail;
        }
        errors
    }
}
