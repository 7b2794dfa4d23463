//! RX to TX splicing between bound adapters.
//!
//! Released RX slots trade buffer indices with free slots of the peer's TX
//! ring. Nothing is copied: the packet buffer moves to the TX side and the
//! RX slot inherits the buffer the TX slot held.

use log::warn;

use crate::ring::index::{distance, next};
use crate::ring::{KernelRing, SlotFlags};

/// Destination for released RX slots.
pub trait ForwardTarget {
    /// Take slots `rx.hwcur..head` (in order, stopping when full) and
    /// return how many were taken. Slots taken must hold a valid buffer
    /// again on return.
    fn forward(&mut self, rx: &mut KernelRing, head: u32) -> u32;
}

/// Swap buffers of RX slots `hwcur..head` into TX slots `cur..tail`.
///
/// Stops when the RX side runs out or when the TX ring would be left with
/// no free slot. If anything moved, TX `head` and `cur` are advanced past
/// the new packets. Returns the number of slots moved.
///
/// The TX cursors are user-writable. If they are outside the region the
/// user owns nothing moves; the TX ring's own next sync repairs it.
pub fn splice(rx: &mut KernelRing, head: u32, tx: &mut KernelRing) -> u32 {
    if head > rx.lim() {
        return 0;
    }
    if !tx.tx_cursors_valid() {
        warn!(
            "tx ring {}: head {} cur {} outside [{}, {}], not forwarding",
            tx.id(),
            tx.ring.head,
            tx.ring.cur,
            tx.rhead,
            tx.rtail
        );
        return 0;
    }

    let lim = rx.lim();
    let lim_tx = tx.lim();
    let n_tx = tx.num_slots();
    let tail = tx.rtail;
    let mut nm_i = rx.hwcur;
    let mut cur_tx = tx.ring.cur;
    let mut moved = 0;

    while nm_i != head {
        if distance(cur_tx, tail, n_tx) <= 1 {
            break;
        }
        let slot = &mut rx.ring.slots[nm_i as usize];
        let slot_tx = &mut tx.ring.slots[cur_tx as usize];

        core::mem::swap(&mut slot.buf_idx, &mut slot_tx.buf_idx);
        slot_tx.len = slot.len;
        slot_tx.flags |= SlotFlags::BUF_CHANGED;
        slot.flags |= SlotFlags::BUF_CHANGED;

        nm_i = next(nm_i, lim);
        cur_tx = next(cur_tx, lim_tx);
        moved += 1;
    }

    if moved > 0 {
        tx.ring.advance_to(cur_tx);
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{RingKind, Slot};
    use alloc::vec::Vec;

    fn rx_ring(ids: &[u32]) -> KernelRing {
        KernelRing::new(RingKind::Rx, 0, ids.iter().map(|&i| Slot::new(i)).collect())
    }

    /// TX ring whose user owns `head..=tail`, as left by a finalize.
    fn tx_ring(ids: &[u32], head: u32, tail: u32) -> KernelRing {
        let mut tx = KernelRing::new(RingKind::Tx, 0, ids.iter().map(|&i| Slot::new(i)).collect());
        tx.hwcur = head;
        tx.hwtail = tail;
        tx.rhead = head;
        tx.rcur = head;
        tx.ring.advance_to(head);
        tx.finalize();
        tx
    }

    fn ids(slots: &[Slot]) -> Vec<u32> {
        slots.iter().map(|s| s.buf_idx).collect()
    }

    #[test]
    fn test_splice_swaps_and_marks() {
        let mut rx = rx_ring(&[10, 11, 12, 13]);
        rx.hwtail = 3;
        rx.ring.slots[0].len = 60;
        rx.ring.slots[1].len = 70;
        let mut tx = tx_ring(&[20, 21, 22, 23], 0, 3);

        assert_eq!(splice(&mut rx, 2, &mut tx), 2);
        assert_eq!(ids(&rx.ring.slots), [20, 21, 12, 13]);
        assert_eq!(ids(&tx.ring.slots), [10, 11, 22, 23]);
        assert_eq!((tx.ring.slots[0].len, tx.ring.slots[1].len), (60, 70));
        assert!(tx.ring.slots[1].flags.contains(SlotFlags::BUF_CHANGED));
        assert!(rx.ring.slots[1].flags.contains(SlotFlags::BUF_CHANGED));
        assert!(rx.ring.slots[2].flags.is_empty());
        assert_eq!((tx.ring.head, tx.ring.cur), (2, 2));
    }

    #[test]
    fn test_splice_keeps_one_tx_slot() {
        let mut rx = rx_ring(&[10, 11, 12, 13]);
        rx.hwtail = 3;
        // one swap leaves cur + 1 == tail
        let mut tx = tx_ring(&[20, 21, 22, 23], 0, 2);

        assert_eq!(splice(&mut rx, 2, &mut tx), 1);
        assert_eq!(ids(&rx.ring.slots), [20, 11, 12, 13]);
        assert_eq!(tx.ring.cur, 1);

        // full ring: nothing moves, cursors untouched
        assert_eq!(splice(&mut rx, 2, &mut tx), 0);
        assert_eq!((tx.ring.head, tx.ring.cur), (1, 1));
    }

    #[test]
    fn test_splice_twice_restores_identifiers() {
        let mut rx = rx_ring(&[10, 11, 12, 13]);
        let mut tx = tx_ring(&[20, 21, 22, 23], 0, 3);
        let (rx_before, tx_before) = (ids(&rx.ring.slots), ids(&tx.ring.slots));

        splice(&mut rx, 2, &mut tx);
        tx.ring.advance_to(0);
        splice(&mut rx, 2, &mut tx);

        assert_eq!(ids(&rx.ring.slots), rx_before);
        assert_eq!(ids(&tx.ring.slots), tx_before);
    }

    #[test]
    fn test_splice_wraps_tx_cursor() {
        let mut rx = rx_ring(&[10, 11, 12, 13]);
        let mut tx = tx_ring(&[20, 21, 22, 23], 3, 2);

        assert_eq!(splice(&mut rx, 3, &mut tx), 2);
        assert_eq!(ids(&tx.ring.slots), [11, 21, 22, 10]);
        assert_eq!(tx.ring.cur, 1);
    }

    #[test]
    fn test_splice_rejects_corrupted_tx_cursors() {
        let mut rx = rx_ring(&[10, 11, 12, 13]);
        let mut tx = tx_ring(&[20, 21, 22, 23], 0, 3);

        tx.ring.cur = 100;
        assert_eq!(splice(&mut rx, 2, &mut tx), 0);

        // in range but past the user's tail
        tx.ring.cur = 0;
        tx.rtail = 1;
        tx.ring.advance_to(2);
        assert_eq!(splice(&mut rx, 2, &mut tx), 0);

        assert_eq!(ids(&rx.ring.slots), [10, 11, 12, 13]);
        assert_eq!(ids(&tx.ring.slots), [20, 21, 22, 23]);
        assert_eq!(splice(&mut rx, 7, &mut tx), 0);
    }
}
