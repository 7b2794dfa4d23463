//! RX reconciliation.
//!
//! Import completed descriptors into the user ring (`hwtail`), optionally
//! splice released slots into a bound TX ring, then hand released buffers
//! back to the NIC (`hwcur`). One descriptor is always left unfilled: a
//! hardware ring with tail equal to head reads as empty.

use log::{trace, warn};

use super::{ForwardTarget, RxReport, SyncFlags};
use crate::error::{BridgeError, Result};
use crate::hw::barriers::{rmb, wmb};
use crate::hw::{RxCompletion, RxDescRing};
use crate::mem::BufferMap;
use crate::ring::index::{self, next, prev};
use crate::ring::kring::KringFlags;
use crate::ring::{KernelRing, SlotFlags};

/// Per-call inputs that do not live in the ring.
#[derive(Debug, Clone, Copy)]
pub struct RxContext {
    pub link_up: bool,
    /// Import on every call instead of only after an interrupt.
    pub no_pendintr: bool,
    pub flags: SyncFlags,
}

/// Completed descriptors starting at the queue's next-to-clean index.
///
/// Yields `(nic_index, completion)` and stops at the first descriptor the
/// NIC has not finished, or after `budget` items.
pub struct Completions<'a, Q: ?Sized> {
    hw: &'a Q,
    nic_i: u32,
    lim: u32,
    budget: u32,
}

impl<'a, Q: RxDescRing + ?Sized> Completions<'a, Q> {
    pub fn new(hw: &'a Q, lim: u32, budget: u32) -> Self {
        Self {
            hw,
            nic_i: hw.next_to_clean(),
            lim,
            budget,
        }
    }
}

impl<Q: RxDescRing + ?Sized> Iterator for Completions<'_, Q> {
    type Item = (u32, RxCompletion);

    fn next(&mut self) -> Option<Self::Item> {
        if self.budget == 0 {
            return None;
        }
        let Some(done) = self.hw.poll(self.nic_i) else {
            self.budget = 0;
            return None;
        };
        let i = self.nic_i;
        self.nic_i = next(self.nic_i, self.lim);
        self.budget -= 1;
        Some((i, done))
    }
}

/// Reconcile an RX ring with its hardware queue.
///
/// With a `forward` target, released slots are first offered to it and only
/// those it took are given back to the NIC; the rest stay released and are
/// retried on the next call.
pub fn rxsync<Q, B>(
    kring: &mut KernelRing,
    hw: &mut Q,
    bufs: &B,
    ctx: RxContext,
    forward: Option<&mut dyn ForwardTarget>,
) -> Result<RxReport>
where
    Q: RxDescRing + ?Sized,
    B: BufferMap + ?Sized,
{
    let ring_id = kring.id();
    let n = kring.num_slots();
    let lim = kring.lim();
    let head = kring.rhead;
    let force_update =
        ctx.flags.contains(SyncFlags::FORCE_READ) || kring.kflags.contains(KringFlags::PENDINTR);
    let mut report = RxReport::default();

    if !ctx.link_up {
        report.link_down = true;
        return Ok(report);
    }

    if head > lim || !index::in_window(kring.hwcur, head, kring.hwtail, n) {
        let repaired = kring.reinit(bufs);
        let err = BridgeError::InvalidHead {
            ring: ring_id,
            head,
            lim,
            repaired,
        };
        warn!("{}", err);
        return Err(err);
    }

    rmb();

    let xlate = kring.translator();

    // ═══════════════════════════════════════════════════════════════════
    // IMPORT: newly received packets
    // ═══════════════════════════════════════════════════════════════════
    if ctx.no_pendintr || force_update {
        // the NIC cannot have completed more than it was given
        let budget = lim - kring.rx_space();
        let mut nm_i = xlate.nic_to_ring(hw.next_to_clean());
        let mut nic_i = hw.next_to_clean();

        for (i, done) in Completions::new(&*hw, lim, budget) {
            let slot = &mut kring.ring.slots[nm_i as usize];
            if let Some(addr) = bufs.resolve(slot.buf_idx) {
                bufs.sync_for_cpu(addr, done.len as u32);
            }
            slot.len = done.len;
            slot.flags = SlotFlags::empty();
            nm_i = next(nm_i, lim);
            nic_i = next(i, lim);
            report.imported += 1;
        }
        if report.imported > 0 {
            hw.set_next_to_clean(nic_i);
            kring.hwtail = nm_i;
        }
        kring.kflags.remove(KringFlags::PENDINTR);
    }

    // ═══════════════════════════════════════════════════════════════════
    // FORWARD: released slots to the bound TX ring
    // ═══════════════════════════════════════════════════════════════════
    let mut boundary = head;
    if let Some(target) = forward {
        if kring.hwcur != head {
            report.forwarded = target.forward(kring, head);
        }
        boundary = (kring.hwcur + report.forwarded) % n;
    }

    // ═══════════════════════════════════════════════════════════════════
    // REPLENISH: released buffers back to the NIC
    // ═══════════════════════════════════════════════════════════════════
    let mut nm_i = kring.hwcur;
    if nm_i != boundary {
        let mut nic_i = xlate.ring_to_nic(nm_i);
        while nm_i != boundary {
            let buf_idx = kring.ring.slots[nm_i as usize].buf_idx;
            let Some(addr) = bufs.resolve(buf_idx) else {
                let repaired = kring.reinit(bufs);
                let err = BridgeError::BadRxBuffer {
                    ring: ring_id,
                    slot: nm_i,
                    buf_idx,
                    repaired,
                };
                warn!("{}", err);
                return Err(err);
            };
            kring.ring.slots[nm_i as usize]
                .flags
                .remove(SlotFlags::BUF_CHANGED);
            hw.refill(nic_i, addr.paddr);
            nm_i = next(nm_i, lim);
            nic_i = next(nic_i, lim);
            report.refilled += 1;
        }
        kring.hwcur = boundary;
        wmb();
        hw.write_tail(prev(nic_i, lim));
    }

    trace!(
        "rx ring {}: imported {} forwarded {} refilled {} hwcur {} hwtail {}",
        ring_id,
        report.imported,
        report.forwarded,
        report.refilled,
        kring.hwcur,
        kring.hwtail
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimRxQueue;
    use crate::mem::BufferPool;
    use crate::ring::{RingKind, Slot};

    const N: u32 = 8;

    fn ctx() -> RxContext {
        RxContext {
            link_up: true,
            no_pendintr: true,
            flags: SyncFlags::empty(),
        }
    }

    /// Ring and queue as left by configure: every descriptor loaded, tail at N-1.
    fn setup() -> (KernelRing, SimRxQueue, BufferPool) {
        let pool = BufferPool::new(0, 0x20_0000, 2048, 64);
        let kring = KernelRing::new(RingKind::Rx, 0, pool.alloc_slots(N).unwrap());
        let mut hw = SimRxQueue::new(N);
        for (i, slot) in kring.ring.slots.iter().enumerate() {
            hw.refill(i as u32, pool.addr_of(slot.buf_idx).paddr);
        }
        hw.write_tail(N - 1);
        (kring, hw, pool)
    }

    fn sync(
        kring: &mut KernelRing,
        hw: &mut SimRxQueue,
        pool: &BufferPool,
        ctx: RxContext,
    ) -> Result<RxReport> {
        kring.rxsync_prologue();
        let r = rxsync(kring, hw, pool, ctx, None);
        kring.finalize();
        r
    }

    struct Limit {
        take: u32,
        calls: u32,
    }

    impl ForwardTarget for Limit {
        fn forward(&mut self, rx: &mut KernelRing, head: u32) -> u32 {
            self.calls += 1;
            self.take.min(index::distance(rx.hwcur, head, rx.num_slots()))
        }
    }

    #[test]
    fn test_import_completed() {
        let (mut kring, mut hw, pool) = setup();
        hw.deliver(60);
        hw.deliver(1514);
        hw.deliver(64);

        let r = sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        assert_eq!(r.imported, 3);
        assert_eq!(r.refilled, 0);
        assert_eq!(kring.hwtail, 3);
        assert_eq!(kring.ring.tail, 3);
        assert_eq!(kring.ring.slots[1].len, 1514);
        assert_eq!(hw.next_to_clean(), 3);
    }

    #[test]
    fn test_release_replenishes_behind_one() {
        let (mut kring, mut hw, pool) = setup();
        for _ in 0..3 {
            hw.deliver(60);
        }
        sync(&mut kring, &mut hw, &pool, ctx()).unwrap();

        kring.ring.slots[0].flags = SlotFlags::BUF_CHANGED;
        kring.ring.advance_to(2);
        let r = sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        assert_eq!(r.refilled, 2);
        assert_eq!(kring.hwcur, 2);
        assert!(kring.ring.slots[0].flags.is_empty());

        let s = hw.snapshot();
        assert_eq!(s.tail, 1);
        assert!(!s.desc[0].done);
        assert_eq!(s.desc[0].addr, pool.addr_of(kring.ring.slots[0].buf_idx).paddr);
        assert_eq!(hw.hw_owned(), lim_minus_user(&kring));
    }

    fn lim_minus_user(kring: &KernelRing) -> u32 {
        kring.lim() - kring.rx_space()
    }

    #[test]
    fn test_one_slot_reserved() {
        let (mut kring, mut hw, pool) = setup();
        let mut accepted = 0;
        for _ in 0..N + 2 {
            if hw.deliver(60) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, N - 1);

        let r = sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        assert_eq!(r.imported, N - 1);
        assert_eq!(kring.hwtail, N - 1);
        assert_eq!(kring.rx_space(), N - 1);
    }

    #[test]
    fn test_corrupted_head_reinits() {
        let (mut kring, mut hw, pool) = setup();
        hw.deliver(60);
        kring.ring.head = N + 5;

        let err = sync(&mut kring, &mut hw, &pool, ctx()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidHead { ring: 0, head: N + 5, lim: N - 1, repaired: 1 }
        );
        assert!(err.is_ring_reset());
        assert_eq!((kring.ring.head, kring.ring.cur), (0, 0));
        // nothing imported, no descriptor touched
        assert_eq!(hw.next_to_clean(), 0);
        assert_eq!(hw.snapshot().doorbells, 1);

        let r = sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        assert_eq!(r.imported, 1);
    }

    #[test]
    fn test_head_past_hwtail_rejected() {
        let (mut kring, mut hw, pool) = setup();
        hw.deliver(60);
        sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        kring.ring.advance_to(4);

        let err = sync(&mut kring, &mut hw, &pool, ctx()).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHead { head: 4, repaired: 0, .. }));
        assert_eq!(kring.hwcur, 0);
    }

    #[test]
    fn test_link_down_is_noop() {
        let (mut kring, mut hw, pool) = setup();
        hw.deliver(60);
        let down = RxContext { link_up: false, ..ctx() };
        let r = sync(&mut kring, &mut hw, &pool, down).unwrap();
        assert!(r.link_down);
        assert_eq!(r.imported, 0);
        assert_eq!(kring.hwtail, 0);
        assert_eq!(hw.next_to_clean(), 0);
    }

    #[test]
    fn test_pending_interrupt_gates_import() {
        let (mut kring, mut hw, pool) = setup();
        hw.deliver(60);
        let lazy = RxContext { no_pendintr: false, ..ctx() };

        assert_eq!(sync(&mut kring, &mut hw, &pool, lazy).unwrap().imported, 0);

        kring.kflags.insert(KringFlags::PENDINTR);
        assert_eq!(sync(&mut kring, &mut hw, &pool, lazy).unwrap().imported, 1);
        assert!(!kring.kflags.contains(KringFlags::PENDINTR));

        hw.deliver(60);
        let forced = RxContext { flags: SyncFlags::FORCE_READ, ..lazy };
        assert_eq!(sync(&mut kring, &mut hw, &pool, forced).unwrap().imported, 1);
    }

    #[test]
    fn test_bad_buffer_resets_ring() {
        let (mut kring, mut hw, pool) = setup();
        for _ in 0..3 {
            hw.deliver(60);
        }
        sync(&mut kring, &mut hw, &pool, ctx()).unwrap();

        kring.ring.slots[1] = Slot { len: 60, ..Slot::new(0) };
        kring.ring.advance_to(2);
        let err = sync(&mut kring, &mut hw, &pool, ctx()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::BadRxBuffer { ring: 0, slot: 1, buf_idx: 0, repaired: 0 }
        );
        assert_eq!(kring.hwcur, 0);
        assert_eq!(kring.ring.slots[1].len, 0);
        assert_eq!(hw.snapshot().tail, N - 1);
    }

    #[test]
    fn test_forward_limits_replenish() {
        let (mut kring, mut hw, pool) = setup();
        for _ in 0..3 {
            hw.deliver(60);
        }
        sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        kring.ring.advance_to(3);
        kring.rxsync_prologue();

        let mut target = Limit { take: 1, calls: 0 };
        let r = rxsync(&mut kring, &mut hw, &pool, ctx(), Some(&mut target)).unwrap();
        assert_eq!((r.forwarded, r.refilled), (1, 1));
        assert_eq!(kring.hwcur, 1);
        assert_eq!(hw.snapshot().tail, 0);

        // the rest stays released and is offered again
        let r = rxsync(&mut kring, &mut hw, &pool, ctx(), Some(&mut target)).unwrap();
        assert_eq!((target.calls, r.forwarded, kring.hwcur), (2, 1, 2));

        kring.rhead = kring.hwcur;
        let r = rxsync(&mut kring, &mut hw, &pool, ctx(), Some(&mut target)).unwrap();
        assert_eq!((target.calls, r.forwarded, r.refilled), (2, 0, 0));
    }

    #[test]
    fn test_offset_import() {
        let (mut kring, mut hw, pool) = setup();
        kring.hwcur = 5;
        kring.hwtail = 5;
        kring.ring.advance_to(5);
        kring.reset(0);
        kring.finalize();
        hw.deliver(99);

        sync(&mut kring, &mut hw, &pool, ctx()).unwrap();
        assert_eq!(kring.hwtail, 6);
        assert_eq!(kring.ring.slots[5].len, 99);
    }

    proptest::proptest! {
        #[test]
        fn prop_nic_and_user_never_overlap(
            ops in proptest::collection::vec((0u32..N + 2, 0u32..N), 1..64)
        ) {
            let (mut kring, mut hw, pool) = setup();
            for (frames, release) in ops {
                for _ in 0..frames {
                    hw.deliver(60);
                }
                sync(&mut kring, &mut hw, &pool, ctx()).unwrap();

                let s = hw.snapshot();
                let unclean = index::distance(s.next_to_clean, s.head, N);
                proptest::prop_assert!(hw.hw_owned() + unclean + kring.rx_space() <= kring.lim());

                let step = release.min(kring.rx_space());
                let to = (kring.ring.head + step) % N;
                kring.ring.advance_to(to);
            }
        }
    }
}
