//! Netmap mode switching and ring configuration.
//!
//! # Mode switch
//! ```text
//! kernel-only open:  toggle native flag
//! otherwise:         down (if running) -> toggle -> up + configure rings
//!                                                 -> or reset if stopped
//! ```
//! All of it runs under the adapter's [`ResetGuard`].
//!
//! # Ring configuration
//! Called after the NIC queue restarts at index 0. The kernel ring keeps its
//! cursors; only the NIC offset moves. TX descriptors are pointed at the
//! ring's buffers, RX descriptors are refilled and all but the slots the
//! user still holds (and the reserved one) are given to the NIC.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::adapter::{NetmapAdapter, RingState};
use crate::config::GuardPolicy;
use crate::error::{BridgeError, Result};
use crate::hw::barriers::wmb;
use crate::hw::{NicDriver, RxDescRing, TxDescRing};
use crate::mem::{BufAddr, BufferMap};
use crate::ring::KernelRing;

// ═══════════════════════════════════════════════════════════════════════════
// RESET GUARD
// ═══════════════════════════════════════════════════════════════════════════

/// Busy bit shared by mode switches and driver resets.
#[derive(Debug, Default)]
pub struct ResetGuard {
    busy: AtomicBool,
}

/// Proof that the guard is held. Releases it on drop.
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a ResetGuard,
}

impl ResetGuard {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<GuardToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GuardToken { guard: self })
    }

    /// Take the guard, backing off between attempts.
    ///
    /// Gives up after `policy.max_attempts` tries.
    pub fn acquire<D: NicDriver + ?Sized>(
        &self,
        driver: &D,
        policy: &GuardPolicy,
    ) -> Result<GuardToken<'_>> {
        for attempt in 0..policy.max_attempts {
            if let Some(token) = self.try_acquire() {
                return Ok(token);
            }
            if attempt + 1 < policy.max_attempts {
                driver.backoff(policy.backoff_min_us, policy.backoff_max_us);
            }
        }
        Err(BridgeError::GuardTimeout {
            attempts: policy.max_attempts,
        })
    }

    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MODE SWITCH
// ═══════════════════════════════════════════════════════════════════════════

/// Enter (`on`) or leave netmap mode according to the adapter's current
/// open state.
pub fn set_mode<D: NicDriver>(adapter: &NetmapAdapter<D>, on: bool) -> Result<()> {
    let token = adapter
        .reset_guard()
        .acquire(adapter.driver(), &adapter.config().guard)?;
    apply_mode(adapter, on, adapter.opened_in_kernel_only(), &token)
}

/// Mode switch with the guard already held.
pub(crate) fn apply_mode<D: NicDriver>(
    adapter: &NetmapAdapter<D>,
    on: bool,
    kernel_only: bool,
    _token: &GuardToken<'_>,
) -> Result<()> {
    if kernel_only {
        adapter.set_native(on);
        debug!("{}: native {} (kernel only)", adapter.name(), on);
        return Ok(());
    }

    let driver = adapter.driver();
    let was_running = driver.is_running();
    if was_running {
        driver.down();
    }
    adapter.set_native(on);

    if was_running {
        driver.up();
        if on {
            for n in 0..adapter.num_tx_rings() {
                configure_tx_ring(adapter, n)?;
            }
            for n in 0..adapter.num_rx_rings() {
                configure_rx_ring(adapter, n)?;
            }
        }
    } else {
        driver.reset();
    }
    debug!(
        "{}: native {} (was {})",
        adapter.name(),
        on,
        if was_running { "running" } else { "stopped" }
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// RING CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

/// Buffer address of slot `si`, or the scratch buffer if the slot is
/// corrupted.
fn slot_addr<B: BufferMap + ?Sized>(kring: &KernelRing, si: u32, bufs: &B) -> BufAddr {
    let buf_idx = kring.ring.slots[si as usize].buf_idx;
    bufs.resolve(buf_idx).unwrap_or_else(|| {
        warn!(
            "{} ring {}: slot {} has bad buffer {}, using scratch",
            kring.kind(),
            kring.id(),
            si,
            buf_idx
        );
        bufs.scratch()
    })
}

/// Point every descriptor of TX queue `n` at its slot's buffer.
///
/// Returns `Ok(false)` if the adapter is not in netmap mode.
pub fn configure_tx_ring<D: NicDriver>(adapter: &NetmapAdapter<D>, n: u32) -> Result<bool> {
    let state = adapter.tx_state(n)?;
    if !adapter.is_native() {
        return Ok(false);
    }
    let mut state = state.lock();
    let RingState { kring, hw } = &mut *state;
    let bufs = &**adapter.pool();

    hw.rewind();
    let xlate = kring.reset(0);
    for nic_i in 0..kring.num_slots() {
        let si = xlate.nic_to_ring(nic_i);
        hw.load(nic_i, slot_addr(kring, si, bufs).paddr);
    }
    kring.finalize();
    debug!("{}: tx ring {} configured, hwofs {}", adapter.name(), n, kring.hwofs());
    Ok(true)
}

/// Refill RX queue `n` from its slots and hand the NIC every descriptor the
/// user does not hold, minus the reserved one.
///
/// Returns `Ok(false)` if the adapter is not in netmap mode.
pub fn configure_rx_ring<D: NicDriver>(adapter: &NetmapAdapter<D>, n: u32) -> Result<bool> {
    let state = adapter.rx_state(n)?;
    if !adapter.is_native() {
        return Ok(false);
    }
    let mut state = state.lock();
    let RingState { kring, hw } = &mut *state;
    let bufs = &**adapter.pool();

    hw.rewind();
    let xlate = kring.reset(0);
    for nic_i in 0..kring.num_slots() {
        let si = xlate.nic_to_ring(nic_i);
        hw.refill(nic_i, slot_addr(kring, si, bufs).paddr);
    }
    let tail = kring.lim() - kring.rx_space();
    wmb();
    hw.write_tail(tail);
    kring.finalize();
    debug!(
        "{}: rx ring {} configured, hwofs {} tail {}",
        adapter.name(),
        n,
        kring.hwofs(),
        tail
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{IfaceId, OpenMode};
    use crate::bridge::SyncFlags;
    use crate::config::{AttachParams, NetmapConfig};
    use crate::hw::sim::SimNic;
    use crate::mem::BufferPool;
    use crate::registry::AdapterRegistry;
    use crate::ring::RingKind;
    use alloc::sync::Arc;

    const N: u32 = 8;

    fn adapter() -> (Arc<NetmapAdapter<SimNic>>, Arc<BufferPool>) {
        let pool = Arc::new(BufferPool::new(0, 0x80_0000, 2048, 128));
        let reg = AdapterRegistry::new(NetmapConfig::default());
        let params = AttachParams::new(IfaceId(1), "igb1").with_desc(N, N).with_rings(2, 2);
        let a = reg.attach(SimNic::new(2, N), pool.clone(), params).unwrap();
        (a, pool)
    }

    #[test]
    fn test_guard_is_exclusive_and_released() {
        let guard = ResetGuard::new();
        let token = guard.try_acquire().unwrap();
        assert!(guard.is_held());
        assert!(guard.try_acquire().is_none());
        drop(token);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_guard_gives_up() {
        let nic = SimNic::new(1, N);
        let guard = ResetGuard::new();
        let _held = guard.try_acquire().unwrap();
        let policy = GuardPolicy {
            max_attempts: 5,
            ..GuardPolicy::default()
        };
        let err = guard.acquire(&nic, &policy).unwrap_err();
        assert_eq!(err, BridgeError::GuardTimeout { attempts: 5 });
        assert_eq!(nic.backoffs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_configure_requires_native() {
        let (a, _) = adapter();
        assert_eq!(configure_tx_ring(&*a, 0), Ok(false));
        assert_eq!(configure_rx_ring(&*a, 1), Ok(false));
        assert_eq!(
            configure_tx_ring(&*a, 2),
            Err(BridgeError::NoSuchRing { kind: RingKind::Tx, index: 2 })
        );
    }

    #[test]
    fn test_configure_tx_loads_slot_buffers() {
        let (a, pool) = adapter();
        a.open(OpenMode::User).unwrap();
        let s = a.driver().tx(1).snapshot();
        a.with_tx_ring(1, |k| {
            for (i, d) in s.desc.iter().enumerate() {
                assert_eq!(d.addr, pool.addr_of(k.ring.slots[i].buf_idx).paddr);
            }
            assert_eq!(k.ring.tail, N - 1);
        })
        .unwrap();
        assert_eq!((s.head, s.tail), (0, 0));
    }

    #[test]
    fn test_reconfigure_keeps_user_slots() {
        let (a, pool) = adapter();
        a.open(OpenMode::User).unwrap();
        for _ in 0..5 {
            a.driver().rx(0).deliver(60);
        }
        a.rxsync(0, SyncFlags::empty()).unwrap();
        a.with_rx_ring(0, |k| k.ring.advance_to(2)).unwrap();
        a.rxsync(0, SyncFlags::empty()).unwrap();

        // restart: NIC back at 0, user still holds slots 2..5
        let token = a.reset_guard().try_acquire().unwrap();
        apply_mode(&*a, true, false, &token).unwrap();
        drop(token);

        let q = a.driver().rx(0);
        let s = q.snapshot();
        assert_eq!(s.tail, N - 1 - 3);
        a.with_rx_ring(0, |k| {
            assert_eq!(k.hwofs(), 5);
            // NIC descriptor 0 now backs ring slot 5
            assert_eq!(s.desc[0].addr, pool.addr_of(k.ring.slots[5].buf_idx).paddr);
        })
        .unwrap();

        q.deliver(99);
        let r = a.rxsync(0, SyncFlags::empty()).unwrap();
        assert_eq!(r.imported, 1);
        assert_eq!(a.with_rx_ring(0, |k| (k.hwtail, k.ring.slots[5].len)).unwrap(), (6, 99));
    }

    #[test]
    fn test_corrupted_slot_gets_scratch() {
        let (a, pool) = adapter();
        a.with_tx_ring(0, |k| k.ring.slots[3].buf_idx = 1).unwrap();
        a.open(OpenMode::User).unwrap();
        assert_eq!(a.driver().tx(0).snapshot().desc[3].addr, pool.scratch().paddr);
    }

    #[test]
    fn test_stopped_device_is_reset() {
        let (a, _) = adapter();
        a.driver().set_running(false);
        set_mode(&*a, true).unwrap();
        assert!(a.is_native());
        assert_eq!(a.driver().resets.load(Ordering::SeqCst), 1);
        assert_eq!(a.driver().ups.load(Ordering::SeqCst), 0);
        assert!(!a.reset_guard().is_held());
    }
}
