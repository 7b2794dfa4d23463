//! Per-interface netmap state.
//!
//! A [`NetmapAdapter`] owns one [`KernelRing`] per hardware queue, each
//! behind its own spin lock together with the queue handle, so syncs on
//! different rings never contend. Mode switching, open accounting and the
//! bound peer link live here too.
//!
//! # Locking
//! - RX ring of this adapter, then TX ring of the bound peer
//! - A TX ring lock is never held while taking an RX ring lock
//! - Mode changes hold the [`ResetGuard`], never a ring lock across
//!   driver calls other than queue access

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{debug, warn};
use spin::{Mutex, RwLock};

use crate::bridge::{self, ForwardTarget, RxContext, RxReport, SyncFlags, TxReport};
use crate::config::{AttachParams, NetmapConfig};
use crate::error::{BridgeError, Result};
use crate::hw::{NicDriver, RxDescRing, TxDescRing};
use crate::lifecycle::{self, ResetGuard};
use crate::mem::BufferPool;
use crate::ring::kring::KringFlags;
use crate::ring::{KernelRing, RingKind};

/// Interface identity, unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IfaceId(pub u32);

impl fmt::Display for IfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// Who is opening the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// In-kernel forwarding, no user mapping of the rings.
    Kernel,
    /// A user process mapping the rings.
    User,
}

bitflags::bitflags! {
    /// Open state of an adapter.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct KopenFlags: u32 {
        const OPENED_IN_KERNEL = 0x0001;
        const OPENED_IN_USER = 0x0002;
    }
}

/// A kernel ring and the hardware queue it mirrors.
pub struct RingState<Q> {
    pub kring: KernelRing,
    pub hw: Q,
}

pub struct NetmapAdapter<D: NicDriver> {
    id: IfaceId,
    name: String,
    driver: D,
    pool: Arc<BufferPool>,
    config: NetmapConfig,
    tx: Vec<Mutex<RingState<D::TxQueue>>>,
    rx: Vec<Mutex<RingState<D::RxQueue>>>,
    /// Per RX ring, set from interrupt context without taking the ring lock.
    rx_pending: Vec<AtomicBool>,
    native: AtomicBool,
    kopen: AtomicU32,
    users: AtomicU32,
    guard: ResetGuard,
    peer: RwLock<Option<Weak<NetmapAdapter<D>>>>,
}

impl<D: NicDriver> NetmapAdapter<D> {
    /// Build the rings for `driver` and populate them from `pool`.
    ///
    /// Every queue must exist and match the requested size. Buffers are
    /// returned to the pool if any ring cannot be populated.
    pub(crate) fn new(
        driver: D,
        pool: Arc<BufferPool>,
        params: &AttachParams,
        config: NetmapConfig,
    ) -> Result<Self> {
        params.validate()?;

        let mut tx = Vec::with_capacity(params.num_tx_rings as usize);
        let mut rx = Vec::with_capacity(params.num_rx_rings as usize);
        if let Err(err) = build_rings(&driver, &pool, params, &mut tx, &mut rx) {
            for ring in tx.iter_mut() {
                pool.release_slots(&ring.get_mut().kring.ring.slots);
            }
            for ring in rx.iter_mut() {
                pool.release_slots(&ring.get_mut().kring.ring.slots);
            }
            return Err(err);
        }

        let rx_pending = (0..rx.len()).map(|_| AtomicBool::new(false)).collect();
        Ok(Self {
            id: params.id,
            name: params.name.clone(),
            driver,
            pool,
            config,
            tx,
            rx,
            rx_pending,
            native: AtomicBool::new(false),
            kopen: AtomicU32::new(0),
            users: AtomicU32::new(0),
            guard: ResetGuard::new(),
            peer: RwLock::new(None),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn id(&self) -> IfaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn config(&self) -> &NetmapConfig {
        &self.config
    }

    pub fn num_tx_rings(&self) -> u32 {
        self.tx.len() as u32
    }

    pub fn num_rx_rings(&self) -> u32 {
        self.rx.len() as u32
    }

    /// Guard serializing mode changes and device resets.
    pub fn reset_guard(&self) -> &ResetGuard {
        &self.guard
    }

    /// Rings are driven by netmap rather than the regular driver path.
    pub fn is_native(&self) -> bool {
        self.native.load(Ordering::Acquire)
    }

    pub(crate) fn set_native(&self, on: bool) {
        self.native.store(on, Ordering::Release);
    }

    pub fn open_flags(&self) -> KopenFlags {
        KopenFlags::from_bits_truncate(self.kopen.load(Ordering::Acquire))
    }

    /// Open for in-kernel forwarding with no user mapping.
    pub fn opened_in_kernel_only(&self) -> bool {
        self.open_flags() == KopenFlags::OPENED_IN_KERNEL
    }

    /// Number of user opens outstanding.
    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    pub(crate) fn tx_state(&self, n: u32) -> Result<&Mutex<RingState<D::TxQueue>>> {
        self.tx.get(n as usize).ok_or(BridgeError::NoSuchRing {
            kind: RingKind::Tx,
            index: n,
        })
    }

    pub(crate) fn rx_state(&self, n: u32) -> Result<&Mutex<RingState<D::RxQueue>>> {
        self.rx.get(n as usize).ok_or(BridgeError::NoSuchRing {
            kind: RingKind::Rx,
            index: n,
        })
    }

    /// Run `f` on TX ring `n` with the ring locked.
    pub fn with_tx_ring<R>(&self, n: u32, f: impl FnOnce(&mut KernelRing) -> R) -> Result<R> {
        Ok(f(&mut self.tx_state(n)?.lock().kring))
    }

    /// Run `f` on RX ring `n` with the ring locked.
    pub fn with_rx_ring<R>(&self, n: u32, f: impl FnOnce(&mut KernelRing) -> R) -> Result<R> {
        Ok(f(&mut self.rx_state(n)?.lock().kring))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PEER
    // ═══════════════════════════════════════════════════════════════════════

    /// The bound adapter, if any and still alive.
    pub fn peer(&self) -> Option<Arc<Self>> {
        self.peer.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn is_bound(&self) -> bool {
        self.peer.read().is_some()
    }

    pub(crate) fn set_peer(&self, peer: Option<Weak<Self>>) {
        *self.peer.write() = peer;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SYNC
    // ═══════════════════════════════════════════════════════════════════════

    /// Synchronize TX ring `ring` with the NIC.
    pub fn txsync(&self, ring: u32, flags: SyncFlags) -> Result<TxReport> {
        let mut state = self.tx_state(ring)?.lock();
        self.txsync_locked(&mut state, flags)
    }

    fn txsync_locked(&self, state: &mut RingState<D::TxQueue>, flags: SyncFlags) -> Result<TxReport> {
        let RingState { kring, hw } = state;
        if kring.txsync_prologue().is_none() {
            let head = kring.ring.head;
            let repaired = kring.reinit(&*self.pool);
            let err = BridgeError::InvalidHead {
                ring: kring.id(),
                head,
                lim: kring.lim(),
                repaired,
            };
            warn!("{}: {}", self.name, err);
            return Err(err);
        }
        let result = bridge::txsync(kring, hw, &*self.pool, self.driver.carrier_ok(), flags);
        kring.finalize();
        result
    }

    /// Synchronize RX ring `ring` with the NIC, forwarding released slots to
    /// the bound peer when it is in netmap mode.
    pub fn rxsync(&self, ring: u32, flags: SyncFlags) -> Result<RxReport> {
        let mut state = self.rx_state(ring)?.lock();
        let RingState { kring, hw } = &mut *state;

        if self.rx_pending[ring as usize].swap(false, Ordering::AcqRel) {
            kring.kflags.insert(KringFlags::PENDINTR);
        }
        kring.rxsync_prologue();
        let ctx = RxContext {
            link_up: self.driver.carrier_ok(),
            no_pendintr: self.config.no_pendintr,
            flags,
        };

        let peer = self.peer().filter(|p| p.is_native());
        let result = match &peer {
            Some(peer) => {
                let mut target = PeerTx { peer: &**peer, ring };
                bridge::rxsync(kring, hw, &*self.pool, ctx, Some(&mut target))
            }
            None => bridge::rxsync(kring, hw, &*self.pool, ctx, None),
        };
        kring.finalize();
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // INTERRUPTS
    // ═══════════════════════════════════════════════════════════════════════

    /// RX interrupt on queue `ring`. Returns true if netmap owns the queue
    /// and the driver must not process it.
    ///
    /// Never takes the ring lock: the interrupt may arrive on a CPU that is
    /// inside `rxsync` for the same ring. The next `rxsync` picks the
    /// pending bit up.
    pub fn rx_irq(&self, ring: u32) -> Result<bool> {
        let pending = self.rx_pending.get(ring as usize).ok_or(BridgeError::NoSuchRing {
            kind: RingKind::Rx,
            index: ring,
        })?;
        if !self.is_native() {
            return Ok(false);
        }
        pending.store(true, Ordering::Release);
        Ok(true)
    }

    /// An RX interrupt on `ring` has not been consumed by `rxsync` yet.
    pub fn rx_irq_pending(&self, ring: u32) -> bool {
        self.rx_pending
            .get(ring as usize)
            .is_some_and(|p| p.load(Ordering::Acquire))
    }

    /// TX interrupt on queue `ring`. Returns true if netmap owns the queue.
    pub fn tx_irq(&self, ring: u32) -> Result<bool> {
        self.tx_state(ring)?;
        Ok(self.is_native())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OPEN / CLOSE
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the adapter. The first open puts it in netmap mode; a user open
    /// on a kernel-only adapter restarts it so the rings get configured.
    pub fn open(&self, mode: OpenMode) -> Result<()> {
        let token = self.guard.acquire(&self.driver, &self.config.guard)?;

        let before = self.open_flags();
        let after = match mode {
            OpenMode::Kernel => before | KopenFlags::OPENED_IN_KERNEL,
            OpenMode::User => before | KopenFlags::OPENED_IN_USER,
        };
        if mode == OpenMode::User {
            self.users.fetch_add(1, Ordering::AcqRel);
        }
        self.kopen.store(after.bits(), Ordering::Release);

        let restart = before.is_empty() || (before == KopenFlags::OPENED_IN_KERNEL && after != before);
        if restart {
            let kernel_only = after == KopenFlags::OPENED_IN_KERNEL;
            if let Err(err) = lifecycle::apply_mode(self, true, kernel_only, &token) {
                if mode == OpenMode::User {
                    self.users.fetch_sub(1, Ordering::AcqRel);
                }
                self.kopen.store(before.bits(), Ordering::Release);
                return Err(err);
            }
        }
        debug!("{}: open {:?}, flags {:?}", self.name, mode, after);
        Ok(())
    }

    /// Close the adapter. The last close leaves netmap mode.
    pub fn close(&self, mode: OpenMode) -> Result<()> {
        let token = self.guard.acquire(&self.driver, &self.config.guard)?;

        let before = self.open_flags();
        let mut after = before;
        match mode {
            OpenMode::Kernel => after.remove(KopenFlags::OPENED_IN_KERNEL),
            OpenMode::User => {
                let users = self.users.load(Ordering::Acquire);
                if users == 0 {
                    debug!("{}: user close without open", self.name);
                    return Ok(());
                }
                self.users.store(users - 1, Ordering::Release);
                if users == 1 {
                    after.remove(KopenFlags::OPENED_IN_USER);
                }
            }
        }
        self.kopen.store(after.bits(), Ordering::Release);

        if after.is_empty() && !before.is_empty() {
            let kernel_only = before == KopenFlags::OPENED_IN_KERNEL;
            lifecycle::apply_mode(self, false, kernel_only, &token)?;
        }
        debug!("{}: close {:?}, flags {:?}", self.name, mode, after);
        Ok(())
    }

    /// Open for in-kernel forwarding.
    pub fn kopen(&self) -> Result<()> {
        self.open(OpenMode::Kernel)
    }

    /// Undo [`kopen`](Self::kopen).
    pub fn kclose(&self) -> Result<()> {
        self.close(OpenMode::Kernel)
    }
}

fn build_rings<D: NicDriver>(
    driver: &D,
    pool: &BufferPool,
    params: &AttachParams,
    tx: &mut Vec<Mutex<RingState<D::TxQueue>>>,
    rx: &mut Vec<Mutex<RingState<D::RxQueue>>>,
) -> Result<()> {
    for n in 0..params.num_tx_rings {
        let hw = driver.tx_queue(n).ok_or(BridgeError::NoSuchRing {
            kind: RingKind::Tx,
            index: n,
        })?;
        if hw.num_desc() != params.num_tx_desc {
            return Err(BridgeError::InvalidConfig("tx queue size mismatch"));
        }
        let slots = pool.alloc_slots(params.num_tx_desc)?;
        tx.push(Mutex::new(RingState {
            kring: KernelRing::new(RingKind::Tx, n, slots),
            hw,
        }));
    }
    for n in 0..params.num_rx_rings {
        let hw = driver.rx_queue(n).ok_or(BridgeError::NoSuchRing {
            kind: RingKind::Rx,
            index: n,
        })?;
        if hw.num_desc() != params.num_rx_desc {
            return Err(BridgeError::InvalidConfig("rx queue size mismatch"));
        }
        let slots = pool.alloc_slots(params.num_rx_desc)?;
        rx.push(Mutex::new(RingState {
            kring: KernelRing::new(RingKind::Rx, n, slots),
            hw,
        }));
    }
    Ok(())
}

impl<D: NicDriver> Drop for NetmapAdapter<D> {
    fn drop(&mut self) {
        for ring in self.tx.iter_mut() {
            self.pool.release_slots(&ring.get_mut().kring.ring.slots);
        }
        for ring in self.rx.iter_mut() {
            self.pool.release_slots(&ring.get_mut().kring.ring.slots);
        }
    }
}

impl<D: NicDriver> fmt::Debug for NetmapAdapter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetmapAdapter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tx_rings", &self.tx.len())
            .field("rx_rings", &self.rx.len())
            .field("native", &self.is_native())
            .field("open", &self.open_flags())
            .finish()
    }
}

/// TX ring `ring` of the bound peer, as a forwarding destination.
struct PeerTx<'a, D: NicDriver> {
    peer: &'a NetmapAdapter<D>,
    ring: u32,
}

impl<D: NicDriver> ForwardTarget for PeerTx<'_, D> {
    fn forward(&mut self, rx: &mut KernelRing, head: u32) -> u32 {
        let Ok(state) = self.peer.tx_state(self.ring) else {
            return 0;
        };
        let mut state = state.lock();
        let moved = bridge::splice(rx, head, &mut state.kring);
        if moved > 0 {
            if let Err(err) = self.peer.txsync_locked(&mut state, SyncFlags::empty()) {
                warn!("{}: forward txsync: {}", self.peer.name, err);
            }
        }
        moved
    }
}
