//! Software NIC model.
//!
//! Descriptor rings and head/tail registers kept in RAM, with hooks to play
//! the hardware side: complete transmissions, deliver frames. Queue handles
//! are cheap clones sharing state, so a test can keep one while the bridge
//! owns another.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::Mutex;

use super::{NicDriver, RxCompletion, RxDescRing, TxDescRing, TxDescriptor};
use crate::ring::index;

// ═══════════════════════════════════════════════════════════════════════════
// TX
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SimTxState {
    pub desc: Vec<TxDescriptor>,
    /// TDH: next descriptor the NIC will send.
    pub head: u32,
    /// TDT: last doorbell.
    pub tail: u32,
    /// Number of doorbell writes.
    pub doorbells: u32,
    /// Overrides `head` in `completion_index` when set.
    pub raw_head: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SimTxQueue {
    state: Arc<Mutex<SimTxState>>,
}

impl SimTxQueue {
    pub fn new(count: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimTxState {
                desc: vec![TxDescriptor::default(); count as usize],
                head: 0,
                tail: 0,
                doorbells: 0,
                raw_head: None,
            })),
        }
    }

    /// Copy of the queue state.
    pub fn snapshot(&self) -> SimTxState {
        self.state.lock().clone()
    }

    /// Send up to `n` queued descriptors. Returns how many were sent.
    pub fn complete(&self, n: u32) -> u32 {
        let mut s = self.state.lock();
        let lim = s.desc.len() as u32 - 1;
        let mut done = 0;
        while done < n && s.head != s.tail {
            s.head = index::next(s.head, lim);
            done += 1;
        }
        done
    }

    /// Make the head register report `raw` regardless of progress.
    pub fn force_head(&self, raw: Option<u32>) {
        self.state.lock().raw_head = raw;
    }

    /// Descriptors queued but not sent.
    pub fn pending(&self) -> u32 {
        let s = self.state.lock();
        index::distance(s.head, s.tail, s.desc.len() as u32)
    }
}

impl TxDescRing for SimTxQueue {
    fn num_desc(&self) -> u32 {
        self.state.lock().desc.len() as u32
    }

    fn load(&mut self, idx: u32, paddr: u64) {
        self.state.lock().desc[idx as usize] = TxDescriptor {
            addr: paddr,
            ..TxDescriptor::default()
        };
    }

    fn write(&mut self, idx: u32, desc: &TxDescriptor) {
        self.state.lock().desc[idx as usize] = *desc;
    }

    fn completion_index(&self) -> u32 {
        let s = self.state.lock();
        s.raw_head.unwrap_or(s.head)
    }

    fn write_tail(&mut self, idx: u32) {
        let mut s = self.state.lock();
        s.tail = idx;
        s.doorbells += 1;
    }

    fn rewind(&mut self) {
        let mut s = self.state.lock();
        s.head = 0;
        s.tail = 0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RX
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimRxDesc {
    pub addr: u64,
    pub done: bool,
    pub len: u16,
}

#[derive(Debug, Clone)]
pub struct SimRxState {
    pub desc: Vec<SimRxDesc>,
    /// RDH: next descriptor the NIC will fill.
    pub head: u32,
    /// RDT: first descriptor the NIC may not use.
    pub tail: u32,
    pub next_to_clean: u32,
    pub doorbells: u32,
    /// Frames dropped for lack of descriptors.
    pub dropped: u32,
}

#[derive(Debug, Clone)]
pub struct SimRxQueue {
    state: Arc<Mutex<SimRxState>>,
}

impl SimRxQueue {
    pub fn new(count: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimRxState {
                desc: vec![SimRxDesc::default(); count as usize],
                head: 0,
                tail: 0,
                next_to_clean: 0,
                doorbells: 0,
                dropped: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> SimRxState {
        self.state.lock().clone()
    }

    /// Deliver one frame of `len` bytes. Returns false if it was dropped.
    pub fn deliver(&self, len: u16) -> bool {
        let mut s = self.state.lock();
        if s.head == s.tail {
            s.dropped += 1;
            return false;
        }
        let lim = s.desc.len() as u32 - 1;
        let h = s.head as usize;
        s.desc[h].done = true;
        s.desc[h].len = len;
        s.head = index::next(s.head, lim);
        true
    }

    /// Descriptors the NIC may still fill.
    pub fn hw_owned(&self) -> u32 {
        let s = self.state.lock();
        index::distance(s.head, s.tail, s.desc.len() as u32)
    }
}

impl RxDescRing for SimRxQueue {
    fn num_desc(&self) -> u32 {
        self.state.lock().desc.len() as u32
    }

    fn poll(&self, idx: u32) -> Option<RxCompletion> {
        let s = self.state.lock();
        let d = s.desc[idx as usize];
        d.done.then_some(RxCompletion { len: d.len })
    }

    fn refill(&mut self, idx: u32, paddr: u64) {
        self.state.lock().desc[idx as usize] = SimRxDesc {
            addr: paddr,
            done: false,
            len: 0,
        };
    }

    fn next_to_clean(&self) -> u32 {
        self.state.lock().next_to_clean
    }

    fn set_next_to_clean(&mut self, idx: u32) {
        self.state.lock().next_to_clean = idx;
    }

    fn write_tail(&mut self, idx: u32) {
        let mut s = self.state.lock();
        s.tail = idx;
        s.doorbells += 1;
    }

    fn rewind(&mut self) {
        let mut s = self.state.lock();
        s.head = 0;
        s.tail = 0;
        s.next_to_clean = 0;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DRIVER
// ═══════════════════════════════════════════════════════════════════════════

/// A whole simulated NIC.
pub struct SimNic {
    carrier: AtomicBool,
    running: AtomicBool,
    pub ups: AtomicU32,
    pub downs: AtomicU32,
    pub resets: AtomicU32,
    pub backoffs: AtomicU32,
    tx: Vec<SimTxQueue>,
    rx: Vec<SimRxQueue>,
}

impl SimNic {
    pub fn new(num_queues: u32, num_desc: u32) -> Self {
        Self {
            carrier: AtomicBool::new(true),
            running: AtomicBool::new(true),
            ups: AtomicU32::new(0),
            downs: AtomicU32::new(0),
            resets: AtomicU32::new(0),
            backoffs: AtomicU32::new(0),
            tx: (0..num_queues).map(|_| SimTxQueue::new(num_desc)).collect(),
            rx: (0..num_queues).map(|_| SimRxQueue::new(num_desc)).collect(),
        }
    }

    pub fn set_carrier(&self, up: bool) {
        self.carrier.store(up, Ordering::SeqCst);
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn tx(&self, n: u32) -> &SimTxQueue {
        &self.tx[n as usize]
    }

    pub fn rx(&self, n: u32) -> &SimRxQueue {
        &self.rx[n as usize]
    }
}

impl NicDriver for SimNic {
    type TxQueue = SimTxQueue;
    type RxQueue = SimRxQueue;

    fn carrier_ok(&self) -> bool {
        self.carrier.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn up(&self) {
        self.ups.fetch_add(1, Ordering::SeqCst);
    }

    fn down(&self) {
        self.downs.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn tx_queue(&self, n: u32) -> Option<SimTxQueue> {
        self.tx.get(n as usize).cloned()
    }

    fn rx_queue(&self, n: u32) -> Option<SimRxQueue> {
        self.rx.get(n as usize).cloned()
    }

    fn backoff(&self, _min_us: u32, _max_us: u32) {
        self.backoffs.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_completes_up_to_tail() {
        let mut q = SimTxQueue::new(8);
        q.write_tail(3);
        assert_eq!(q.complete(10), 3);
        assert_eq!(q.completion_index(), 3);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn test_rx_drops_without_descriptors() {
        let mut q = SimRxQueue::new(8);
        assert!(!q.deliver(60));
        q.write_tail(2);
        assert!(q.deliver(60));
        assert!(q.deliver(61));
        assert!(!q.deliver(62));
        assert_eq!(q.poll(1), Some(RxCompletion { len: 61 }));
        assert_eq!(q.snapshot().dropped, 2);
    }
}
