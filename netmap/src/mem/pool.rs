//! Packet buffer pool.
//!
//! # Memory Layout
//! ```text
//! Index   Offset              Content
//! 0       0                   Scratch buffer (never handed out)
//! 1       buf_size            Reserved
//! 2..n    idx * buf_size      Ring buffers
//! ```
//! Indices 0 and 1 are never valid in a slot: a slot pointing at them is
//! treated as corrupted.

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{BridgeError, Result};
use crate::ring::Slot;

/// Buffers at the start of the pool that are never given to a ring.
pub const RESERVED_BUFFERS: u32 = 2;

/// CPU and device addresses of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufAddr {
    /// CPU virtual address.
    pub vaddr: usize,
    /// Device-visible (bus) address.
    pub paddr: u64,
}

/// Buffer index to address translation.
///
/// Implemented by whoever owns the packet memory. The sync algorithms only
/// ever go through this trait.
pub trait BufferMap: Send + Sync {
    /// Size of every buffer in bytes.
    fn buf_size(&self) -> u32;

    /// Number of buffers, reserved ones included.
    fn total(&self) -> u32;

    /// Address of `buf_idx` without validation.
    fn addr_of(&self, buf_idx: u32) -> BufAddr;

    /// True if `buf_idx` may appear in a slot.
    fn is_valid(&self, buf_idx: u32) -> bool {
        buf_idx >= RESERVED_BUFFERS && buf_idx < self.total()
    }

    /// Address of a slot buffer, `None` if the index is not usable.
    fn resolve(&self, buf_idx: u32) -> Option<BufAddr> {
        if self.is_valid(buf_idx) {
            Some(self.addr_of(buf_idx))
        } else {
            None
        }
    }

    /// Scratch buffer, used to keep a descriptor pointing at harmless memory.
    fn scratch(&self) -> BufAddr {
        self.addr_of(0)
    }

    /// Make CPU writes to a TX buffer visible to the device.
    fn sync_for_device(&self, _addr: BufAddr, _len: u32) {}

    /// Make device writes to an RX buffer visible to the CPU.
    fn sync_for_cpu(&self, _addr: BufAddr, _len: u32) {}
}

/// Contiguous, identity-sized pool of packet buffers.
pub struct BufferPool {
    /// CPU address of buffer 0.
    vaddr_base: usize,
    /// Bus address of buffer 0.
    paddr_base: u64,
    /// Size of each buffer.
    buf_size: u32,
    /// Total buffers, reserved included.
    count: u32,
    /// Free indices; popped from the end.
    free_list: Mutex<Vec<u32>>,
}

impl BufferPool {
    /// Create a pool over `count` buffers of `buf_size` bytes.
    ///
    /// The region itself is owned by the caller; the pool only hands out
    /// indices and computes addresses.
    pub fn new(vaddr_base: usize, paddr_base: u64, buf_size: u32, count: u32) -> Self {
        debug_assert!(count >= RESERVED_BUFFERS, "pool must hold the reserved buffers");
        let free_list = (RESERVED_BUFFERS..count).rev().collect();
        Self {
            vaddr_base,
            paddr_base,
            buf_size,
            count,
            free_list: Mutex::new(free_list),
        }
    }

    /// Take one buffer index.
    pub fn alloc(&self) -> Option<u32> {
        self.free_list.lock().pop()
    }

    /// Return a buffer index.
    pub fn free(&self, buf_idx: u32) {
        if !self.is_valid(buf_idx) {
            return;
        }
        let mut free = self.free_list.lock();
        debug_assert!(!free.contains(&buf_idx), "double free of buffer {}", buf_idx);
        free.push(buf_idx);
    }

    /// Allocate `n` slots, each with its own buffer. All or nothing.
    pub fn alloc_slots(&self, n: u32) -> Result<Vec<Slot>> {
        let mut free = self.free_list.lock();
        if (free.len() as u32) < n {
            return Err(BridgeError::OutOfBuffers);
        }
        let mut slots = Vec::with_capacity(n as usize);
        for _ in 0..n {
            // checked above
            if let Some(idx) = free.pop() {
                slots.push(Slot::new(idx));
            }
        }
        Ok(slots)
    }

    /// Give back the buffers referenced by `slots`.
    pub fn release_slots(&self, slots: &[Slot]) {
        for slot in slots {
            self.free(slot.buf_idx);
        }
    }

    /// Number of free buffers.
    pub fn available(&self) -> usize {
        self.free_list.lock().len()
    }
}

impl BufferMap for BufferPool {
    fn buf_size(&self) -> u32 {
        self.buf_size
    }

    fn total(&self) -> u32 {
        self.count
    }

    fn addr_of(&self, buf_idx: u32) -> BufAddr {
        let offset = buf_idx as u64 * self.buf_size as u64;
        BufAddr {
            vaddr: self.vaddr_base + offset as usize,
            paddr: self.paddr_base + offset,
        }
    }
}
