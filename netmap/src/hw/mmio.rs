//! MMIO (Memory-Mapped I/O) register access.
//!
//! # Safety
//! - Base must be a valid, mapped MMIO address
//! - Offsets must be 4-byte aligned and inside the BAR
//! - Mapping must be uncached
//!
//! Registers are little-endian on the bus; values are converted here.

/// A device register window.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: *mut u8,
}

impl Mmio {
    /// Wrap a register window.
    ///
    /// # Safety
    /// `base` must stay mapped for as long as any copy of this value lives.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    /// Read a 32-bit register.
    #[inline]
    pub fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0, "unaligned register offset {:#x}", offset);
        u32::from_le(unsafe { core::ptr::read_volatile(self.base.add(offset) as *const u32) })
    }

    /// Write a 32-bit register.
    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0, "unaligned register offset {:#x}", offset);
        unsafe { core::ptr::write_volatile(self.base.add(offset) as *mut u32, value.to_le()) }
    }
}

// Safety: the window is device memory, not owned Rust data; access is
// serialized by whoever owns the queue handle.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}
