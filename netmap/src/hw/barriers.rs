//! Memory barriers.
//!
//! `wmb` orders descriptor writes before the tail doorbell, `rmb` orders the
//! completion status read before reading anything the NIC wrote with it.
//!
//! # Reference
//! Intel SDM Vol. 3 §8.2.5 (SFENCE / LFENCE)

use core::sync::atomic::{fence, Ordering};

/// Write barrier (SFENCE on x86_64).
#[inline]
pub fn wmb() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_sfence();
    }
    fence(Ordering::Release);
}

/// Read barrier (LFENCE on x86_64).
#[inline]
pub fn rmb() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
    }
    fence(Ordering::Acquire);
}
