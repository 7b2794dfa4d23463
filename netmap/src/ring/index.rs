//! Index arithmetic for circular rings.
//!
//! The NIC ring and the netmap ring have the same size but their index 0 need
//! not coincide: after a reset the NIC may restart at 0 while netmap keeps its
//! cursors. `hwofs` is the offset between the two.

/// Next index, wrapping at `lim` (= size - 1).
#[inline]
pub const fn next(i: u32, lim: u32) -> u32 {
    if i == lim {
        0
    } else {
        i + 1
    }
}

/// Previous index, wrapping at `lim` (= size - 1).
#[inline]
pub const fn prev(i: u32, lim: u32) -> u32 {
    if i == 0 {
        lim
    } else {
        i - 1
    }
}

/// Number of steps from `from` forward to `to` in a ring of `n` slots.
#[inline]
pub const fn distance(from: u32, to: u32, n: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        to + n - from
    }
}

/// True if `x` lies in the cyclic window `[lo, hi]` (both inclusive).
#[inline]
pub const fn in_window(lo: u32, x: u32, hi: u32, n: u32) -> bool {
    distance(lo, x, n) <= distance(lo, hi, n)
}

/// Maps between NIC descriptor indices and netmap slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTranslator {
    num_slots: u32,
    hwofs: i32,
}

impl IndexTranslator {
    /// Translator for a ring of `num_slots` with offset `hwofs`.
    pub const fn new(num_slots: u32, hwofs: i32) -> Self {
        Self { num_slots, hwofs }
    }

    /// Identity mapping.
    pub const fn identity(num_slots: u32) -> Self {
        Self::new(num_slots, 0)
    }

    pub const fn num_slots(&self) -> u32 {
        self.num_slots
    }

    pub const fn hwofs(&self) -> i32 {
        self.hwofs
    }

    /// NIC index -> netmap slot index.
    #[inline]
    pub fn nic_to_ring(&self, nic_i: u32) -> u32 {
        self.wrap(nic_i as i64 + self.hwofs as i64)
    }

    /// Netmap slot index -> NIC index.
    #[inline]
    pub fn ring_to_nic(&self, nm_i: u32) -> u32 {
        self.wrap(nm_i as i64 - self.hwofs as i64)
    }

    #[inline]
    fn wrap(&self, n: i64) -> u32 {
        n.rem_euclid(self.num_slots as i64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_prev_wrap() {
        assert_eq!(next(6, 7), 7);
        assert_eq!(next(7, 7), 0);
        assert_eq!(prev(0, 7), 7);
        assert_eq!(prev(5, 7), 4);
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(2, 5, 8), 3);
        assert_eq!(distance(6, 1, 8), 3);
        assert_eq!(distance(4, 4, 8), 0);
    }

    #[test]
    fn test_window() {
        // plain window
        assert!(in_window(2, 4, 6, 8));
        assert!(!in_window(2, 7, 6, 8));
        // wrapped window
        assert!(in_window(6, 0, 2, 8));
        assert!(in_window(6, 6, 2, 8));
        assert!(!in_window(6, 4, 2, 8));
    }

    #[test]
    fn test_translation_is_bijective() {
        let t = IndexTranslator::new(8, 3);
        for i in 0..8 {
            assert_eq!(t.ring_to_nic(t.nic_to_ring(i)), i);
        }
        assert_eq!(t.nic_to_ring(0), 3);
        assert_eq!(t.nic_to_ring(6), 1);
        assert_eq!(t.ring_to_nic(1), 6);
    }

    #[test]
    fn test_negative_offset() {
        let t = IndexTranslator::new(8, -2);
        assert_eq!(t.nic_to_ring(0), 6);
        assert_eq!(t.ring_to_nic(6), 0);
        assert_eq!(IndexTranslator::identity(8).nic_to_ring(5), 5);
    }
}
