//! Intel igb (82575 / 82576 / I350) queue access.
//!
//! Advanced descriptor format, legacy descriptors are never used.
//!
//! # Reference
//! Intel 82576 Datasheet §7.1.5 (advanced RX descriptors),
//! §7.2.2.3 (advanced TX data descriptors), §8.10 / §8.12 (queue registers)

use core::ptr::{addr_of_mut, read_volatile, write_volatile};

use super::mmio::Mmio;
use super::{RxCompletion, RxDescRing, TxCmd, TxDescRing, TxDescriptor};

// ═══════════════════════════════════════════════════════════════════════════
// QUEUE REGISTERS
// ═══════════════════════════════════════════════════════════════════════════

/// TX descriptor head (TDH) of queue `n`.
pub const fn tdh(n: u32) -> usize {
    if n < 4 {
        0x03810 + (n as usize) * 0x100
    } else {
        0x0E010 + (n as usize) * 0x40
    }
}

/// TX descriptor tail (TDT) of queue `n`.
pub const fn tdt(n: u32) -> usize {
    if n < 4 {
        0x03818 + (n as usize) * 0x100
    } else {
        0x0E018 + (n as usize) * 0x40
    }
}

/// RX descriptor head (RDH) of queue `n`.
pub const fn rdh(n: u32) -> usize {
    if n < 4 {
        0x02810 + (n as usize) * 0x100
    } else {
        0x0C010 + (n as usize) * 0x40
    }
}

/// RX descriptor tail (RDT) of queue `n`.
pub const fn rdt(n: u32) -> usize {
    if n < 4 {
        0x02818 + (n as usize) * 0x100
    } else {
        0x0C018 + (n as usize) * 0x40
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR BITS
// ═══════════════════════════════════════════════════════════════════════════

pub const TXD_CMD_EOP: u32 = 0x0100_0000;
pub const TXD_CMD_RS: u32 = 0x0800_0000;
pub const ADVTXD_DCMD_IFCS: u32 = 0x0200_0000;
pub const ADVTXD_DCMD_DEXT: u32 = 0x2000_0000;
pub const ADVTXD_DTYP_DATA: u32 = 0x0030_0000;
pub const ADVTXD_PAYLEN_SHIFT: u32 = 14;

/// Descriptor done.
pub const RXD_STAT_DD: u32 = 0x01;

// ═══════════════════════════════════════════════════════════════════════════
// DESCRIPTOR LAYOUTS
// ═══════════════════════════════════════════════════════════════════════════

/// Advanced TX data descriptor (read format).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvTxDesc {
    pub buffer_addr: u64,
    pub cmd_type_len: u32,
    pub olinfo_status: u32,
}

impl AdvTxDesc {
    /// Encode a family-neutral descriptor, little-endian.
    pub fn encode(desc: &TxDescriptor) -> Self {
        let len = desc.len as u32;
        let mut cmd = ADVTXD_DTYP_DATA | ADVTXD_DCMD_DEXT;
        if desc.cmd.contains(TxCmd::EOP) {
            cmd |= TXD_CMD_EOP;
        }
        if desc.cmd.contains(TxCmd::IFCS) {
            cmd |= ADVTXD_DCMD_IFCS;
        }
        if desc.cmd.contains(TxCmd::RS) {
            cmd |= TXD_CMD_RS;
        }
        Self {
            buffer_addr: desc.addr.to_le(),
            cmd_type_len: (len | cmd).to_le(),
            olinfo_status: (len << ADVTXD_PAYLEN_SHIFT).to_le(),
        }
    }
}

/// Advanced RX descriptor.
///
/// Read format: `lo` = packet address, `hi` = header address.
/// Write-back format: `hi` bits 0..32 = status/error, bits 32..48 = length.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvRxDesc {
    pub lo: u64,
    pub hi: u64,
}

impl AdvRxDesc {
    #[inline]
    fn status_error(&self) -> u32 {
        u64::from_le(self.hi) as u32
    }

    #[inline]
    fn length(&self) -> u16 {
        (u64::from_le(self.hi) >> 32) as u16
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TX QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// One igb TX queue.
pub struct IgbTxQueue {
    regs: Mmio,
    /// Hardware queue number (register index).
    reg_idx: u32,
    /// CPU pointer to the descriptor ring.
    desc: *mut AdvTxDesc,
    count: u32,
    /// Last tail written.
    next_to_use: u32,
}

impl IgbTxQueue {
    /// Wrap an already configured TX queue.
    ///
    /// # Safety
    /// `desc` must point to `count` descriptors owned by this queue and stay
    /// valid for its lifetime.
    pub unsafe fn new(regs: Mmio, reg_idx: u32, desc: *mut AdvTxDesc, count: u32) -> Self {
        Self {
            regs,
            reg_idx,
            desc,
            count,
            next_to_use: 0,
        }
    }

    pub fn next_to_use(&self) -> u32 {
        self.next_to_use
    }

    #[inline]
    fn desc_ptr(&self, idx: u32) -> *mut AdvTxDesc {
        debug_assert!(idx < self.count, "tx descriptor {} out of range", idx);
        unsafe { self.desc.add(idx as usize) }
    }
}

impl TxDescRing for IgbTxQueue {
    fn num_desc(&self) -> u32 {
        self.count
    }

    fn load(&mut self, idx: u32, paddr: u64) {
        let p = self.desc_ptr(idx);
        unsafe { write_volatile(addr_of_mut!((*p).buffer_addr), paddr.to_le()) }
    }

    fn write(&mut self, idx: u32, desc: &TxDescriptor) {
        let p = self.desc_ptr(idx);
        unsafe { write_volatile(p, AdvTxDesc::encode(desc)) }
    }

    fn completion_index(&self) -> u32 {
        self.regs.read32(tdh(self.reg_idx))
    }

    fn write_tail(&mut self, idx: u32) {
        self.next_to_use = idx;
        self.regs.write32(tdt(self.reg_idx), idx);
    }

    fn rewind(&mut self) {
        self.regs.write32(tdh(self.reg_idx), 0);
        self.regs.write32(tdt(self.reg_idx), 0);
        self.next_to_use = 0;
    }
}

// Safety: the descriptor ring is DMA memory reserved for this queue.
unsafe impl Send for IgbTxQueue {}

// ═══════════════════════════════════════════════════════════════════════════
// RX QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// One igb RX queue.
///
/// The driver must not enable split headers (SRRCTL.DESCTYPE = one buffer).
pub struct IgbRxQueue {
    regs: Mmio,
    reg_idx: u32,
    desc: *mut AdvRxDesc,
    count: u32,
    next_to_clean: u32,
    next_to_use: u32,
}

impl IgbRxQueue {
    /// Wrap an already configured RX queue.
    ///
    /// # Safety
    /// `desc` must point to `count` descriptors owned by this queue and stay
    /// valid for its lifetime.
    pub unsafe fn new(regs: Mmio, reg_idx: u32, desc: *mut AdvRxDesc, count: u32) -> Self {
        Self {
            regs,
            reg_idx,
            desc,
            count,
            next_to_clean: 0,
            next_to_use: 0,
        }
    }

    pub fn next_to_use(&self) -> u32 {
        self.next_to_use
    }

    #[inline]
    fn desc_ptr(&self, idx: u32) -> *mut AdvRxDesc {
        debug_assert!(idx < self.count, "rx descriptor {} out of range", idx);
        unsafe { self.desc.add(idx as usize) }
    }
}

impl RxDescRing for IgbRxQueue {
    fn num_desc(&self) -> u32 {
        self.count
    }

    fn poll(&self, idx: u32) -> Option<RxCompletion> {
        let desc = unsafe { read_volatile(self.desc_ptr(idx)) };
        if desc.status_error() & RXD_STAT_DD == 0 {
            return None;
        }
        Some(RxCompletion { len: desc.length() })
    }

    fn refill(&mut self, idx: u32, paddr: u64) {
        let p = self.desc_ptr(idx);
        // hi doubles as the write-back status word: zeroing it clears DD
        unsafe {
            write_volatile(
                p,
                AdvRxDesc {
                    lo: paddr.to_le(),
                    hi: 0,
                },
            )
        }
    }

    fn next_to_clean(&self) -> u32 {
        self.next_to_clean
    }

    fn set_next_to_clean(&mut self, idx: u32) {
        self.next_to_clean = idx;
    }

    fn write_tail(&mut self, idx: u32) {
        self.next_to_use = idx;
        self.regs.write32(rdt(self.reg_idx), idx);
    }

    fn rewind(&mut self) {
        self.regs.write32(rdh(self.reg_idx), 0);
        self.regs.write32(rdt(self.reg_idx), 0);
        self.next_to_clean = 0;
        self.next_to_use = 0;
    }
}

// Safety: the descriptor ring is DMA memory reserved for this queue.
unsafe impl Send for IgbRxQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Register window big enough for queues 0-3.
    fn regs() -> Vec<u32> {
        vec![0u32; 0x4000 / 4]
    }

    #[test]
    fn test_register_map() {
        assert_eq!(tdh(0), 0x3810);
        assert_eq!(tdt(1), 0x3918);
        assert_eq!(rdh(2), 0x2A10);
        assert_eq!(rdt(4), 0xC118);
        assert_eq!(tdh(5), 0xE150);
    }

    #[test]
    fn test_tx_encoding() {
        let d = AdvTxDesc::encode(&TxDescriptor {
            addr: 0x1234_5000,
            len: 60,
            cmd: TxCmd::EOP | TxCmd::IFCS | TxCmd::RS,
        });
        assert_eq!(u64::from_le(d.buffer_addr), 0x1234_5000);
        let cmd = u32::from_le(d.cmd_type_len);
        assert_eq!(cmd & 0xFFFF, 60);
        assert_ne!(cmd & TXD_CMD_RS, 0);
        assert_ne!(cmd & TXD_CMD_EOP, 0);
        assert_ne!(cmd & ADVTXD_DCMD_DEXT, 0);
        assert_eq!(u32::from_le(d.olinfo_status), 60 << ADVTXD_PAYLEN_SHIFT);

        let d = AdvTxDesc::encode(&TxDescriptor {
            addr: 0,
            len: 60,
            cmd: TxCmd::EOP | TxCmd::IFCS,
        });
        assert_eq!(u32::from_le(d.cmd_type_len) & TXD_CMD_RS, 0);
    }

    #[test]
    fn test_tx_queue_registers() {
        // all access after this point goes through the raw pointers the
        // queue was built from
        let mut bar = regs();
        let mut ring = vec![AdvTxDesc::default(); 8];
        let bar = bar.as_mut_ptr();
        let ring = ring.as_mut_ptr();
        let mmio = unsafe { Mmio::new(bar as *mut u8) };
        let mut q = unsafe { IgbTxQueue::new(mmio, 0, ring, 8) };

        q.load(3, 0xABC000);
        q.write_tail(5);
        assert_eq!(q.next_to_use(), 5);
        assert_eq!(unsafe { bar.add(tdt(0) / 4).read_volatile() }, 5);

        unsafe { bar.add(tdh(0) / 4).write_volatile(4) };
        assert_eq!(q.completion_index(), 4);
        assert_eq!(u64::from_le(unsafe { (*ring.add(3)).buffer_addr }), 0xABC000);

        q.rewind();
        assert_eq!(unsafe { bar.add(tdh(0) / 4).read_volatile() }, 0);
        assert_eq!(unsafe { bar.add(tdt(0) / 4).read_volatile() }, 0);
    }

    #[test]
    fn test_rx_poll_and_refill() {
        let mut bar = regs();
        let mut ring = vec![AdvRxDesc::default(); 8];
        let bar = bar.as_mut_ptr();
        let ring = ring.as_mut_ptr();
        let mmio = unsafe { Mmio::new(bar as *mut u8) };
        let mut q = unsafe { IgbRxQueue::new(mmio, 1, ring, 8) };

        assert!(q.poll(0).is_none());

        // hardware write-back: 64 bytes, DD set
        unsafe { (*ring).hi = ((64u64 << 32) | RXD_STAT_DD as u64).to_le() };
        assert_eq!(q.poll(0), Some(RxCompletion { len: 64 }));

        q.refill(0, 0x5000);
        assert!(q.poll(0).is_none());
        assert_eq!(u64::from_le(unsafe { (*ring).lo }), 0x5000);

        q.write_tail(7);
        assert_eq!(unsafe { bar.add(rdt(1) / 4).read_volatile() }, 7);
    }
}
