//! TX reconciliation.
//!
//! Two halves: push slots the user queued (`hwcur..rhead`) into descriptors,
//! then, when the user is out of room or asks for it, read the head register
//! and give completed slots back (`hwtail`).

use log::{trace, warn};

use super::{SyncFlags, TxReport};
use crate::error::{BridgeError, Result};
use crate::hw::barriers::{rmb, wmb};
use crate::hw::{TxCmd, TxDescRing, TxDescriptor};
use crate::mem::BufferMap;
use crate::ring::index::{next, prev};
use crate::ring::{KernelRing, SlotFlags};

/// Reconcile a TX ring with its hardware queue.
///
/// A slot with a bad buffer or oversized length stops the batch: slots
/// before it are committed to the NIC, the error is returned, and the slot
/// stays queued.
pub fn txsync<Q, B>(
    kring: &mut KernelRing,
    hw: &mut Q,
    bufs: &B,
    link_up: bool,
    flags: SyncFlags,
) -> Result<TxReport>
where
    Q: TxDescRing + ?Sized,
    B: BufferMap + ?Sized,
{
    let ring_id = kring.id();
    let lim = kring.lim();
    let head = kring.rhead;
    // one completion report roughly every half ring
    let report_frequency = kring.num_slots() >> 1;
    let xlate = kring.translator();
    let mut report = TxReport::default();

    rmb();

    if !link_up {
        report.link_down = true;
        return Ok(report);
    }

    // ═══════════════════════════════════════════════════════════════════
    // PRODUCE: new packets to send
    // ═══════════════════════════════════════════════════════════════════
    let mut nm_i = kring.hwcur;
    if nm_i != head {
        let mut nic_i = xlate.ring_to_nic(nm_i);
        let mut failed = None;

        while nm_i != head {
            let slot = &mut kring.ring.slots[nm_i as usize];
            let len = slot.len;
            let addr = match bufs.resolve(slot.buf_idx) {
                Some(addr) if len as u32 <= bufs.buf_size() => addr,
                _ => {
                    failed = Some(BridgeError::BadTxSlot {
                        ring: ring_id,
                        slot: nm_i,
                        buf_idx: slot.buf_idx,
                        len,
                    });
                    break;
                }
            };

            let mut cmd = TxCmd::EOP | TxCmd::IFCS;
            if slot.flags.contains(SlotFlags::REPORT) || nic_i == 0 || nic_i == report_frequency {
                cmd |= TxCmd::RS;
            }
            slot.flags.remove(SlotFlags::REPORT | SlotFlags::BUF_CHANGED);
            bufs.sync_for_device(addr, len as u32);

            hw.write(
                nic_i,
                &TxDescriptor {
                    addr: addr.paddr,
                    len,
                    cmd,
                },
            );
            nm_i = next(nm_i, lim);
            nic_i = next(nic_i, lim);
            report.queued += 1;
        }

        if report.queued > 0 {
            kring.hwcur = nm_i;
            // descriptors must be visible before the doorbell
            wmb();
            hw.write_tail(nic_i);
        }

        if let Some(err) = failed {
            warn!("{}", err);
            return Err(err);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // RECLAIM: completed transmissions
    // ═══════════════════════════════════════════════════════════════════
    if flags.contains(SyncFlags::FORCE_RECLAIM) || kring.tx_space_exhausted() {
        let raw = hw.completion_index();
        let nic_i = if raw >= kring.num_slots() {
            warn!("tx ring {}: TDH wrap {}", ring_id, raw);
            raw % kring.num_slots()
        } else {
            raw
        };
        kring.hwtail = prev(xlate.nic_to_ring(nic_i), lim);
        report.hwtail = Some(kring.hwtail);
    }

    trace!(
        "tx ring {}: queued {} hwcur {} hwtail {}",
        ring_id,
        report.queued,
        kring.hwcur,
        kring.hwtail
    );
    Ok(report)
}
