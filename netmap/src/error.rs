//! Bridge error types

use core::fmt;

use crate::adapter::IfaceId;
use crate::ring::RingKind;

pub type Result<T> = core::result::Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// User `head` was out of range or outside the `[hwcur, hwtail]` window.
    /// The ring has been reinitialized; `repaired` is the number of cursor
    /// errors the reinit pass fixed.
    InvalidHead {
        ring: u32,
        head: u32,
        lim: u32,
        repaired: u32,
    },
    /// A released RX slot referenced a buffer that does not resolve.
    /// The ring has been reinitialized.
    BadRxBuffer {
        ring: u32,
        slot: u32,
        buf_idx: u32,
        repaired: u32,
    },
    /// A queued TX slot had a bad buffer or an oversized length.
    /// Descriptors written before it were committed, the rest of the batch was dropped.
    BadTxSlot {
        ring: u32,
        slot: u32,
        buf_idx: u32,
        len: u16,
    },
    /// Reset guard could not be taken within the configured attempts.
    GuardTimeout { attempts: u32 },
    /// Registry already holds `capacity` adapters.
    RegistryFull { capacity: usize },
    AlreadyAttached(IfaceId),
    UnknownInterface(IfaceId),
    AlreadyBound(IfaceId),
    NotBound(IfaceId),
    /// An adapter cannot be bound to itself.
    SelfBind(IfaceId),
    /// Bound adapters must expose the same number of rings.
    RingCountMismatch { left: u32, right: u32 },
    /// Operation requires the adapter to be out of zero-copy mode.
    AdapterBusy(IfaceId),
    NoSuchRing { kind: RingKind, index: u32 },
    /// Buffer pool could not populate the rings.
    OutOfBuffers,
    InvalidConfig(&'static str),
}

impl BridgeError {
    /// True for errors raised after the ring was reinitialized.
    pub fn is_ring_reset(&self) -> bool {
        matches!(self, Self::InvalidHead { .. } | Self::BadRxBuffer { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHead { ring, head, lim, repaired } => write!(
                f,
                "ring {}: head {} invalid (lim {}), ring reinitialized ({} errors)",
                ring, head, lim, repaired
            ),
            Self::BadRxBuffer { ring, slot, buf_idx, repaired } => write!(
                f,
                "rx ring {}: slot {} has bad buffer {}, ring reinitialized ({} errors)",
                ring, slot, buf_idx, repaired
            ),
            Self::BadTxSlot { ring, slot, buf_idx, len } => write!(
                f,
                "tx ring {}: bad addr/len at slot {} (buf {}, len {})",
                ring, slot, buf_idx, len
            ),
            Self::GuardTimeout { attempts } => {
                write!(f, "reset guard busy after {} attempts", attempts)
            }
            Self::RegistryFull { capacity } => {
                write!(f, "adapter registry full ({} entries)", capacity)
            }
            Self::AlreadyAttached(id) => write!(f, "interface {} already attached", id),
            Self::UnknownInterface(id) => write!(f, "interface {} not attached", id),
            Self::AlreadyBound(id) => write!(f, "interface {} already bound", id),
            Self::NotBound(id) => write!(f, "interface {} is not bound", id),
            Self::SelfBind(id) => write!(f, "interface {} cannot be bound to itself", id),
            Self::RingCountMismatch { left, right } => {
                write!(f, "ring count mismatch: {} vs {}", left, right)
            }
            Self::AdapterBusy(id) => write!(f, "interface {} is in netmap mode", id),
            Self::NoSuchRing { kind, index } => write!(f, "no {} ring {}", kind, index),
            Self::OutOfBuffers => write!(f, "buffer pool exhausted"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_ring_reset_classification() {
        let head = BridgeError::InvalidHead { ring: 0, head: 13, lim: 7, repaired: 1 };
        let buf = BridgeError::BadRxBuffer { ring: 0, slot: 2, buf_idx: 0, repaired: 0 };
        let tx = BridgeError::BadTxSlot { ring: 0, slot: 1, buf_idx: 5, len: 9000 };
        assert!(head.is_ring_reset());
        assert!(buf.is_ring_reset());
        assert!(!tx.is_ring_reset());
    }

    #[test]
    fn test_display() {
        let err = BridgeError::NoSuchRing { kind: RingKind::Rx, index: 3 };
        assert_eq!(err.to_string(), "no rx ring 3");
        let err = BridgeError::UnknownInterface(IfaceId(7));
        assert_eq!(err.to_string(), "interface if7 not attached");
    }
}
