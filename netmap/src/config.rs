//! Bridge configuration.
//!
//! Global knobs live in [`NetmapConfig`], per-interface sizing in
//! [`AttachParams`]. Both come with defaults matching the igb driver.

use alloc::string::String;

use crate::adapter::IfaceId;
use crate::error::{BridgeError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

/// Default descriptors per TX queue (igb `IGB_DEFAULT_TXD`).
pub const DEFAULT_TX_DESC: u32 = 256;

/// Default descriptors per RX queue (igb `IGB_DEFAULT_RXD`).
pub const DEFAULT_RX_DESC: u32 = 256;

/// Default queue count.
pub const DEFAULT_RINGS: u32 = 1;

/// Smallest ring that still leaves room for the reserved slot.
pub const MIN_RING_SIZE: u32 = 2;

/// Largest descriptor ring the hardware accepts.
pub const MAX_RING_SIZE: u32 = 4096;

/// Default registry capacity.
pub const DEFAULT_MAX_ADAPTERS: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════
// GUARD POLICY
// ═══════════════════════════════════════════════════════════════════════════

/// Bounded backoff used while waiting for the adapter reset guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Attempts before giving up with `GuardTimeout`.
    pub max_attempts: u32,
    /// Lower bound of the pause between attempts, microseconds.
    pub backoff_min_us: u32,
    /// Upper bound of the pause between attempts, microseconds.
    pub backoff_max_us: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            backoff_min_us: 1000,
            backoff_max_us: 2000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GLOBAL CONFIG
// ═══════════════════════════════════════════════════════════════════════════

/// Bridge-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetmapConfig {
    /// Import RX completions on every rxsync, not only after an interrupt.
    pub no_pendintr: bool,
    /// Reset guard acquisition policy.
    pub guard: GuardPolicy,
    /// Registry capacity.
    pub max_adapters: usize,
}

impl Default for NetmapConfig {
    fn default() -> Self {
        Self {
            no_pendintr: true,
            guard: GuardPolicy::default(),
            max_adapters: DEFAULT_MAX_ADAPTERS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ATTACH PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════

/// Parameters supplied when a driver attaches an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachParams {
    /// Interface identity used as the registry key.
    pub id: IfaceId,
    /// Interface name, for logs.
    pub name: String,
    /// Descriptors per TX queue.
    pub num_tx_desc: u32,
    /// Descriptors per RX queue.
    pub num_rx_desc: u32,
    /// Number of TX queues.
    pub num_tx_rings: u32,
    /// Number of RX queues.
    pub num_rx_rings: u32,
}

impl AttachParams {
    /// Create parameters with default ring sizes.
    pub fn new(id: IfaceId, name: &str) -> Self {
        Self {
            id,
            name: String::from(name),
            num_tx_desc: DEFAULT_TX_DESC,
            num_rx_desc: DEFAULT_RX_DESC,
            num_tx_rings: DEFAULT_RINGS,
            num_rx_rings: DEFAULT_RINGS,
        }
    }

    /// Set descriptor counts.
    pub fn with_desc(mut self, tx: u32, rx: u32) -> Self {
        self.num_tx_desc = tx;
        self.num_rx_desc = rx;
        self
    }

    /// Set queue counts.
    pub fn with_rings(mut self, tx: u32, rx: u32) -> Self {
        self.num_tx_rings = tx;
        self.num_rx_rings = rx;
        self
    }

    /// Check ring geometry.
    pub fn validate(&self) -> Result<()> {
        let in_range = |n: u32| (MIN_RING_SIZE..=MAX_RING_SIZE).contains(&n);
        if !in_range(self.num_tx_desc) || !in_range(self.num_rx_desc) {
            return Err(BridgeError::InvalidConfig("descriptor count out of range"));
        }
        if self.num_tx_rings == 0 || self.num_rx_rings == 0 {
            return Err(BridgeError::InvalidConfig("adapter needs at least one ring per direction"));
        }
        Ok(())
    }
}
