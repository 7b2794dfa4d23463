//! Adapter registry.
//!
//! Adapters are keyed by [`IfaceId`]. Binding two adapters links their rings
//! index for index so that RX of one forwards into TX of the other; both
//! sides must be closed while the link changes.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::debug;
use spin::RwLock;

use crate::adapter::{IfaceId, NetmapAdapter};
use crate::config::{AttachParams, NetmapConfig};
use crate::error::{BridgeError, Result};
use crate::hw::NicDriver;
use crate::mem::BufferPool;

pub struct AdapterRegistry<D: NicDriver> {
    config: NetmapConfig,
    adapters: RwLock<BTreeMap<IfaceId, Arc<NetmapAdapter<D>>>>,
}

impl<D: NicDriver> AdapterRegistry<D> {
    /// Empty registry holding at most `config.max_adapters` entries.
    pub fn new(config: NetmapConfig) -> Self {
        Self {
            config,
            adapters: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.max_adapters
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    pub fn ids(&self) -> Vec<IfaceId> {
        self.adapters.read().keys().copied().collect()
    }

    /// Create the netmap state for an interface.
    pub fn attach(
        &self,
        driver: D,
        pool: Arc<BufferPool>,
        params: AttachParams,
    ) -> Result<Arc<NetmapAdapter<D>>> {
        let mut adapters = self.adapters.write();
        if adapters.contains_key(&params.id) {
            return Err(BridgeError::AlreadyAttached(params.id));
        }
        if adapters.len() >= self.config.max_adapters {
            return Err(BridgeError::RegistryFull {
                capacity: self.config.max_adapters,
            });
        }

        let adapter = Arc::new(NetmapAdapter::new(driver, pool, &params, self.config)?);
        adapters.insert(params.id, adapter.clone());
        debug!(
            "{} ({}): attached, {}x{} tx {}x{} rx",
            params.name,
            params.id,
            params.num_tx_rings,
            params.num_tx_desc,
            params.num_rx_rings,
            params.num_rx_desc
        );
        Ok(adapter)
    }

    /// Remove an interface. It must be closed; a bound peer is unbound.
    pub fn detach(&self, id: IfaceId) -> Result<Arc<NetmapAdapter<D>>> {
        let mut adapters = self.adapters.write();
        let adapter = adapters.get(&id).ok_or(BridgeError::UnknownInterface(id))?;
        if adapter.is_native() || !adapter.open_flags().is_empty() {
            return Err(BridgeError::AdapterBusy(id));
        }
        if let Some(peer) = adapter.peer() {
            if peer.is_native() {
                return Err(BridgeError::AdapterBusy(peer.id()));
            }
            peer.set_peer(None);
        }
        adapter.set_peer(None);

        let adapter = adapters.remove(&id).ok_or(BridgeError::UnknownInterface(id))?;
        debug!("{} ({}): detached", adapter.name(), id);
        Ok(adapter)
    }

    pub fn get(&self, id: IfaceId) -> Option<Arc<NetmapAdapter<D>>> {
        self.adapters.read().get(&id).cloned()
    }

    /// Link `a` and `b` so that each one's RX ring `i` forwards into the
    /// other's TX ring `i`.
    pub fn bind(&self, a: IfaceId, b: IfaceId) -> Result<()> {
        if a == b {
            return Err(BridgeError::SelfBind(a));
        }
        let adapters = self.adapters.read();
        let left = adapters.get(&a).ok_or(BridgeError::UnknownInterface(a))?;
        let right = adapters.get(&b).ok_or(BridgeError::UnknownInterface(b))?;

        for side in [left, right] {
            if side.is_bound() {
                return Err(BridgeError::AlreadyBound(side.id()));
            }
            if side.is_native() {
                return Err(BridgeError::AdapterBusy(side.id()));
            }
        }
        if left.num_rx_rings() != right.num_tx_rings() {
            return Err(BridgeError::RingCountMismatch {
                left: left.num_rx_rings(),
                right: right.num_tx_rings(),
            });
        }
        if right.num_rx_rings() != left.num_tx_rings() {
            return Err(BridgeError::RingCountMismatch {
                left: left.num_tx_rings(),
                right: right.num_rx_rings(),
            });
        }
        // buffers change hands, both sides must index the same memory
        if !Arc::ptr_eq(left.pool(), right.pool()) {
            return Err(BridgeError::InvalidConfig("bound adapters must share a buffer pool"));
        }

        left.set_peer(Some(Arc::downgrade(right)));
        right.set_peer(Some(Arc::downgrade(left)));
        debug!("{} <-> {}: bound", a, b);
        Ok(())
    }

    /// Break the link of `a` and its peer.
    pub fn unbind(&self, a: IfaceId) -> Result<()> {
        let adapters = self.adapters.read();
        let left = adapters.get(&a).ok_or(BridgeError::UnknownInterface(a))?;
        let Some(right) = left.peer() else {
            return Err(BridgeError::NotBound(a));
        };
        for side in [left, &right] {
            if side.is_native() {
                return Err(BridgeError::AdapterBusy(side.id()));
            }
        }
        left.set_peer(None);
        right.set_peer(None);
        debug!("{} <-> {}: unbound", a, right.id());
        Ok(())
    }
}
