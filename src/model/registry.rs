use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::error::BridgeError;

static GLOBAL: OnceLock<Arc<ModelRegistry>> = OnceLock::new();

/// Proof of holding the model slot. Released explicitly, never on drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lease(u64);

#[derive(Debug)]
struct Holder {
    lease: Lease,
    label: String,
}

/// The single slot for a loaded model. At most one lease is outstanding.
///
/// Init: the process-wide instance is created on first use of [`global`].
/// Teardown: whoever holds the lease calls [`release`] once its session is
/// unloaded; nothing is released implicitly.
///
/// [`global`]: ModelRegistry::global
/// [`release`]: ModelRegistry::release
#[derive(Debug, Default)]
pub struct ModelRegistry {
    slot: Mutex<Option<Holder>>,
    next_lease: AtomicU64,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<ModelRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ModelRegistry::new())))
    }

    /// Claims the slot. Check and claim happen under one lock, so two
    /// concurrent callers can never both succeed.
    pub fn acquire(&self, label: &str) -> Result<Lease, BridgeError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = slot.as_ref() {
            tracing::warn!(holder = holder.label, requester = label, "model slot already taken");
            return Err(BridgeError::MultipleModels);
        }
        let lease = Lease(self.next_lease.fetch_add(1, Ordering::Relaxed));
        *slot = Some(Holder {
            lease,
            label: label.to_string(),
        });
        tracing::debug!(holder = label, "model slot acquired");
        Ok(lease)
    }

    /// Frees the slot if `lease` still holds it. Stale leases are ignored.
    pub fn release(&self, lease: Lease) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(holder) if holder.lease == lease => {
                tracing::debug!(holder = holder.label, "model slot released");
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
