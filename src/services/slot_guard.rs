//! In-process guard keyed by `(sender, nonce)`
//!
//! At most one unfinished submission may hold a slot. The claim is released
//! when the job that owns it is dropped, whatever the outcome.

use alloy::primitives::{Address, U256};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub type Slot = (Address, U256);

#[derive(Clone, Default)]
pub struct SlotGuard {
    claimed: Arc<Mutex<HashSet<Slot>>>,
}

impl SlotGuard {
    /// Returns `None` when the slot is already held by another job
    pub fn try_claim(&self, sender: Address, nonce: U256) -> Option<SlotClaim> {
        let slot = (sender, nonce);
        if !self.claimed.lock().insert(slot) {
            return None;
        }
        Some(SlotClaim {
            slot,
            claimed: Arc::clone(&self.claimed),
        })
    }

    pub fn is_claimed(&self, sender: Address, nonce: U256) -> bool {
        self.claimed.lock().contains(&(sender, nonce))
    }

    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held by a submission job; frees the slot on drop
#[derive(Debug)]
pub struct SlotClaim {
    slot: Slot,
    claimed: Arc<Mutex<HashSet<Slot>>>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.claimed.lock().remove(&self.slot);
    }
}
