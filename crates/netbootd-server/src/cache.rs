//! Host address cache
//!
//! Remembers the last address each host reported when it booted. Lives for
//! the lifetime of the process only; the provisioning directory stays the
//! authority on which hosts exist.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Identifier → last-seen address, keyed case-insensitively
#[derive(Debug, Default)]
pub struct HostAddressCache {
    entries: RwLock<HashMap<String, String>>,
}

impl HostAddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `address` for `id`, replacing any previous value
    pub fn set(&self, id: &str, address: &str) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(id.to_lowercase(), address.to_string());
        debug!(mac = %id, address = %address, "Host address cached");
    }

    /// Last address recorded for `id`, or an empty string
    pub fn get(&self, id: &str) -> String {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&id.to_lowercase()).cloned().unwrap_or_default()
    }

    /// Forget the address of `id` while keeping it known
    pub fn clear(&self, id: &str) {
        self.set(id, "");
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
