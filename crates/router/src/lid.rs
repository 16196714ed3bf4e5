//! Bounded LID-to-phone mapping.
//!
//! The network hands out opaque linked ids that hide the phone number.
//! Mappings surface through contact updates and through message keys that
//! carry a sender-phone hint; we keep the most recent ones.

use std::{num::NonZeroUsize, sync::Mutex};

use {lru::LruCache, tracing::debug};

/// LRU map from LID user part to E.164 digits.
pub struct LidMap {
    entries: Mutex<LruCache<String, String>>,
}

impl LidMap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record a discovered mapping. Oldest entry falls out past capacity.
    pub fn insert(&self, lid_user: &str, phone_digits: &str) {
        if lid_user.is_empty() || phone_digits.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            debug!(lid = lid_user, phone = phone_digits, "learned LID mapping");
            entries.put(lid_user.to_string(), phone_digits.to_string());
        }
    }

    #[must_use]
    pub fn resolve(&self, lid_user: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|mut entries| entries.get(lid_user).cloned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
