//! Live buffer registry - the two-fragment cap on decrypted render output.
//!
//! Every decrypted-then-mutated page buffer is tracked here. Capacity is
//! exactly [`MAX_DECRYPTED_FRAGMENTS`]; inserting beyond it evicts the
//! oldest entry (insertion order) via wipe-and-release. Each live buffer
//! carries a deferred-wipe timer as a last-resort bound on plaintext
//! lifetime. Handles returned to callers view the registry-owned
//! allocation, so a wipe is visible through every outstanding handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use leafsafe_keyvault::crypto::{wipe, DeferredWipe};
use parking_lot::Mutex;

/// Maximum simultaneously live render buffers across the process.
pub const MAX_DECRYPTED_FRAGMENTS: usize = 2;

/// Last-resort wipe delay per live buffer.
pub const DEFERRED_WIPE_SECS: u64 = 5;

/// Shared view of one mutated page buffer.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

struct LiveEntry {
    page_index: usize,
    bytes: SharedBuffer,
    timer: DeferredWipe,
}

impl LiveEntry {
    fn wipe(&self) {
        self.timer.cancel();
        wipe::wipe(&mut self.bytes.lock());
    }
}

#[derive(Default)]
pub struct LiveBufferRegistry {
    entries: Mutex<VecDeque<LiveEntry>>,
}

impl LiveBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly mutated buffer. Evicts (wipes) the oldest entry when
    /// the cap is reached, and replaces any existing entry for the same
    /// page. Returns the shared view handed to the UI.
    pub fn insert(&self, page_index: usize, bytes: Vec<u8>) -> SharedBuffer {
        let shared: SharedBuffer = Arc::new(Mutex::new(bytes));
        let entry = LiveEntry {
            page_index,
            bytes: Arc::clone(&shared),
            timer: DeferredWipe::schedule(
                Arc::clone(&shared),
                Duration::from_secs(DEFERRED_WIPE_SECS),
            ),
        };

        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.page_index == page_index) {
            if let Some(old) = entries.remove(pos) {
                old.wipe();
            }
        }
        while entries.len() >= MAX_DECRYPTED_FRAGMENTS {
            if let Some(oldest) = entries.pop_front() {
                tracing::debug!(page = oldest.page_index, "evicting live buffer");
                oldest.wipe();
            }
        }
        entries.push_back(entry);
        shared
    }

    pub fn get(&self, page_index: usize) -> Option<SharedBuffer> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.page_index == page_index)
            .map(|e| Arc::clone(&e.bytes))
    }

    pub fn contains(&self, page_index: usize) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.page_index == page_index)
    }

    /// Wipe and drop one page's buffer. No-op when untracked.
    pub fn release(&self, page_index: usize) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.page_index == page_index) {
            if let Some(entry) = entries.remove(pos) {
                entry.wipe();
            }
        }
    }

    /// Release pages at or below `threshold` (scroll-behind cleanup).
    pub fn release_at_or_below(&self, threshold: usize) {
        let mut entries = self.entries.lock();
        while let Some(pos) = entries
            .iter()
            .position(|e| e.page_index <= threshold)
        {
            if let Some(entry) = entries.remove(pos) {
                entry.wipe();
            }
        }
    }

    /// Wipe every tracked buffer (background transition / violation).
    pub fn wipe_all(&self) {
        let mut entries = self.entries.lock();
        for entry in entries.iter() {
            entry.wipe();
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_is_enforced() {
        let registry = LiveBufferRegistry::new();
        for page in 0..5 {
            registry.insert(page, vec![page as u8; 128]);
            assert!(registry.len() <= MAX_DECRYPTED_FRAGMENTS);
        }
        assert_eq!(registry.len(), MAX_DECRYPTED_FRAGMENTS);
        assert!(!registry.contains(0));
        assert!(registry.contains(3));
        assert!(registry.contains(4));
    }

    #[test]
    fn test_eviction_wipes_through_handles() {
        let registry = LiveBufferRegistry::new();
        let first = registry.insert(0, vec![0xAA; 256]);
        registry.insert(1, vec![0xBB; 256]);
        registry.insert(2, vec![0xCC; 256]);

        // Page 0 was evicted; its allocation is zeroed, visible through the
        // handle the UI still holds.
        assert!(first.lock().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_release_wipes() {
        let registry = LiveBufferRegistry::new();
        let buf = registry.insert(0, vec![0xAA; 64]);
        registry.release(0);
        assert!(registry.is_empty());
        assert!(buf.lock().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reinsert_same_page_replaces() {
        let registry = LiveBufferRegistry::new();
        let old = registry.insert(0, vec![0xAA; 64]);
        let new = registry.insert(0, vec![0xBB; 64]);
        assert_eq!(registry.len(), 1);
        assert!(old.lock().iter().all(|&b| b == 0));
        assert!(new.lock().iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_release_at_or_below() {
        let registry = LiveBufferRegistry::new();
        registry.insert(3, vec![1; 16]);
        registry.insert(4, vec![2; 16]);
        registry.release_at_or_below(3);
        assert!(!registry.contains(3));
        assert!(registry.contains(4));
    }

    #[test]
    fn test_wipe_all() {
        let registry = LiveBufferRegistry::new();
        let a = registry.insert(0, vec![0x11; 32]);
        let b = registry.insert(1, vec![0x22; 32]);
        registry.wipe_all();
        assert!(registry.is_empty());
        assert!(a.lock().iter().all(|&x| x == 0));
        assert!(b.lock().iter().all(|&x| x == 0));
    }

    #[test]
    fn test_deferred_wipe_bounds_lifetime() {
        // Shrunk-interval equivalent lives in the wiper tests; here we only
        // assert the timer is wired: the buffer survives an immediate read.
        let registry = LiveBufferRegistry::new();
        let buf = registry.insert(0, vec![0x7F; 16]);
        assert!(buf.lock().iter().all(|&b| b == 0x7F));
    }
}
