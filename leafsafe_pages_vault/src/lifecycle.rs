//! Lifecycle manager - background wipe and foreground entropy refresh.
//!
//! Transition rules:
//! - `active -> background`: wipe all tracked live buffers, run registered
//!   background callbacks (the UI clears its image state), then wipe the
//!   ephemeral memory salt and the runtime entropy counters.
//! - `-> active`: regenerate the memory salt and reset the counters. The
//!   background wipe happens-before this regeneration.
//!
//! A panicking callback is isolated; it never prevents the remaining
//! wipers from running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use leafsafe_keyvault::{EphemeralKeyService, RuntimeEntropy};
use parking_lot::RwLock;

use crate::error::VaultResult;
use crate::registry::LiveBufferRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Background,
}

/// Mutable runtime entropy feeding ephemeral key derivation.
pub struct RuntimeEntropyState {
    boot_time_ms: AtomicI64,
    frame_counter: AtomicU32,
    scroll_velocity_upx_ms: AtomicI64,
}

impl RuntimeEntropyState {
    pub fn new() -> Self {
        Self {
            boot_time_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            frame_counter: AtomicU32::new(0),
            scroll_velocity_upx_ms: AtomicI64::new(0),
        }
    }

    /// Snapshot for one render; bumps the frame counter.
    pub fn snapshot(&self, chunk_index: i64) -> RuntimeEntropy {
        RuntimeEntropy {
            boot_time_ms: self.boot_time_ms.load(Ordering::Relaxed),
            frame_counter: self.frame_counter.fetch_add(1, Ordering::Relaxed),
            scroll_velocity_upx_ms: self.scroll_velocity_upx_ms.load(Ordering::Relaxed),
            chunk_index,
        }
    }

    /// Velocity in micro-pixels per millisecond, from the UI scroll view.
    pub fn set_scroll_velocity(&self, px_per_ms: f64) {
        let upx = (px_per_ms * 1000.0).round() as i64;
        self.scroll_velocity_upx_ms.store(upx, Ordering::Relaxed);
    }

    /// Fresh counters for a foreground transition.
    pub fn reset(&self) {
        self.boot_time_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.frame_counter.store(0, Ordering::Relaxed);
        self.scroll_velocity_upx_ms.store(0, Ordering::Relaxed);
    }

    /// Zero everything (background / violation).
    pub fn wipe(&self) {
        self.boot_time_ms.store(0, Ordering::Relaxed);
        self.frame_counter.store(0, Ordering::Relaxed);
        self.scroll_velocity_upx_ms.store(0, Ordering::Relaxed);
    }
}

impl Default for RuntimeEntropyState {
    fn default() -> Self {
        Self::new()
    }
}

pub type LifecycleCallback = Box<dyn Fn() + Send + Sync>;

pub struct LifecycleManager {
    state: RwLock<LifecycleState>,
    background_callbacks: RwLock<Vec<LifecycleCallback>>,
    registry: Arc<LiveBufferRegistry>,
    ephemeral: Arc<EphemeralKeyService>,
    entropy: Arc<RuntimeEntropyState>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<LiveBufferRegistry>,
        ephemeral: Arc<EphemeralKeyService>,
        entropy: Arc<RuntimeEntropyState>,
    ) -> Self {
        Self {
            state: RwLock::new(LifecycleState::Active),
            background_callbacks: RwLock::new(Vec::new()),
            registry,
            ephemeral,
            entropy,
        }
    }

    pub fn is_active(&self) -> bool {
        *self.state.read() == LifecycleState::Active
    }

    /// Register a callback invoked on every background transition.
    pub fn register_background_callback(&self, callback: LifecycleCallback) {
        self.background_callbacks.write().push(callback);
    }

    /// Background transition: wipe buffers, notify the UI, drop entropy.
    pub fn on_background(&self) {
        *self.state.write() = LifecycleState::Background;

        self.registry.wipe_all();

        for callback in self.background_callbacks.read().iter() {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::warn!("background callback panicked; continuing wipe");
            }
        }

        self.ephemeral.wipe_memory_salt();
        self.entropy.wipe();
        tracing::debug!("background wipe complete");
    }

    /// Foreground transition: regenerate entropy, then accept reads again.
    pub fn on_active(&self) -> VaultResult<()> {
        self.ephemeral.regenerate_memory_salt()?;
        self.entropy.reset();
        *self.state.write() = LifecycleState::Active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn manager() -> (LifecycleManager, Arc<LiveBufferRegistry>) {
        let registry = Arc::new(LiveBufferRegistry::new());
        let manager = LifecycleManager::new(
            Arc::clone(&registry),
            Arc::new(EphemeralKeyService::new().unwrap()),
            Arc::new(RuntimeEntropyState::new()),
        );
        (manager, registry)
    }

    #[test]
    fn test_background_wipes_buffers() {
        let (manager, registry) = manager();
        let buf = registry.insert(0, vec![0xEE; 128]);

        manager.on_background();
        assert!(!manager.is_active());
        assert!(registry.is_empty());
        assert!(buf.lock().iter().all(|&b| b == 0));

        manager.on_active().unwrap();
        assert!(manager.is_active());
    }

    #[test]
    fn test_callbacks_run_on_background() {
        let (manager, _registry) = manager();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        manager.register_background_callback(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));

        manager.on_background();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_wipe() {
        let (manager, registry) = manager();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        manager.register_background_callback(Box::new(|| panic!("ui went away")));
        manager.register_background_callback(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }));

        registry.insert(0, vec![0xEE; 64]);
        manager.on_background();
        assert!(fired.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_entropy_counters_reset_on_active() {
        let entropy = Arc::new(RuntimeEntropyState::new());
        let first = entropy.snapshot(0);
        let second = entropy.snapshot(0);
        assert_eq!(second.frame_counter, first.frame_counter + 1);

        entropy.wipe();
        entropy.reset();
        let fresh = entropy.snapshot(0);
        assert_eq!(fresh.frame_counter, 0);
        assert!(fresh.boot_time_ms > 0);
    }

    #[test]
    fn test_velocity_micro_pixels() {
        let entropy = RuntimeEntropyState::new();
        entropy.set_scroll_velocity(1.5);
        assert_eq!(entropy.snapshot(0).scroll_velocity_upx_ms, 1500);
    }
}
