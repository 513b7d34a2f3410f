//! Security orchestrator - boot gate and one-shot violation handling.
//!
//! Any positive from the boot check or the periodic live-instrumentation
//! detector routes into `handle_violation`, which is reentrancy-guarded by
//! a compare-and-set: the first caller runs the destructive steps (destroy
//! the device salt, wipe the memory salt, wipe runtime entropy, wipe live
//! buffers) and every later caller gets the same terminal error without the
//! steps re-running. All steps execute even when earlier ones fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use leafsafe_keyvault::{EphemeralKeyService, RootKeyService};
use parking_lot::Mutex;

use crate::error::{VaultError, VaultResult};
use crate::guard::{IntegrityGuard, LiveInstrumentationDetector};
use crate::lifecycle::RuntimeEntropyState;
use crate::registry::LiveBufferRegistry;

/// Receives the terminal identifier after the destructive steps have run.
/// The production sink aborts the process; tests record and return.
pub trait ViolationSink: Send + Sync {
    fn terminate(&self, identifier: &str);
}

/// Default sink: print the identifier and abort with a distinguishable
/// status.
pub struct AbortSink;

impl ViolationSink for AbortSink {
    fn terminate(&self, identifier: &str) {
        eprintln!("{identifier}");
        std::process::abort();
    }
}

pub struct SecurityOrchestrator {
    violated: AtomicBool,
    terminal: Mutex<Option<String>>,
    detector: LiveInstrumentationDetector,
    root_service: Arc<RootKeyService>,
    ephemeral: Arc<EphemeralKeyService>,
    entropy: Arc<RuntimeEntropyState>,
    registry: Arc<LiveBufferRegistry>,
    sink: Box<dyn ViolationSink>,
}

impl SecurityOrchestrator {
    pub fn new(
        root_service: Arc<RootKeyService>,
        ephemeral: Arc<EphemeralKeyService>,
        entropy: Arc<RuntimeEntropyState>,
        registry: Arc<LiveBufferRegistry>,
        sink: Box<dyn ViolationSink>,
    ) -> Self {
        Self {
            violated: AtomicBool::new(false),
            terminal: Mutex::new(None),
            detector: LiveInstrumentationDetector::new(),
            root_service,
            ephemeral,
            entropy,
            registry,
            sink,
        }
    }

    /// Boot gate: environment probes and the live detector in parallel;
    /// any positive goes straight to the violation handler.
    pub async fn boot_gate(&self) -> VaultResult<()> {
        let report = IntegrityGuard::boot_check().await;
        if let Some(reason) = report.reason() {
            return Err(self.handle_violation(reason));
        }
        if let Some(reason) = self.detector.check_now() {
            return Err(self.handle_violation(&reason));
        }
        Ok(())
    }

    /// Throttled periodic check, called on vault operations.
    pub fn periodic_check(&self) -> VaultResult<()> {
        if self.violated.load(Ordering::SeqCst) {
            return Err(self.terminal_error());
        }
        if let Some(reason) = self.detector.check() {
            return Err(self.handle_violation(&reason));
        }
        Ok(())
    }

    /// One-shot violation handler. Always returns the terminal error.
    pub fn handle_violation(&self, reason: &str) -> VaultError {
        if self
            .violated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.terminal_error();
        }

        let identifier = format!(
            "SECURITY_VIOLATION:{reason}:{}",
            Utc::now().timestamp_millis()
        );
        tracing::error!(%identifier, "security violation - destroying key material");
        *self.terminal.lock() = Some(identifier.clone());

        // Destructive steps, best effort: each runs regardless of the
        // previous one's outcome.
        if let Err(e) = self.root_service.destroy_device_salt() {
            tracing::warn!(error = %e, "device salt destruction incomplete");
        }
        self.registry.wipe_all();
        self.ephemeral.wipe_memory_salt();
        self.entropy.wipe();

        self.sink.terminate(&identifier);
        VaultError::EnvironmentUnsafe(identifier)
    }

    fn terminal_error(&self) -> VaultError {
        let identifier = self
            .terminal
            .lock()
            .clone()
            .unwrap_or_else(|| "SECURITY_VIOLATION:unknown:0".into());
        VaultError::EnvironmentUnsafe(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leafsafe_keyvault::credstore::{entries, CredentialStore, MemoryStore};
    use leafsafe_keyvault::{FingerprintProvider, FingerprintSource};
    use parking_lot::Mutex as PlMutex;

    struct NullFingerprint;
    impl FingerprintSource for NullFingerprint {
        fn installation_id(&self) -> Option<String> {
            Some("i".into())
        }
        fn manufacturer(&self) -> Option<String> {
            None
        }
        fn model(&self) -> Option<String> {
            None
        }
        fn device_name(&self) -> Option<String> {
            None
        }
        fn os_version(&self) -> Option<String> {
            None
        }
        fn total_memory_bytes(&self) -> Option<u64> {
            None
        }
        fn cpu_archs(&self) -> Vec<String> {
            Vec::new()
        }
        fn install_time_ms(&self) -> Option<i64> {
            None
        }
    }

    struct RecordingSink(PlMutex<Vec<String>>);
    impl ViolationSink for RecordingSink {
        fn terminate(&self, identifier: &str) {
            self.0.lock().push(identifier.to_string());
        }
    }

    fn orchestrator(store: Arc<MemoryStore>) -> (SecurityOrchestrator, Arc<LiveBufferRegistry>) {
        let registry = Arc::new(LiveBufferRegistry::new());
        let orchestrator = SecurityOrchestrator::new(
            Arc::new(RootKeyService::new(
                store,
                FingerprintProvider::new(Arc::new(NullFingerprint)),
            )),
            Arc::new(EphemeralKeyService::new().unwrap()),
            Arc::new(RuntimeEntropyState::new()),
            Arc::clone(&registry),
            Box::new(RecordingSink(PlMutex::new(Vec::new()))),
        );
        (orchestrator, registry)
    }

    #[tokio::test]
    async fn test_boot_gate_passes_clean() {
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()));
        orchestrator.boot_gate().await.unwrap();
        orchestrator.periodic_check().unwrap();
    }

    #[test]
    fn test_violation_destroys_salt_and_wipes() {
        let store = Arc::new(MemoryStore::new());
        store.set(entries::DEVICE_SALT, "c2FsdA==").unwrap();
        let (orchestrator, registry) = orchestrator(Arc::clone(&store));
        let buf = registry.insert(0, vec![0xAB; 32]);

        let err = orchestrator.handle_violation("debugger");
        match err {
            VaultError::EnvironmentUnsafe(id) => {
                assert!(id.starts_with("SECURITY_VIOLATION:debugger:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.get(entries::DEVICE_SALT).unwrap().is_none());
        assert!(registry.is_empty());
        assert!(buf.lock().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_violation_is_one_shot() {
        let store = Arc::new(MemoryStore::new());
        let (orchestrator, _) = orchestrator(Arc::clone(&store));

        let first = orchestrator.handle_violation("tracer");
        // The salt reappears only if someone re-runs the destructive path.
        store.set(entries::DEVICE_SALT, "c2FsdA==").unwrap();
        let second = orchestrator.handle_violation("tracer");

        let (VaultError::EnvironmentUnsafe(a), VaultError::EnvironmentUnsafe(b)) = (first, second)
        else {
            panic!("expected EnvironmentUnsafe");
        };
        assert_eq!(a, b);
        // Second invocation did not re-run destruction.
        assert!(store.get(entries::DEVICE_SALT).unwrap().is_some());
    }

    #[test]
    fn test_periodic_check_after_violation_is_terminal() {
        let (orchestrator, _) = orchestrator(Arc::new(MemoryStore::new()));
        orchestrator.handle_violation("rooted");
        assert!(matches!(
            orchestrator.periodic_check().unwrap_err(),
            VaultError::EnvironmentUnsafe(_)
        ));
    }
}
