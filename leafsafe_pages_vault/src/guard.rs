//! Integrity guard and live-instrumentation detector.
//!
//! Boot checks (root, emulator, debugger, signature) run once at startup,
//! in parallel. The live-instrumentation detector runs opportunistically on
//! vault operations, throttled to once per eight seconds: it scans the
//! process for injection frameworks, checks for an attached tracer and
//! measures timing variance over a fixed micro-loop.

use std::fs;
use std::hint::black_box;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Expected signing-certificate SHA-256, embedded at build time. Empty in
/// non-production builds, which turns the signature probe into a no-op.
pub const EXPECTED_SIGNING_CERT_SHA256: &str = "";

/// Known superuser binary locations.
const SU_PATHS: &[&str] = &[
    "/system/xbin/su",
    "/system/bin/su",
    "/sbin/su",
    "/system/app/Superuser.apk",
    "/data/local/xbin/su",
    "/data/local/bin/su",
    "/system/sd/xbin/su",
];

/// System-owned directories that must not be writable.
const PROTECTED_DIRS: &[&str] = &["/system", "/system/bin", "/system/xbin"];

/// Known emulator artefact paths.
const EMULATOR_PATHS: &[&str] = &[
    "/dev/qemu_pipe",
    "/dev/socket/qemud",
    "/system/lib/libc_malloc_debug_qemu.so",
    "/sys/qemu_trace",
    "/system/bin/qemu-props",
];

/// Library name fragments that indicate a runtime-injection framework.
const INJECTION_MARKERS: &[&str] = &["frida", "gadget", "xposed", "substrate", "magisk"];

/// Debugger micro-benchmark: a loop this size must finish well under the
/// threshold unless something is single-stepping the process.
const BENCH_ITERATIONS: u64 = 200_000;
const BENCH_THRESHOLD: Duration = Duration::from_millis(250);

/// Timing-variance thresholds for the live detector.
const VARIANCE_CEILING_MS2: f64 = 5.0;
const MEAN_CEILING_MS: f64 = 2.0;

/// Throttle interval for the live detector.
pub const LIVE_CHECK_INTERVAL: Duration = Duration::from_secs(8);

/// Outcome of the boot check.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootCheckReport {
    pub rooted: bool,
    pub emulator: bool,
    pub debugger: bool,
    pub signature_mismatch: bool,
}

impl BootCheckReport {
    pub fn is_unsafe(&self) -> bool {
        self.rooted || self.emulator || self.debugger || self.signature_mismatch
    }

    /// First firing probe, for the violation reason string.
    pub fn reason(&self) -> Option<&'static str> {
        if self.rooted {
            Some("rooted")
        } else if self.emulator {
            Some("emulator")
        } else if self.debugger {
            Some("debugger")
        } else if self.signature_mismatch {
            Some("signature")
        } else {
            None
        }
    }
}

pub struct IntegrityGuard;

impl IntegrityGuard {
    /// Run the four environment probes in parallel.
    pub async fn boot_check() -> BootCheckReport {
        let (rooted, emulator, debugger, signature_mismatch) = tokio::join!(
            tokio::task::spawn_blocking(Self::check_root),
            tokio::task::spawn_blocking(Self::check_emulator),
            tokio::task::spawn_blocking(Self::check_debugger),
            tokio::task::spawn_blocking(Self::check_signature),
        );
        BootCheckReport {
            rooted: rooted.unwrap_or(false),
            emulator: emulator.unwrap_or(false),
            debugger: debugger.unwrap_or(false),
            signature_mismatch: signature_mismatch.unwrap_or(false),
        }
    }

    fn check_root() -> bool {
        if SU_PATHS.iter().any(|p| Path::new(p).exists()) {
            return true;
        }
        // A writable system directory means the partition was remounted.
        PROTECTED_DIRS.iter().any(|dir| {
            let probe = Path::new(dir).join(".ls_probe");
            match fs::File::create(&probe) {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    true
                }
                Err(_) => false,
            }
        })
    }

    fn check_emulator() -> bool {
        EMULATOR_PATHS.iter().any(|p| Path::new(p).exists())
    }

    fn check_debugger() -> bool {
        if tracer_attached() {
            return true;
        }
        let start = Instant::now();
        let mut acc = 0u64;
        for i in 0..BENCH_ITERATIONS {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
        black_box(acc);
        start.elapsed() > BENCH_THRESHOLD
    }

    fn check_signature() -> bool {
        if EXPECTED_SIGNING_CERT_SHA256.is_empty() {
            return false;
        }
        match platform_signing_cert_sha256() {
            Some(actual) => actual != EXPECTED_SIGNING_CERT_SHA256,
            None => false,
        }
    }
}

/// Platform-reported signing certificate hash. The packaging layer fills
/// this in; without it the signature probe cannot fire.
fn platform_signing_cert_sha256() -> Option<String> {
    None
}

fn tracer_attached() -> bool {
    match fs::read_to_string("/proc/self/status") {
        Ok(status) => status.lines().any(|line| {
            line.strip_prefix("TracerPid:")
                .map(|pid| pid.trim() != "0")
                .unwrap_or(false)
        }),
        Err(_) => false,
    }
}

pub struct LiveInstrumentationDetector {
    last_check: Mutex<Option<Instant>>,
}

impl LiveInstrumentationDetector {
    pub fn new() -> Self {
        Self {
            last_check: Mutex::new(None),
        }
    }

    /// Throttled check. `None` means clean or throttled; `Some(reason)`
    /// means instrumentation was detected.
    pub fn check(&self) -> Option<String> {
        {
            let mut last = self.last_check.lock();
            if let Some(at) = *last {
                if at.elapsed() < LIVE_CHECK_INTERVAL {
                    return None;
                }
            }
            *last = Some(Instant::now());
        }
        self.check_now()
    }

    /// Unthrottled probe pass.
    pub fn check_now(&self) -> Option<String> {
        if let Some(marker) = injected_library() {
            return Some(format!("injected:{marker}"));
        }
        if tracer_attached() {
            return Some("tracer".into());
        }
        if timing_variance_excessive() {
            return Some("timing-variance".into());
        }
        None
    }
}

impl Default for LiveInstrumentationDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan loaded libraries and the preload environment for well-known
/// injection framework names.
fn injected_library() -> Option<&'static str> {
    if let Ok(preload) = std::env::var("LD_PRELOAD") {
        let preload = preload.to_lowercase();
        for marker in INJECTION_MARKERS {
            if preload.contains(marker) {
                return Some(marker);
            }
        }
    }
    if let Ok(maps) = fs::read_to_string("/proc/self/maps") {
        let maps = maps.to_lowercase();
        for marker in INJECTION_MARKERS {
            if maps.contains(marker) {
                return Some(marker);
            }
        }
    }
    None
}

/// Run the fixed micro-loop several times; excessive variance with a high
/// mean indicates per-instruction interception.
fn timing_variance_excessive() -> bool {
    const SAMPLES: usize = 8;
    let mut times_ms = [0f64; SAMPLES];
    for slot in times_ms.iter_mut() {
        let start = Instant::now();
        let mut acc = 1u64;
        for i in 0..20_000u64 {
            acc = black_box(acc.wrapping_add(i ^ acc.rotate_left(7)));
        }
        black_box(acc);
        *slot = start.elapsed().as_secs_f64() * 1000.0;
    }
    let mean = times_ms.iter().sum::<f64>() / SAMPLES as f64;
    let variance =
        times_ms.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / SAMPLES as f64;
    variance > VARIANCE_CEILING_MS2 && mean > MEAN_CEILING_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_boot_check_clean_environment() {
        let report = IntegrityGuard::boot_check().await;
        assert!(!report.is_unsafe(), "unexpected violation: {report:?}");
        assert!(report.reason().is_none());
    }

    #[test]
    fn test_report_reason_priority() {
        let report = BootCheckReport {
            rooted: true,
            emulator: true,
            ..Default::default()
        };
        assert_eq!(report.reason(), Some("rooted"));
        assert!(report.is_unsafe());
    }

    #[test]
    fn test_live_detector_clean() {
        let detector = LiveInstrumentationDetector::new();
        assert_eq!(detector.check_now(), None);
    }

    #[test]
    fn test_live_detector_throttles() {
        let detector = LiveInstrumentationDetector::new();
        let _ = detector.check();
        // Second call inside the window does no work and reports clean.
        assert_eq!(detector.check(), None);
    }

    #[test]
    fn test_signature_probe_disabled_without_embedded_hash() {
        assert!(!IntegrityGuard::check_signature());
    }
}
