//! Multi-pass memory wiping.
//!
//! Every sensitive buffer in LeafSafe is released through this module. A
//! wipe runs alternating 0x00 / 0xFF / random passes at least three times
//! and always finishes with an authoritative zero pass. Writes go through
//! `ptr::write_volatile` with a compiler fence so the passes survive
//! optimization.

use std::ptr;
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::RngCore;
use zeroize::Zeroize;

/// Number of (zero, one-fill, random) rounds before the final zero pass.
pub const WIPE_ROUNDS: usize = 3;

fn fill_volatile(buf: &mut [u8], value: u8) {
    let ptr = buf.as_mut_ptr();
    for i in 0..buf.len() {
        // SAFETY: i < buf.len(), so the write stays inside the buffer.
        unsafe { ptr::write_volatile(ptr.add(i), value) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Overwrite `buf` with the full pass schedule, ending zeroed.
pub fn wipe(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    let mut rng = rand::thread_rng();
    for _ in 0..WIPE_ROUNDS {
        fill_volatile(buf, 0x00);
        fill_volatile(buf, 0xFF);
        rng.fill_bytes(buf);
        compiler_fence(Ordering::SeqCst);
    }
    // Final authoritative zero pass.
    buf.zeroize();
}

/// Wipe every buffer in the collection, then clear the container.
pub fn wipe_collection(buffers: &mut Vec<Vec<u8>>) {
    for buf in buffers.iter_mut() {
        wipe(buf);
    }
    buffers.clear();
}

/// Implemented by structs that own a set of byte-array fields which must be
/// wiped together.
pub trait WipeFields {
    fn wipe_fields(&mut self);
}

/// A scheduled wipe of a shared buffer that fires after `delay` unless
/// cancelled. Used as the last-resort bound on plaintext lifetime.
pub struct DeferredWipe {
    cancelled: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DeferredWipe {
    /// Schedule a wipe of `target` after `delay`.
    pub fn schedule(target: Arc<Mutex<Vec<u8>>>, delay: Duration) -> Self {
        let cancelled = Arc::new((Mutex::new(false), Condvar::new()));
        let pair = Arc::clone(&cancelled);
        let handle = thread::spawn(move || {
            let (flag, condvar) = &*pair;
            let mut done = flag.lock();
            if !*done {
                condvar.wait_for(&mut done, delay);
            }
            if !*done {
                wipe(&mut target.lock());
                tracing::debug!("deferred wipe fired");
            }
        });
        Self {
            cancelled,
            handle: Some(handle),
        }
    }

    /// Cancel the pending wipe. The target is left untouched.
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.cancelled;
        *flag.lock() = true;
        condvar.notify_all();
    }
}

impl Drop for DeferredWipe {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
