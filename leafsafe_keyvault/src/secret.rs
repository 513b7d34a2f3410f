//! Owned secret byte buffers with wipe-on-drop.

use std::fmt;

use crate::crypto::wipe;

/// An owned, fixed-length secret byte buffer.
///
/// Two invariants hold for every `SecretBuffer`:
/// - no alias leaves the owner: the type is not `Clone`, and the contents are
///   only reachable through `expose()` / `expose_mut()` borrows;
/// - the release path unconditionally runs the multi-pass wipe before the
///   allocation is returned.
pub struct SecretBuffer {
    data: Vec<u8>,
}

impl SecretBuffer {
    /// Allocate a zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }

    /// Take ownership of `data`. The caller's vector becomes the buffer;
    /// no copy is made.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Copy `slice` into a fresh buffer.
    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            data: slice.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the secret bytes.
    pub fn expose(&self) -> &[u8] {
        &self.data
    }

    /// Mutably borrow the secret bytes.
    pub fn expose_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Wipe the contents now, leaving a zeroed buffer of the same length.
    pub fn wipe(&mut self) {
        wipe::wipe(&mut self.data);
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        wipe::wipe(&mut self.data);
    }
}

impl AsRef<[u8]> for SecretBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer({} bytes, redacted)", self.data.len())
    }
}
