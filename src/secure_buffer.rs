//! Locked, zero-on-drop storage for recipient private key material.
//!
//! A `Recipient` holds its decrypters — and the raw EC scalars inside
//! them — for its entire lifetime (spec.md section 3: recipient-side key
//! material is never mutated). That's exactly the shape memory locking is
//! for: keep the plaintext key out of swap for as long as it's resident, and
//! guarantee it's wiped the moment it's dropped, even on panic.

use zeroize::Zeroize;

use crate::error::TokenError;

/// Environment variable that downgrades a failed `mlock` from a hard error to
/// a warning-free fallback. Set to "1" or "true" to allow operation on
/// systems where the recipient process isn't allowed to lock pages (e.g. some
/// containers, or a test runner).
const ENV_ALLOW_INSECURE_MEMORY: &str = "PMT_ALLOW_INSECURE_MEMORY";

/// Whether a failed page lock is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingMode {
    /// Fail if the OS refuses to lock the pages.
    Strict,
    /// Fall back to unlocked memory if locking isn't available.
    Permissive,
}

/// Read [`LockingMode`] from `PMT_ALLOW_INSECURE_MEMORY`, defaulting to
/// `Strict`.
pub fn locking_mode_from_env() -> LockingMode {
    match std::env::var(ENV_ALLOW_INSECURE_MEMORY) {
        Ok(val) if val == "1" || val.eq_ignore_ascii_case("true") => LockingMode::Permissive,
        _ => LockingMode::Strict,
    }
}

/// A byte buffer that attempts to lock its pages out of swap and is
/// guaranteed to be zeroized on drop.
pub struct SecureBuffer {
    data: Vec<u8>,
    locked: bool,
}

impl SecureBuffer {
    /// Allocate `len` zeroed bytes under `mode`.
    pub fn with_mode(len: usize, mode: LockingMode) -> Result<Self, TokenError> {
        let mut data = vec![0u8; len];
        let locked = lock(&mut data, mode)?;
        Ok(Self { data, locked })
    }

    /// Copy `bytes` into a freshly locked buffer.
    pub fn from_slice_with_mode(bytes: &[u8], mode: LockingMode) -> Result<Self, TokenError> {
        let mut buf = Self::with_mode(bytes.len(), mode)?;
        buf.data.copy_from_slice(bytes);
        Ok(buf)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero the buffer's contents immediately, without waiting for drop.
    pub fn zeroize(&mut self) {
        self.data.zeroize();
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.data.zeroize();
        if self.locked {
            unlock(&mut self.data);
        }
    }
}

#[cfg(unix)]
fn lock(data: &mut [u8], mode: LockingMode) -> Result<bool, TokenError> {
    if data.is_empty() {
        return Ok(false);
    }
    let locked = unsafe { memsec::mlock(data.as_mut_ptr(), data.len()) };
    if locked {
        Ok(true)
    } else if mode == LockingMode::Permissive {
        Ok(false)
    } else {
        Err(TokenError::Configuration(
            "failed to lock recipient key memory (mlock); set PMT_ALLOW_INSECURE_MEMORY=1 to override".into(),
        ))
    }
}

#[cfg(unix)]
fn unlock(data: &mut [u8]) {
    if !data.is_empty() {
        unsafe {
            memsec::munlock(data.as_mut_ptr(), data.len());
        }
    }
}

#[cfg(not(unix))]
fn lock(_data: &mut [u8], mode: LockingMode) -> Result<bool, TokenError> {
    match mode {
        LockingMode::Permissive => Ok(false),
        LockingMode::Strict => Err(TokenError::Configuration(
            "memory locking is not supported on this platform; set PMT_ALLOW_INSECURE_MEMORY=1 to override".into(),
        )),
    }
}

#[cfg(not(unix))]
fn unlock(_data: &mut [u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_and_exposes_bytes() {
        let buf = SecureBuffer::from_slice_with_mode(b"secret32bytesecret32bytesecre12", LockingMode::Permissive).unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(buf.as_slice(), b"secret32bytesecret32bytesecre12");
    }

    #[test]
    fn zeroize_clears_contents() {
        let mut buf = SecureBuffer::from_slice_with_mode(b"abcd", LockingMode::Permissive).unwrap();
        buf.zeroize();
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn empty_buffer_never_attempts_to_lock() {
        let buf = SecureBuffer::with_mode(0, LockingMode::Strict).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn env_var_selects_permissive_mode() {
        std::env::set_var(ENV_ALLOW_INSECURE_MEMORY, "1");
        assert_eq!(locking_mode_from_env(), LockingMode::Permissive);
        std::env::remove_var(ENV_ALLOW_INSECURE_MEMORY);
        assert_eq!(locking_mode_from_env(), LockingMode::Strict);
    }
}
