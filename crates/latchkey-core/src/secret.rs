//! Master secret and its in-memory store.
//!
//! The master secret is the decrypted key material that gives access to local
//! encrypted storage. It exists only while the application is unlocked.
//!
//! # Security
//!
//! - [`MasterSecret`] is not `Clone`. The only copy lives in [`SecretStore`].
//! - Readers borrow it through [`SecretStore::with_secret`], one at a time,
//!   for the duration of a closure. No reference outlives the store's lock.
//! - [`SecretStore::clear`] overwrites the bytes in place before releasing
//!   them. Dropping a [`MasterSecret`] by any other path also zeroizes it.
//! - A sealed store refuses readers even while bytes are still resident. The
//!   controller seals synchronously on lock and clears after the grace delay.

#![allow(clippy::disallowed_types, reason = "Short synchronous critical sections only")]

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::SecretStoreError;

/// Decrypted master key material.
pub struct MasterSecret {
    bytes: Vec<u8>,
}

impl MasterSecret {
    /// Take ownership of decrypted key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the key material in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key material is empty (e.g. after zeroization).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Zeroize for MasterSecret {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl ZeroizeOnDrop for MasterSecret {}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterSecret([REDACTED; {} bytes])", self.bytes.len())
    }
}

/// User-entered passphrase. Zeroized on drop.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(Zeroizing::new(passphrase.into()))
    }

    /// Passphrase text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

struct Slot {
    secret: Option<MasterSecret>,
    sealed: bool,
}

/// Holder of the resident master secret.
///
/// See the module documentation for the access discipline.
pub struct SecretStore {
    slot: Mutex<Slot>,
}

impl SecretStore {
    /// Create an empty, sealed store.
    pub fn new() -> Self {
        Self { slot: Mutex::new(Slot { secret: None, sealed: true }) }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a secret. The store stays sealed until [`Self::unseal`].
    ///
    /// # Errors
    ///
    /// - `SecretStoreError::AlreadySet` if a secret is resident. The rejected
    ///   secret is zeroized.
    pub fn set(&self, secret: MasterSecret) -> Result<(), SecretStoreError> {
        let mut slot = self.slot();
        if slot.secret.is_some() {
            return Err(SecretStoreError::AlreadySet);
        }
        slot.secret = Some(secret);
        slot.sealed = true;
        Ok(())
    }

    /// Allow readers. Called once the lifecycle reaches `Unlocked`.
    pub fn unseal(&self) {
        self.slot().sealed = false;
    }

    /// Refuse new readers without touching the bytes.
    pub fn seal(&self) {
        self.slot().sealed = true;
    }

    /// Run `f` against the secret if it is resident and unsealed.
    ///
    /// Returns `None` while locked. The closure runs under the store's lock,
    /// so it must be short and must not call back into the store.
    pub fn with_secret<R>(&self, f: impl FnOnce(&MasterSecret) -> R) -> Option<R> {
        let slot = self.slot();
        if slot.sealed {
            return None;
        }
        slot.secret.as_ref().map(f)
    }

    /// Overwrite and release the secret. Also seals the store.
    ///
    /// Returns `true` if a secret was resident. Idempotent.
    pub fn clear(&self) -> bool {
        let mut slot = self.slot();
        slot.sealed = true;
        match slot.secret.take() {
            Some(mut secret) => {
                secret.zeroize();
                true
            },
            None => false,
        }
    }

    /// Whether key bytes are still resident, sealed or not.
    pub fn is_present(&self) -> bool {
        self.slot().secret.is_some()
    }

    /// Whether [`Self::with_secret`] would currently issue the secret.
    pub fn is_available(&self) -> bool {
        let slot = self.slot();
        !slot.sealed && slot.secret.is_some()
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot();
        f.debug_struct("SecretStore")
            .field("present", &slot.secret.is_some())
            .field("sealed", &slot.sealed)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> MasterSecret {
        MasterSecret::new(vec![byte; 32])
    }

    #[test]
    fn sealed_store_issues_nothing() {
        let store = SecretStore::new();
        store.set(secret(7)).unwrap();

        assert!(store.is_present());
        assert!(!store.is_available());
        assert_eq!(store.with_secret(|s| s.len()), None);

        store.unseal();
        assert_eq!(store.with_secret(|s| s.expose()[0]), Some(7));
    }

    #[test]
    fn set_twice_is_rejected() {
        let store = SecretStore::new();
        store.set(secret(1)).unwrap();

        assert_eq!(store.set(secret(2)), Err(SecretStoreError::AlreadySet));

        // Original secret is untouched
        store.unseal();
        assert_eq!(store.with_secret(|s| s.expose()[0]), Some(1));
    }

    #[test]
    fn clear_is_idempotent_and_allows_reset() {
        let store = SecretStore::new();
        store.set(secret(1)).unwrap();
        store.unseal();

        assert!(store.clear());
        assert!(!store.clear());
        assert!(!store.is_present());
        assert_eq!(store.with_secret(|_| ()), None);

        store.set(secret(2)).unwrap();
        assert!(store.is_present());
    }

    #[test]
    fn seal_hides_resident_secret() {
        let store = SecretStore::new();
        store.set(secret(3)).unwrap();
        store.unseal();
        store.seal();

        assert!(store.is_present());
        assert_eq!(store.with_secret(|_| ()), None);
    }

    #[test]
    fn zeroize_wipes_bytes() {
        let mut s = secret(0xAA);
        s.zeroize();
        assert!(s.is_empty());
    }

    #[test]
    fn debug_output_is_redacted() {
        let s = secret(0x42);
        let rendered = format!("{s:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("66"));

        let p = Passphrase::new("hunter2");
        assert!(!format!("{p:?}").contains("hunter2"));
        assert_eq!(p.expose(), "hunter2");
    }
}
