//! Passphrase-sealed master secret.
//!
//! The master secret is kept encrypted under a key derived from the
//! passphrase:
//!
//! ```text
//! key        = HKDF-SHA256(salt, passphrase, "latchkeyMasterSecretV1")
//! ciphertext = XChaCha20-Poly1305(key, nonce, master_secret)
//! ```
//!
//! Salt and nonce are random per seal. A wrong passphrase derives a different
//! key and fails authentication.
//!
//! HKDF is not a password hash. It does no work-factor stretching, so a
//! deployment that stores the sealed secret on disk should derive the
//! passphrase key with a memory-hard function first.

use async_trait::async_trait;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use latchkey_core::{MasterSecret, Passphrase, PassphraseVerifier, UnlockError};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::SealError;

/// Length of a usable master secret.
pub const MASTER_SECRET_LEN: usize = 32;

/// Salt length for key derivation.
pub const SALT_LEN: usize = 32;

/// `XChaCha20` nonce length.
pub const NONCE_LEN: usize = 24;

/// Label used for passphrase key derivation.
const SEAL_LABEL: &[u8] = b"latchkeyMasterSecretV1";

/// A master secret encrypted under a passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Seal `secret` under `passphrase` with fresh OS randomness.
    ///
    /// # Errors
    ///
    /// - `SealError::EmptySecret` for zero-length key material
    /// - `SealError::Random` if the OS random source fails
    pub fn seal(passphrase: &Passphrase, secret: &MasterSecret) -> Result<Self, SealError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut salt).map_err(|e| SealError::Random(e.to_string()))?;
        getrandom::fill(&mut nonce).map_err(|e| SealError::Random(e.to_string()))?;

        Self::seal_with(passphrase, secret, salt, nonce)
    }

    /// Seal `secret` under `passphrase` with caller-provided salt and nonce.
    ///
    /// Pure. Callers MUST provide cryptographically secure random bytes in
    /// production.
    ///
    /// # Errors
    ///
    /// - `SealError::EmptySecret` for zero-length key material
    /// - `SealError::Encryption` if the AEAD rejects the input
    pub fn seal_with(
        passphrase: &Passphrase,
        secret: &MasterSecret,
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
    ) -> Result<Self, SealError> {
        if secret.is_empty() {
            return Err(SealError::EmptySecret);
        }

        let key = derive_key(passphrase, &salt);
        let cipher = XChaCha20Poly1305::new((&*key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), secret.expose())
            .map_err(|e| SealError::Encryption(e.to_string()))?;

        Ok(Self { salt, nonce, ciphertext })
    }

    /// Generate a random master secret and seal it.
    ///
    /// # Errors
    ///
    /// - `SealError::Random` if the OS random source fails
    pub fn generate(passphrase: &Passphrase) -> Result<Self, SealError> {
        let mut bytes = vec![0u8; MASTER_SECRET_LEN];
        let filled = getrandom::fill(&mut bytes);
        let secret = MasterSecret::new(bytes);
        filled.map_err(|e| SealError::Random(e.to_string()))?;

        Self::seal(passphrase, &secret)
    }

    /// Decrypt the master secret.
    ///
    /// # Errors
    ///
    /// - `UnlockError::InvalidPassphrase` if authentication fails
    /// - `UnlockError::UnrecoverableKey` if the plaintext is not a usable
    ///   master secret
    pub fn open(&self, passphrase: &Passphrase) -> Result<MasterSecret, UnlockError> {
        let key = derive_key(passphrase, &self.salt);
        let cipher = XChaCha20Poly1305::new((&*key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| UnlockError::InvalidPassphrase)?;

        // Wrap before checking so the bytes are zeroized on the error path.
        let secret = MasterSecret::new(plaintext);
        if secret.len() != MASTER_SECRET_LEN {
            return Err(UnlockError::UnrecoverableKey(format!(
                "expected {MASTER_SECRET_LEN} bytes of key material, found {}",
                secret.len()
            )));
        }
        Ok(secret)
    }
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret").field("ciphertext_len", &self.ciphertext.len()).finish()
    }
}

#[async_trait]
impl PassphraseVerifier for SealedSecret {
    async fn verify(&self, passphrase: &Passphrase) -> Result<MasterSecret, UnlockError> {
        self.open(passphrase)
    }
}

fn derive_key(passphrase: &Passphrase, salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), passphrase.expose().as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(SEAL_LABEL, &mut *key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}
