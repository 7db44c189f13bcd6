//! Security providers installed at launch.
//!
//! - [`AeadSelfTest`] is required. The sealed secret depends on
//!   XChaCha20-Poly1305, so a build where it does not round-trip a known
//!   vector must not start.
//! - [`RustlsRing`] is optional. It installs ring as the process-wide rustls
//!   crypto provider. Failure means another provider is already installed.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use latchkey_core::{ProviderError, SecurityProvider};
use tracing::debug;

const SELF_TEST_KEY: [u8; 32] = [0x42; 32];
const SELF_TEST_NONCE: [u8; 24] = [0x24; 24];
const SELF_TEST_PLAINTEXT: &[u8] = b"latchkey aead self-test";

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Encrypts and decrypts a fixed vector and checks tamper detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AeadSelfTest;

impl SecurityProvider for AeadSelfTest {
    fn name(&self) -> &'static str {
        "aead-self-test"
    }

    fn required(&self) -> bool {
        true
    }

    fn install(&self) -> Result<(), ProviderError> {
        let cipher = XChaCha20Poly1305::new((&SELF_TEST_KEY).into());
        let nonce = XNonce::from_slice(&SELF_TEST_NONCE);

        let mut ciphertext = cipher
            .encrypt(nonce, SELF_TEST_PLAINTEXT)
            .map_err(|e| ProviderError::new(format!("encryption failed: {e}")))?;
        if ciphertext.len() != SELF_TEST_PLAINTEXT.len() + POLY1305_TAG_SIZE {
            return Err(ProviderError::new("unexpected ciphertext length"));
        }

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| ProviderError::new(format!("decryption failed: {e}")))?;
        if plaintext != SELF_TEST_PLAINTEXT {
            return Err(ProviderError::new("round trip mismatch"));
        }

        if let Some(last) = ciphertext.last_mut() {
            *last ^= 0x01;
        }
        if cipher.decrypt(nonce, ciphertext.as_slice()).is_ok() {
            return Err(ProviderError::new("tampered ciphertext accepted"));
        }

        debug!("aead self-test passed");
        Ok(())
    }
}

/// Installs the ring-backed rustls crypto provider as the process default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsRing;

impl SecurityProvider for RustlsRing {
    fn name(&self) -> &'static str {
        "rustls-ring"
    }

    fn required(&self) -> bool {
        false
    }

    fn install(&self) -> Result<(), ProviderError> {
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| ProviderError::new("a process default crypto provider is already installed"))
    }
}
