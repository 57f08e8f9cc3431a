//! AEAD dispatch for the registered suites.
//!
//! All suites authenticate the fixed-size wire header as associated data and
//! append a 16-byte tag. Nonces are derived deterministically from
//! `(epoch, seq)` so that every key sees each nonce at most once: the epoch
//! occupies the high byte and the big-endian sequence number the trailing
//! bytes.

use zeroize::Zeroize;

use crate::core::constants::SESSION_KEY_LEN;

/// A 32-byte directional session key, wiped on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_LEN],
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey").field("key", &"<redacted>").finish()
    }
}

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Expose the raw key bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// AEAD implementations the wire codec can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-256-GCM, 96-bit nonce.
    Aes256Gcm,
    /// ChaCha20-Poly1305, 96-bit nonce.
    ChaCha20Poly1305,
    /// Ascon-128, 128-bit key and nonce; uses the leading half of the
    /// derived 32-byte key.
    Ascon128,
}

/// 96-bit nonce: epoch in the high byte, big-endian seq in the low bytes.
fn nonce12(epoch: u8, seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = epoch;
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// 128-bit nonce for Ascon, same layout.
fn nonce16(epoch: u8, seq: u64) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0] = epoch;
    nonce[8..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

impl AeadAlgorithm {
    /// Encrypt `plaintext`, returning ciphertext with appended tag.
    pub fn seal(
        &self,
        key: &SessionKey,
        epoch: u8,
        seq: u64,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ()> {
        match self {
            AeadAlgorithm::Aes256Gcm => {
                use aes_gcm::aead::{Aead, KeyInit, Payload};
                use aes_gcm::{Aes256Gcm, Key, Nonce};
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
                let nonce = nonce12(epoch, seq);
                cipher
                    .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
                    .map_err(|_| ())
            }
            AeadAlgorithm::ChaCha20Poly1305 => {
                use chacha20poly1305::aead::{Aead, KeyInit, Payload};
                use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
                let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
                let nonce = nonce12(epoch, seq);
                cipher
                    .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
                    .map_err(|_| ())
            }
            AeadAlgorithm::Ascon128 => {
                use ascon_aead::aead::{Aead, KeyInit, Payload};
                use ascon_aead::{Ascon128, Key, Nonce};
                let cipher = Ascon128::new(Key::<Ascon128>::from_slice(&key.as_bytes()[..16]));
                let nonce = nonce16(epoch, seq);
                cipher
                    .encrypt(Nonce::<Ascon128>::from_slice(&nonce), Payload { msg: plaintext, aad })
                    .map_err(|_| ())
            }
        }
    }

    /// Decrypt ciphertext-with-tag. Any failure is a tag failure to the
    /// caller; the primitives compare tags in constant time.
    pub fn open(
        &self,
        key: &SessionKey,
        epoch: u8,
        seq: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ()> {
        match self {
            AeadAlgorithm::Aes256Gcm => {
                use aes_gcm::aead::{Aead, KeyInit, Payload};
                use aes_gcm::{Aes256Gcm, Key, Nonce};
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
                let nonce = nonce12(epoch, seq);
                cipher
                    .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
                    .map_err(|_| ())
            }
            AeadAlgorithm::ChaCha20Poly1305 => {
                use chacha20poly1305::aead::{Aead, KeyInit, Payload};
                use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
                let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
                let nonce = nonce12(epoch, seq);
                cipher
                    .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
                    .map_err(|_| ())
            }
            AeadAlgorithm::Ascon128 => {
                use ascon_aead::aead::{Aead, KeyInit, Payload};
                use ascon_aead::{Ascon128, Key, Nonce};
                let cipher = Ascon128::new(Key::<Ascon128>::from_slice(&key.as_bytes()[..16]));
                let nonce = nonce16(epoch, seq);
                cipher
                    .decrypt(Nonce::<Ascon128>::from_slice(&nonce), Payload { msg: ciphertext, aad })
                    .map_err(|_| ())
            }
        }
    }
}
