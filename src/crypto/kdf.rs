//! Transport key schedule.
//!
//! Both sides expand the KEM shared secret with HKDF-SHA256 under
//! domain-separated salt and info, then split the 64-byte output into the
//! two directional keys. Direction is fixed by role, never negotiated.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::core::CryptoError;
use crate::core::constants::{HKDF_INFO_PREFIX, HKDF_SALT, SESSION_ID_LEN, SESSION_KEY_LEN};

use super::aead::SessionKey;

/// Proxy role; decides key direction and who drives the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side of the handshake; sends with `key_d2g`.
    Drone,
    /// Server side of the handshake; sends with `key_g2d`.
    Gcs,
}

impl Role {
    /// Lowercase role label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Drone => "drone",
            Role::Gcs => "gcs",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two directional keys of one session.
pub struct TransportKeys {
    /// Drone-to-GCS key (first 32 bytes of the HKDF output).
    pub key_d2g: SessionKey,
    /// GCS-to-drone key (last 32 bytes).
    pub key_g2d: SessionKey,
}

impl TransportKeys {
    /// Split into `(send, recv)` for the given role.
    pub fn into_directions(self, role: Role) -> (SessionKey, SessionKey) {
        match role {
            Role::Drone => (self.key_d2g, self.key_g2d),
            Role::Gcs => (self.key_g2d, self.key_d2g),
        }
    }
}

/// Derive the directional transport keys for a session.
pub fn derive_transport_keys(
    session_id: &[u8; SESSION_ID_LEN],
    kem_name: &str,
    sig_name: &str,
    shared_secret: &[u8],
) -> Result<TransportKeys, CryptoError> {
    let mut info = Vec::with_capacity(
        HKDF_INFO_PREFIX.len() + SESSION_ID_LEN + kem_name.len() + sig_name.len() + 2,
    );
    info.extend_from_slice(HKDF_INFO_PREFIX);
    info.extend_from_slice(session_id);
    info.push(b'|');
    info.extend_from_slice(kem_name.as_bytes());
    info.push(b'|');
    info.extend_from_slice(sig_name.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
    let mut okm = Zeroizing::new([0u8; 2 * SESSION_KEY_LEN]);
    hk.expand(&info, &mut okm[..])
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut key_d2g = [0u8; SESSION_KEY_LEN];
    let mut key_g2d = [0u8; SESSION_KEY_LEN];
    key_d2g.copy_from_slice(&okm[..SESSION_KEY_LEN]);
    key_g2d.copy_from_slice(&okm[SESSION_KEY_LEN..]);

    Ok(TransportKeys {
        key_d2g: SessionKey::from_bytes(key_d2g),
        key_g2d: SessionKey::from_bytes(key_g2d),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let sid = [7u8; SESSION_ID_LEN];
        let a = derive_transport_keys(&sid, "ML-KEM-768", "ML-DSA-65", &[1u8; 32]).unwrap();
        let b = derive_transport_keys(&sid, "ML-KEM-768", "ML-DSA-65", &[1u8; 32]).unwrap();
        assert_eq!(a.key_d2g.as_bytes(), b.key_d2g.as_bytes());
        assert_eq!(a.key_g2d.as_bytes(), b.key_g2d.as_bytes());
        assert_ne!(a.key_d2g.as_bytes(), a.key_g2d.as_bytes());
    }

    #[test]
    fn test_info_binds_session_and_names() {
        let base = derive_transport_keys(&[7u8; 8], "ML-KEM-768", "ML-DSA-65", &[1u8; 32]).unwrap();

        let other_sid = derive_transport_keys(&[8u8; 8], "ML-KEM-768", "ML-DSA-65", &[1u8; 32]).unwrap();
        assert_ne!(base.key_d2g.as_bytes(), other_sid.key_d2g.as_bytes());

        let other_kem = derive_transport_keys(&[7u8; 8], "ML-KEM-1024", "ML-DSA-65", &[1u8; 32]).unwrap();
        assert_ne!(base.key_d2g.as_bytes(), other_kem.key_d2g.as_bytes());

        let other_sig = derive_transport_keys(&[7u8; 8], "ML-KEM-768", "Falcon-512", &[1u8; 32]).unwrap();
        assert_ne!(base.key_d2g.as_bytes(), other_sig.key_d2g.as_bytes());
    }

    #[test]
    fn test_role_direction_symmetry() {
        let sid = [3u8; SESSION_ID_LEN];
        let drone = derive_transport_keys(&sid, "ML-KEM-768", "ML-DSA-65", &[9u8; 32])
            .unwrap()
            .into_directions(Role::Drone);
        let gcs = derive_transport_keys(&sid, "ML-KEM-768", "ML-DSA-65", &[9u8; 32])
            .unwrap()
            .into_directions(Role::Gcs);

        // drone.send == gcs.recv and drone.recv == gcs.send
        assert_eq!(drone.0.as_bytes(), gcs.1.as_bytes());
        assert_eq!(drone.1.as_bytes(), gcs.0.as_bytes());
    }
}
