//! PQC primitive capability provider.
//!
//! The handshake and registry never call KEM or signature implementations
//! directly; they go through the [`PqPrimitives`] trait so the primitive
//! library is an injectable collaborator. [`PqcleanProvider`] is the default
//! implementation, backed by the PQClean binding crates.

use zeroize::Zeroizing;

use crate::core::CryptoError;

/// Byte-level KEM shared secret, wiped on drop.
pub type SharedSecret = Zeroizing<Vec<u8>>;

/// One-shot decapsulation capability returned by [`PqPrimitives::kem_keygen`].
///
/// Consuming it on use guarantees the ephemeral KEM state is destroyed
/// immediately after decapsulation.
pub struct KemDecapsulator {
    decap: Box<dyn FnOnce(&[u8]) -> Result<SharedSecret, CryptoError> + Send>,
}

impl KemDecapsulator {
    /// Recover the shared secret from the peer's ciphertext.
    pub fn decapsulate(self, ciphertext: &[u8]) -> Result<SharedSecret, CryptoError> {
        (self.decap)(ciphertext)
    }
}

/// An ephemeral KEM keypair: the encodable public key plus the
/// decapsulation capability holding the secret half.
pub struct KemKeyPair {
    /// Encoded public key, sent in the `ServerHello`.
    pub public: Vec<u8>,
    /// Consumed once the peer's ciphertext arrives.
    pub decapsulator: KemDecapsulator,
}

/// Result of encapsulating to a peer public key.
pub struct Encapsulation {
    /// Encoded KEM ciphertext for the peer.
    pub ciphertext: Vec<u8>,
    /// Locally derived shared secret.
    pub shared_secret: SharedSecret,
}

/// A freshly generated signature keypair.
pub struct SigKeyPair {
    /// Encoded public key.
    pub public: Vec<u8>,
    /// Encoded secret key, wiped on drop.
    pub secret: Zeroizing<Vec<u8>>,
}

/// Capability interface over the PQC primitive library.
///
/// Mechanism names are the wire names from the suite registry
/// (e.g. `ML-KEM-768`, `Falcon-512`).
pub trait PqPrimitives: Send + Sync {
    /// KEM mechanisms this provider can serve.
    fn supported_kems(&self) -> &'static [&'static str];

    /// Signature mechanisms this provider can serve.
    fn supported_sigs(&self) -> &'static [&'static str];

    /// Generate an ephemeral KEM keypair.
    fn kem_keygen(&self, kem_name: &str) -> Result<KemKeyPair, CryptoError>;

    /// Encapsulate to a peer's public key.
    fn kem_encapsulate(&self, kem_name: &str, peer_public: &[u8]) -> Result<Encapsulation, CryptoError>;

    /// Generate a signing keypair.
    fn sig_keygen(&self, sig_name: &str) -> Result<SigKeyPair, CryptoError>;

    /// Produce a detached signature over `message`.
    fn sig_sign(&self, sig_name: &str, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a detached signature. `Ok(false)` means a well-formed but
    /// invalid signature.
    fn sig_verify(
        &self,
        sig_name: &str,
        public: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError>;
}

const SUPPORTED_KEMS: &[&str] = &["ML-KEM-512", "ML-KEM-768", "ML-KEM-1024"];

const SUPPORTED_SIGS: &[&str] = &[
    "ML-DSA-44",
    "ML-DSA-65",
    "ML-DSA-87",
    "Falcon-512",
    "Falcon-1024",
    "SLH-DSA-SHA2-128f",
    "SLH-DSA-SHA2-256f",
];

/// Default [`PqPrimitives`] implementation over the PQClean binding crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct PqcleanProvider;

macro_rules! kem_keygen_with {
    ($m:ident) => {{
        use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SharedSecret as _};
        let (pk, sk) = $m::keypair();
        let public = pk.as_bytes().to_vec();
        let decapsulator = KemDecapsulator {
            decap: Box::new(move |ct_bytes: &[u8]| {
                let ct = $m::Ciphertext::from_bytes(ct_bytes)
                    .map_err(|_| CryptoError::Malformed("KEM ciphertext"))?;
                let ss = $m::decapsulate(&ct, &sk);
                Ok(Zeroizing::new(ss.as_bytes().to_vec()))
            }),
        };
        Ok(KemKeyPair { public, decapsulator })
    }};
}

macro_rules! kem_encap_with {
    ($m:ident, $peer_public:expr) => {{
        use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SharedSecret as _};
        let pk = $m::PublicKey::from_bytes($peer_public)
            .map_err(|_| CryptoError::Malformed("KEM public key"))?;
        let (ss, ct) = $m::encapsulate(&pk);
        Ok(Encapsulation {
            ciphertext: ct.as_bytes().to_vec(),
            shared_secret: Zeroizing::new(ss.as_bytes().to_vec()),
        })
    }};
}

macro_rules! sig_keygen_with {
    ($m:ident) => {{
        use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
        let (pk, sk) = $m::keypair();
        Ok(SigKeyPair {
            public: pk.as_bytes().to_vec(),
            secret: Zeroizing::new(sk.as_bytes().to_vec()),
        })
    }};
}

macro_rules! sig_sign_with {
    ($m:ident, $secret:expr, $message:expr) => {{
        use pqcrypto_traits::sign::{DetachedSignature as _, SecretKey as _};
        let sk = $m::SecretKey::from_bytes($secret)
            .map_err(|_| CryptoError::Malformed("signature secret key"))?;
        let sig = $m::detached_sign($message, &sk);
        Ok(sig.as_bytes().to_vec())
    }};
}

macro_rules! sig_verify_with {
    ($m:ident, $public:expr, $message:expr, $signature:expr) => {{
        use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};
        let pk = $m::PublicKey::from_bytes($public)
            .map_err(|_| CryptoError::Malformed("signature public key"))?;
        let sig = match $m::DetachedSignature::from_bytes($signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok($m::verify_detached_signature(&sig, $message, &pk).is_ok())
    }};
}

impl PqPrimitives for PqcleanProvider {
    fn supported_kems(&self) -> &'static [&'static str] {
        SUPPORTED_KEMS
    }

    fn supported_sigs(&self) -> &'static [&'static str] {
        SUPPORTED_SIGS
    }

    fn kem_keygen(&self, kem_name: &str) -> Result<KemKeyPair, CryptoError> {
        use pqcrypto_mlkem::{mlkem512, mlkem768, mlkem1024};
        match kem_name {
            "ML-KEM-512" => kem_keygen_with!(mlkem512),
            "ML-KEM-768" => kem_keygen_with!(mlkem768),
            "ML-KEM-1024" => kem_keygen_with!(mlkem1024),
            other => Err(CryptoError::UnsupportedKem(other.to_string())),
        }
    }

    fn kem_encapsulate(&self, kem_name: &str, peer_public: &[u8]) -> Result<Encapsulation, CryptoError> {
        use pqcrypto_mlkem::{mlkem512, mlkem768, mlkem1024};
        match kem_name {
            "ML-KEM-512" => kem_encap_with!(mlkem512, peer_public),
            "ML-KEM-768" => kem_encap_with!(mlkem768, peer_public),
            "ML-KEM-1024" => kem_encap_with!(mlkem1024, peer_public),
            other => Err(CryptoError::UnsupportedKem(other.to_string())),
        }
    }

    fn sig_keygen(&self, sig_name: &str) -> Result<SigKeyPair, CryptoError> {
        use pqcrypto_falcon::{falcon512, falcon1024};
        use pqcrypto_mldsa::{mldsa44, mldsa65, mldsa87};
        use pqcrypto_sphincsplus::{sphincssha2128fsimple, sphincssha2256fsimple};
        match sig_name {
            "ML-DSA-44" => sig_keygen_with!(mldsa44),
            "ML-DSA-65" => sig_keygen_with!(mldsa65),
            "ML-DSA-87" => sig_keygen_with!(mldsa87),
            "Falcon-512" => sig_keygen_with!(falcon512),
            "Falcon-1024" => sig_keygen_with!(falcon1024),
            "SLH-DSA-SHA2-128f" => sig_keygen_with!(sphincssha2128fsimple),
            "SLH-DSA-SHA2-256f" => sig_keygen_with!(sphincssha2256fsimple),
            other => Err(CryptoError::UnsupportedSig(other.to_string())),
        }
    }

    fn sig_sign(&self, sig_name: &str, secret: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        use pqcrypto_falcon::{falcon512, falcon1024};
        use pqcrypto_mldsa::{mldsa44, mldsa65, mldsa87};
        use pqcrypto_sphincsplus::{sphincssha2128fsimple, sphincssha2256fsimple};
        match sig_name {
            "ML-DSA-44" => sig_sign_with!(mldsa44, secret, message),
            "ML-DSA-65" => sig_sign_with!(mldsa65, secret, message),
            "ML-DSA-87" => sig_sign_with!(mldsa87, secret, message),
            "Falcon-512" => sig_sign_with!(falcon512, secret, message),
            "Falcon-1024" => sig_sign_with!(falcon1024, secret, message),
            "SLH-DSA-SHA2-128f" => sig_sign_with!(sphincssha2128fsimple, secret, message),
            "SLH-DSA-SHA2-256f" => sig_sign_with!(sphincssha2256fsimple, secret, message),
            other => Err(CryptoError::UnsupportedSig(other.to_string())),
        }
    }

    fn sig_verify(
        &self,
        sig_name: &str,
        public: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, CryptoError> {
        use pqcrypto_falcon::{falcon512, falcon1024};
        use pqcrypto_mldsa::{mldsa44, mldsa65, mldsa87};
        use pqcrypto_sphincsplus::{sphincssha2128fsimple, sphincssha2256fsimple};
        match sig_name {
            "ML-DSA-44" => sig_verify_with!(mldsa44, public, message, signature),
            "ML-DSA-65" => sig_verify_with!(mldsa65, public, message, signature),
            "ML-DSA-87" => sig_verify_with!(mldsa87, public, message, signature),
            "Falcon-512" => sig_verify_with!(falcon512, public, message, signature),
            "Falcon-1024" => sig_verify_with!(falcon1024, public, message, signature),
            "SLH-DSA-SHA2-128f" => sig_verify_with!(sphincssha2128fsimple, public, message, signature),
            "SLH-DSA-SHA2-256f" => sig_verify_with!(sphincssha2256fsimple, public, message, signature),
            other => Err(CryptoError::UnsupportedSig(other.to_string())),
        }
    }
}
