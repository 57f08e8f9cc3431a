//! Cryptographic suite registry.
//!
//! A suite is an immutable `{KEM, AEAD, signature}` tuple with stable numeric
//! IDs. The registry is the cartesian product of the component tables below;
//! centralising ID assignment here prevents protocol drift, and the numeric
//! IDs ride in the packet header so cross-suite packets fail before any AEAD
//! work.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

use crate::core::SuiteError;
use crate::crypto::aead::AeadAlgorithm;
use crate::crypto::provider::PqPrimitives;

/// An immutable registered suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    /// Canonical identifier, `cs-<kem>-<aead>-<sig>`.
    pub suite_id: String,
    /// KEM mechanism name as spoken on the handshake wire.
    pub kem_name: &'static str,
    /// Signature mechanism name as spoken on the handshake wire.
    pub sig_name: &'static str,
    /// AEAD display name.
    pub aead_name: &'static str,
    /// Key derivation function name.
    pub kdf_name: &'static str,
    /// KEM family ID (header byte).
    pub kem_id: u8,
    /// KEM parameter set ID (header byte).
    pub kem_param_id: u8,
    /// Signature family ID (header byte).
    pub sig_id: u8,
    /// Signature parameter set ID (header byte).
    pub sig_param_id: u8,
    /// AEAD ID (not carried in the header).
    pub aead_id: u8,
    /// NIST security level of the KEM.
    pub nist_level: &'static str,
}

impl Suite {
    /// The four crypto ID bytes embedded in every packet header.
    pub fn header_ids(&self) -> (u8, u8, u8, u8) {
        (self.kem_id, self.kem_param_id, self.sig_id, self.sig_param_id)
    }

    /// The AEAD implementation backing this suite.
    pub fn aead_algorithm(&self) -> AeadAlgorithm {
        match self.aead_id {
            2 => AeadAlgorithm::ChaCha20Poly1305,
            3 => AeadAlgorithm::Ascon128,
            _ => AeadAlgorithm::Aes256Gcm,
        }
    }
}

struct KemEntry {
    token: &'static str,
    mech_name: &'static str,
    nist_level: &'static str,
    kem_id: u8,
    kem_param_id: u8,
    aliases: &'static [&'static str],
}

struct SigEntry {
    token: &'static str,
    mech_name: &'static str,
    sig_id: u8,
    sig_param_id: u8,
    aliases: &'static [&'static str],
}

struct AeadEntry {
    token: &'static str,
    display_name: &'static str,
    aead_id: u8,
    aliases: &'static [&'static str],
}

const KDF_NAME: &str = "HKDF-SHA256";

const KEMS: &[KemEntry] = &[
    KemEntry {
        token: "mlkem512",
        mech_name: "ML-KEM-512",
        nist_level: "L1",
        kem_id: 1,
        kem_param_id: 1,
        aliases: &["kyber512", "kyber-512", "kyber_512"],
    },
    KemEntry {
        token: "mlkem768",
        mech_name: "ML-KEM-768",
        nist_level: "L3",
        kem_id: 1,
        kem_param_id: 2,
        aliases: &["kyber768", "kyber-768", "kyber_768"],
    },
    KemEntry {
        token: "mlkem1024",
        mech_name: "ML-KEM-1024",
        nist_level: "L5",
        kem_id: 1,
        kem_param_id: 3,
        aliases: &["kyber1024", "kyber-1024", "kyber_1024"],
    },
];

const SIGS: &[SigEntry] = &[
    SigEntry {
        token: "mldsa44",
        mech_name: "ML-DSA-44",
        sig_id: 1,
        sig_param_id: 1,
        aliases: &["dilithium2", "dilithium-2"],
    },
    SigEntry {
        token: "mldsa65",
        mech_name: "ML-DSA-65",
        sig_id: 1,
        sig_param_id: 2,
        aliases: &["dilithium3", "dilithium-3"],
    },
    SigEntry {
        token: "mldsa87",
        mech_name: "ML-DSA-87",
        sig_id: 1,
        sig_param_id: 3,
        aliases: &["dilithium5", "dilithium-5"],
    },
    SigEntry {
        token: "falcon512",
        mech_name: "Falcon-512",
        sig_id: 2,
        sig_param_id: 1,
        aliases: &["falcon-512"],
    },
    SigEntry {
        token: "falcon1024",
        mech_name: "Falcon-1024",
        sig_id: 2,
        sig_param_id: 2,
        aliases: &["falcon-1024"],
    },
    SigEntry {
        token: "sphincs128fsha2",
        mech_name: "SLH-DSA-SHA2-128f",
        sig_id: 3,
        sig_param_id: 1,
        aliases: &["sphincs+-sha2-128f-simple", "sphincs128f_sha2"],
    },
    SigEntry {
        token: "sphincs256fsha2",
        mech_name: "SLH-DSA-SHA2-256f",
        sig_id: 3,
        sig_param_id: 2,
        aliases: &["sphincs+-sha2-256f-simple", "sphincs256f_sha2"],
    },
];

const AEADS: &[AeadEntry] = &[
    AeadEntry {
        token: "aesgcm",
        display_name: "AES-256-GCM",
        aead_id: 1,
        aliases: &["aes-256-gcm", "aes256gcm", "aes-gcm"],
    },
    AeadEntry {
        token: "chacha20poly1305",
        display_name: "ChaCha20-Poly1305",
        aead_id: 2,
        aliases: &["chacha20-poly1305", "chacha20", "chacha"],
    },
    AeadEntry {
        token: "ascon128",
        display_name: "Ascon-128",
        aead_id: 3,
        aliases: &["ascon-128", "ascon"],
    },
];

/// Normalize an alias for case- and punctuation-insensitive matching.
fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn alias_map<T>(entries: &'static [T], keys: impl Fn(&'static T) -> Vec<&'static str>) -> HashMap<String, &'static T> {
    let mut map = HashMap::new();
    for entry in entries {
        for key in keys(entry) {
            map.insert(normalize(key), entry);
        }
    }
    map
}

static KEM_ALIASES: Lazy<HashMap<String, &'static KemEntry>> =
    Lazy::new(|| alias_map(KEMS, |e| [e.token, e.mech_name].into_iter().chain(e.aliases.iter().copied()).collect()));

static SIG_ALIASES: Lazy<HashMap<String, &'static SigEntry>> =
    Lazy::new(|| alias_map(SIGS, |e| [e.token, e.mech_name].into_iter().chain(e.aliases.iter().copied()).collect()));

static AEAD_ALIASES: Lazy<HashMap<String, &'static AeadEntry>> =
    Lazy::new(|| alias_map(AEADS, |e| [e.token, e.display_name].into_iter().chain(e.aliases.iter().copied()).collect()));

static REGISTRY: Lazy<BTreeMap<String, Suite>> = Lazy::new(|| {
    let mut suites = BTreeMap::new();
    for kem in KEMS {
        for aead in AEADS {
            for sig in SIGS {
                let suite_id = format!("cs-{}-{}-{}", kem.token, aead.token, sig.token);
                suites.insert(
                    suite_id.clone(),
                    Suite {
                        suite_id,
                        kem_name: kem.mech_name,
                        sig_name: sig.mech_name,
                        aead_name: aead.display_name,
                        kdf_name: KDF_NAME,
                        kem_id: kem.kem_id,
                        kem_param_id: kem.kem_param_id,
                        sig_id: sig.sig_id,
                        sig_param_id: sig.sig_param_id,
                        aead_id: aead.aead_id,
                        nist_level: kem.nist_level,
                    },
                );
            }
        }
    }
    suites
});

fn resolve_kem(name: &str) -> Result<&'static KemEntry, SuiteError> {
    KEM_ALIASES
        .get(&normalize(name))
        .copied()
        .ok_or_else(|| SuiteError::UnknownSuite(name.to_string()))
}

fn resolve_sig(name: &str) -> Result<&'static SigEntry, SuiteError> {
    SIG_ALIASES
        .get(&normalize(name))
        .copied()
        .ok_or_else(|| SuiteError::UnknownSuite(name.to_string()))
}

fn resolve_aead(name: &str) -> Result<&'static AeadEntry, SuiteError> {
    AEAD_ALIASES
        .get(&normalize(name))
        .copied()
        .ok_or_else(|| SuiteError::UnknownSuite(name.to_string()))
}

/// Build the canonical suite identifier from component aliases.
pub fn build_suite_id(kem: &str, aead: &str, sig: &str) -> Result<String, SuiteError> {
    let kem = resolve_kem(kem)?;
    let aead = resolve_aead(aead)?;
    let sig = resolve_sig(sig)?;
    Ok(format!("cs-{}-{}-{}", kem.token, aead.token, sig.token))
}

/// Resolve any suite alias (canonical, legacy kyber/dilithium names,
/// punctuation variants) to the canonical suite identifier.
pub fn resolve(alias: &str) -> Result<String, SuiteError> {
    let candidate = alias.trim();
    let rest = candidate
        .strip_prefix("cs-")
        .ok_or_else(|| SuiteError::UnknownSuite(alias.to_string()))?;

    let mut parts = rest.splitn(3, '-');
    let (kem, aead, sig) = match (parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(a), Some(s)) if !k.is_empty() && !a.is_empty() && !s.is_empty() => (k, a, s),
        _ => return Err(SuiteError::UnknownSuite(alias.to_string())),
    };

    build_suite_id(kem, aead, sig).map_err(|_| SuiteError::UnknownSuite(alias.to_string()))
}

/// Look up a suite by identifier, resolving aliases.
pub fn get(suite_id: &str) -> Result<&'static Suite, SuiteError> {
    let canonical = resolve(suite_id)?;
    REGISTRY
        .get(&canonical)
        .ok_or_else(|| SuiteError::UnknownSuite(suite_id.to_string()))
}

/// All registered suites in identifier order.
pub fn list() -> Vec<&'static Suite> {
    REGISTRY.values().collect()
}

/// Registered suites whose KEM and signature the provider can serve.
pub fn list_enabled(provider: &dyn PqPrimitives) -> Vec<&'static Suite> {
    let kems = provider.supported_kems();
    let sigs = provider.supported_sigs();
    REGISTRY
        .values()
        .filter(|s| kems.contains(&s.kem_name) && sigs.contains(&s.sig_name))
        .collect()
}

/// True when the provider can serve both halves of the suite.
pub fn is_enabled(suite: &Suite, provider: &dyn PqPrimitives) -> bool {
    provider.supported_kems().contains(&suite.kem_name)
        && provider.supported_sigs().contains(&suite.sig_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_full_product() {
        assert_eq!(list().len(), KEMS.len() * AEADS.len() * SIGS.len());
    }

    #[test]
    fn test_get_canonical() {
        let suite = get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        assert_eq!(suite.kem_name, "ML-KEM-768");
        assert_eq!(suite.sig_name, "ML-DSA-65");
        assert_eq!(suite.aead_name, "AES-256-GCM");
        assert_eq!(suite.kdf_name, "HKDF-SHA256");
        assert_eq!(suite.nist_level, "L3");
        assert_eq!(suite.header_ids(), (1, 2, 1, 2));
    }

    #[test]
    fn test_legacy_aliases_resolve() {
        assert_eq!(
            resolve("cs-kyber768-aesgcm-dilithium3").unwrap(),
            "cs-mlkem768-aesgcm-mldsa65"
        );
        assert_eq!(
            resolve("cs-kyber1024-aesgcm-falcon1024").unwrap(),
            "cs-mlkem1024-aesgcm-falcon1024"
        );
        assert_eq!(
            resolve("cs-kyber512-aesgcm-sphincs128f_sha2").unwrap(),
            "cs-mlkem512-aesgcm-sphincs128fsha2"
        );
    }

    #[test]
    fn test_alias_normalization_is_punctuation_insensitive() {
        assert_eq!(
            build_suite_id("ML-KEM-768", "AES-256-GCM", "ML-DSA-65").unwrap(),
            "cs-mlkem768-aesgcm-mldsa65"
        );
        assert_eq!(
            build_suite_id("mlkem768", "aesgcm", "mldsa65").unwrap(),
            "cs-mlkem768-aesgcm-mldsa65"
        );
        assert_eq!(
            build_suite_id("Kyber-768", "aes_gcm", "Dilithium-3").unwrap(),
            "cs-mlkem768-aesgcm-mldsa65"
        );
    }

    #[test]
    fn test_unknown_suite() {
        assert!(matches!(get("cs-rsa2048-aesgcm-mldsa65"), Err(SuiteError::UnknownSuite(_))));
        assert!(matches!(get("not-a-suite"), Err(SuiteError::UnknownSuite(_))));
        assert!(matches!(get(""), Err(SuiteError::UnknownSuite(_))));
        assert!(matches!(get("cs-mlkem768"), Err(SuiteError::UnknownSuite(_))));
    }

    #[test]
    fn test_chacha_and_ascon_suites_exist() {
        let chacha = get("cs-mlkem1024-chacha20poly1305-mldsa87").unwrap();
        assert_eq!(chacha.aead_id, 2);
        assert_eq!(chacha.aead_algorithm(), AeadAlgorithm::ChaCha20Poly1305);

        let ascon = get("cs-mlkem512-ascon128-falcon512").unwrap();
        assert_eq!(ascon.aead_id, 3);
        assert_eq!(ascon.aead_algorithm(), AeadAlgorithm::Ascon128);
    }

    #[test]
    fn test_header_ids_are_unique_per_kem_sig_pair() {
        let mut seen = std::collections::HashSet::new();
        for suite in list() {
            if suite.aead_id == 1 {
                assert!(seen.insert(suite.header_ids()));
            }
        }
    }
}
