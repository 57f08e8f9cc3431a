//! Persistent GCS signing identity.
//!
//! The only state that survives a restart: the GCS signing keypair, stored
//! as `gcs_signing.key` (mode 0600 where supported) and `gcs_signing.pub`.

use std::io;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::core::CryptoError;
use crate::crypto::provider::PqPrimitives;
use crate::suites::Suite;

/// Default secret key filename.
pub const SECRET_FILE: &str = "gcs_signing.key";

/// Default public key filename.
pub const PUBLIC_FILE: &str = "gcs_signing.pub";

/// A loaded or generated signing keypair bound to a signature mechanism.
#[derive(Clone)]
pub struct SigningIdentity {
    sig_name: String,
    public: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
}

impl SigningIdentity {
    /// Generate a fresh keypair for the suite's signature mechanism.
    pub fn generate(suite: &Suite, provider: &dyn PqPrimitives) -> Result<Self, CryptoError> {
        let keys = provider.sig_keygen(suite.sig_name)?;
        Ok(Self {
            sig_name: suite.sig_name.to_string(),
            public: keys.public,
            secret: keys.secret,
        })
    }

    /// Wrap existing key material.
    pub fn from_parts(sig_name: impl Into<String>, public: Vec<u8>, secret: Zeroizing<Vec<u8>>) -> Self {
        Self {
            sig_name: sig_name.into(),
            public,
            secret,
        }
    }

    /// Signature mechanism this keypair belongs to.
    pub fn sig_name(&self) -> &str {
        &self.sig_name
    }

    /// Public key bytes.
    pub fn public(&self) -> &[u8] {
        &self.public
    }

    /// Secret key bytes. Handle with care.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Persist the keypair under `dir`, securing the secret file where the
    /// platform supports it. Returns the written paths.
    pub fn save(&self, dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let secret_path = dir.join(SECRET_FILE);
        let public_path = dir.join(PUBLIC_FILE);
        std::fs::write(&secret_path, self.secret.as_slice())?;
        std::fs::write(&public_path, &self.public)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&secret_path, perms)?;
        }
        Ok((secret_path, public_path))
    }

    /// Load a keypair from a secret key file, finding the matching public
    /// key next to it.
    pub fn load(secret_path: &Path, suite: &Suite) -> io::Result<Self> {
        let secret = Zeroizing::new(std::fs::read(secret_path)?);
        let public_path = sibling_public_path(secret_path);
        let public = std::fs::read(&public_path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("public key not found at {}: {e}", public_path.display()),
            )
        })?;
        Ok(Self {
            sig_name: suite.sig_name.to_string(),
            public,
            secret,
        })
    }
}

fn sibling_public_path(secret_path: &Path) -> PathBuf {
    if secret_path.extension().is_some() {
        secret_path.with_extension("pub")
    } else {
        secret_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(PUBLIC_FILE)
    }
}

/// Read a public key file as raw bytes.
pub fn load_public_key(path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::PqcleanProvider;
    use crate::suites;

    #[test]
    fn test_save_load_roundtrip() {
        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem768-aesgcm-mldsa65").unwrap();
        let identity = SigningIdentity::generate(suite, &provider).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (secret_path, public_path) = identity.save(dir.path()).unwrap();
        assert!(secret_path.ends_with(SECRET_FILE));
        assert!(public_path.ends_with(PUBLIC_FILE));

        let loaded = SigningIdentity::load(&secret_path, suite).unwrap();
        assert_eq!(loaded.public(), identity.public());
        assert_eq!(loaded.secret(), identity.secret());
        assert_eq!(loaded.sig_name(), "ML-DSA-65");
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem512-aesgcm-falcon512").unwrap();
        let identity = SigningIdentity::generate(suite, &provider).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (secret_path, _) = identity.save(dir.path()).unwrap();
        let mode = std::fs::metadata(&secret_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_loaded_identity_signs() {
        let provider = PqcleanProvider;
        let suite = suites::get("cs-mlkem512-aesgcm-mldsa44").unwrap();
        let identity = SigningIdentity::generate(suite, &provider).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let (secret_path, _) = identity.save(dir.path()).unwrap();
        let loaded = SigningIdentity::load(&secret_path, suite).unwrap();

        let sig = provider
            .sig_sign(loaded.sig_name(), loaded.secret(), b"hello")
            .unwrap();
        assert!(provider
            .sig_verify(loaded.sig_name(), loaded.public(), b"hello", &sig)
            .unwrap());
    }
}
