//! Encrypted keystore.
//!
//! File format (JSON):
//! ```json
//! {
//!   "alg": "ed25519",
//!   "node_id": "b1e55ed-8d969eef",
//!   "public_key": "<hex>",
//!   "created_at": "2026-08-02T09:00:00Z",
//!   "kdf": {"name": "argon2id", "m_cost": 65536, "t_cost": 3, "p_cost": 4,
//!           "salt_b64": "..."},
//!   "nonce_b64": "...",
//!   "ciphertext_b64": "..."
//! }
//! ```
//!
//! The private key is sealed with AES-256-GCM under an Argon2id-derived
//! key. A legacy plaintext field (`private_key`) is refused unless the
//! caller explicitly allows it (development mode).

use std::path::Path;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::signer::{node_id_for, LocalSigner};

/// Argon2id memory cost in KiB (64 MB).
pub const ARGON2_MEMORY_KB: u32 = 65_536;
/// Argon2id iteration count.
pub const ARGON2_ITERATIONS: u32 = 3;
/// Argon2id parallelism.
pub const ARGON2_PARALLELISM: u32 = 4;
/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed keystore: {0}")]
    Malformed(String),

    #[error("wrong passphrase or corrupted keystore")]
    Decrypt,

    #[error("plaintext private key at rest refused (enable dev mode to allow)")]
    PlaintextRefused,

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlg(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfParams {
    name: String,
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
    salt_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    alg: String,
    node_id: String,
    public_key: String,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ciphertext_b64: Option<String>,
    /// Legacy development-only plaintext form.
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

/// Keystore operations: generate, load, persist.
pub struct Keystore;

impl Keystore {
    /// Generate a fresh identity and persist it encrypted under the
    /// passphrase. Returns the ready-to-use signer.
    pub fn generate(path: &Path, passphrase: &[u8]) -> Result<LocalSigner, KeystoreError> {
        let key = SigningKey::generate(&mut OsRng);
        Self::save(path, &key, passphrase)?;
        Ok(LocalSigner::new(key))
    }

    /// Persist an existing key encrypted under the passphrase.
    pub fn save(path: &Path, key: &SigningKey, passphrase: &[u8]) -> Result<(), KeystoreError> {
        let public_key = key.verifying_key().to_bytes();

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let kek = derive_kek(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), key.to_bytes().as_slice())
            .map_err(|_| KeystoreError::Malformed("encryption failed".into()))?;

        let file = KeystoreFile {
            alg: "ed25519".to_string(),
            node_id: node_id_for(&public_key),
            public_key: hex::encode(public_key),
            created_at: Utc::now(),
            kdf: Some(KdfParams {
                name: "argon2id".to_string(),
                m_cost: ARGON2_MEMORY_KB,
                t_cost: ARGON2_ITERATIONS,
                p_cost: ARGON2_PARALLELISM,
                salt_b64: BASE64_STANDARD.encode(salt),
            }),
            nonce_b64: Some(BASE64_STANDARD.encode(nonce)),
            ciphertext_b64: Some(BASE64_STANDARD.encode(&ciphertext)),
            private_key: None,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| KeystoreError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        restrict_permissions(path);
        Ok(())
    }

    /// Load and unseal an identity.
    ///
    /// `allow_plaintext` gates the legacy unencrypted form - refuse it in
    /// production so a leaked disk image does not leak the key.
    pub fn load(
        path: &Path,
        passphrase: &[u8],
        allow_plaintext: bool,
    ) -> Result<LocalSigner, KeystoreError> {
        let raw = std::fs::read_to_string(path)?;
        let file: KeystoreFile =
            serde_json::from_str(&raw).map_err(|e| KeystoreError::Malformed(e.to_string()))?;

        if file.alg != "ed25519" {
            return Err(KeystoreError::UnsupportedAlg(file.alg));
        }

        let key = match (&file.kdf, &file.nonce_b64, &file.ciphertext_b64) {
            (Some(kdf), Some(nonce_b64), Some(ct_b64)) => {
                let salt = BASE64_STANDARD
                    .decode(&kdf.salt_b64)
                    .map_err(|_| KeystoreError::Malformed("bad salt".into()))?;
                let nonce = BASE64_STANDARD
                    .decode(nonce_b64)
                    .map_err(|_| KeystoreError::Malformed("bad nonce".into()))?;
                let ciphertext = BASE64_STANDARD
                    .decode(ct_b64)
                    .map_err(|_| KeystoreError::Malformed("bad ciphertext".into()))?;

                let kek = derive_kek_with(passphrase, &salt, kdf)?;
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
                let plaintext = Zeroizing::new(
                    cipher
                        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                        .map_err(|_| KeystoreError::Decrypt)?,
                );

                let bytes: [u8; 32] = plaintext
                    .as_slice()
                    .try_into()
                    .map_err(|_| KeystoreError::Decrypt)?;
                SigningKey::from_bytes(&bytes)
            }
            _ => {
                let Some(priv_hex) = &file.private_key else {
                    return Err(KeystoreError::Malformed("no key material".into()));
                };
                if !allow_plaintext {
                    return Err(KeystoreError::PlaintextRefused);
                }
                tracing::warn!(path = %path.display(), "loading PLAINTEXT private key (dev mode)");
                let bytes = Zeroizing::new(
                    hex::decode(priv_hex).map_err(|_| KeystoreError::Malformed("bad hex".into()))?,
                );
                let arr: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| KeystoreError::Malformed("bad key length".into()))?;
                SigningKey::from_bytes(&arr)
            }
        };

        // The stored public key must match the unsealed private key;
        // constant-time compare since one side derives from a secret.
        let derived = key.verifying_key().to_bytes();
        let stored = hex::decode(&file.public_key)
            .map_err(|_| KeystoreError::Malformed("bad public key".into()))?;
        if stored.len() != 32 || derived.ct_eq(stored.as_slice()).unwrap_u8() != 1 {
            return Err(KeystoreError::Decrypt);
        }

        Ok(LocalSigner::new(key))
    }

    /// Load if present, otherwise generate and persist.
    pub fn load_or_generate(
        path: &Path,
        passphrase: &[u8],
        allow_plaintext: bool,
    ) -> Result<LocalSigner, KeystoreError> {
        if path.exists() {
            Self::load(path, passphrase, allow_plaintext)
        } else {
            Self::generate(path, passphrase)
        }
    }
}

fn derive_kek(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let params = Params::new(ARGON2_MEMORY_KB, ARGON2_ITERATIONS, ARGON2_PARALLELISM, Some(32))
        .map_err(|e| KeystoreError::Malformed(format!("argon2 params: {e}")))?;
    derive(passphrase, salt, params)
}

fn derive_kek_with(
    passphrase: &[u8],
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    if kdf.name != "argon2id" {
        return Err(KeystoreError::UnsupportedAlg(kdf.name.clone()));
    }
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| KeystoreError::Malformed(format!("argon2 params: {e}")))?;
    derive(passphrase, salt, params)
}

fn derive(
    passphrase: &[u8],
    salt: &[u8],
    params: Params,
) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut kek = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, kek.as_mut())
        .map_err(|e| KeystoreError::Malformed(format!("kdf: {e}")))?;
    Ok(kek)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::NodeSigner;

    #[test]
    fn test_generate_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let signer = Keystore::generate(&path, b"correct horse").unwrap();
        let loaded = Keystore::load(&path, b"correct horse", false).unwrap();

        assert_eq!(signer.public_key(), loaded.public_key());
        assert_eq!(signer.node_id(), loaded.node_id());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        Keystore::generate(&path, b"right").unwrap();

        let err = Keystore::load(&path, b"wrong", false).unwrap_err();
        assert!(matches!(err, KeystoreError::Decrypt));
    }

    #[test]
    fn test_plaintext_refused_without_dev_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let key = SigningKey::from_bytes(&[3u8; 32]);
        let file = KeystoreFile {
            alg: "ed25519".to_string(),
            node_id: node_id_for(&key.verifying_key().to_bytes()),
            public_key: hex::encode(key.verifying_key().to_bytes()),
            created_at: Utc::now(),
            kdf: None,
            nonce_b64: None,
            ciphertext_b64: None,
            private_key: Some(hex::encode(key.to_bytes())),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let err = Keystore::load(&path, b"", false).unwrap_err();
        assert!(matches!(err, KeystoreError::PlaintextRefused));

        // Development mode accepts it.
        let signer = Keystore::load(&path, b"", true).unwrap();
        assert_eq!(signer.public_key(), key.verifying_key().to_bytes());
    }

    #[test]
    fn test_load_or_generate_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let a = Keystore::load_or_generate(&path, b"pw", false).unwrap();
        let b = Keystore::load_or_generate(&path, b"pw", false).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }
}
