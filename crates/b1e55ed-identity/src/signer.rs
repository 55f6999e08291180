//! Signer capability.
//!
//! The store never sees key bytes; it holds a `NodeSigner` and calls
//! `try_sign`, which is non-blocking and fails with `SignerUnavailable`
//! when the key is locked (e.g. no active session) or contended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use b1e55ed_models::LedgerError;

/// Node id derived from a public key: `b1e55ed-` + first 8 hex chars.
pub fn node_id_for(public_key: &[u8; 32]) -> String {
    format!("b1e55ed-{}", &hex::encode(public_key)[..8])
}

/// Capability interface over the node's signing identity.
pub trait NodeSigner: Send + Sync {
    fn node_id(&self) -> &str;

    /// Raw Ed25519 public key bytes.
    fn public_key(&self) -> [u8; 32];

    /// Non-blocking sign. Fails with `SignerUnavailable` rather than
    /// waiting on a locked or contended key.
    fn try_sign(&self, msg: &[u8]) -> Result<[u8; 64], LedgerError>;

    /// Verify a signature against this node's public key.
    fn verify(&self, msg: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(vk) = VerifyingKey::from_bytes(&self.public_key()) else {
            return false;
        };
        vk.verify(msg, &Signature::from_bytes(signature)).is_ok()
    }
}

/// Production signer holding the decrypted key. Serialized internally;
/// the key material is zeroized when the signer drops (`ed25519-dalek`'s
/// zeroize support).
pub struct LocalSigner {
    node_id: String,
    public_key: [u8; 32],
    key: Mutex<SigningKey>,
    locked: AtomicBool,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("node_id", &self.node_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let public_key = key.verifying_key().to_bytes();
        Self {
            node_id: node_id_for(&public_key),
            public_key,
            key: Mutex::new(key),
            locked: AtomicBool::new(false),
        }
    }

    /// Lock the signer; subsequent `try_sign` calls fail until unlocked.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

impl NodeSigner for LocalSigner {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    fn try_sign(&self, msg: &[u8]) -> Result<[u8; 64], LedgerError> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(LedgerError::SignerUnavailable);
        }
        let key = self.key.try_lock().map_err(|_| LedgerError::SignerUnavailable)?;
        Ok(key.sign(msg).to_bytes())
    }
}

/// Deterministic signer for tests: the keypair is derived from a fixed
/// 32-byte seed, so signatures and the genesis hash are reproducible.
pub struct DeterministicSigner {
    inner: LocalSigner,
}

impl DeterministicSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            inner: LocalSigner::new(SigningKey::from_bytes(&seed)),
        }
    }

    /// Convenience: a signer seeded with a single repeated byte.
    pub fn of_byte(b: u8) -> Self {
        Self::from_seed([b; 32])
    }
}

impl NodeSigner for DeterministicSigner {
    fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    fn public_key(&self) -> [u8; 32] {
        self.inner.public_key()
    }

    fn try_sign(&self, msg: &[u8]) -> Result<[u8; 64], LedgerError> {
        self.inner.try_sign(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = DeterministicSigner::of_byte(7);
        let sig = signer.try_sign(b"hello").unwrap();
        assert!(signer.verify(b"hello", &sig));
        assert!(!signer.verify(b"tampered", &sig));
    }

    #[test]
    fn test_deterministic_signer_is_deterministic() {
        let a = DeterministicSigner::of_byte(7);
        let b = DeterministicSigner::of_byte(7);
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.node_id(), b.node_id());
        assert_eq!(a.try_sign(b"x").unwrap(), b.try_sign(b"x").unwrap());
    }

    #[test]
    fn test_node_id_shape() {
        let signer = DeterministicSigner::of_byte(1);
        let id = signer.node_id();
        assert!(id.starts_with("b1e55ed-"));
        assert_eq!(id.len(), "b1e55ed-".len() + 8);
    }

    #[test]
    fn test_locked_signer_is_unavailable() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let signer = LocalSigner::new(key);
        signer.lock();
        assert_eq!(
            signer.try_sign(b"x").unwrap_err(),
            LedgerError::SignerUnavailable
        );
        signer.unlock();
        assert!(signer.try_sign(b"x").is_ok());
    }
}
