//! # b1e55ed Identity
//!
//! One long-lived Ed25519 signing identity per node.
//!
//! The identity signs every appended event and every checkpoint; the genesis
//! event commits the chain to its public key. Private material is sealed at
//! rest under Argon2id + AES-256-GCM and only decrypted into memory that is
//! zeroized on drop.
//!
//! Core code treats the signer as a capability object (`NodeSigner`);
//! tests inject `DeterministicSigner`.

pub mod keystore;
pub mod signer;

pub use keystore::{Keystore, KeystoreError};
pub use signer::{node_id_for, DeterministicSigner, LocalSigner, NodeSigner};
