//! Signed projection snapshots.
//!
//! A snapshot is a sidecar artifact that accelerates restart; it never
//! replaces the log and the log is never truncated. The state hash is
//! signed by the node key so a tampered snapshot is rejected on load and
//! the reader falls back to full replay.

use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use b1e55ed_identity::NodeSigner;
use b1e55ed_models::canonical::canonical_payload_bytes;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed snapshot: {0}")]
    Malformed(String),

    #[error("snapshot signature rejected")]
    SignatureRejected,

    #[error("signer unavailable")]
    SignerUnavailable,
}

/// On-disk snapshot envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub view: String,
    pub up_to_seq: u64,
    pub state: serde_json::Value,
    pub state_hash: String,
    pub node_id: String,
    pub signature: String,
}

impl ProjectionSnapshot {
    /// Serialize a view's state, hash it canonically, sign, and write.
    pub fn write<S: Serialize>(
        path: &Path,
        view_name: &str,
        up_to_seq: u64,
        state: &S,
        signer: &dyn NodeSigner,
    ) -> Result<(), SnapshotError> {
        let state = serde_json::to_value(state)
            .map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        let state_hash = hex::encode(Sha256::digest(canonical_payload_bytes(&state)));

        let signature = signer
            .try_sign(signing_msg(view_name, up_to_seq, &state_hash).as_bytes())
            .map_err(|_| SnapshotError::SignerUnavailable)?;

        let snapshot = ProjectionSnapshot {
            view: view_name.to_string(),
            up_to_seq,
            state,
            state_hash,
            node_id: signer.node_id().to_string(),
            signature: hex::encode(signature),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a snapshot, verifying the state hash and signature against the
    /// node key. Returns the state and the seq it covers.
    pub fn load<S: DeserializeOwned>(
        path: &Path,
        signer: &dyn NodeSigner,
    ) -> Result<(S, u64), SnapshotError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: ProjectionSnapshot =
            serde_json::from_str(&raw).map_err(|e| SnapshotError::Malformed(e.to_string()))?;

        let recomputed = hex::encode(Sha256::digest(canonical_payload_bytes(&snapshot.state)));
        if recomputed != snapshot.state_hash {
            return Err(SnapshotError::SignatureRejected);
        }

        let sig_bytes = hex::decode(&snapshot.signature)
            .map_err(|_| SnapshotError::Malformed("bad signature hex".into()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SnapshotError::Malformed("bad signature length".into()))?;
        let msg = signing_msg(&snapshot.view, snapshot.up_to_seq, &snapshot.state_hash);
        if !signer.verify(msg.as_bytes(), &sig_arr) {
            return Err(SnapshotError::SignatureRejected);
        }

        let state = serde_json::from_value(snapshot.state)
            .map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        Ok((state, snapshot.up_to_seq))
    }
}

fn signing_msg(view: &str, up_to_seq: u64, state_hash: &str) -> String {
    format!("snapshot:{view}:{up_to_seq}:{state_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::PositionsView;
    use b1e55ed_identity::DeterministicSigner;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.snapshot.json");
        let signer = DeterministicSigner::of_byte(1);

        let view = PositionsView::default();
        ProjectionSnapshot::write(&path, "positions", 42, &view, &signer).unwrap();

        let (loaded, up_to_seq): (PositionsView, u64) =
            ProjectionSnapshot::load(&path, &signer).unwrap();
        assert_eq!(loaded, view);
        assert_eq!(up_to_seq, 42);
    }

    #[test]
    fn test_tampered_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.snapshot.json");
        let signer = DeterministicSigner::of_byte(1);

        ProjectionSnapshot::write(&path, "positions", 7, &PositionsView::default(), &signer)
            .unwrap();

        // Flip a byte of state on disk.
        let raw = std::fs::read_to_string(&path).unwrap();
        let tampered = raw.replace(r#""up_to_seq":7"#, r#""up_to_seq":9"#);
        std::fs::write(&path, tampered).unwrap();

        let err = ProjectionSnapshot::load::<PositionsView>(&path, &signer).unwrap_err();
        assert!(matches!(err, SnapshotError::SignatureRejected));
    }

    #[test]
    fn test_snapshot_from_other_node_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.snapshot.json");

        let writer = DeterministicSigner::of_byte(1);
        ProjectionSnapshot::write(&path, "positions", 7, &PositionsView::default(), &writer)
            .unwrap();

        let other = DeterministicSigner::of_byte(2);
        let err = ProjectionSnapshot::load::<PositionsView>(&path, &other).unwrap_err();
        assert!(matches!(err, SnapshotError::SignatureRejected));
    }
}
