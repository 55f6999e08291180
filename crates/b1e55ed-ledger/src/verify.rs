//! Hash-chain verification.
//!
//! Full verify recomputes every hash, checks every signature, and walks the
//! linkage from genesis to tip - O(n) and the default integrity gate.
//!
//! Fast verify covers the most recent `k` events, then re-anchors: the
//! whole file must be seq-contiguous from genesis, and at least one signed
//! checkpoint must exist below the inspected window whose recorded
//! `{seq, hash}` matches the stored row. Naive last-k verification would
//! accept a journal whose middle was cut out; the contiguity check and the
//! checkpoint anchor close that hole.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use b1e55ed_models::canonical::{genesis_prev_hash, signing_input};
use b1e55ed_models::event_types;
use b1e55ed_models::{CheckpointPayload, CoreError, Event, GenesisPayload, LedgerError};

use crate::store::EventStore;

/// Which verification ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Full,
    Fast { window: u64 },
}

/// Verification outcome.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub mode: VerifyMode,
    pub events_checked: u64,
    pub tip_seq: u64,
    /// Checkpoint seq the fast path anchored on, when applicable.
    pub anchor_seq: Option<u64>,
}

impl EventStore {
    /// Verify every event from genesis to tip.
    pub fn verify_full(&self) -> Result<VerifyReport, CoreError> {
        let pubkey = self.chain_public_key()?;
        let tip = self.tip_seq()?;

        let mut checked = 0u64;
        let mut expected_seq = 0u64;
        let mut expected_prev: Option<String> = None;

        self.for_each(0, tip, |event| {
            if event.seq != expected_seq {
                return Err(self.poison(event.seq));
            }
            if let Some(prev) = &expected_prev {
                if &event.prev_hash != prev {
                    return Err(self.poison(event.seq));
                }
            }
            verify_event(self, &pubkey, &event)?;
            expected_prev = Some(event.hash.clone());
            expected_seq += 1;
            checked += 1;
            Ok(())
        })?;

        if checked != tip + 1 {
            return Err(self.poison(checked));
        }

        Ok(VerifyReport {
            mode: VerifyMode::Full,
            events_checked: checked,
            tip_seq: tip,
            anchor_seq: None,
        })
    }

    /// Verify the most recent `window` events and re-anchor on a signed
    /// checkpoint. Opt-in: `verify_full` remains the default gate.
    pub fn verify_fast(&self, window: u64) -> Result<VerifyReport, CoreError> {
        let pubkey = self.chain_public_key()?;
        let tip = self.tip_seq()?;

        // Truncation check: a gap-free journal holds exactly tip+1 rows.
        let count = self.count()?;
        if count != tip + 1 {
            tracing::error!(count, tip, "journal row count does not match tip");
            return Err(self.poison(count.min(tip)));
        }

        let window_start = tip.saturating_sub(window.saturating_sub(1));

        // Re-anchor below the window unless the window reaches genesis.
        let mut anchor_seq = None;
        if window_start > 0 {
            let anchor = self
                .events_by_type_desc(event_types::CHECKPOINT, window_start - 1, 1)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    tracing::error!(
                        window_start,
                        "no checkpoint anchors the fast-verify window"
                    );
                    CoreError::Ledger(LedgerError::ChainBroken { seq: window_start })
                })?;

            verify_event(self, &pubkey, &anchor)?;
            let payload: CheckpointPayload = anchor
                .payload_as()
                .map_err(|_| self.poison(anchor.seq))?;

            let referenced = self
                .event_at(payload.seq)?
                .ok_or_else(|| self.poison(payload.seq))?;
            if referenced.hash != payload.hash {
                return Err(self.poison(payload.seq));
            }
            anchor_seq = Some(anchor.seq);
        }

        let mut checked = 0u64;
        let mut expected_prev: Option<String> = None;
        self.for_each(window_start, tip, |event| {
            if let Some(prev) = &expected_prev {
                if &event.prev_hash != prev {
                    return Err(self.poison(event.seq));
                }
            }
            verify_event(self, &pubkey, &event)?;
            expected_prev = Some(event.hash.clone());
            checked += 1;
            Ok(())
        })?;

        Ok(VerifyReport {
            mode: VerifyMode::Fast { window },
            events_checked: checked,
            tip_seq: tip,
            anchor_seq,
        })
    }

    /// Public key the chain is bound to, taken from the genesis payload and
    /// cross-checked against the genesis `prev_hash` binding.
    pub fn chain_public_key(&self) -> Result<VerifyingKey, CoreError> {
        let genesis = self.genesis()?;
        if genesis.event_type != event_types::GENESIS {
            return Err(self.poison(0));
        }
        let payload: GenesisPayload = genesis
            .payload_as()
            .map_err(|_| CoreError::Ledger(LedgerError::GenesisMismatch))?;
        let key_bytes = hex::decode(&payload.public_key)
            .map_err(|_| CoreError::Ledger(LedgerError::GenesisMismatch))?;
        let key_arr: [u8; 32] = key_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Ledger(LedgerError::GenesisMismatch))?;

        if genesis.prev_hash != genesis_prev_hash(&key_arr) {
            return Err(CoreError::Ledger(LedgerError::GenesisMismatch));
        }

        VerifyingKey::from_bytes(&key_arr)
            .map_err(|_| CoreError::Ledger(LedgerError::GenesisMismatch))
    }
}

/// Recompute one event's hash and check its signature.
fn verify_event(
    store: &EventStore,
    pubkey: &VerifyingKey,
    event: &Event,
) -> Result<(), CoreError> {
    if event.recompute_hash() != event.hash {
        return Err(store.poison(event.seq));
    }

    let Some(msg) = signing_input(&event.hash, &event.signer) else {
        return Err(store.poison(event.seq));
    };
    let sig_bytes = hex::decode(&event.signature).map_err(|_| store.poison(event.seq))?;
    let sig_arr: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| store.poison(event.seq))?;

    pubkey
        .verify(&msg, &Signature::from_bytes(&sig_arr))
        .map_err(|_| store.poison(event.seq))?;
    Ok(())
}
