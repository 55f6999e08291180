//! Event envelope and draft types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::canonical::{compute_event_hash, HashHeader};

/// The atomic append unit: signed, hashed, and linked.
///
/// `seq` is the authoritative ordering; `ts` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque 128-bit unique id.
    pub event_id: Uuid,
    /// Strictly increasing append index, assigned inside the write
    /// transaction. Genesis is `seq == 0`.
    pub seq: u64,
    /// Nanosecond-precision UTC timestamp.
    pub ts: DateTime<Utc>,
    /// Dotted type tag, e.g. `signal.ta.v1`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Schema version of the payload, versioned per type.
    pub schema_version: String,
    /// Producer/subsystem identifier.
    pub source: Option<String>,
    /// Correlation id (the cycle id for brain-emitted events).
    pub trace_id: Option<String>,
    /// Idempotency key, unique per `type`.
    pub dedupe_key: Option<String>,
    /// Structured payload.
    pub payload: Value,
    /// Hash of the preceding event, or the signed genesis hash.
    pub prev_hash: String,
    /// SHA-256 over canonical header and payload bytes, lowercase hex.
    pub hash: String,
    /// Node id of the signing identity.
    pub signer: String,
    /// Ed25519 signature over (hash bytes, signer), lowercase hex.
    pub signature: String,
}

impl Event {
    /// Recompute this event's hash from its stored fields.
    pub fn recompute_hash(&self) -> String {
        compute_event_hash(
            &HashHeader {
                event_id: &self.event_id,
                seq: self.seq,
                ts: &self.ts,
                event_type: &self.event_type,
                schema_version: &self.schema_version,
                source: self.source.as_deref(),
                trace_id: self.trace_id.as_deref(),
                dedupe_key: self.dedupe_key.as_deref(),
                prev_hash: &self.prev_hash,
            },
            &self.payload,
        )
    }

    /// Deserialize the payload into a typed struct.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// An event before sequencing: everything the caller controls.
///
/// The store assigns `seq`, `ts`, `prev_hash`, `hash`, `signer` and
/// `signature` inside the append transaction. `event_id` is normally
/// store-assigned too; callers that must reference an event from a
/// sibling in the same batch may pre-allocate it.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_id: Option<Uuid>,
    pub event_type: String,
    pub schema_version: String,
    pub source: Option<String>,
    pub trace_id: Option<String>,
    pub dedupe_key: Option<String>,
    pub payload: Value,
}

impl EventDraft {
    /// New draft with schema version `v1` and no optional headers.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload,
        }
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_dedupe(mut self, dedupe_key: impl Into<String>) -> Self {
        self.dedupe_key = Some(dedupe_key.into());
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }
}

/// Kill-switch level. Monotonic: automatic transitions only ever raise it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum KillLevel {
    #[default]
    L0Nominal = 0,
    L1Caution = 1,
    L2Defensive = 2,
    L3Lockdown = 3,
    L4Emergency = 4,
}

impl KillLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(KillLevel::L0Nominal),
            1 => Some(KillLevel::L1Caution),
            2 => Some(KillLevel::L2Defensive),
            3 => Some(KillLevel::L3Lockdown),
            4 => Some(KillLevel::L4Emergency),
            _ => None,
        }
    }

    /// New positions require nominal operation.
    pub fn allows_open(self) -> bool {
        self == KillLevel::L0Nominal
    }

    /// Exits stay allowed through L2; L3 and above refuse all intents.
    pub fn allows_exit(self) -> bool {
        self < KillLevel::L3Lockdown
    }
}

impl std::fmt::Display for KillLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KillLevel::L0Nominal => "L0_NOMINAL",
            KillLevel::L1Caution => "L1_CAUTION",
            KillLevel::L2Defensive => "L2_DEFENSIVE",
            KillLevel::L3Lockdown => "L3_LOCKDOWN",
            KillLevel::L4Emergency => "L4_EMERGENCY",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recompute_hash_matches_stored_fields() {
        let draft = EventDraft::new("signal.ta.v1", json!({"asset": "BTC", "rsi": 24.1}))
            .with_source("producer.ta");

        let ev = Event {
            event_id: Uuid::nil(),
            seq: 3,
            ts: Utc::now(),
            event_type: draft.event_type.clone(),
            schema_version: draft.schema_version.clone(),
            source: draft.source.clone(),
            trace_id: None,
            dedupe_key: None,
            payload: draft.payload.clone(),
            prev_hash: "ab".repeat(32),
            hash: String::new(),
            signer: "b1e55ed-00000000".to_string(),
            signature: String::new(),
        };

        let h = ev.recompute_hash();
        assert_eq!(h.len(), 64);
        // Tampering with the payload changes the recomputed hash.
        let mut tampered = ev.clone();
        tampered.payload = json!({"asset": "BTC", "rsi": 99.0});
        assert_ne!(h, tampered.recompute_hash());
    }

    #[test]
    fn test_kill_level_ordering_and_gates() {
        assert!(KillLevel::L0Nominal < KillLevel::L4Emergency);
        assert!(KillLevel::L0Nominal.allows_open());
        assert!(!KillLevel::L1Caution.allows_open());
        assert!(KillLevel::L2Defensive.allows_exit());
        assert!(!KillLevel::L3Lockdown.allows_exit());
        assert_eq!(KillLevel::from_u8(4), Some(KillLevel::L4Emergency));
        assert_eq!(KillLevel::from_u8(5), None);
    }
}
