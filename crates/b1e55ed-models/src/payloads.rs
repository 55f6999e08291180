//! Typed payloads per event type.
//!
//! Events store payloads as JSON maps; these structs are the validated
//! shapes on either side of the boundary. Producers and projections use
//! `Event::payload_as` / `serde_json::to_value` to cross it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::KillLevel;

/// `system.genesis.v1` - first stored event; commits to the signer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisPayload {
    /// Raw Ed25519 public key, lowercase hex.
    pub public_key: String,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
}

/// `system.checkpoint.v1` - periodic signed commitment to `{seq, hash}`.
///
/// The minimum unit fast-verify must cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub seq: u64,
    pub hash: String,
    pub node_id: String,
}

/// `system.kill_switch.v1` - every level transition is an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchPayload {
    pub from: KillLevel,
    pub to: KillLevel,
    pub reason: String,
    /// `"auto"` for triggered escalations, `"operator"` otherwise.
    pub actor: String,
}

/// Direction of a position or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Serialize-based Display for enums whose serde names are the canonical
/// string form.
macro_rules! fmt_via_serde {
    () => {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = serde_json::to_value(self)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            write!(f, "{s}")
        }
    };
}

/// Coarse market-state label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    EarlyBull,
    Bull,
    Chop,
    Bear,
    Crisis,
}

impl Regime {
    /// Leverage cap applied to position sizing per regime.
    pub fn leverage_cap(self) -> f64 {
        match self {
            Regime::EarlyBull => 1.0,
            Regime::Bull => 1.0,
            Regime::Chop => 0.5,
            Regime::Bear => 0.5,
            Regime::Crisis => 0.0,
        }
    }
}

impl std::fmt::Display for Regime {
    fmt_via_serde!();
}

/// `regime.changed.v1` - emitted only on transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeChangedPayload {
    pub regime: Regime,
    pub previous: Option<Regime>,
    pub confidence: f64,
    /// Feature evidence behind the classification.
    pub features: Value,
}

/// `brain.cycle.v1` - cycle marker; the trace id is the cycle id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMarkerPayload {
    pub cycle_id: Uuid,
    pub snapshot_seq: u64,
    pub assets: Vec<String>,
    pub full: bool,
}

/// `cycle.partial.v1` - a phase deadline expired; the cycle completed what
/// it could and was not retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclePartialPayload {
    pub cycle_id: Uuid,
    pub phase: String,
    pub completed_assets: Vec<String>,
    pub reason: String,
}

/// `brain.conviction.v1` - synthesis + counter-thesis output per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionPayload {
    pub asset: String,
    pub pcs: f64,
    pub cts: f64,
    /// clamp(pcs - cts, 0, 1)
    pub conviction: f64,
    pub regime: Regime,
    pub domains_used: Vec<String>,
    /// Per-domain scores at decision time; the learning loop correlates
    /// these with realized outcomes.
    #[serde(default)]
    pub domain_scores: std::collections::BTreeMap<String, f64>,
    /// SHA-256 over the canonical payload excluding this field.
    pub commitment_hash: String,
}

/// `intent.open.v1` - decision phase output; gated on kill level L0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentOpenPayload {
    pub asset: String,
    pub direction: Direction,
    pub entry: f64,
    pub size: f64,
    pub stop: f64,
    pub target: f64,
    pub conviction: f64,
    pub regime: Regime,
    /// Event id of the conviction event backing this intent.
    pub conviction_ref: Uuid,
}

/// `intent.close.v1` - close of a previously opened position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClosePayload {
    /// Event id of the opening intent.
    pub position_id: Uuid,
    pub asset: String,
    pub exit: f64,
    pub realized_pnl: f64,
    pub reason: String,
}

/// Contributor role; drives the ingress permission matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Agent,
    Curator,
    Tester,
}

impl std::fmt::Display for Role {
    fmt_via_serde!();
}

/// `contributor.register.v1` - registration is itself an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorRegisterPayload {
    pub contributor_id: Uuid,
    pub node_id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub metadata: Value,
}

/// `attribution.v1` - links a signal event to its contributor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionPayload {
    pub attribution_id: Uuid,
    pub contributor_id: Uuid,
    /// Event id of the attributed signal.
    pub event_id: Uuid,
    pub accepted: bool,
    pub asset: Option<String>,
    /// Contributor-declared confidence in [0,1], used for calibration.
    pub confidence: Option<f64>,
}

/// `attribution.outcome.v1` - learning-loop resolution of a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionOutcomePayload {
    pub attribution_id: Uuid,
    pub profitable: bool,
}

/// `karma.intent.v1` - pending profit-share obligation; live mode only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaIntentPayload {
    pub intent_id: Uuid,
    pub position_id: Uuid,
    pub profit: f64,
    pub amount: f64,
    pub node_id: String,
}

/// `karma.settle.v1` - closes intents atomically; half-settlement forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaSettlePayload {
    pub intent_ids: Vec<Uuid>,
    pub total: f64,
    pub destination: String,
    pub tx_hash: Option<String>,
    pub actor: String,
}

/// `karma.policy_change.v1` - only path to mutate settlement parameters
/// after the first settlement; requires elevated authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaPolicyChangePayload {
    pub percentage: f64,
    pub destination: String,
    pub actor: String,
}

/// `learning.weight_adjustment.v1` - weekly domain-weight delta. The live
/// weight vector is a projection over these events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAdjustmentPayload {
    /// domain -> signed delta, each bounded by the per-adjustment cap.
    pub deltas: std::collections::BTreeMap<String, f64>,
    pub reason: String,
    pub observations: u64,
}

/// `producer_health.stale.v1` / `producer_health.failing.v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerHealthPayload {
    pub producer: String,
    pub domain: String,
    /// Seconds since the producer's latest signal, if any was ever seen.
    pub staleness_seconds: Option<u64>,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_regime_serde_names() {
        assert_eq!(
            serde_json::to_value(Regime::EarlyBull).unwrap(),
            json!("EARLY_BULL")
        );
        assert_eq!(Regime::Crisis.to_string(), "CRISIS");
        assert_eq!(Regime::Crisis.leverage_cap(), 0.0);
    }

    #[test]
    fn test_kill_switch_payload_roundtrip() {
        let p = KillSwitchPayload {
            from: KillLevel::L0Nominal,
            to: KillLevel::L2Defensive,
            reason: "portfolio_heat_pct=0.064".to_string(),
            actor: "auto".to_string(),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["to"], json!("l2_defensive"));
        let back: KillSwitchPayload = serde_json::from_value(v).unwrap();
        assert_eq!(back.to, KillLevel::L2Defensive);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Operator.to_string(), "operator");
        assert_eq!(Role::Tester.to_string(), "tester");
    }
}
