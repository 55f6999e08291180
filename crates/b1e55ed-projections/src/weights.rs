//! Domain-weight view.
//!
//! The live weight vector is not configuration: it is a fold over
//! `learning.weight_adjustment.v1` events on top of the cold-start
//! defaults. Adjustment rules:
//!
//! - per-domain weight clamped to [W_MIN, W_MAX]
//! - each adjustment delta clamped to +/-DELTA_MAX
//! - before 30 days of log history, adjustments are suppressed entirely
//! - between 30 and 90 days, the delta cap is halved

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use b1e55ed_models::config::DomainWeights;
use b1e55ed_models::{event_types, Event, WeightAdjustmentPayload};

use crate::projector::View;

const COLD_START_DAYS: i64 = 30;
const WARM_PERIOD_DAYS: i64 = 90;

/// One applied (or suppressed) adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub seq: u64,
    pub applied: BTreeMap<String, f64>,
    pub suppressed: bool,
}

/// Folds the weight history. Always recomputable from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsView {
    pub weights: BTreeMap<String, f64>,
    pub history: Vec<WeightAdjustment>,
    genesis_ts: Option<DateTime<Utc>>,
}

impl Default for WeightsView {
    fn default() -> Self {
        Self {
            weights: DomainWeights::default().as_map(),
            history: Vec::new(),
            genesis_ts: None,
        }
    }
}

impl WeightsView {
    pub fn weight(&self, domain: &str) -> f64 {
        self.weights.get(domain).copied().unwrap_or(0.0)
    }

    /// Effective per-adjustment delta cap given log age; `None` while
    /// cold-starting.
    fn delta_cap(&self, at: DateTime<Utc>) -> Option<f64> {
        let genesis = self.genesis_ts?;
        let age_days = (at - genesis).num_days();
        if age_days < COLD_START_DAYS {
            None
        } else if age_days < WARM_PERIOD_DAYS {
            Some(DomainWeights::DELTA_MAX / 2.0)
        } else {
            Some(DomainWeights::DELTA_MAX)
        }
    }
}

impl View for WeightsView {
    fn interested(&self) -> &'static [&'static str] {
        &[event_types::GENESIS, event_types::WEIGHT_ADJUSTMENT]
    }

    fn apply(&mut self, event: &Event) {
        match event.event_type.as_str() {
            event_types::GENESIS => {
                self.genesis_ts = Some(event.ts);
            }
            event_types::WEIGHT_ADJUSTMENT => {
                let Ok(payload) = event.payload_as::<WeightAdjustmentPayload>() else {
                    tracing::warn!(seq = event.seq, "malformed weight_adjustment payload");
                    return;
                };

                let Some(cap) = self.delta_cap(event.ts) else {
                    tracing::info!(seq = event.seq, "weight adjustment suppressed (cold start)");
                    self.history.push(WeightAdjustment {
                        seq: event.seq,
                        applied: BTreeMap::new(),
                        suppressed: true,
                    });
                    return;
                };

                let mut applied = BTreeMap::new();
                for (domain, delta) in payload.deltas {
                    if !self.weights.contains_key(&domain) {
                        tracing::warn!(seq = event.seq, %domain, "unknown weight domain ignored");
                        continue;
                    }
                    let bounded = delta.clamp(-cap, cap);
                    let current = self.weight(&domain);
                    let next = (current + bounded).clamp(DomainWeights::W_MIN, DomainWeights::W_MAX);
                    applied.insert(domain.clone(), next - current);
                    self.weights.insert(domain, next);
                }
                self.history.push(WeightAdjustment {
                    seq: event.seq,
                    applied,
                    suppressed: false,
                });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn genesis_event(ts: DateTime<Utc>) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            seq: 0,
            ts,
            event_type: event_types::GENESIS.to_string(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: json!({}),
            prev_hash: String::new(),
            hash: String::new(),
            signer: String::new(),
            signature: String::new(),
        }
    }

    fn adjustment_event(seq: u64, ts: DateTime<Utc>, domain: &str, delta: f64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            seq,
            ts,
            event_type: event_types::WEIGHT_ADJUSTMENT.to_string(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: json!({
                "deltas": {domain: delta},
                "reason": "weekly",
                "observations": 40,
            }),
            prev_hash: String::new(),
            hash: String::new(),
            signer: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_cold_start_suppresses_adjustment() {
        let genesis_ts = Utc::now();
        let mut view = WeightsView::default();
        view.apply(&genesis_event(genesis_ts));
        view.apply(&adjustment_event(
            5,
            genesis_ts + Duration::days(10),
            "technical",
            0.02,
        ));

        assert_eq!(view.weight("technical"), 0.10);
        assert!(view.history[0].suppressed);
    }

    #[test]
    fn test_warm_period_halves_delta() {
        let genesis_ts = Utc::now();
        let mut view = WeightsView::default();
        view.apply(&genesis_event(genesis_ts));
        view.apply(&adjustment_event(
            5,
            genesis_ts + Duration::days(45),
            "technical",
            0.02,
        ));

        // 0.10 + min(0.02, DELTA_MAX/2) = 0.11
        assert!((view.weight("technical") - 0.11).abs() < 1e-9);
    }

    #[test]
    fn test_mature_log_applies_full_delta_and_clamps() {
        let genesis_ts = Utc::now();
        let mut view = WeightsView::default();
        view.apply(&genesis_event(genesis_ts));

        let ts = genesis_ts + Duration::days(100);
        view.apply(&adjustment_event(5, ts, "technical", 0.05));
        // Delta clamped to 0.02.
        assert!((view.weight("technical") - 0.12).abs() < 1e-9);

        // Drive events weight toward the floor; it cannot cross W_MIN.
        for seq in 6..30 {
            view.apply(&adjustment_event(seq, ts, "events", -0.02));
        }
        assert!((view.weight("events") - DomainWeights::W_MIN).abs() < 1e-9);
    }
}
