//! The compound learning loop.
//!
//! Match closed positions to the conviction that opened them, correlate
//! each domain's score at entry with the realized outcome, and propose a
//! weight adjustment event. The live weight vector stays a projection:
//! this module only ever emits `learning.weight_adjustment.v1`; the fold
//! applies the clamp band, the cold-start suppression, and the warm-period
//! halving.
//!
//! Cold start discipline:
//! - first 30 days of log history: observe only
//! - 30-90 days: half-sized adjustments
//! - 90+ days: full +/-2% deltas
//!
//! Overfitting protection: if the recent adjustments each ran into a worse
//! realized window than the one before, the proposal reverts toward the
//! cold-start defaults instead of chasing the curve.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::config::DomainWeights;
use b1e55ed_models::{
    event_types, ConvictionPayload, CoreError, Event, EventDraft, IntentOpenPayload,
    WeightAdjustmentPayload,
};
use b1e55ed_projections::{PositionsView, Projector};

/// Closed positions examined per adjustment window.
const ADJUSTMENT_WINDOW_DAYS: i64 = 30;
/// Minimum closed positions before any adjustment is proposed.
const MIN_OBSERVATIONS: usize = 20;
/// Minimum samples per domain before its correlation counts.
const MIN_DOMAIN_SAMPLES: usize = 5;
/// Consecutive degrading windows before a reversion proposal.
const REVERSION_THRESHOLD: usize = 3;

/// Outcome of one learning pass.
#[derive(Debug, Clone)]
pub struct LearningResult {
    pub observations: usize,
    pub deltas: BTreeMap<String, f64>,
    pub applied: bool,
    pub reason: String,
}

/// Weekly (or operator-invoked) weight adjuster.
pub struct LearningLoop {
    store: Arc<EventStore>,
}

impl LearningLoop {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// Examine the last window of closed positions and, when the evidence
    /// supports it, emit a weight-adjustment event.
    pub fn adjust_weights(&self) -> Result<LearningResult, CoreError> {
        let tip = self.store.tip_seq()?;
        let now = Utc::now();
        let window_start = now - Duration::days(ADJUSTMENT_WINDOW_DAYS);

        let projector = Projector::new(Arc::clone(&self.store));
        let positions: PositionsView = projector.replay(0, tip)?;

        // Closed positions inside the window, with their conviction events.
        let mut window_pnl = 0.0;
        let mut samples: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        let mut observations = 0usize;

        for position in positions.positions.values() {
            let Some(pnl) = position.realized_pnl else {
                continue;
            };
            let Some(closed_seq) = position.closed_seq else {
                continue;
            };
            let Some(close_event) = self.store.event_at(closed_seq)? else {
                continue;
            };
            if close_event.ts < window_start {
                continue;
            }

            observations += 1;
            window_pnl += pnl;
            let outcome = if pnl > 0.0 { 1.0 } else { -1.0 };

            let Some(scores) = self.domain_scores_at_entry(position.id)? else {
                continue;
            };
            for (domain, score) in scores {
                samples.entry(domain).or_default().push((score, outcome));
            }
        }

        if observations < MIN_OBSERVATIONS {
            return Ok(LearningResult {
                observations,
                deltas: BTreeMap::new(),
                applied: false,
                reason: "insufficient_data".to_string(),
            });
        }

        // Reversion: recent adjustments that each made the window worse
        // mean the loop is curve-fitting; undo instead of doubling down.
        let deltas = if self.degrading_streak(tip, window_pnl)? >= REVERSION_THRESHOLD {
            self.reversion_deltas(tip)?
        } else {
            correlation_deltas(&samples)
        };

        if deltas.values().all(|d| d.abs() < 1e-12) {
            return Ok(LearningResult {
                observations,
                deltas,
                applied: false,
                reason: "no_signal".to_string(),
            });
        }

        let payload = WeightAdjustmentPayload {
            deltas: deltas.clone(),
            reason: format!("window_pnl={window_pnl:.2}"),
            observations: observations as u64,
        };
        self.store.append(
            EventDraft::new(
                event_types::WEIGHT_ADJUSTMENT,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.learning")
            // One adjustment per ISO week.
            .with_dedupe(format!("weights:{}", now.format("%G-W%V"))),
        )?;

        Ok(LearningResult {
            observations,
            deltas,
            applied: true,
            reason: "adjusted".to_string(),
        })
    }

    /// Domain scores recorded on the conviction event that opened a
    /// position (via the open intent's `conviction_ref`).
    fn domain_scores_at_entry(
        &self,
        position_id: Uuid,
    ) -> Result<Option<BTreeMap<String, f64>>, CoreError> {
        let Some(open_event) = self.store.event_by_id(&position_id)? else {
            return Ok(None);
        };
        let Ok(open) = open_event.payload_as::<IntentOpenPayload>() else {
            return Ok(None);
        };
        let Some(conviction_event) = self.store.event_by_id(&open.conviction_ref)? else {
            return Ok(None);
        };
        let Ok(conviction) = conviction_event.payload_as::<ConvictionPayload>() else {
            return Ok(None);
        };
        if conviction.domain_scores.is_empty() {
            return Ok(None);
        }
        Ok(Some(conviction.domain_scores))
    }

    /// Count how many of the most recent adjustment events recorded a
    /// strictly better window than the one after them (newest included via
    /// `current_pnl`).
    fn degrading_streak(&self, tip: u64, current_pnl: f64) -> Result<usize, CoreError> {
        let recent = self.store.events_by_type_desc(
            event_types::WEIGHT_ADJUSTMENT,
            tip,
            REVERSION_THRESHOLD + 1,
        )?;

        let mut streak = 0usize;
        let mut later_pnl = current_pnl;
        for event in recent {
            let Some(pnl) = parse_window_pnl(&event) else {
                break;
            };
            if later_pnl < pnl {
                streak += 1;
                later_pnl = pnl;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Deltas stepping the current projected weights back toward the
    /// cold-start defaults, one capped step per domain.
    fn reversion_deltas(&self, tip: u64) -> Result<BTreeMap<String, f64>, CoreError> {
        let projector = Projector::new(Arc::clone(&self.store));
        let weights: b1e55ed_projections::WeightsView = projector.replay(0, tip)?;
        let defaults = DomainWeights::default().as_map();

        let mut deltas = BTreeMap::new();
        for (domain, default_weight) in defaults {
            let current = weights.weight(&domain);
            let gap = default_weight - current;
            deltas.insert(
                domain,
                gap.clamp(-DomainWeights::DELTA_MAX, DomainWeights::DELTA_MAX),
            );
        }
        tracing::warn!("learning loop degrading; proposing reversion toward defaults");
        Ok(deltas)
    }
}

/// Pearson correlation between a domain's entry score and realized
/// outcome, scaled to a delta.
fn correlation_deltas(samples: &BTreeMap<String, Vec<(f64, f64)>>) -> BTreeMap<String, f64> {
    let mut deltas = BTreeMap::new();
    for (domain, pairs) in samples {
        if pairs.len() < MIN_DOMAIN_SAMPLES {
            continue;
        }
        let corr = pearson(pairs);
        let delta = (corr * DomainWeights::DELTA_MAX)
            .clamp(-DomainWeights::DELTA_MAX, DomainWeights::DELTA_MAX);
        if delta.abs() >= 1e-12 {
            deltas.insert(domain.clone(), delta);
        }
    }
    deltas
}

fn pearson(pairs: &[(f64, f64)]) -> f64 {
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x) * (x - mean_x);
        var_y += (y - mean_y) * (y - mean_y);
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn parse_window_pnl(event: &Event) -> Option<f64> {
    let reason = event.payload.get("reason")?.as_str()?;
    reason.strip_prefix("window_pnl=")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_perfect_alignment() {
        let pairs: Vec<(f64, f64)> = (0..10)
            .map(|i| {
                let score = i as f64 / 10.0;
                (score, if score > 0.45 { 1.0 } else { -1.0 })
            })
            .collect();
        assert!(pearson(&pairs) > 0.7);
    }

    #[test]
    fn test_pearson_no_variance_is_zero() {
        let pairs = vec![(0.5, 1.0); 8];
        assert_eq!(pearson(&pairs), 0.0);
    }

    #[test]
    fn test_correlation_deltas_respect_cap_and_minimum() {
        let mut samples = BTreeMap::new();
        samples.insert(
            "technical".to_string(),
            (0..20)
                .map(|i| {
                    let score = i as f64 / 20.0;
                    (score, if score > 0.5 { 1.0 } else { -1.0 })
                })
                .collect::<Vec<_>>(),
        );
        // Too few samples for this one.
        samples.insert("social".to_string(), vec![(0.5, 1.0), (0.4, -1.0)]);

        let deltas = correlation_deltas(&samples);
        assert!(deltas.contains_key("technical"));
        assert!(!deltas.contains_key("social"));
        assert!(deltas["technical"] > 0.0);
        assert!(deltas["technical"] <= DomainWeights::DELTA_MAX);
    }

    #[test]
    fn test_window_pnl_roundtrip() {
        let payload = WeightAdjustmentPayload {
            deltas: BTreeMap::new(),
            reason: "window_pnl=-123.45".to_string(),
            observations: 30,
        };
        let event = Event {
            event_id: Uuid::new_v4(),
            seq: 1,
            ts: Utc::now(),
            event_type: event_types::WEIGHT_ADJUSTMENT.to_string(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: serde_json::to_value(&payload).unwrap(),
            prev_hash: String::new(),
            hash: String::new(),
            signer: String::new(),
            signature: String::new(),
        };
        assert_eq!(parse_window_pnl(&event), Some(-123.45));
    }
}
