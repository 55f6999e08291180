//! Regime phase: deterministic market-state classification.
//!
//! Rule counting over the features synthesis already extracted (trend,
//! basis/funding proxies, volatility, sentiment). Emits
//! `regime.changed.v1` only on transition; the current label lives in the
//! regime projection, not in this detector.

use std::collections::BTreeMap;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, CoreError, Event, EventDraft, Regime, RegimeChangedPayload,
};
use b1e55ed_projections::RegimeView;

/// Classification plus the evidence that produced it.
#[derive(Debug, Clone)]
pub struct RegimeResult {
    pub regime: Regime,
    pub confidence: f64,
    pub features: BTreeMap<String, f64>,
}

/// Phase 4 classifier.
pub struct RegimeDetector;

impl RegimeDetector {
    /// Classify from the reference asset's feature vector.
    pub fn classify(features: &BTreeMap<String, f64>) -> RegimeResult {
        let funding = features.get("funding_annualized").copied();
        let basis = features.get("basis_annualized").copied();
        let rsi = features.get("rsi_14").copied();
        let fear_greed = features.get("fear_greed").copied();
        let trend = features.get("trend_strength").copied();
        let volume = features.get("volume_ratio").copied();

        let mut bull = 0u32;
        let mut early = 0u32;
        let mut bear = 0u32;
        let mut crisis = 0u32;
        let mut observed = 0u32;

        if let Some(f) = funding {
            observed += 1;
            if (5.0..30.0).contains(&f) {
                bull += 1;
            }
            if f < 0.0 {
                bear += 1;
            }
            if f < -10.0 {
                crisis += 1;
            }
        }
        if let Some(b) = basis {
            observed += 1;
            if (3.0..8.0).contains(&b) {
                bull += 1;
            }
            if b < 2.0 {
                bear += 1;
            }
            if !(1.0..=8.0).contains(&b) {
                crisis += 1;
            }
        }
        if let Some(r) = rsi {
            observed += 1;
            if r > 50.0 {
                bull += 1;
            }
            if r < 30.0 {
                bear += 1;
            }
            // Recovering from oversold with trend behind it.
            if (30.0..45.0).contains(&r) && trend.unwrap_or(0.0) > 0.5 {
                early += 1;
            }
        }
        if let Some(fg) = fear_greed {
            observed += 1;
            if fg > 40.0 {
                bull += 1;
            }
            if fg < 25.0 {
                bear += 1;
            }
            if fg < 15.0 {
                crisis += 1;
            }
            if (15.0..30.0).contains(&fg) && volume.unwrap_or(0.0) > 1.5 {
                early += 1;
            }
        }

        let regime = if crisis >= 2 {
            Regime::Crisis
        } else if early >= 2 {
            Regime::EarlyBull
        } else if bull >= 3 {
            Regime::Bull
        } else if bear >= 3 {
            Regime::Bear
        } else {
            Regime::Chop
        };

        // Confidence scales with how much evidence we actually had and how
        // decisive the winning count was.
        let winning = match regime {
            Regime::Crisis => crisis,
            Regime::EarlyBull => early,
            Regime::Bull => bull,
            Regime::Bear => bear,
            Regime::Chop => 0,
        };
        let coverage = observed as f64 / 4.0;
        let confidence = if regime == Regime::Chop {
            (0.5 * coverage).clamp(0.0, 1.0)
        } else {
            (winning as f64 / 4.0 * coverage.max(0.25)).clamp(0.0, 1.0)
        };

        RegimeResult {
            regime,
            confidence,
            features: features.clone(),
        }
    }

    /// Emit `regime.changed.v1` when the classification differs from the
    /// label in force at the snapshot.
    pub fn emit_if_changed(
        store: &EventStore,
        current: &RegimeView,
        result: &RegimeResult,
        trace_id: &str,
    ) -> Result<Option<Event>, CoreError> {
        let previous = current.current.as_ref().map(|c| c.regime);
        if previous == Some(result.regime) {
            return Ok(None);
        }

        let payload = RegimeChangedPayload {
            regime: result.regime,
            previous,
            confidence: result.confidence,
            features: serde_json::to_value(&result.features)
                .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
        };
        let event = store.append(
            EventDraft::new(
                event_types::REGIME_CHANGED,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.regime")
            .with_trace(trace_id),
        )?;
        tracing::info!(regime = %result.regime, confidence = result.confidence, "regime changed");
        Ok(Some(event))
    }
}
