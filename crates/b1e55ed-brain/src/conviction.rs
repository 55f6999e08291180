//! Conviction phase: counter-thesis scoring.
//!
//! High PCS triggers a rule-based devil's advocate that enumerates
//! explicit opposing factors. It exists to prevent high-confidence
//! mistakes, not to find trades: final conviction = clamp(PCS - CTS, 0, 1).

use b1e55ed_ledger::EventStore;
use b1e55ed_models::canonical::payload_hash;
use b1e55ed_models::{
    event_types, BrainConfig, ConvictionPayload, CoreError, Event, EventDraft, Regime,
};
use serde_json::json;

use crate::synthesis::SynthesisResult;

/// Conviction output per asset.
#[derive(Debug, Clone)]
pub struct ConvictionResult {
    pub asset: String,
    pub pcs: f64,
    pub cts: f64,
    pub conviction: f64,
    pub counter_factors: Vec<String>,
    pub regime: Regime,
}

/// Phase 5 scorer.
pub struct ConvictionEngine;

impl ConvictionEngine {
    /// Apply counter-thesis scoring when PCS reaches the trigger.
    pub fn compute(
        synthesis: &SynthesisResult,
        regime: Regime,
        config: &BrainConfig,
    ) -> ConvictionResult {
        let pcs = synthesis.pcs;
        let (cts, counter_factors) = if pcs >= config.cts_trigger {
            Self::counter_thesis(synthesis, regime)
        } else {
            (0.0, Vec::new())
        };

        ConvictionResult {
            asset: synthesis.asset.clone(),
            pcs,
            cts,
            conviction: (pcs - cts).clamp(0.0, 1.0),
            counter_factors,
            regime,
        }
    }

    /// Enumerate opposing evidence. Each factor carries a fixed penalty;
    /// contradictions on top of an already-confident score ramp harder.
    fn counter_thesis(synthesis: &SynthesisResult, regime: Regime) -> (f64, Vec<String>) {
        let features = &synthesis.features;
        let mut factors = Vec::new();
        let mut penalty: f64 = 0.0;

        if let Some(rsi) = features.get("rsi_14") {
            if *rsi >= 70.0 {
                factors.push(format!("overbought: rsi_14={rsi:.1}"));
                penalty += 0.25;
            }
        }
        if let Some(funding) = features.get("funding_annualized") {
            if *funding >= 30.0 {
                factors.push(format!("crowded longs: funding_annualized={funding:.1}"));
                penalty += 0.25;
            }
        }
        if let Some(basis) = features.get("basis_annualized") {
            if *basis >= 8.0 {
                factors.push(format!("stretched basis: basis_annualized={basis:.1}"));
                penalty += 0.20;
            }
        }
        if regime == Regime::Crisis {
            factors.push("regime: CRISIS".to_string());
            penalty += 0.30;
        }

        if synthesis.pcs > 0.75 && !factors.is_empty() {
            penalty += 0.10;
        }

        (penalty.clamp(0.0, 1.0), factors)
    }

    /// Emit `brain.conviction.v1` with a commitment hash over the payload
    /// minus the hash field itself.
    pub fn emit(
        store: &EventStore,
        result: &ConvictionResult,
        domain_scores: &std::collections::BTreeMap<String, f64>,
        trace_id: &str,
    ) -> Result<Event, CoreError> {
        let domains_used: Vec<String> = domain_scores.keys().cloned().collect();
        let without_commitment = json!({
            "asset": result.asset,
            "pcs": result.pcs,
            "cts": result.cts,
            "conviction": result.conviction,
            "regime": result.regime,
            "domains_used": domains_used,
            "domain_scores": domain_scores,
        });
        let commitment_hash = payload_hash(&without_commitment);

        let payload = ConvictionPayload {
            asset: result.asset.clone(),
            pcs: result.pcs,
            cts: result.cts,
            conviction: result.conviction,
            regime: result.regime,
            domains_used,
            domain_scores: domain_scores.clone(),
            commitment_hash,
        };

        store.append(
            EventDraft::new(
                event_types::CONVICTION,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.conviction")
            .with_trace(trace_id),
        )
    }
}
