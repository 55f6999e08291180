//! Synthesis phase: Per-Component Score.
//!
//! PCS is a weighted sum over domain scores in [0,1]. The weight vector
//! comes from the weights projection (never from mutable config), scaled
//! by the quality multipliers and renormalized, so a stale domain cannot
//! drag the score with confident nonsense.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::collection::AssetSignals;
use crate::quality::QualityReport;
use b1e55ed_projections::WeightsView;

/// Synthesis output for one asset.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub asset: String,
    pub domain_scores: BTreeMap<String, f64>,
    pub weights_used: BTreeMap<String, f64>,
    /// PCS in [0,1].
    pub pcs: f64,
    /// Raw features retained for the regime detector.
    pub features: BTreeMap<String, f64>,
}

/// Phase 3 scorer. Stateless; everything flows in.
pub struct Synthesis;

impl Synthesis {
    /// Compute PCS for one asset.
    pub fn synthesize(
        signals: &AssetSignals,
        weights: &WeightsView,
        quality: &QualityReport,
    ) -> SynthesisResult {
        let mut features = BTreeMap::new();
        let mut domain_scores = BTreeMap::new();

        for (domain, events) in &signals.by_domain {
            let mut scores = Vec::new();
            for event in events {
                collect_features(domain, &event.payload, &mut features);
                if let Some(score) = domain_score(domain, &event.payload) {
                    scores.push(score);
                }
            }
            if !scores.is_empty() {
                let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                domain_scores.insert(domain.clone(), clamp01(mean));
            }
        }

        // Quality-adjusted weights, renormalized over present domains.
        let mut adjusted: BTreeMap<String, f64> = BTreeMap::new();
        for (domain, weight) in &weights.weights {
            adjusted.insert(domain.clone(), weight * quality.multiplier(domain));
        }
        let total: f64 = adjusted.values().sum();
        let weights_used: BTreeMap<String, f64> = if total > 0.0 {
            adjusted.into_iter().map(|(d, w)| (d, w / total)).collect()
        } else {
            adjusted
        };

        let pcs = clamp01(
            domain_scores
                .iter()
                .map(|(domain, score)| weights_used.get(domain).copied().unwrap_or(0.0) * score)
                .sum(),
        );

        SynthesisResult {
            asset: signals.asset.clone(),
            domain_scores,
            weights_used,
            pcs,
            features,
        }
    }
}

/// Map a payload to a 0..1 bullishness score for its domain.
///
/// Deliberately simple rules; the learning loop adjusts the weights, not
/// the feature maps.
fn domain_score(domain: &str, payload: &Value) -> Option<f64> {
    let mut scores = Vec::new();

    match domain {
        "technical" => {
            if let Some(rsi) = field(payload, "rsi_14") {
                // 30 -> 1 (oversold, contrarian bullish), 70 -> 0.
                scores.push(clamp01((70.0 - rsi) / 40.0));
            }
            if let Some(strength) = field(payload, "trend_strength") {
                scores.push(clamp01(strength));
            }
            if let Some(ratio) = field(payload, "volume_ratio") {
                scores.push(clamp01((ratio - 0.5) / 2.0));
            }
            if let Some(imbalance) = field(payload, "imbalance") {
                scores.push(clamp01(0.5 + imbalance / 2.0));
            }
        }
        "onchain" => {
            if let Some(whale) = field(payload, "whale_netflow") {
                scores.push(clamp01(0.5 + whale / 200.0));
            }
            if let Some(flow) = field(payload, "exchange_flow") {
                // Inflow to exchanges is sell pressure.
                scores.push(clamp01(0.5 - flow / 200.0));
            }
            if let Some(momentum) = field(payload, "price_momentum_24h") {
                scores.push(clamp01(0.5 + momentum / 20.0));
            }
            if let Some(supply) = field(payload, "supply_change_24h") {
                scores.push(clamp01(0.5 + supply / 10.0));
            }
        }
        "tradfi" => {
            if let Some(funding) = field(payload, "funding_annualized") {
                // Healthy funding near 10; punish extremes both ways.
                scores.push(clamp01(1.0 - (funding - 10.0).abs() / 30.0));
            }
            if let Some(basis) = field(payload, "basis_annualized") {
                scores.push(clamp01(1.0 - (basis - 5.0).abs() / 8.0));
            }
            if let Some(flow) = field(payload, "daily_flow_usd") {
                scores.push(clamp01(0.5 + flow / 1.0e9));
            }
        }
        "social" => {
            if let Some(score) = field(payload, "score") {
                scores.push(clamp01((score + 10.0) / 20.0));
            }
            if let Some(fear_greed) = field(payload, "fear_greed") {
                // Low fear & greed is contrarian bullish.
                scores.push(clamp01((50.0 - fear_greed) / 50.0));
            }
        }
        "events" => {
            if let Some(sentiment) = field(payload, "headline_sentiment") {
                scores.push(clamp01((sentiment + 1.0) / 2.0));
            }
            if let Some(impact) = field(payload, "impact_score") {
                scores.push(clamp01(impact));
            }
        }
        "curator" => {
            if let Some(conviction) = field(payload, "conviction") {
                scores.push(clamp01(conviction / 10.0));
            }
            if let Some(direction) = payload.get("direction").and_then(|v| v.as_str()) {
                let bias = match direction {
                    "bullish" => 0.75,
                    "bearish" => 0.25,
                    _ => 0.5,
                };
                scores.push(bias);
            }
        }
        _ => {}
    }

    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Pull regime-relevant raw features out of a payload.
fn collect_features(domain: &str, payload: &Value, features: &mut BTreeMap<String, f64>) {
    const REGIME_FEATURES: &[(&str, &str)] = &[
        ("technical", "rsi_14"),
        ("technical", "trend_strength"),
        ("technical", "volume_ratio"),
        ("technical", "price"),
        ("technical", "volatility_band"),
        ("tradfi", "funding_annualized"),
        ("tradfi", "basis_annualized"),
        ("social", "fear_greed"),
    ];
    for (feature_domain, key) in REGIME_FEATURES {
        if domain == *feature_domain {
            if let Some(v) = field(payload, key) {
                features.insert((*key).to_string(), v);
            }
        }
    }
}

fn field(payload: &Value, key: &str) -> Option<f64> {
    payload.get(key)?.as_f64()
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
