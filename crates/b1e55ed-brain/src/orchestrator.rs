//! The brain cycle orchestrator.
//!
//! One pass: collection -> quality -> synthesis -> regime -> conviction ->
//! decision, all reads at the snapshot captured when the cycle starts.
//! The cycle and each producer fetch carry deadlines; a blown deadline
//! finishes the asset in flight, emits `cycle.partial.v1`, and returns -
//! the cycle is never retried automatically.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, Config, CoreError, CycleMarkerPayload, CyclePartialPayload, EventDraft,
    KillLevel, Regime, TransientError,
};
use b1e55ed_projections::{PositionsView, Projector, RegimeView, WeightsView};

use crate::collection::Collector;
use crate::conviction::ConvictionEngine;
use crate::decision::{DecisionEngine, DecisionVerdict};
use crate::feed::ProducerFeed;
use crate::kill_switch::{KillSwitch, RiskMetrics};
use crate::quality::QualityMonitor;
use crate::regime::RegimeDetector;
use crate::synthesis::{Synthesis, SynthesisResult};

/// Everything a cycle concluded.
#[derive(Debug)]
pub struct CycleResult {
    pub cycle_id: Uuid,
    pub snapshot_seq: u64,
    pub kill_level: KillLevel,
    pub regime: Regime,
    /// asset -> PCS.
    pub pcs: BTreeMap<String, f64>,
    /// asset -> final conviction.
    pub convictions: BTreeMap<String, f64>,
    /// Open intents emitted this cycle.
    pub intents: Vec<Uuid>,
    /// Assets whose open intent the kill switch refused.
    pub refused: Vec<String>,
    /// Phase that hit its deadline, when the cycle went partial.
    pub partial_phase: Option<String>,
}

/// The single cooperative task inside the writer process.
pub struct Orchestrator {
    store: Arc<EventStore>,
    config: Config,
    feeds: Vec<Arc<dyn ProducerFeed>>,
    failure_counts: std::sync::Mutex<BTreeMap<String, u32>>,
}

impl Orchestrator {
    pub fn new(store: Arc<EventStore>, config: Config) -> Self {
        Self {
            store,
            config,
            feeds: Vec::new(),
            failure_counts: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<Arc<dyn ProducerFeed>>) -> Self {
        self.feeds = feeds;
        self
    }

    /// Run one cycle. `full` also refreshes producer feeds (each under
    /// its own deadline) before the snapshot is taken.
    pub async fn run_cycle(&self, full: bool) -> Result<CycleResult, CoreError> {
        // An unreadable kill-switch state is fatal: refuse to run.
        let mut kill_switch = KillSwitch::restore(
            Arc::clone(&self.store),
            self.config.kill_switch.clone(),
        )?;

        if full {
            self.refresh_feeds().await?;
        }

        // The snapshot: every phase reads events at or below this seq.
        let snapshot_seq = self.store.tip_seq()?;
        let cycle_id = Uuid::new_v4();
        let now = Utc::now();
        let deadline = Instant::now() + Duration::from_millis(self.config.brain.cycle_deadline_ms);

        let assets: Vec<String> = self
            .config
            .assets
            .iter()
            .map(|a| a.to_uppercase())
            .collect();

        self.store.append(
            EventDraft::new(
                event_types::CYCLE_MARKER,
                serde_json::to_value(&CycleMarkerPayload {
                    cycle_id,
                    snapshot_seq,
                    assets: assets.clone(),
                    full,
                })
                .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.orchestrator")
            .with_trace(cycle_id.to_string()),
        )?;

        let mut result = CycleResult {
            cycle_id,
            snapshot_seq,
            kill_level: kill_switch.level(),
            regime: Regime::Chop,
            pcs: BTreeMap::new(),
            convictions: BTreeMap::new(),
            intents: Vec::new(),
            refused: Vec::new(),
            partial_phase: None,
        };

        // Quality (phase 2; collection happens per asset inside synthesis).
        let quality = QualityMonitor::new(&self.store, &self.config.brain)
            .evaluate(snapshot_seq, now)?;

        // Projections feeding synthesis and gating.
        let projector = Projector::new(Arc::clone(&self.store));
        let weights: WeightsView = projector.replay(0, snapshot_seq)?;
        let regime_view: RegimeView = projector.replay(0, snapshot_seq)?;
        let positions: PositionsView = projector.replay(0, snapshot_seq)?;

        // Synthesis per asset.
        let collector = Collector::new(&self.store, &self.config.brain);
        let mut syntheses: BTreeMap<String, SynthesisResult> = BTreeMap::new();
        for asset in &assets {
            if Instant::now() >= deadline {
                self.emit_partial(&mut result, "synthesis", &syntheses)?;
                return Ok(result);
            }
            let signals = collector.collect(asset, snapshot_seq, now)?;
            let synthesis = Synthesis::synthesize(&signals, &weights, &quality);
            result.pcs.insert(asset.clone(), synthesis.pcs);
            syntheses.insert(asset.clone(), synthesis);
        }

        // Regime from the reference asset (first configured).
        let reference_features = assets
            .first()
            .and_then(|a| syntheses.get(a))
            .map(|s| s.features.clone())
            .unwrap_or_default();
        let regime_result = RegimeDetector::classify(&reference_features);
        RegimeDetector::emit_if_changed(
            &self.store,
            &regime_view,
            &regime_result,
            &cycle_id.to_string(),
        )?;
        result.regime = regime_result.regime;

        // Auto-escalation against projections, including this cycle's
        // regime classification.
        let metrics = self.risk_metrics(&positions, &regime_result, snapshot_seq)?;
        kill_switch.evaluate(&metrics)?;
        result.kill_level = kill_switch.level();

        // Conviction + decision per asset.
        for asset in &assets {
            if Instant::now() >= deadline {
                self.emit_partial(&mut result, "decision", &syntheses)?;
                return Ok(result);
            }
            let Some(synthesis) = syntheses.get(asset) else {
                continue;
            };

            let conviction =
                ConvictionEngine::compute(synthesis, regime_result.regime, &self.config.brain);
            result
                .convictions
                .insert(asset.clone(), conviction.conviction);
            let conviction_event = ConvictionEngine::emit(
                &self.store,
                &conviction,
                &synthesis.domain_scores,
                &cycle_id.to_string(),
            )?;

            let Some(reference_price) = reference_price(synthesis) else {
                tracing::debug!(%asset, "no reference price; decision skipped");
                continue;
            };
            let verdict = DecisionEngine::decide(
                &self.store,
                &conviction,
                conviction_event.event_id,
                kill_switch.level(),
                reference_price,
                volatility_band(synthesis),
                &self.config.brain,
                &self.config.risk,
                &cycle_id.to_string(),
            )?;
            match verdict {
                DecisionVerdict::Open(event) => result.intents.push(event.event_id),
                DecisionVerdict::Refused { .. } => result.refused.push(asset.clone()),
                _ => {}
            }
        }

        tracing::info!(
            cycle_id = %cycle_id,
            snapshot_seq,
            regime = %result.regime,
            intents = result.intents.len(),
            "cycle complete"
        );
        Ok(result)
    }

    /// Refresh every producer feed under its deadline. Timeouts and
    /// failures degrade (failure counters, health events) but never abort
    /// the cycle.
    async fn refresh_feeds(&self) -> Result<(), CoreError> {
        let timeout = Duration::from_millis(self.config.brain.producer_fetch_timeout_ms);
        let quality = QualityMonitor::new(&self.store, &self.config.brain);

        for feed in &self.feeds {
            let outcome = tokio::time::timeout(timeout, feed.fetch(&self.config.assets)).await;
            match outcome {
                Ok(Ok(drafts)) => {
                    self.reset_failures(feed.name());
                    if !drafts.is_empty() {
                        self.store.append_batch(drafts)?;
                    }
                }
                Ok(Err(err)) => {
                    let failures = self.bump_failures(feed.name());
                    tracing::warn!(producer = feed.name(), error = %err, failures,
                        "producer fetch failed");
                    quality.record_failure(feed.name(), feed.domain(), failures)?;
                }
                Err(_) => {
                    // Partial results are discarded with the future.
                    let failures = self.bump_failures(feed.name());
                    let err = TransientError::ProducerTimeout {
                        producer: feed.name().to_string(),
                    };
                    tracing::warn!(producer = feed.name(), error = %err, failures,
                        "producer fetch timed out");
                    quality.record_failure(feed.name(), feed.domain(), failures)?;
                }
            }
        }
        Ok(())
    }

    fn risk_metrics(
        &self,
        positions: &PositionsView,
        regime: &crate::regime::RegimeResult,
        snapshot_seq: u64,
    ) -> Result<RiskMetrics, CoreError> {
        let equity = self.config.risk.equity.max(1.0);

        // Daily realized PnL from close events inside the last 24h.
        let day_ago = Utc::now() - chrono::Duration::days(1);
        let daily_pnl: f64 = self
            .store
            .events_by_type_desc(event_types::INTENT_CLOSE, snapshot_seq, 500)?
            .into_iter()
            .take_while(|e| e.ts >= day_ago)
            .filter_map(|e| e.payload.get("realized_pnl").and_then(|v| v.as_f64()))
            .sum();

        // Lifetime drawdown over the realized equity curve.
        let mut running = 0.0f64;
        let mut peak = 0.0f64;
        let mut max_drawdown = 0.0f64;
        for position in positions.positions.values() {
            if let Some(pnl) = position.realized_pnl {
                running += pnl;
                peak = peak.max(running);
                let dd = (peak - running) / equity;
                max_drawdown = max_drawdown.max(dd);
            }
        }

        Ok(RiskMetrics {
            daily_pnl_pct: daily_pnl / equity,
            portfolio_heat_pct: positions.open_exposure(),
            crisis_confidence: (regime.regime == Regime::Crisis).then_some(regime.confidence),
            lifetime_drawdown_pct: max_drawdown,
        })
    }

    fn emit_partial(
        &self,
        result: &mut CycleResult,
        phase: &str,
        syntheses: &BTreeMap<String, SynthesisResult>,
    ) -> Result<(), CoreError> {
        let payload = CyclePartialPayload {
            cycle_id: result.cycle_id,
            phase: phase.to_string(),
            completed_assets: syntheses.keys().cloned().collect(),
            reason: "deadline".to_string(),
        };
        self.store.append(
            EventDraft::new(
                event_types::CYCLE_PARTIAL,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.orchestrator")
            .with_trace(result.cycle_id.to_string()),
        )?;
        tracing::warn!(cycle_id = %result.cycle_id, %phase, "cycle went partial");
        result.partial_phase = Some(phase.to_string());
        Ok(())
    }

    fn bump_failures(&self, producer: &str) -> u32 {
        let mut counts = match self.failure_counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = counts.entry(producer.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset_failures(&self, producer: &str) {
        if let Ok(mut counts) = self.failure_counts.lock() {
            counts.insert(producer.to_string(), 0);
        }
    }
}

/// Reference price for sizing: the freshest technical signal that
/// carried one.
fn reference_price(synthesis: &SynthesisResult) -> Option<f64> {
    synthesis.features.get("price").copied()
}

/// Volatility band for stop/target derivation, defaulting to 2%.
fn volatility_band(synthesis: &SynthesisResult) -> f64 {
    synthesis
        .features
        .get("volatility_band")
        .copied()
        .unwrap_or(0.02)
}
