//! Decision phase: conviction x regime x kill switch -> intent.
//!
//! The kill-switch level is read from the same snapshot the rest of the
//! cycle used, so an escalation racing the cycle cannot slip an open
//! through (no TOCTOU window). Opens require L0 exactly; exits survive
//! through L2; L3 and above refuse everything.

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, BrainConfig, CoreError, Direction, Event, EventDraft, IntentOpenPayload,
    KillLevel, PolicyError, RiskConfig,
};
use uuid::Uuid;

use crate::conviction::ConvictionResult;

/// What the decision phase concluded for one asset.
#[derive(Debug, Clone)]
pub enum DecisionVerdict {
    /// Intent emitted.
    Open(Box<Event>),
    /// Conviction below the entry threshold.
    BelowThreshold { conviction: f64 },
    /// Kill switch refused the intent.
    Refused { level: KillLevel },
    /// Regime leverage cap zeroed the size (CRISIS).
    RegimeZeroed,
}

/// Phase 6.
pub struct DecisionEngine;

impl DecisionEngine {
    /// Decide and, when warranted, emit `intent.open.v1`.
    ///
    /// `kill_level` must come from the cycle snapshot; `reference_price`
    /// and `volatility_band` come from collection (the stop/target derive
    /// from the band).
    #[allow(clippy::too_many_arguments)]
    pub fn decide(
        store: &EventStore,
        conviction: &ConvictionResult,
        conviction_ref: Uuid,
        kill_level: KillLevel,
        reference_price: f64,
        volatility_band: f64,
        brain: &BrainConfig,
        risk: &RiskConfig,
        trace_id: &str,
    ) -> Result<DecisionVerdict, CoreError> {
        if conviction.conviction < brain.entry_threshold {
            return Ok(DecisionVerdict::BelowThreshold {
                conviction: conviction.conviction,
            });
        }

        if !kill_level.allows_open() {
            tracing::info!(level = %kill_level, asset = %conviction.asset,
                "kill switch refused open intent");
            return Ok(DecisionVerdict::Refused { level: kill_level });
        }

        let leverage_cap = conviction.regime.leverage_cap();
        let size = (risk.base_size * conviction.conviction * leverage_cap)
            .min(risk.max_position_pct);
        if size <= 0.0 {
            return Ok(DecisionVerdict::RegimeZeroed);
        }

        // Stop/target from the volatility band: stop one band below entry,
        // target two bands above (long-bias engine; shorts invert).
        let band = volatility_band.max(0.005);
        let (stop, target) = (
            reference_price * (1.0 - band),
            reference_price * (1.0 + 2.0 * band),
        );

        let payload = IntentOpenPayload {
            asset: conviction.asset.clone(),
            direction: Direction::Long,
            entry: reference_price,
            size,
            stop,
            target,
            conviction: conviction.conviction,
            regime: conviction.regime,
            conviction_ref,
        };

        let event = store.append(
            EventDraft::new(
                event_types::INTENT_OPEN,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.decision")
            .with_trace(trace_id),
        )?;
        tracing::info!(asset = %conviction.asset, size, "open intent emitted");
        Ok(DecisionVerdict::Open(Box::new(event)))
    }

    /// Gate for exit intents submitted from outside the cycle (position
    /// management); exits survive through L2.
    pub fn gate_exit(kill_level: KillLevel) -> Result<(), CoreError> {
        if kill_level.allows_exit() {
            Ok(())
        } else {
            Err(CoreError::Policy(PolicyError::KillSwitchActive {
                level: kill_level,
            }))
        }
    }
}
