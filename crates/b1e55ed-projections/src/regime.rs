//! Regime view: the current market-state label and its transition history.

use serde::{Deserialize, Serialize};

use b1e55ed_models::{event_types, Event, Regime, RegimeChangedPayload};

use crate::projector::View;

/// One regime transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChange {
    pub regime: Regime,
    pub previous: Option<Regime>,
    pub confidence: f64,
    pub changed_seq: u64,
}

/// Folds `regime.changed.v1` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeView {
    pub current: Option<RegimeChange>,
    pub history: Vec<RegimeChange>,
}

impl RegimeView {
    /// The label in force, defaulting to CHOP before any transition.
    pub fn regime(&self) -> Regime {
        self.current.as_ref().map(|c| c.regime).unwrap_or(Regime::Chop)
    }

    pub fn confidence(&self) -> f64 {
        self.current.as_ref().map(|c| c.confidence).unwrap_or(0.0)
    }
}

impl View for RegimeView {
    fn interested(&self) -> &'static [&'static str] {
        &[event_types::REGIME_CHANGED]
    }

    fn apply(&mut self, event: &Event) {
        let Ok(payload) = event.payload_as::<RegimeChangedPayload>() else {
            tracing::warn!(seq = event.seq, "malformed regime.changed payload");
            return;
        };
        let change = RegimeChange {
            regime: payload.regime,
            previous: payload.previous,
            confidence: payload.confidence,
            changed_seq: event.seq,
        };
        self.history.push(change.clone());
        self.current = Some(change);
    }
}
