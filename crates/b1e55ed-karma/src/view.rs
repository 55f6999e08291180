//! Karma view: open/settled intents and the effective settlement policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use b1e55ed_models::{
    event_types, Event, KarmaIntentPayload, KarmaPolicyChangePayload, KarmaSettlePayload,
};
use b1e55ed_projections::View;

/// One intent's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaIntentState {
    pub intent_id: Uuid,
    pub position_id: Uuid,
    pub profit: f64,
    pub amount: f64,
    pub created_seq: u64,
    pub settled_seq: Option<u64>,
}

impl KarmaIntentState {
    pub fn is_open(&self) -> bool {
        self.settled_seq.is_none()
    }
}

/// Settlement parameters in force.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaPolicy {
    pub percentage: f64,
    pub destination: String,
}

/// Folds karma intents, settlements, and policy changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KarmaView {
    pub intents: BTreeMap<Uuid, KarmaIntentState>,
    /// Set by the first settlement; afterwards only policy-change events
    /// may move it.
    pub frozen_policy: Option<KarmaPolicy>,
    pub settlements: u64,
}

impl KarmaView {
    pub fn open_intents(&self) -> impl Iterator<Item = &KarmaIntentState> {
        self.intents.values().filter(|i| i.is_open())
    }

    pub fn open_total(&self) -> f64 {
        self.open_intents().map(|i| i.amount).sum()
    }

    /// Policy is immutable once any settlement has happened.
    pub fn policy_frozen(&self) -> bool {
        self.settlements > 0
    }
}

impl View for KarmaView {
    fn interested(&self) -> &'static [&'static str] {
        &[
            event_types::KARMA_INTENT,
            event_types::KARMA_SETTLE,
            event_types::KARMA_POLICY_CHANGE,
        ]
    }

    fn apply(&mut self, event: &Event) {
        match event.event_type.as_str() {
            event_types::KARMA_INTENT => {
                let Ok(payload) = event.payload_as::<KarmaIntentPayload>() else {
                    tracing::warn!(seq = event.seq, "malformed karma.intent payload");
                    return;
                };
                self.intents.insert(
                    payload.intent_id,
                    KarmaIntentState {
                        intent_id: payload.intent_id,
                        position_id: payload.position_id,
                        profit: payload.profit,
                        amount: payload.amount,
                        created_seq: event.seq,
                        settled_seq: None,
                    },
                );
            }
            event_types::KARMA_SETTLE => {
                let Ok(payload) = event.payload_as::<KarmaSettlePayload>() else {
                    tracing::warn!(seq = event.seq, "malformed karma.settle payload");
                    return;
                };
                for intent_id in &payload.intent_ids {
                    if let Some(intent) = self.intents.get_mut(intent_id) {
                        intent.settled_seq = Some(event.seq);
                    }
                }
                if self.settlements == 0 {
                    // First settlement freezes the parameters it used.
                    self.frozen_policy = Some(KarmaPolicy {
                        percentage: payload.total
                            / self
                                .intents
                                .values()
                                .filter(|i| i.settled_seq == Some(event.seq))
                                .map(|i| i.profit)
                                .sum::<f64>()
                                .max(f64::MIN_POSITIVE),
                        destination: payload.destination,
                    });
                }
                self.settlements += 1;
            }
            event_types::KARMA_POLICY_CHANGE => {
                let Ok(payload) = event.payload_as::<KarmaPolicyChangePayload>() else {
                    tracing::warn!(seq = event.seq, "malformed karma.policy_change payload");
                    return;
                };
                self.frozen_policy = Some(KarmaPolicy {
                    percentage: payload.percentage,
                    destination: payload.destination,
                });
            }
            _ => {}
        }
    }
}
