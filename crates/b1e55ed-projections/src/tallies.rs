//! Contributor tallies: registrations, attributions, resolved outcomes.
//!
//! This view is the raw material for reputation scoring - it counts, it
//! does not judge. Calibrated scoring (decay, Brier, smoothing) lives in
//! the contrib crate and is a pure function of this view.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use b1e55ed_models::{
    event_types, AttributionOutcomePayload, AttributionPayload, ContributorRegisterPayload, Event,
    Role,
};

use crate::projector::View;

/// One attributed signal and, eventually, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub attribution_id: Uuid,
    pub event_id: Uuid,
    pub ts: DateTime<Utc>,
    pub accepted: bool,
    pub asset: Option<String>,
    pub confidence: Option<f64>,
    /// None until an outcome event resolves it.
    pub profitable: Option<bool>,
}

/// Per-contributor running tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorTally {
    pub contributor_id: Uuid,
    pub node_id: String,
    pub name: String,
    pub role: Role,
    pub registered_seq: u64,
    pub submitted: u64,
    pub accepted: u64,
    pub records: Vec<ContributorRecord>,
}

impl ContributorTally {
    pub fn resolved(&self) -> u64 {
        self.records.iter().filter(|r| r.profitable.is_some()).count() as u64
    }

    pub fn profitable(&self) -> u64 {
        self.records
            .iter()
            .filter(|r| r.profitable == Some(true))
            .count() as u64
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.ts).max()
    }
}

/// Folds contributor registration, attribution, and outcome events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TalliesView {
    pub contributors: BTreeMap<Uuid, ContributorTally>,
    /// node_id -> contributor_id, for duplicate-registration checks.
    pub by_node: BTreeMap<String, Uuid>,
    /// attribution_id -> contributor_id, for outcome resolution.
    attribution_owner: BTreeMap<Uuid, Uuid>,
}

impl TalliesView {
    pub fn get(&self, contributor_id: &Uuid) -> Option<&ContributorTally> {
        self.contributors.get(contributor_id)
    }

    pub fn by_node_id(&self, node_id: &str) -> Option<&ContributorTally> {
        self.by_node
            .get(node_id)
            .and_then(|id| self.contributors.get(id))
    }
}

impl View for TalliesView {
    fn interested(&self) -> &'static [&'static str] {
        &[
            event_types::CONTRIBUTOR_REGISTER,
            event_types::ATTRIBUTION,
            event_types::ATTRIBUTION_OUTCOME,
        ]
    }

    fn apply(&mut self, event: &Event) {
        match event.event_type.as_str() {
            event_types::CONTRIBUTOR_REGISTER => {
                let Ok(payload) = event.payload_as::<ContributorRegisterPayload>() else {
                    tracing::warn!(seq = event.seq, "malformed contributor.register payload");
                    return;
                };
                // First registration of a node wins; the ingress boundary
                // rejects duplicates before they reach the log.
                if self.by_node.contains_key(&payload.node_id) {
                    tracing::warn!(seq = event.seq, node_id = %payload.node_id,
                        "duplicate contributor registration ignored");
                    return;
                }
                self.by_node
                    .insert(payload.node_id.clone(), payload.contributor_id);
                self.contributors.insert(
                    payload.contributor_id,
                    ContributorTally {
                        contributor_id: payload.contributor_id,
                        node_id: payload.node_id,
                        name: payload.name,
                        role: payload.role,
                        registered_seq: event.seq,
                        submitted: 0,
                        accepted: 0,
                        records: Vec::new(),
                    },
                );
            }
            event_types::ATTRIBUTION => {
                let Ok(payload) = event.payload_as::<AttributionPayload>() else {
                    tracing::warn!(seq = event.seq, "malformed attribution payload");
                    return;
                };
                let Some(tally) = self.contributors.get_mut(&payload.contributor_id) else {
                    tracing::warn!(seq = event.seq, contributor_id = %payload.contributor_id,
                        "attribution for unknown contributor");
                    return;
                };
                tally.submitted += 1;
                if payload.accepted {
                    tally.accepted += 1;
                }
                self.attribution_owner
                    .insert(payload.attribution_id, payload.contributor_id);
                tally.records.push(ContributorRecord {
                    attribution_id: payload.attribution_id,
                    event_id: payload.event_id,
                    ts: event.ts,
                    accepted: payload.accepted,
                    asset: payload.asset,
                    confidence: payload.confidence,
                    profitable: None,
                });
            }
            event_types::ATTRIBUTION_OUTCOME => {
                let Ok(payload) = event.payload_as::<AttributionOutcomePayload>() else {
                    tracing::warn!(seq = event.seq, "malformed attribution.outcome payload");
                    return;
                };
                let Some(owner) = self.attribution_owner.get(&payload.attribution_id) else {
                    tracing::warn!(seq = event.seq, attribution_id = %payload.attribution_id,
                        "outcome for unknown attribution");
                    return;
                };
                if let Some(tally) = self.contributors.get_mut(owner) {
                    if let Some(record) = tally
                        .records
                        .iter_mut()
                        .find(|r| r.attribution_id == payload.attribution_id)
                    {
                        record.profitable = Some(payload.profitable);
                    }
                }
            }
            _ => {}
        }
    }
}
