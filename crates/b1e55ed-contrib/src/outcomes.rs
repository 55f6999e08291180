//! Outcome resolution: write realized results back into the attribution
//! records that fed the position.
//!
//! When a position closes, every unresolved attribution for the same
//! asset whose signal landed before the open (inside the lookback) gets
//! an `attribution.outcome.v1` event. Best effort by contract: a failed
//! resolution must never break execution, so only ledger-fatal errors
//! propagate.

use std::sync::Arc;

use uuid::Uuid;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, AttributionOutcomePayload, CoreError, EventDraft, IntentClosePayload,
    IntentOpenPayload,
};
use b1e55ed_projections::{Projector, TalliesView};

/// Attributions scanned backwards from the open intent.
const LOOKBACK_EVENTS: u64 = 2_000;

/// Resolves signal outcomes on position close.
pub struct OutcomeWriter {
    store: Arc<EventStore>,
}

impl OutcomeWriter {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// Resolve attributions for a closed position. Returns the number of
    /// outcome events appended.
    pub fn resolve_position(&self, position_id: Uuid) -> Result<usize, CoreError> {
        let Some(open_event) = self.store.event_by_id(&position_id)? else {
            tracing::warn!(%position_id, "outcome resolution for unknown position");
            return Ok(0);
        };
        let Ok(open) = open_event.payload_as::<IntentOpenPayload>() else {
            return Ok(0);
        };

        // Find the close and its realized PnL.
        let tip = self.store.tip_seq()?;
        let close = self
            .store
            .events_by_type_desc(event_types::INTENT_CLOSE, tip, 200)?
            .into_iter()
            .find(|event| {
                event
                    .payload_as::<IntentClosePayload>()
                    .map(|p| p.position_id == position_id)
                    .unwrap_or(false)
            });
        let Some(close_event) = close else {
            tracing::warn!(%position_id, "position has no close event yet");
            return Ok(0);
        };
        let Ok(close) = close_event.payload_as::<IntentClosePayload>() else {
            return Ok(0);
        };
        let profitable = close.realized_pnl > 0.0;

        // Unresolved same-asset attributions that landed before the open.
        let tallies: TalliesView =
            Projector::new(Arc::clone(&self.store)).replay(0, tip)?;
        let floor = open_event.seq.saturating_sub(LOOKBACK_EVENTS);

        let mut resolved = 0usize;
        for tally in tallies.contributors.values() {
            for record in &tally.records {
                if record.profitable.is_some() {
                    continue;
                }
                if record.asset.as_deref() != Some(open.asset.as_str()) {
                    continue;
                }
                let Some(signal) = self.store.event_by_id(&record.event_id)? else {
                    continue;
                };
                if signal.seq >= open_event.seq || signal.seq < floor {
                    continue;
                }

                let payload = AttributionOutcomePayload {
                    attribution_id: record.attribution_id,
                    profitable,
                };
                self.store.append(
                    EventDraft::new(
                        event_types::ATTRIBUTION_OUTCOME,
                        serde_json::to_value(&payload)
                            .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
                    )
                    .with_source("outcome_writer")
                    // First resolving position wins; replays are idempotent.
                    .with_dedupe(format!("outcome:{}", record.attribution_id)),
                )?;
                resolved += 1;
            }
        }

        if resolved > 0 {
            tracing::info!(%position_id, resolved, profitable, "signal outcomes resolved");
        }
        Ok(resolved)
    }
}
