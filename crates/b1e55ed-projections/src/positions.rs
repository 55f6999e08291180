//! Positions view: folds open/close intents into position lifecycles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use b1e55ed_models::{event_types, Direction, Event, IntentClosePayload, IntentOpenPayload};

use crate::projector::View;

/// A position derived from the log. The id is the opening intent's
/// event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub asset: String,
    pub direction: Direction,
    pub entry: f64,
    pub size: f64,
    pub stop: f64,
    pub target: f64,
    pub opened_seq: u64,
    pub closed_seq: Option<u64>,
    pub realized_pnl: Option<f64>,
    pub conviction_ref: Uuid,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.closed_seq.is_none()
    }
}

/// All positions keyed by id, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionsView {
    pub positions: BTreeMap<Uuid, Position>,
}

impl PositionsView {
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_open())
    }

    /// Sum of open position sizes (portfolio heat input).
    pub fn open_exposure(&self) -> f64 {
        self.open_positions().map(|p| p.size).sum()
    }

    /// Total realized PnL across closed positions.
    pub fn realized_pnl(&self) -> f64 {
        self.positions
            .values()
            .filter_map(|p| p.realized_pnl)
            .sum()
    }

    /// Realized PnL of positions closed at or after `since_seq`.
    pub fn realized_pnl_since(&self, since_seq: u64) -> f64 {
        self.positions
            .values()
            .filter(|p| p.closed_seq.is_some_and(|s| s >= since_seq))
            .filter_map(|p| p.realized_pnl)
            .sum()
    }
}

impl View for PositionsView {
    fn interested(&self) -> &'static [&'static str] {
        &[event_types::INTENT_OPEN, event_types::INTENT_CLOSE]
    }

    fn apply(&mut self, event: &Event) {
        match event.event_type.as_str() {
            event_types::INTENT_OPEN => {
                let Ok(payload) = event.payload_as::<IntentOpenPayload>() else {
                    tracing::warn!(seq = event.seq, "malformed intent.open payload");
                    return;
                };
                self.positions.insert(
                    event.event_id,
                    Position {
                        id: event.event_id,
                        asset: payload.asset,
                        direction: payload.direction,
                        entry: payload.entry,
                        size: payload.size,
                        stop: payload.stop,
                        target: payload.target,
                        opened_seq: event.seq,
                        closed_seq: None,
                        realized_pnl: None,
                        conviction_ref: payload.conviction_ref,
                    },
                );
            }
            event_types::INTENT_CLOSE => {
                let Ok(payload) = event.payload_as::<IntentClosePayload>() else {
                    tracing::warn!(seq = event.seq, "malformed intent.close payload");
                    return;
                };
                match self.positions.get_mut(&payload.position_id) {
                    Some(position) if position.is_open() => {
                        position.closed_seq = Some(event.seq);
                        position.realized_pnl = Some(payload.realized_pnl);
                    }
                    _ => {
                        tracing::warn!(
                            seq = event.seq,
                            position_id = %payload.position_id,
                            "close for unknown or already-closed position"
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b1e55ed_models::Regime;
    use chrono::Utc;
    use serde_json::json;

    fn open_event(seq: u64, asset: &str, size: f64) -> Event {
        let payload = IntentOpenPayload {
            asset: asset.to_string(),
            direction: Direction::Long,
            entry: 100.0,
            size,
            stop: 95.0,
            target: 110.0,
            conviction: 0.8,
            regime: Regime::Bull,
            conviction_ref: Uuid::new_v4(),
        };
        Event {
            event_id: Uuid::new_v4(),
            seq,
            ts: Utc::now(),
            event_type: event_types::INTENT_OPEN.to_string(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: serde_json::to_value(payload).unwrap(),
            prev_hash: String::new(),
            hash: String::new(),
            signer: String::new(),
            signature: String::new(),
        }
    }

    fn close_event(seq: u64, position_id: Uuid, pnl: f64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            seq,
            ts: Utc::now(),
            event_type: event_types::INTENT_CLOSE.to_string(),
            schema_version: "v1".to_string(),
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: json!({
                "position_id": position_id,
                "asset": "BTC",
                "exit": 105.0,
                "realized_pnl": pnl,
                "reason": "target",
            }),
            prev_hash: String::new(),
            hash: String::new(),
            signer: String::new(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_open_close_lifecycle() {
        let mut view = PositionsView::default();
        let open = open_event(5, "BTC", 0.05);
        let position_id = open.event_id;
        view.apply(&open);

        assert_eq!(view.positions.len(), 1);
        assert!(view.positions[&position_id].is_open());
        assert_eq!(view.open_exposure(), 0.05);

        view.apply(&close_event(9, position_id, 250.0));
        let position = &view.positions[&position_id];
        assert_eq!(position.closed_seq, Some(9));
        assert_eq!(position.realized_pnl, Some(250.0));
        assert_eq!(view.open_exposure(), 0.0);
        assert_eq!(view.realized_pnl(), 250.0);
    }

    #[test]
    fn test_close_for_unknown_position_is_ignored() {
        let mut view = PositionsView::default();
        view.apply(&close_event(3, Uuid::new_v4(), 10.0));
        assert!(view.positions.is_empty());
    }

    #[test]
    fn test_double_close_keeps_first_outcome() {
        let mut view = PositionsView::default();
        let open = open_event(1, "ETH", 0.02);
        let position_id = open.event_id;
        view.apply(&open);
        view.apply(&close_event(2, position_id, 50.0));
        view.apply(&close_event(3, position_id, -999.0));

        assert_eq!(view.positions[&position_id].realized_pnl, Some(50.0));
        assert_eq!(view.positions[&position_id].closed_seq, Some(2));
    }

    #[test]
    fn test_realized_pnl_since() {
        let mut view = PositionsView::default();
        let a = open_event(1, "BTC", 0.05);
        let b = open_event(2, "ETH", 0.05);
        let (a_id, b_id) = (a.event_id, b.event_id);
        view.apply(&a);
        view.apply(&b);
        view.apply(&close_event(10, a_id, 100.0));
        view.apply(&close_event(20, b_id, 40.0));

        assert_eq!(view.realized_pnl_since(15), 40.0);
        assert_eq!(view.realized_pnl_since(0), 140.0);
    }
}
