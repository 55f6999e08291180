//! Replay equivalence: for every view `P`, folding the live append stream
//! and replaying the journal from genesis must produce byte-identical
//! state.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use uuid::Uuid;

use b1e55ed_identity::DeterministicSigner;
use b1e55ed_ledger::{EventStore, StoreOptions};
use b1e55ed_models::{event_types, EventDraft};
use b1e55ed_projections::{
    PositionsView, Projector, RegimeView, TalliesView, View, WeightsView,
};

struct Fixture {
    store: Arc<EventStore>,
    rng: StdRng,
    open_positions: Vec<Uuid>,
    contributors: Vec<Uuid>,
}

impl Fixture {
    fn new(path: &std::path::Path, seed: u64) -> Self {
        let signer = Arc::new(DeterministicSigner::of_byte(1));
        let store = Arc::new(
            EventStore::open(
                path,
                signer,
                StoreOptions {
                    checkpoint_interval: 500,
                    max_batch: 512,
                },
            )
            .unwrap(),
        );
        Self {
            store,
            rng: StdRng::seed_from_u64(seed),
            open_positions: Vec::new(),
            contributors: Vec::new(),
        }
    }

    /// Append one randomized event and return it for live folding.
    fn step(&mut self) -> Vec<b1e55ed_models::Event> {
        let roll: u8 = self.rng.gen_range(0..100);
        let draft = match roll {
            // Signals dominate real logs.
            0..=49 => {
                let rsi: f64 = self.rng.gen_range(5.0..95.0);
                EventDraft::new("signal.ta.v1", json!({"asset": "BTC", "rsi_14": rsi}))
                    .with_source("producer.ta")
            }
            50..=64 => {
                let conviction_ref = Uuid::new_v4();
                EventDraft::new(
                    event_types::INTENT_OPEN,
                    json!({
                        "asset": if self.rng.gen_bool(0.5) { "BTC" } else { "ETH" },
                        "direction": "long",
                        "entry": self.rng.gen_range(100.0..100_000.0_f64),
                        "size": self.rng.gen_range(0.01..0.10_f64),
                        "stop": 90.0,
                        "target": 120.0,
                        "conviction": self.rng.gen_range(0.7..1.0_f64),
                        "regime": "BULL",
                        "conviction_ref": conviction_ref,
                    }),
                )
                .with_source("brain.decision")
            }
            65..=74 if !self.open_positions.is_empty() => {
                let idx = self.rng.gen_range(0..self.open_positions.len());
                let position_id = self.open_positions.swap_remove(idx);
                EventDraft::new(
                    event_types::INTENT_CLOSE,
                    json!({
                        "position_id": position_id,
                        "asset": "BTC",
                        "exit": self.rng.gen_range(100.0..100_000.0_f64),
                        "realized_pnl": self.rng.gen_range(-500.0..500.0_f64),
                        "reason": "stop",
                    }),
                )
                .with_source("brain.decision")
            }
            65..=74 => EventDraft::new("signal.ta.v1", json!({"asset": "ETH", "rsi_14": 50.0}))
                .with_source("producer.ta"),
            75..=79 => {
                let regime = ["EARLY_BULL", "BULL", "CHOP", "BEAR", "CRISIS"]
                    [self.rng.gen_range(0..5)];
                EventDraft::new(
                    event_types::REGIME_CHANGED,
                    json!({
                        "regime": regime,
                        "previous": null,
                        "confidence": self.rng.gen_range(0.5..1.0_f64),
                        "features": {},
                    }),
                )
                .with_source("brain.regime")
            }
            80..=86 => {
                let contributor_id = Uuid::new_v4();
                self.contributors.push(contributor_id);
                EventDraft::new(
                    event_types::CONTRIBUTOR_REGISTER,
                    json!({
                        "contributor_id": contributor_id,
                        "node_id": format!("b1e55ed-{:08x}", self.rng.gen::<u32>()),
                        "name": format!("agent-{}", self.contributors.len()),
                        "role": "agent",
                        "metadata": {},
                    }),
                )
            }
            87..=94 => {
                if let Some(&contributor_id) = self.contributors.first() {
                    EventDraft::new(
                        event_types::ATTRIBUTION,
                        json!({
                            "attribution_id": Uuid::new_v4(),
                            "contributor_id": contributor_id,
                            "event_id": Uuid::new_v4(),
                            "accepted": self.rng.gen_bool(0.8),
                            "asset": "BTC",
                            "confidence": self.rng.gen_range(0.0..1.0_f64),
                        }),
                    )
                } else {
                    EventDraft::new("signal.ta.v1", json!({"asset": "SOL", "rsi_14": 44.0}))
                        .with_source("producer.ta")
                }
            }
            _ => EventDraft::new(
                event_types::WEIGHT_ADJUSTMENT,
                json!({
                    "deltas": {"technical": self.rng.gen_range(-0.03..0.03_f64)},
                    "reason": "weekly",
                    "observations": 40,
                }),
            ),
        };

        let event = self.store.append(draft).unwrap();
        if event.event_type == event_types::INTENT_OPEN {
            self.open_positions.push(event.event_id);
        }
        // Checkpoints interleave with appends but none of the views fold
        // them, so the single caller-visible event is the whole delta.
        vec![event]
    }
}

#[test]
fn test_replay_equals_live_for_all_views() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let mut fixture = Fixture::new(&path, 0xb1e55ed);

    let mut live_positions = PositionsView::default();
    let mut live_regime = RegimeView::default();
    let mut live_tallies = TalliesView::default();
    let mut live_weights = WeightsView::default();

    // Fold genesis into the live views first, as replay will.
    let genesis = fixture.store.genesis().unwrap();
    live_weights.apply(&genesis);

    for _ in 0..2_000 {
        for event in fixture.step() {
            live_positions.apply(&event);
            live_regime.apply(&event);
            live_tallies.apply(&event);
            live_weights.apply(&event);
        }
    }

    let projector = Projector::new(Arc::clone(&fixture.store));
    let replayed_positions: PositionsView = projector.replay_from_genesis().unwrap();
    let replayed_regime: RegimeView = projector.replay_from_genesis().unwrap();
    let replayed_tallies: TalliesView = projector.replay_from_genesis().unwrap();
    let replayed_weights: WeightsView = projector.replay_from_genesis().unwrap();

    // Byte-equal projections, not just logically equal.
    assert_eq!(
        serde_json::to_vec(&live_positions).unwrap(),
        serde_json::to_vec(&replayed_positions).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&live_regime).unwrap(),
        serde_json::to_vec(&replayed_regime).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&live_tallies).unwrap(),
        serde_json::to_vec(&replayed_tallies).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&live_weights).unwrap(),
        serde_json::to_vec(&replayed_weights).unwrap()
    );

    assert!(projector.quarantined().is_empty());
}

#[test]
fn test_partial_range_replay_matches_suffix_fold() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let mut fixture = Fixture::new(&path, 7);

    for _ in 0..300 {
        fixture.step();
    }
    let tip = fixture.store.tip_seq().unwrap();
    let midpoint = tip / 2;

    // replay [0, mid] then fold (mid, tip] incrementally == replay [0, tip].
    let projector = Projector::new(Arc::clone(&fixture.store));
    let mut incremental: PositionsView = projector.replay(0, midpoint).unwrap();
    projector
        .replay_into(&mut incremental, midpoint + 1, tip)
        .unwrap();
    let full: PositionsView = projector.replay_from_genesis().unwrap();

    assert_eq!(
        serde_json::to_vec(&incremental).unwrap(),
        serde_json::to_vec(&full).unwrap()
    );
}

#[test]
fn test_dropped_projection_tables_rebuild_byte_equal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let mut fixture = Fixture::new(&path, 21);

    for _ in 0..500 {
        fixture.step();
    }

    let projector = Projector::new(Arc::clone(&fixture.store));
    let cached: PositionsView = projector.cached_or_replay("positions").unwrap();
    let cached_bytes = serde_json::to_vec(&cached).unwrap();

    // Second call hits the cache (no suffix to fold) and agrees.
    let warm: PositionsView = projector.cached_or_replay("positions").unwrap();
    assert_eq!(cached_bytes, serde_json::to_vec(&warm).unwrap());

    // Drop the projection tables; rebuild via replay; byte-equal.
    fixture.store.truncate_projections().unwrap();
    let rebuilt: PositionsView = projector.cached_or_replay("positions").unwrap();
    assert_eq!(cached_bytes, serde_json::to_vec(&rebuilt).unwrap());

    // The cache stays incremental across new appends.
    for _ in 0..50 {
        fixture.step();
    }
    let incremental: PositionsView = projector.cached_or_replay("positions").unwrap();
    let full: PositionsView = projector.replay_from_genesis().unwrap();
    assert_eq!(
        serde_json::to_vec(&incremental).unwrap(),
        serde_json::to_vec(&full).unwrap()
    );
}

#[test]
fn test_quarantined_events_are_reported_not_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let fixture = Fixture::new(&path, 11);

    fixture
        .store
        .append(
            EventDraft::new(event_types::REGIME_CHANGED, json!({"future": true}))
                .with_schema_version("v9"),
        )
        .unwrap();

    let projector = Projector::new(Arc::clone(&fixture.store));
    let view: RegimeView = projector.replay_from_genesis().unwrap();

    assert!(view.current.is_none());
    let quarantined = projector.quarantined();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].schema_version, "v9");
}
