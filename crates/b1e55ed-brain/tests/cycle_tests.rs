//! Orchestrator pipeline tests: end-to-end cycles over a real journal,
//! kill-switch gating, deadlines, and producer timeouts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use b1e55ed_brain::{KillSwitch, Orchestrator, ProducerFeed};
use b1e55ed_identity::DeterministicSigner;
use b1e55ed_ledger::{EventStore, StoreOptions};
use b1e55ed_models::{
    event_types, Config, EventDraft, KillLevel, Regime, TransientError,
};

fn fixture(assets: &[&str]) -> (tempfile::TempDir, Arc<EventStore>, Config) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().unwrap();
    let signer = Arc::new(DeterministicSigner::of_byte(1));
    let store = Arc::new(
        EventStore::open(
            &dir.path().join("journal.db"),
            signer,
            StoreOptions::default(),
        )
        .unwrap(),
    );
    let mut config = Config::default();
    config.assets = assets.iter().map(|a| a.to_string()).collect();
    (dir, store, config)
}

fn seed_bullish_signals(store: &EventStore, asset: &str) {
    store
        .append(
            EventDraft::new(
                "signal.ta.v1",
                json!({"asset": asset, "rsi_14": 25.0, "price": 50_000.0, "trend_strength": 0.8}),
            )
            .with_source("producer.ta"),
        )
        .unwrap();
}

#[tokio::test]
async fn test_cycle_emits_conviction_and_intent() {
    let (_dir, store, config) = fixture(&["BTC"]);
    seed_bullish_signals(&store, "BTC");

    let orchestrator = Orchestrator::new(Arc::clone(&store), config);
    let result = orchestrator.run_cycle(false).await.unwrap();

    assert!(result.partial_phase.is_none());
    assert_eq!(result.kill_level, KillLevel::L0Nominal);
    assert!(result.pcs["BTC"] >= 0.85);
    assert!(result.convictions["BTC"] >= 0.7);
    assert_eq!(result.intents.len(), 1);

    let tip = store.tip_seq().unwrap();
    let convictions = store
        .events_by_type_desc(event_types::CONVICTION, tip, 10)
        .unwrap();
    assert_eq!(convictions.len(), 1);
    let intents = store
        .events_by_type_desc(event_types::INTENT_OPEN, tip, 10)
        .unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].payload["asset"], json!("BTC"));

    // The cycle marker carries the snapshot and trace id.
    let markers = store
        .events_by_type_desc(event_types::CYCLE_MARKER, tip, 10)
        .unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(
        markers[0].trace_id.as_deref().unwrap(),
        result.cycle_id.to_string()
    );
}

#[tokio::test]
async fn test_kill_switch_blocks_opens() {
    let (_dir, store, config) = fixture(&["BTC"]);
    seed_bullish_signals(&store, "BTC");

    // Escalate before the cycle.
    let mut ks = KillSwitch::restore(Arc::clone(&store), config.kill_switch.clone()).unwrap();
    ks.set(KillLevel::L2Defensive, "operator", false).unwrap();

    let orchestrator = Orchestrator::new(Arc::clone(&store), config);
    let result = orchestrator.run_cycle(false).await.unwrap();

    assert_eq!(result.kill_level, KillLevel::L2Defensive);
    assert!(result.convictions["BTC"] >= 0.7); // conviction still computed
    assert!(result.intents.is_empty()); // but no intent emitted

    let tip = store.tip_seq().unwrap();
    assert!(store
        .events_by_type_desc(event_types::INTENT_OPEN, tip, 10)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_zero_deadline_goes_partial() {
    let (_dir, store, mut config) = fixture(&["BTC", "ETH"]);
    seed_bullish_signals(&store, "BTC");
    config.brain.cycle_deadline_ms = 0;

    let orchestrator = Orchestrator::new(Arc::clone(&store), config);
    let result = orchestrator.run_cycle(false).await.unwrap();

    assert_eq!(result.partial_phase.as_deref(), Some("synthesis"));
    let tip = store.tip_seq().unwrap();
    let partials = store
        .events_by_type_desc(event_types::CYCLE_PARTIAL, tip, 10)
        .unwrap();
    assert_eq!(partials.len(), 1);
    assert_eq!(partials[0].payload["reason"], json!("deadline"));
}

struct HealthyFeed;

#[async_trait]
impl ProducerFeed for HealthyFeed {
    fn name(&self) -> &str {
        "producer.ta"
    }
    fn domain(&self) -> &str {
        "technical"
    }
    async fn fetch(&self, assets: &[String]) -> Result<Vec<EventDraft>, TransientError> {
        Ok(assets
            .iter()
            .map(|asset| {
                EventDraft::new(
                    "signal.ta.v1",
                    json!({"asset": asset, "rsi_14": 28.0, "price": 42_000.0}),
                )
                .with_source("producer.ta")
            })
            .collect())
    }
}

struct HangingFeed;

#[async_trait]
impl ProducerFeed for HangingFeed {
    fn name(&self) -> &str {
        "producer.slow"
    }
    fn domain(&self) -> &str {
        "onchain"
    }
    async fn fetch(&self, _assets: &[String]) -> Result<Vec<EventDraft>, TransientError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_full_cycle_ingests_feeds_and_survives_timeouts() {
    let (_dir, store, mut config) = fixture(&["BTC"]);
    config.brain.producer_fetch_timeout_ms = 50;
    config.brain.max_consecutive_failures = 1;

    let orchestrator = Orchestrator::new(Arc::clone(&store), config)
        .with_feeds(vec![Arc::new(HealthyFeed), Arc::new(HangingFeed)]);

    let result = orchestrator.run_cycle(true).await.unwrap();

    // The healthy feed's signal made it in before the snapshot.
    let tip = store.tip_seq().unwrap();
    let signals = store.events_by_type_desc("signal.ta.v1", tip, 10).unwrap();
    assert_eq!(signals.len(), 1);
    assert!(result.pcs["BTC"] > 0.0);

    // The hanging feed tripped the failure bound.
    let failing = store
        .events_by_type_desc(event_types::PRODUCER_FAILING, tip, 10)
        .unwrap();
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].payload["producer"], json!("producer.slow"));
}

#[tokio::test]
async fn test_regime_change_emitted_once() {
    let (_dir, store, config) = fixture(&["BTC"]);
    // Bullish across the board so the regime flips CHOP -> BULL.
    store
        .append(
            EventDraft::new(
                "signal.ta.v1",
                json!({"asset": "BTC", "rsi_14": 62.0, "price": 50_000.0}),
            )
            .with_source("producer.ta"),
        )
        .unwrap();
    store
        .append(
            EventDraft::new(
                "signal.tradfi.v1",
                json!({"asset": "BTC", "funding_annualized": 12.0, "basis_annualized": 5.0}),
            )
            .with_source("producer.tradfi"),
        )
        .unwrap();
    store
        .append(
            EventDraft::new(
                "signal.sentiment.v1",
                json!({"asset": "BTC", "fear_greed": 60.0}),
            )
            .with_source("producer.sentiment"),
        )
        .unwrap();

    let orchestrator = Orchestrator::new(Arc::clone(&store), config);
    let first = orchestrator.run_cycle(false).await.unwrap();
    assert_eq!(first.regime, Regime::Bull);

    let tip = store.tip_seq().unwrap();
    let changes = store
        .events_by_type_desc(event_types::REGIME_CHANGED, tip, 10)
        .unwrap();
    assert_eq!(changes.len(), 1);

    // Same conditions: no second transition event.
    orchestrator.run_cycle(false).await.unwrap();
    let tip = store.tip_seq().unwrap();
    let changes = store
        .events_by_type_desc(event_types::REGIME_CHANGED, tip, 10)
        .unwrap();
    assert_eq!(changes.len(), 1);
}
