//! Karma ledger tests: paper-mode isolation, default-off, atomic
//! settlement, policy freeze.

use std::sync::Arc;

use uuid::Uuid;

use b1e55ed_identity::DeterministicSigner;
use b1e55ed_karma::{KarmaEngine, KarmaView};
use b1e55ed_ledger::{EventStore, StoreOptions};
use b1e55ed_models::{event_types, Config, CoreError, ExecutionMode, PolicyError};
use b1e55ed_projections::Projector;

fn open_store(dir: &tempfile::TempDir) -> Arc<EventStore> {
    let signer = Arc::new(DeterministicSigner::of_byte(1));
    Arc::new(
        EventStore::open(
            &dir.path().join("journal.db"),
            signer,
            StoreOptions::default(),
        )
        .unwrap(),
    )
}

fn live_config() -> Config {
    let mut config = Config::default();
    config.mode = ExecutionMode::Live;
    config.karma.enabled = true;
    config.karma.percentage = 0.01;
    config.karma.destination = "0xtreasury".to_string();
    config
}

#[test]
fn test_karma_disabled_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let mut config = Config::default();
    config.mode = ExecutionMode::Live;

    let engine = KarmaEngine::new(Arc::clone(&store), config);
    let out = engine.record_intent(Uuid::new_v4(), 1_000.0).unwrap();
    assert!(out.is_none());
}

#[test]
fn test_paper_mode_never_mints_intents() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let mut config = live_config();
    config.mode = ExecutionMode::Paper;

    let engine = KarmaEngine::new(Arc::clone(&store), config);
    let out = engine.record_intent(Uuid::new_v4(), 1_000.0).unwrap();
    assert!(out.is_none());

    // P9: no karma.intent.v1 events exist anywhere in the log.
    let tip = store.tip_seq().unwrap();
    let intents = store
        .events_by_type_desc(event_types::KARMA_INTENT, tip, 100)
        .unwrap();
    assert!(intents.is_empty());
}

#[test]
fn test_losses_never_produce_intents() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let engine = KarmaEngine::new(Arc::clone(&store), live_config());

    assert!(engine.record_intent(Uuid::new_v4(), -50.0).unwrap().is_none());
    assert!(engine.record_intent(Uuid::new_v4(), 0.0).unwrap().is_none());
}

#[test]
fn test_intent_amount_is_percentage_of_profit() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let engine = KarmaEngine::new(Arc::clone(&store), live_config());

    let event = engine
        .record_intent(Uuid::new_v4(), 2_000.0)
        .unwrap()
        .unwrap();
    assert_eq!(event.payload["profit"].as_f64().unwrap(), 2_000.0);
    assert!((event.payload["amount"].as_f64().unwrap() - 20.0).abs() < 1e-9);
}

#[test]
fn test_settlement_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let engine = KarmaEngine::new(Arc::clone(&store), live_config());

    let a = engine.record_intent(Uuid::new_v4(), 100.0).unwrap().unwrap();
    let b = engine.record_intent(Uuid::new_v4(), 300.0).unwrap().unwrap();
    let a_id = Uuid::parse_str(a.payload["intent_id"].as_str().unwrap()).unwrap();
    let b_id = Uuid::parse_str(b.payload["intent_id"].as_str().unwrap()).unwrap();

    // A batch naming an unknown intent settles nothing.
    let err = engine
        .settle(&[a_id, Uuid::new_v4()], None, "operator")
        .unwrap_err();
    assert!(matches!(err, CoreError::Input(_)));

    let projector = Projector::new(Arc::clone(&store));
    let view: KarmaView = projector.replay_from_genesis().unwrap();
    assert_eq!(view.open_intents().count(), 2);

    // A valid batch settles everything it names.
    engine
        .settle(&[a_id, b_id], Some("0xabc".into()), "operator")
        .unwrap();
    let view: KarmaView = projector.replay_from_genesis().unwrap();
    assert_eq!(view.open_intents().count(), 0);
    assert_eq!(view.settlements, 1);

    // Settled intents cannot settle again.
    let err = engine.settle(&[a_id], None, "operator").unwrap_err();
    assert!(matches!(err, CoreError::Input(_)));
}

#[test]
fn test_settlement_refused_in_paper_mode() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    // Mint in live mode, then drop to paper.
    let live = KarmaEngine::new(Arc::clone(&store), live_config());
    let a = live.record_intent(Uuid::new_v4(), 100.0).unwrap().unwrap();
    let a_id = Uuid::parse_str(a.payload["intent_id"].as_str().unwrap()).unwrap();

    let mut paper_cfg = live_config();
    paper_cfg.mode = ExecutionMode::Paper;
    let paper = KarmaEngine::new(Arc::clone(&store), paper_cfg);

    let err = paper.settle(&[a_id], None, "operator").unwrap_err();
    assert_eq!(err, CoreError::Policy(PolicyError::PaperModeRestricted));
}

#[test]
fn test_policy_freezes_after_first_settlement() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let engine = KarmaEngine::new(Arc::clone(&store), live_config());

    let a = engine.record_intent(Uuid::new_v4(), 100.0).unwrap().unwrap();
    let a_id = Uuid::parse_str(a.payload["intent_id"].as_str().unwrap()).unwrap();
    engine.settle(&[a_id], None, "operator").unwrap();

    // Config still matches the frozen policy: fine.
    engine.verify_policy().unwrap();

    // Drifting the config without a policy-change event is refused.
    let mut drifted = live_config();
    drifted.karma.percentage = 0.05;
    let drifted_engine = KarmaEngine::new(Arc::clone(&store), drifted);
    let err = drifted_engine.verify_policy().unwrap_err();
    assert_eq!(err, CoreError::Policy(PolicyError::PolicyImmutable));

    // An elevated policy-change event legitimizes the new parameters.
    let mut changed = live_config();
    changed.karma.percentage = 0.05;
    let changed_engine = KarmaEngine::new(Arc::clone(&store), changed);
    changed_engine
        .change_policy(0.05, "0xtreasury".into(), "operator", true)
        .unwrap();
    changed_engine.verify_policy().unwrap();

    // Without elevated authorization the change is refused.
    let err = changed_engine
        .change_policy(0.10, "0xother".into(), "operator", false)
        .unwrap_err();
    assert_eq!(err, CoreError::Policy(PolicyError::AuthorizationRejected));
}
