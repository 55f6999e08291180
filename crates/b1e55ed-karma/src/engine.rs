//! Karma engine: intent generation and settlement against the journal.

use std::sync::Arc;

use uuid::Uuid;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, Config, CoreError, Event, EventDraft, ExecutionMode, InputError,
    KarmaIntentPayload, KarmaPolicyChangePayload, KarmaSettlePayload, PolicyError,
};
use b1e55ed_projections::Projector;

use crate::view::KarmaView;

pub struct KarmaEngine {
    store: Arc<EventStore>,
    config: Config,
}

impl KarmaEngine {
    pub fn new(store: Arc<EventStore>, config: Config) -> Self {
        Self { store, config }
    }

    fn enabled(&self) -> bool {
        self.config.karma.enabled && self.config.karma.percentage > 0.0
    }

    fn view(&self) -> Result<KarmaView, CoreError> {
        Projector::new(Arc::clone(&self.store)).replay_from_genesis()
    }

    /// Record an intent for a realized-profit close.
    ///
    /// Returns `Ok(None)` when no intent applies: karma disabled, paper
    /// mode, no treasury destination, or non-positive profit. Paper-mode
    /// isolation is absolute - a paper close can never mint an intent.
    pub fn record_intent(
        &self,
        position_id: Uuid,
        realized_pnl: f64,
    ) -> Result<Option<Event>, CoreError> {
        if !self.enabled() {
            return Ok(None);
        }
        if self.config.mode != ExecutionMode::Live {
            tracing::debug!(%position_id, "paper mode: no karma intent");
            return Ok(None);
        }
        if self.config.karma.destination.is_empty() {
            tracing::warn!("karma enabled without a destination; intent skipped");
            return Ok(None);
        }
        if realized_pnl <= 0.0 {
            return Ok(None);
        }

        let percentage = self.effective_percentage()?;
        let intent_id = Uuid::new_v4();
        let payload = KarmaIntentPayload {
            intent_id,
            position_id,
            profit: realized_pnl,
            amount: realized_pnl * percentage,
            node_id: self.store.node_id().unwrap_or_default(),
        };

        let event = self.store.append(
            EventDraft::new(
                event_types::KARMA_INTENT,
                serde_json::to_value(&payload)
                    .map_err(|e| InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("karma")
            .with_dedupe(format!("karma.intent:{intent_id}")),
        )?;
        tracing::info!(%intent_id, amount = payload.amount, "karma intent recorded");
        Ok(Some(event))
    }

    /// Settle a batch of intents atomically. Every listed intent must
    /// exist and be open; otherwise the settlement is refused whole.
    pub fn settle(
        &self,
        intent_ids: &[Uuid],
        tx_hash: Option<String>,
        actor: &str,
    ) -> Result<Event, CoreError> {
        if intent_ids.is_empty() {
            return Err(CoreError::Input(InputError::InvalidPayload(
                "settlement requires at least one intent".into(),
            )));
        }
        if self.config.mode != ExecutionMode::Live {
            return Err(CoreError::Policy(PolicyError::PaperModeRestricted));
        }

        let view = self.view()?;
        let mut total = 0.0;
        for intent_id in intent_ids {
            match view.intents.get(intent_id) {
                Some(intent) if intent.is_open() => total += intent.amount,
                Some(_) => {
                    return Err(CoreError::Input(InputError::InvalidPayload(format!(
                        "intent {intent_id} already settled"
                    ))))
                }
                None => {
                    return Err(CoreError::Input(InputError::InvalidPayload(format!(
                        "unknown intent {intent_id}"
                    ))))
                }
            }
        }

        let destination = self.effective_destination(&view);
        let payload = KarmaSettlePayload {
            intent_ids: intent_ids.to_vec(),
            total,
            destination,
            tx_hash,
            actor: actor.to_string(),
        };

        let event = self.store.append(
            EventDraft::new(
                event_types::KARMA_SETTLE,
                serde_json::to_value(&payload)
                    .map_err(|e| InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("karma"),
        )?;
        tracing::info!(count = intent_ids.len(), total, "karma settlement recorded");
        Ok(event)
    }

    /// Change settlement parameters. After the first settlement this is
    /// the only path, and the caller must hold elevated authorization
    /// (enforced at the ingress boundary; asserted here by flag).
    pub fn change_policy(
        &self,
        percentage: f64,
        destination: String,
        actor: &str,
        elevated: bool,
    ) -> Result<Event, CoreError> {
        if !elevated {
            return Err(CoreError::Policy(PolicyError::AuthorizationRejected));
        }
        if !(0.0..=1.0).contains(&percentage) {
            return Err(CoreError::Input(InputError::InvalidPayload(
                "percentage must be in [0,1]".into(),
            )));
        }

        let payload = KarmaPolicyChangePayload {
            percentage,
            destination,
            actor: actor.to_string(),
        };
        let event = self.store.append(
            EventDraft::new(
                event_types::KARMA_POLICY_CHANGE,
                serde_json::to_value(&payload)
                    .map_err(|e| InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("karma"),
        )?;
        Ok(event)
    }

    /// Percentage in force: the frozen/changed policy wins over config
    /// once any settlement exists.
    fn effective_percentage(&self) -> Result<f64, CoreError> {
        let view = self.view()?;
        Ok(match &view.frozen_policy {
            Some(policy) if view.policy_frozen() => policy.percentage,
            _ => self.config.karma.percentage,
        })
    }

    fn effective_destination(&self, view: &KarmaView) -> String {
        match &view.frozen_policy {
            Some(policy) if view.policy_frozen() => policy.destination.clone(),
            _ => self.config.karma.destination.clone(),
        }
    }

    /// Config drift guard: once frozen, the config must agree with the
    /// policy on record or settlement parameters are considered tampered.
    pub fn verify_policy(&self) -> Result<(), CoreError> {
        let view = self.view()?;
        if let Some(policy) = &view.frozen_policy {
            if view.policy_frozen()
                && ((policy.percentage - self.config.karma.percentage).abs() > 1e-9
                    || policy.destination != self.config.karma.destination)
            {
                return Err(CoreError::Policy(PolicyError::PolicyImmutable));
            }
        }
        Ok(())
    }
}
