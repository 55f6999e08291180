//! The `Ingress` facade.
//!
//! Constructed from capability objects at startup and injected wherever
//! requests arrive (REST, CLI, tests). Nothing here owns business logic:
//! permission check, input check, delegate, translate errors.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use b1e55ed_brain::{CycleResult, KillSwitch, Orchestrator};
use b1e55ed_contrib::{RateLimitPolicy, RateLimiter};
use b1e55ed_karma::KarmaEngine;
use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, AttributionPayload, Config, ContributorRegisterPayload, CoreError, Event,
    EventDraft, InputError, KillLevel, PolicyError, Role,
};
use b1e55ed_projections::{Projector, TalliesView};

use crate::permissions::{Permission, RolePermissions};
use crate::redact::Sanitizer;

/// Caller-supplied bearer token.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub token: String,
}

/// What `submit_signal` returns: the two events it appended.
#[derive(Debug, Clone)]
pub struct SignalReceipt {
    pub event_id: Uuid,
    pub attribution_id: Uuid,
    pub signal_seq: u64,
    pub attribution_seq: u64,
}

/// The core-facing API object.
pub struct Ingress {
    store: Arc<EventStore>,
    config: Config,
    orchestrator: Orchestrator,
    karma: KarmaEngine,
    sanitizer: Sanitizer,
}

impl Ingress {
    pub fn new(store: Arc<EventStore>, config: Config) -> Self {
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&store), config.clone()),
            karma: KarmaEngine::new(Arc::clone(&store), config.clone()),
            store,
            config,
            sanitizer: Sanitizer::new(),
        }
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Append a raw event (signer attached internally by the store).
    pub fn append_event(
        &self,
        event_type: &str,
        payload: serde_json::Value,
        source: Option<String>,
        trace_id: Option<String>,
        dedupe_key: Option<String>,
    ) -> Result<Event, CoreError> {
        if !event_types::is_valid_type(event_type) {
            return Err(CoreError::Input(InputError::InvalidType(
                event_type.to_string(),
            )));
        }
        let mut draft = EventDraft::new(event_type, payload);
        draft.source = source;
        draft.trace_id = trace_id;
        draft.dedupe_key = dedupe_key;
        self.store.append(draft)
    }

    /// Register a contributor. Registration is itself an event; duplicate
    /// node ids are rejected before they reach the log.
    pub fn register_contributor(
        &self,
        actor_role: Role,
        node_id: &str,
        name: &str,
        role: Role,
        metadata: serde_json::Value,
    ) -> Result<Event, CoreError> {
        RolePermissions::check(actor_role, Permission::RegisterContributor)?;

        let tallies = self.tallies()?;
        if tallies.by_node_id(node_id).is_some() {
            return Err(CoreError::Input(InputError::DuplicateContributor(
                node_id.to_string(),
            )));
        }

        let payload = ContributorRegisterPayload {
            contributor_id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            name: name.to_string(),
            role,
            metadata,
        };
        self.store.append(
            EventDraft::new(
                event_types::CONTRIBUTOR_REGISTER,
                serde_json::to_value(&payload)
                    .map_err(|e| InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("ingress"),
        )
    }

    /// Submit a signal on behalf of a contributor: two linked events
    /// appended atomically (the signal and its attribution).
    pub fn submit_signal(
        &self,
        contributor_id: &Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<SignalReceipt, CoreError> {
        if !event_types::is_signal(event_type) || !event_types::is_valid_type(event_type) {
            return Err(CoreError::Input(InputError::InvalidType(
                event_type.to_string(),
            )));
        }

        let tallies = self.tallies()?;
        let Some(tally) = tallies.get(contributor_id) else {
            return Err(CoreError::Input(InputError::ContributorNotFound(
                contributor_id.to_string(),
            )));
        };
        RolePermissions::check(tally.role, Permission::SubmitSignal)?;

        let policy = match tally.role {
            Role::Tester => RateLimitPolicy::for_tester(),
            _ => RateLimitPolicy::default(),
        };
        let asset = payload
            .get("asset")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        RateLimiter::new(policy).check(
            &self.store,
            tally,
            asset.as_deref(),
            &payload,
            chrono::Utc::now(),
        )?;

        // Accepted when the brain knows how to fold this signal type.
        let accepted = b1e55ed_brain::collection::DOMAIN_BY_SIGNAL
            .iter()
            .any(|(known, _)| *known == event_type);
        let confidence = payload.get("confidence").and_then(|v| v.as_f64());

        // Pre-allocate the signal's id so the attribution can reference
        // it inside the same atomic batch.
        let signal_id = Uuid::new_v4();
        let attribution_id = Uuid::new_v4();

        let signal_draft = EventDraft::new(event_type, payload)
            .with_event_id(signal_id)
            .with_source(format!("contributor:{contributor_id}"));
        let attribution_payload = AttributionPayload {
            attribution_id,
            contributor_id: *contributor_id,
            event_id: signal_id,
            accepted,
            asset,
            confidence,
        };
        let attribution_draft = EventDraft::new(
            event_types::ATTRIBUTION,
            serde_json::to_value(&attribution_payload)
                .map_err(|e| InputError::InvalidPayload(e.to_string()))?,
        )
        .with_source("ingress");

        let events = self
            .store
            .append_batch(vec![signal_draft, attribution_draft])?;
        let [signal, attribution] = events.as_slice() else {
            return Err(CoreError::Input(InputError::InvalidPayload(
                "unexpected batch result".into(),
            )));
        };

        Ok(SignalReceipt {
            event_id: signal.event_id,
            attribution_id,
            signal_seq: signal.seq,
            attribution_seq: attribution.seq,
        })
    }

    /// Run a brain cycle. Operator only. A cycle whose open intents were
    /// all refused by the kill switch surfaces that refusal to the caller.
    pub async fn run_cycle(&self, actor_role: Role, full: bool) -> Result<CycleResult, CoreError> {
        RolePermissions::check(actor_role, Permission::TriggerCycle)?;
        let result = self.orchestrator.run_cycle(full).await?;
        if !result.refused.is_empty() {
            return Err(CoreError::Policy(PolicyError::KillSwitchActive {
                level: result.kill_level,
            }));
        }
        Ok(result)
    }

    /// Set the kill-switch level. Raising needs the operator token;
    /// lowering needs the elevated token - a separate capability, so a
    /// compromised operator token cannot disarm.
    pub fn kill_switch_set(
        &self,
        level: KillLevel,
        actor: &str,
        authorization: &Authorization,
    ) -> Result<Event, CoreError> {
        let mut kill_switch = KillSwitch::restore(
            Arc::clone(&self.store),
            self.config.kill_switch.clone(),
        )?;

        let lowering = level < kill_switch.level();
        if lowering {
            self.verify_token(authorization, &self.config.auth.elevated_token_sha256)?;
        } else {
            self.verify_token(authorization, &self.config.auth.operator_token_sha256)?;
        }

        kill_switch.set(level, actor, lowering)
    }

    /// Settle karma intents. Operator only, atomic.
    pub fn settle_karma(
        &self,
        actor_role: Role,
        intent_ids: &[Uuid],
        tx_hash: Option<String>,
        actor: &str,
    ) -> Result<Event, CoreError> {
        RolePermissions::check(actor_role, Permission::SettleKarma)?;
        self.karma.settle(intent_ids, tx_hash, actor)
    }

    /// Record a position close and, in live mode, its karma intent.
    pub fn record_close(
        &self,
        position_id: Uuid,
        asset: &str,
        exit: f64,
        realized_pnl: f64,
        reason: &str,
    ) -> Result<Event, CoreError> {
        let level = KillSwitch::level_at(&self.store, self.store.tip_seq()?)?;
        b1e55ed_brain::DecisionEngine::gate_exit(level)?;

        let close = self.store.append(
            EventDraft::new(
                event_types::INTENT_CLOSE,
                serde_json::json!({
                    "position_id": position_id,
                    "asset": asset,
                    "exit": exit,
                    "realized_pnl": realized_pnl,
                    "reason": reason,
                }),
            )
            .with_source("ingress"),
        )?;

        // Karma is fail-open by contract: a karma refusal must never
        // break execution, so only ledger-fatal errors propagate.
        match self.karma.record_intent(position_id, realized_pnl) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(error = %self.sanitizer.sanitize(&err.to_string()),
                    "karma intent skipped");
            }
        }

        // Same contract for the learning loop's outcome resolution.
        let writer = b1e55ed_contrib::OutcomeWriter::new(Arc::clone(&self.store));
        match writer.resolve_position(position_id) {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::warn!(error = %self.sanitizer.sanitize(&err.to_string()),
                    "outcome resolution skipped");
            }
        }
        Ok(close)
    }

    fn tallies(&self) -> Result<TalliesView, CoreError> {
        Projector::new(Arc::clone(&self.store)).replay_from_genesis()
    }

    /// Constant-time token check against a configured SHA-256 digest.
    /// An empty digest disables the capability.
    fn verify_token(&self, authorization: &Authorization, expected_hex: &str) -> Result<(), CoreError> {
        if expected_hex.is_empty() {
            return Err(CoreError::Policy(PolicyError::AuthorizationRejected));
        }
        let expected = hex::decode(expected_hex)
            .map_err(|_| CoreError::Policy(PolicyError::AuthorizationRejected))?;
        let provided = Sha256::digest(authorization.token.as_bytes());
        if expected.len() == 32 && provided.as_slice().ct_eq(&expected).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(CoreError::Policy(PolicyError::AuthorizationRejected))
        }
    }
}
