//! Kill switch: five levels, monotonic.
//!
//! Auto-escalate, never auto-de-escalate. The level is persisted as
//! `system.kill_switch.v1` events; boot restores from the newest one and
//! an unreadable state is fatal - a process that cannot know its safety
//! level does not get to trade.

use std::sync::Arc;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, CoreError, Event, EventDraft, KillLevel, KillSwitchConfig, KillSwitchPayload,
    PolicyError,
};

/// Inputs to auto-escalation, computed against projections.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskMetrics {
    /// Daily realized PnL as a signed fraction (-0.03 = down 3%).
    pub daily_pnl_pct: f64,
    /// Open exposure as a fraction of equity.
    pub portfolio_heat_pct: f64,
    /// Regime classifier output.
    pub crisis_confidence: Option<f64>,
    /// Lifetime peak-to-trough drawdown fraction.
    pub lifetime_drawdown_pct: f64,
}

/// The state machine. Holds the current level; all transitions go through
/// the journal.
pub struct KillSwitch {
    store: Arc<EventStore>,
    config: KillSwitchConfig,
    level: KillLevel,
}

impl KillSwitch {
    /// Restore from the newest persisted transition. There is no
    /// in-memory default: a process restarted at L3 stays at L3. Failure
    /// to read the state is fatal.
    pub fn restore(store: Arc<EventStore>, config: KillSwitchConfig) -> Result<Self, CoreError> {
        let tip = store.tip_seq()?;
        let level = Self::level_at(&store, tip)?;
        Ok(Self { store, config, level })
    }

    /// Level in force at snapshot `seq` (the decision phase reads through
    /// this to stay inside its transactional snapshot).
    pub fn level_at(store: &EventStore, max_seq: u64) -> Result<KillLevel, CoreError> {
        let latest = store.latest_of_type(event_types::KILL_SWITCH, max_seq)?;
        match latest {
            None => Ok(KillLevel::L0Nominal),
            Some(event) => {
                let payload: KillSwitchPayload = event.payload_as().map_err(|e| {
                    tracing::error!(seq = event.seq, error = %e,
                        "kill-switch state unreadable; refusing to run");
                    CoreError::Ledger(b1e55ed_models::LedgerError::ChainBroken { seq: event.seq })
                })?;
                Ok(payload.to)
            }
        }
    }

    pub fn level(&self) -> KillLevel {
        self.level
    }

    /// Evaluate auto-escalation triggers. Emits a transition event and
    /// raises the level when any trigger demands more than the current
    /// level; never lowers it.
    pub fn evaluate(&mut self, metrics: &RiskMetrics) -> Result<Option<Event>, CoreError> {
        let mut target = self.level;
        let mut reason = String::new();

        if metrics.daily_pnl_pct <= self.config.l1_daily_loss_pct && target < KillLevel::L1Caution {
            target = KillLevel::L1Caution;
            reason = format!("daily_pnl_pct={:.4}", metrics.daily_pnl_pct);
        }
        if metrics.portfolio_heat_pct >= self.config.l2_portfolio_heat_pct
            && target < KillLevel::L2Defensive
        {
            target = KillLevel::L2Defensive;
            reason = format!("portfolio_heat_pct={:.4}", metrics.portfolio_heat_pct);
        }
        if let Some(confidence) = metrics.crisis_confidence {
            if confidence >= self.config.l3_crisis_confidence && target < KillLevel::L3Lockdown {
                target = KillLevel::L3Lockdown;
                reason = format!("crisis_confidence={confidence:.2}");
            }
        }
        if metrics.lifetime_drawdown_pct >= self.config.l4_max_drawdown_pct
            && target < KillLevel::L4Emergency
        {
            target = KillLevel::L4Emergency;
            reason = format!("lifetime_drawdown_pct={:.4}", metrics.lifetime_drawdown_pct);
        }

        if target <= self.level {
            return Ok(None);
        }
        let event = self.transition(target, &reason, "auto")?;
        Ok(Some(event))
    }

    /// Operator-directed transition. Raising the level needs no special
    /// authority; lowering it demands the elevated capability - the
    /// ordinary operator token must not suffice to disarm.
    pub fn set(
        &mut self,
        to: KillLevel,
        actor: &str,
        elevated: bool,
    ) -> Result<Event, CoreError> {
        if to < self.level && !(actor == "operator" && elevated) {
            return Err(CoreError::Policy(PolicyError::NonMonotonicTransition {
                from: self.level,
                to,
            }));
        }
        if to == self.level {
            return Err(CoreError::Policy(PolicyError::NonMonotonicTransition {
                from: self.level,
                to,
            }));
        }
        self.transition(to, &format!("manual:{actor}"), actor)
    }

    fn transition(&mut self, to: KillLevel, reason: &str, actor: &str) -> Result<Event, CoreError> {
        let payload = KillSwitchPayload {
            from: self.level,
            to,
            reason: reason.to_string(),
            actor: actor.to_string(),
        };
        let event = self.store.append(
            EventDraft::new(
                event_types::KILL_SWITCH,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.kill_switch"),
        )?;
        tracing::warn!(from = %self.level, to = %to, %reason, %actor, "kill switch transition");
        self.level = to;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use b1e55ed_identity::DeterministicSigner;
    use b1e55ed_ledger::StoreOptions;

    fn fixture() -> (tempfile::TempDir, Arc<EventStore>) {
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
        (dir, store)
    }

    #[test]
    fn test_fresh_journal_starts_nominal() {
        let (_dir, store) = fixture();
        let ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();
        assert_eq!(ks.level(), KillLevel::L0Nominal);
    }

    #[test]
    fn test_auto_escalation_triggers_in_severity_order() {
        let (_dir, store) = fixture();
        let mut ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();

        // Heat trips L2 even though the loss alone would only be L1.
        let event = ks
            .evaluate(&RiskMetrics {
                daily_pnl_pct: -0.04,
                portfolio_heat_pct: 0.07,
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(ks.level(), KillLevel::L2Defensive);
        assert_eq!(event.payload["to"], serde_json::json!("l2_defensive"));

        // The same metrics do not re-emit.
        assert!(ks
            .evaluate(&RiskMetrics {
                daily_pnl_pct: -0.04,
                portfolio_heat_pct: 0.07,
                ..Default::default()
            })
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_crisis_and_drawdown_triggers() {
        let (_dir, store) = fixture();
        let mut ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();

        ks.evaluate(&RiskMetrics {
            crisis_confidence: Some(0.85),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
        assert_eq!(ks.level(), KillLevel::L3Lockdown);

        ks.evaluate(&RiskMetrics {
            lifetime_drawdown_pct: 0.31,
            ..Default::default()
        })
        .unwrap()
        .unwrap();
        assert_eq!(ks.level(), KillLevel::L4Emergency);
    }

    #[test]
    fn test_restart_preserves_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let signer = Arc::new(DeterministicSigner::of_byte(1));

        {
            let store = Arc::new(
                EventStore::open(&path, Arc::clone(&signer) as _, StoreOptions::default())
                    .unwrap(),
            );
            let mut ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();
            ks.evaluate(&RiskMetrics {
                portfolio_heat_pct: 0.07,
                ..Default::default()
            })
            .unwrap();
            assert_eq!(ks.level(), KillLevel::L2Defensive);
        }

        // Fresh process, same journal: no L0 reset.
        let store = Arc::new(EventStore::open(&path, signer, StoreOptions::default()).unwrap());
        let ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();
        assert_eq!(ks.level(), KillLevel::L2Defensive);
    }

    #[test]
    fn test_lowering_requires_elevated_operator() {
        let (_dir, store) = fixture();
        let mut ks = KillSwitch::restore(store, KillSwitchConfig::default()).unwrap();
        ks.set(KillLevel::L3Lockdown, "auto", false).unwrap();

        let err = ks.set(KillLevel::L1Caution, "operator", false).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Policy(PolicyError::NonMonotonicTransition { .. })
        ));
        // A non-operator actor cannot lower even with the elevated flag.
        assert!(ks.set(KillLevel::L1Caution, "agent", true).is_err());

        ks.set(KillLevel::L1Caution, "operator", true).unwrap();
        assert_eq!(ks.level(), KillLevel::L1Caution);
    }
}
