//! Quality phase: producer staleness and failure tracking.
//!
//! Stale or failing producers do not abort the cycle - they degrade it.
//! The monitor emits `producer_health.*` events when bounds are exceeded
//! and hands synthesis a per-domain quality multiplier so a silent
//! producer's domain stops pretending to be informed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{
    event_types, BrainConfig, CoreError, EventDraft, ProducerHealthPayload,
};

use crate::collection::DOMAIN_BY_SIGNAL;

/// Per-domain quality multipliers in [0,1].
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub per_domain: BTreeMap<String, f64>,
    pub stale_producers: Vec<String>,
}

impl QualityReport {
    pub fn multiplier(&self, domain: &str) -> f64 {
        self.per_domain.get(domain).copied().unwrap_or(1.0)
    }
}

/// Phase 2: staleness thresholds over the journal.
pub struct QualityMonitor<'a> {
    store: &'a EventStore,
    config: &'a BrainConfig,
}

impl<'a> QualityMonitor<'a> {
    pub fn new(store: &'a EventStore, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate staleness per signal type at the snapshot; emit health
    /// events for producers beyond their window.
    pub fn evaluate(
        &self,
        snapshot_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<QualityReport, CoreError> {
        let mut report = QualityReport::default();
        let mut domain_fresh: BTreeMap<&str, (u32, u32)> = BTreeMap::new(); // (fresh, total)

        for (event_type, domain) in DOMAIN_BY_SIGNAL {
            let entry = domain_fresh.entry(domain).or_default();
            entry.1 += 1;

            let window_seconds = self
                .config
                .freshness_seconds
                .get(*domain)
                .copied()
                .unwrap_or(3_600);

            let latest = self.store.latest_of_type(event_type, snapshot_seq)?;
            let staleness_seconds = latest
                .as_ref()
                .map(|e| (now - e.ts).num_seconds().max(0) as u64);

            match staleness_seconds {
                Some(age) if age <= window_seconds => {
                    entry.0 += 1;
                }
                Some(age) => {
                    report.stale_producers.push((*event_type).to_string());
                    self.emit_health(event_types::PRODUCER_STALE, event_type, domain, Some(age))?;
                }
                // Never-seen producers reduce quality but are not "stale":
                // there is nothing to page anyone about yet.
                None => {}
            }
        }

        for (domain, (fresh, total)) in domain_fresh {
            let quality = if total == 0 {
                0.0
            } else {
                fresh as f64 / total as f64
            };
            report.per_domain.insert(domain.to_string(), quality);
        }

        Ok(report)
    }

    /// Record a producer fetch failure; emits a failing event at the
    /// consecutive-failure bound.
    pub fn record_failure(
        &self,
        producer: &str,
        domain: &str,
        consecutive_failures: u32,
    ) -> Result<(), CoreError> {
        if consecutive_failures < self.config.max_consecutive_failures {
            return Ok(());
        }
        let payload = ProducerHealthPayload {
            producer: producer.to_string(),
            domain: domain.to_string(),
            staleness_seconds: None,
            consecutive_failures,
        };
        self.store.append(
            EventDraft::new(
                event_types::PRODUCER_FAILING,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.quality")
            .with_dedupe(format!("failing:{producer}:{consecutive_failures}")),
        )?;
        Ok(())
    }

    fn emit_health(
        &self,
        health_type: &str,
        producer: &str,
        domain: &str,
        staleness_seconds: Option<u64>,
    ) -> Result<(), CoreError> {
        // Staleness is bucketed to the hour so repeated cycles in the
        // same bucket dedupe to one event instead of one per cycle.
        let bucketed = staleness_seconds.map(|age| age - age % 3_600);
        let payload = ProducerHealthPayload {
            producer: producer.to_string(),
            domain: domain.to_string(),
            staleness_seconds: bucketed,
            consecutive_failures: 0,
        };
        self.store.append(
            EventDraft::new(
                health_type,
                serde_json::to_value(&payload)
                    .map_err(|e| b1e55ed_models::InputError::InvalidPayload(e.to_string()))?,
            )
            .with_source("brain.quality")
            .with_dedupe(format!("stale:{producer}:{}", bucketed.unwrap_or(0))),
        )?;
        Ok(())
    }
}
