//! Collection phase: the freshest signal per (asset, type) within each
//! domain's freshness window, read at or below the cycle snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{BrainConfig, CoreError, Event};

/// Signal event types the brain folds, with their synthesis domains.
pub const DOMAIN_BY_SIGNAL: &[(&str, &str)] = &[
    ("signal.curator.v1", "curator"),
    ("signal.onchain.v1", "onchain"),
    ("signal.stablecoin.v1", "onchain"),
    ("signal.whale.v1", "onchain"),
    ("signal.tradfi.v1", "tradfi"),
    ("signal.etf.v1", "tradfi"),
    ("signal.social.v1", "social"),
    ("signal.sentiment.v1", "social"),
    ("signal.ta.v1", "technical"),
    ("signal.orderbook.v1", "technical"),
    ("signal.events.v1", "events"),
];

/// Freshest in-window signals for one asset, keyed domain -> type -> event.
#[derive(Debug, Clone, Default)]
pub struct AssetSignals {
    pub asset: String,
    pub by_domain: BTreeMap<String, Vec<Event>>,
}

impl AssetSignals {
    pub fn domains(&self) -> Vec<&str> {
        self.by_domain.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }
}

/// Phase 1 reader.
pub struct Collector<'a> {
    store: &'a EventStore,
    config: &'a BrainConfig,
    /// Bounded per-type scan when hunting for an asset's latest signal.
    scan_limit: usize,
}

impl<'a> Collector<'a> {
    pub fn new(store: &'a EventStore, config: &'a BrainConfig) -> Self {
        Self {
            store,
            config,
            scan_limit: 200,
        }
    }

    /// Collect the latest in-window signal of each type for `asset`,
    /// considering only events with `seq <= snapshot_seq`.
    pub fn collect(
        &self,
        asset: &str,
        snapshot_seq: u64,
        now: DateTime<Utc>,
    ) -> Result<AssetSignals, CoreError> {
        let mut out = AssetSignals {
            asset: asset.to_uppercase(),
            by_domain: BTreeMap::new(),
        };

        for (event_type, domain) in DOMAIN_BY_SIGNAL {
            let window = self.freshness_window(domain);
            let candidates =
                self.store
                    .events_by_type_desc(event_type, snapshot_seq, self.scan_limit)?;

            // Newest first; take the first matching the asset and window.
            let chosen = candidates.into_iter().find(|event| {
                let matches_asset = event
                    .payload
                    .get("asset")
                    .and_then(|v| v.as_str())
                    .is_some_and(|a| a.eq_ignore_ascii_case(asset));
                matches_asset && now - event.ts <= window
            });

            if let Some(event) = chosen {
                out.by_domain
                    .entry((*domain).to_string())
                    .or_default()
                    .push(event);
            }
        }

        Ok(out)
    }

    fn freshness_window(&self, domain: &str) -> Duration {
        let seconds = self
            .config
            .freshness_seconds
            .get(domain)
            .copied()
            .unwrap_or(3_600);
        Duration::seconds(seconds as i64)
    }
}
