//! Anti-spam controls for signal submission.
//!
//! Three layers, all derived from the log (no in-memory state to lose on
//! restart):
//! 1. Rate limits: per-contributor hourly and daily submission caps.
//! 2. Cooldown: the same contributor cannot resubmit for the same asset
//!    inside the duplicate window.
//! 3. Duplicate-payload detection: an identical signal payload seen from
//!    any contributor inside the window is refused - cloning a feed is
//!    not a contribution.

use chrono::{DateTime, Duration, Utc};

use b1e55ed_ledger::EventStore;
use b1e55ed_models::canonical::payload_hash;
use b1e55ed_models::{event_types, CoreError, PolicyError};
use b1e55ed_projections::ContributorTally;

/// Limits; testers get a tighter ceiling via `for_tester`.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub duplicate_window_minutes: i64,
    /// Recent signal events scanned for payload duplication.
    pub duplicate_scan_limit: usize,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_hour: 20,
            max_per_day: 100,
            duplicate_window_minutes: 30,
            duplicate_scan_limit: 500,
        }
    }
}

impl RateLimitPolicy {
    /// Tester role: a tenth of the daily budget.
    pub fn for_tester() -> Self {
        Self {
            max_per_hour: 5,
            max_per_day: 10,
            ..Self::default()
        }
    }
}

/// Stateless checker over the tallies view and the journal.
pub struct RateLimiter {
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self { policy }
    }

    /// Check a submission before it reaches the log.
    pub fn check(
        &self,
        store: &EventStore,
        tally: &ContributorTally,
        asset: Option<&str>,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.check_frequency(tally, now)?;
        if let Some(asset) = asset {
            self.check_asset_cooldown(tally, asset, now)?;
        }
        self.check_duplicate_payload(store, payload, now)?;
        Ok(())
    }

    fn check_frequency(&self, tally: &ContributorTally, now: DateTime<Utc>) -> Result<(), CoreError> {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::days(1);

        let last_hour = tally.records.iter().filter(|r| r.ts >= hour_ago).count() as u32;
        if last_hour >= self.policy.max_per_hour {
            return Err(refusal(now, tally, hour_ago, Duration::hours(1)));
        }

        let last_day = tally.records.iter().filter(|r| r.ts >= day_ago).count() as u32;
        if last_day >= self.policy.max_per_day {
            return Err(refusal(now, tally, day_ago, Duration::days(1)));
        }
        Ok(())
    }

    fn check_asset_cooldown(
        &self,
        tally: &ContributorTally,
        asset: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let window_start = now - Duration::minutes(self.policy.duplicate_window_minutes);
        let recent_same_asset = tally
            .records
            .iter()
            .filter(|r| r.ts >= window_start)
            .any(|r| r.asset.as_deref() == Some(asset));

        if recent_same_asset {
            let retry = self.policy.duplicate_window_minutes as u64 * 60;
            tracing::info!(contributor_id = %tally.contributor_id, %asset, "asset cooldown hit");
            return Err(CoreError::Policy(PolicyError::RateLimited {
                retry_after_seconds: retry,
            }));
        }
        Ok(())
    }

    /// The same canonical payload from anyone inside the window is a clone.
    fn check_duplicate_payload(
        &self,
        store: &EventStore,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let incoming = payload_hash(payload);
        let window_start = now - Duration::minutes(self.policy.duplicate_window_minutes);
        let tip = store.tip_seq()?;

        let recent = store.events_by_type_desc(
            event_types::ATTRIBUTION,
            tip,
            self.policy.duplicate_scan_limit,
        )?;
        for attribution in recent {
            if attribution.ts < window_start {
                break; // descending by seq; everything older is out of window
            }
            let Some(event_id) = attribution
                .payload
                .get("event_id")
                .and_then(|v| v.as_str())
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let Some(signal) = store.event_by_id(&event_id)? else {
                continue;
            };
            if payload_hash(&signal.payload) == incoming {
                tracing::info!(seq = signal.seq, "duplicate payload within window");
                return Err(CoreError::Policy(PolicyError::RateLimited {
                    retry_after_seconds: self.policy.duplicate_window_minutes as u64 * 60,
                }));
            }
        }
        Ok(())
    }
}

fn refusal(
    now: DateTime<Utc>,
    tally: &ContributorTally,
    window_start: DateTime<Utc>,
    window: Duration,
) -> CoreError {
    // Retry when the oldest in-window record ages out.
    let oldest_in_window = tally
        .records
        .iter()
        .filter(|r| r.ts >= window_start)
        .map(|r| r.ts)
        .min()
        .unwrap_or(now);
    let retry_at = oldest_in_window + window;
    let retry_after_seconds = (retry_at - now).num_seconds().max(1) as u64;
    CoreError::Policy(PolicyError::RateLimited {
        retry_after_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use b1e55ed_models::Role;
    use b1e55ed_projections::ContributorRecord;
    use uuid::Uuid;

    fn tally_with_records(times: Vec<DateTime<Utc>>, asset: &str) -> ContributorTally {
        ContributorTally {
            contributor_id: Uuid::new_v4(),
            node_id: "b1e55ed-00000001".to_string(),
            name: "agent".to_string(),
            role: Role::Agent,
            registered_seq: 1,
            submitted: times.len() as u64,
            accepted: times.len() as u64,
            records: times
                .into_iter()
                .map(|ts| ContributorRecord {
                    attribution_id: Uuid::new_v4(),
                    event_id: Uuid::new_v4(),
                    ts,
                    accepted: true,
                    asset: Some(asset.to_string()),
                    confidence: None,
                    profitable: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_hourly_cap() {
        let limiter = RateLimiter::new(RateLimitPolicy {
            max_per_hour: 3,
            ..RateLimitPolicy::default()
        });
        let now = Utc::now();
        let tally = tally_with_records(
            vec![
                now - Duration::minutes(5),
                now - Duration::minutes(10),
                now - Duration::minutes(15),
            ],
            "BTC",
        );

        let err = limiter.check_frequency(&tally, now).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Policy(PolicyError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_old_records_do_not_count() {
        let limiter = RateLimiter::new(RateLimitPolicy {
            max_per_hour: 3,
            ..RateLimitPolicy::default()
        });
        let now = Utc::now();
        let tally = tally_with_records(
            vec![
                now - Duration::hours(2),
                now - Duration::hours(3),
                now - Duration::hours(4),
            ],
            "BTC",
        );
        assert!(limiter.check_frequency(&tally, now).is_ok());
    }

    #[test]
    fn test_asset_cooldown_blocks_repeat() {
        let limiter = RateLimiter::new(RateLimitPolicy::default());
        let now = Utc::now();
        let tally = tally_with_records(vec![now - Duration::minutes(5)], "BTC");

        assert!(limiter.check_asset_cooldown(&tally, "BTC", now).is_err());
        assert!(limiter.check_asset_cooldown(&tally, "ETH", now).is_ok());
    }

    #[test]
    fn test_tester_policy_is_tighter() {
        let tester = RateLimitPolicy::for_tester();
        let default = RateLimitPolicy::default();
        assert!(tester.max_per_day < default.max_per_day);
        assert!(tester.max_per_hour < default.max_per_hour);
    }
}
