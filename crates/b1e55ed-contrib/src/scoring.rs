//! Calibrated contributor scoring.
//!
//! Composite weights (hardest-to-game components carry the most):
//!
//! ```text
//! 0.35 * hit_rate     decay-weighted profitable / submitted
//! 0.25 * calibration  1 - brier/0.25, clamped to [0,1]
//! 0.20 * volume       log-scaled decayed accepted count
//! 0.10 * recency      1.0 within 7 days, linear falloff to 37 days
//! 0.10 * diversity    distinct assets over a cap
//! ```
//!
//! A cloning penalty subtracts for payload duplication across
//! contributors, and the published score is an EWMA over the raw
//! composite so one resolved trade cannot move it more than the
//! smoothing factor allows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use b1e55ed_projections::{ContributorTally, TalliesView};

/// Tuning knobs. Defaults match the production learning loop.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    /// Contribution half-life in days.
    pub half_life_days: f64,
    /// Resolved outcomes required before hit rate and Brier count.
    pub min_resolved: u64,
    /// Below this acceptance rate (with enough volume) the score is zero.
    pub min_acceptance_rate: f64,
    /// Submissions before the acceptance-rate gate applies.
    pub acceptance_gate_after: u64,
    /// EWMA smoothing factor for the published score.
    pub smoothing: f64,
    /// Distinct assets at which the diversity component saturates.
    pub diversity_cap: usize,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            min_resolved: 5,
            min_acceptance_rate: 0.10,
            acceptance_gate_after: 10,
            smoothing: 0.30,
            diversity_cap: 5,
        }
    }
}

/// A contributor's published reputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorScore {
    pub contributor_id: Uuid,
    pub submitted: u64,
    pub accepted: u64,
    pub resolved: u64,
    pub profitable: u64,
    pub hit_rate: f64,
    pub acceptance_rate: f64,
    /// Mean squared calibration error; 0.25 is the random baseline.
    pub brier: f64,
    pub cloning_penalty: f64,
    /// Smoothed composite in [0,1].
    pub score: f64,
    pub last_active: Option<DateTime<Utc>>,
}

/// Pure scoring over the tallies view.
pub struct ScoringEngine {
    params: ScoringParams,
}

impl ScoringEngine {
    pub fn new(params: ScoringParams) -> Self {
        Self { params }
    }

    /// Score one contributor as of `now`. `previous_score` feeds the EWMA;
    /// pass `None` on first evaluation.
    pub fn score(
        &self,
        tally: &ContributorTally,
        view: &TalliesView,
        now: DateTime<Utc>,
        previous_score: Option<f64>,
    ) -> ContributorScore {
        let p = &self.params;
        let submitted = tally.submitted;
        let accepted = tally.accepted;
        let resolved = tally.resolved();
        let profitable = tally.profitable();

        let acceptance_rate = ratio(accepted, submitted);

        // Noise gate: enough volume with almost nothing accepted scores 0.
        if submitted >= p.acceptance_gate_after && acceptance_rate < p.min_acceptance_rate {
            return ContributorScore {
                contributor_id: tally.contributor_id,
                submitted,
                accepted,
                resolved,
                profitable,
                hit_rate: 0.0,
                acceptance_rate,
                brier: 0.25,
                cloning_penalty: 0.0,
                score: 0.0,
                last_active: tally.last_active(),
            };
        }

        // Decay-weighted tallies. Denominator is submitted, not accepted:
        // selection bias dies here.
        let mut decayed_submitted = 0.0;
        let mut decayed_profitable = 0.0;
        let mut decayed_accepted = 0.0;
        for record in &tally.records {
            let w = self.decay(record.ts, now);
            decayed_submitted += w;
            if record.accepted {
                decayed_accepted += w;
            }
            if record.profitable == Some(true) {
                decayed_profitable += w;
            }
        }

        let hit_rate = if resolved >= p.min_resolved && decayed_submitted > 0.0 {
            (decayed_profitable / decayed_submitted).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let brier = self.brier(tally);
        let calibration = (1.0 - brier / 0.25).clamp(0.0, 1.0);

        let volume = if decayed_accepted > 0.0 {
            ((1.0 + decayed_accepted).ln() / (1.0 + 100.0f64).ln()).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let recency = match tally.last_active() {
            None => 0.0,
            Some(last) => {
                let days = (now - last).num_seconds() as f64 / 86_400.0;
                if days <= 7.0 {
                    1.0
                } else {
                    (1.0 - (days - 7.0) / 30.0).clamp(0.0, 1.0)
                }
            }
        };

        let diversity = {
            let mut assets: Vec<&str> = tally
                .records
                .iter()
                .filter_map(|r| r.asset.as_deref())
                .collect();
            assets.sort_unstable();
            assets.dedup();
            (assets.len() as f64 / p.diversity_cap as f64).clamp(0.0, 1.0)
        };

        let cloning_penalty = self.cloning_penalty(tally, view);

        let raw = (0.35 * hit_rate
            + 0.25 * calibration
            + 0.20 * volume
            + 0.10 * recency
            + 0.10 * diversity
            - cloning_penalty)
            .clamp(0.0, 1.0);

        // Smoothing: one resolved trade moves the published score by at
        // most the smoothing factor times the raw swing.
        let score = match previous_score {
            Some(prev) => prev + p.smoothing * (raw - prev),
            None => raw,
        };

        ContributorScore {
            contributor_id: tally.contributor_id,
            submitted,
            accepted,
            resolved,
            profitable,
            hit_rate,
            acceptance_rate,
            brier,
            cloning_penalty,
            score: score.clamp(0.0, 1.0),
            last_active: tally.last_active(),
        }
    }

    /// Score everyone, descending. Ties break on accepted then submitted
    /// counts so the ordering is deterministic.
    pub fn leaderboard(&self, view: &TalliesView, now: DateTime<Utc>) -> Vec<ContributorScore> {
        let mut scores: Vec<ContributorScore> = view
            .contributors
            .values()
            .map(|tally| self.score(tally, view, now, None))
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.accepted.cmp(&a.accepted))
                .then(b.submitted.cmp(&a.submitted))
                .then(a.contributor_id.cmp(&b.contributor_id))
        });
        scores
    }

    fn decay(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
        0.5f64.powf(age_days / self.params.half_life_days)
    }

    /// Brier = mean((confidence - outcome)^2) over resolved records that
    /// declared a confidence. 0.25 (the random baseline) until enough
    /// outcomes exist.
    fn brier(&self, tally: &ContributorTally) -> f64 {
        let resolved: Vec<(f64, f64)> = tally
            .records
            .iter()
            .filter_map(|r| {
                let confidence = r.confidence?;
                let outcome = match r.profitable? {
                    true => 1.0,
                    false => 0.0,
                };
                Some((confidence.clamp(0.0, 1.0), outcome))
            })
            .collect();

        if (resolved.len() as u64) < self.params.min_resolved {
            return 0.25;
        }
        resolved
            .iter()
            .map(|(c, o)| (c - o) * (c - o))
            .sum::<f64>()
            / resolved.len() as f64
    }

    /// Fraction of this contributor's signals whose attributed event also
    /// appears under another contributor - cloned submissions score less.
    fn cloning_penalty(&self, tally: &ContributorTally, view: &TalliesView) -> f64 {
        if tally.records.is_empty() {
            return 0.0;
        }
        let mut duplicated = 0usize;
        for record in &tally.records {
            let cloned = view
                .contributors
                .values()
                .filter(|other| other.contributor_id != tally.contributor_id)
                .any(|other| other.records.iter().any(|r| r.event_id == record.event_id));
            if cloned {
                duplicated += 1;
            }
        }
        0.25 * duplicated as f64 / tally.records.len() as f64
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
