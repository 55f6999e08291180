//! Immutable runtime configuration.
//!
//! A single `Config` value is constructed at startup and threaded through
//! the writer process by reference. There is no hot reload: changing
//! configuration requires an orchestrator restart. Weight state is NOT
//! configuration - it is a projection over weight-adjustment events; the
//! values here are only the cold-start defaults.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Execution mode. Paper PnL must never produce karma intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Paper,
    Live,
}

/// Root configuration. Single source of truth.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mode: ExecutionMode,
    pub assets: Vec<String>,
    pub ledger: LedgerConfig,
    pub identity: IdentityConfig,
    pub weights: DomainWeights,
    pub risk: RiskConfig,
    pub brain: BrainConfig,
    pub kill_switch: KillSwitchConfig,
    pub karma: KarmaConfig,
    pub auth: AuthConfig,
}

/// Ingress authorization tokens, stored as SHA-256 hex digests.
///
/// The elevated token is a separate capability from the operator token:
/// compromise of the ordinary token must not suffice to lower the kill
/// switch or rewrite settlement policy. Empty digests disable the
/// corresponding capability entirely.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub operator_token_sha256: String,
    pub elevated_token_sha256: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, crate::error::InputError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::error::InputError::InvalidPayload(format!(
                "could not read config {}: {e}",
                path.display()
            ))
        })?;
        let cfg: Config = toml::from_str(&raw)
            .map_err(|e| crate::error::InputError::InvalidPayload(format!("bad config: {e}")))?;
        cfg.weights.validate()?;
        Ok(cfg)
    }
}

/// Journal settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// A signed checkpoint is appended after every this many events.
    pub checkpoint_interval: u64,
    /// Single-transaction batch ceiling; larger batches fail without
    /// partial commit.
    pub max_batch: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/journal.db"),
            checkpoint_interval: 1_000,
            max_batch: 512,
        }
    }
}

/// Keystore settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub keystore_path: PathBuf,
    /// Permit a plaintext private key at rest. Development only; the
    /// keystore refuses plaintext when this is false.
    pub dev_mode: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keystore_path: PathBuf::from("data/identity.json"),
            dev_mode: false,
        }
    }
}

/// Cold-start synthesis domain weights. The live vector is a projection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DomainWeights {
    pub curator: f64,
    pub onchain: f64,
    pub tradfi: f64,
    pub social: f64,
    pub technical: f64,
    pub events: f64,
}

impl Default for DomainWeights {
    fn default() -> Self {
        Self {
            curator: 0.25,
            onchain: 0.25,
            tradfi: 0.20,
            social: 0.15,
            technical: 0.10,
            events: 0.05,
        }
    }
}

impl DomainWeights {
    pub const DOMAINS: [&'static str; 6] =
        ["curator", "onchain", "tradfi", "social", "technical", "events"];

    /// Weight floor and ceiling per domain.
    pub const W_MIN: f64 = 0.05;
    pub const W_MAX: f64 = 0.40;
    /// Per-adjustment delta cap.
    pub const DELTA_MAX: f64 = 0.02;

    pub fn as_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("curator".to_string(), self.curator),
            ("onchain".to_string(), self.onchain),
            ("tradfi".to_string(), self.tradfi),
            ("social".to_string(), self.social),
            ("technical".to_string(), self.technical),
            ("events".to_string(), self.events),
        ])
    }

    /// Weights must sum to 1.0 (+/-0.001) and respect the clamp band.
    pub fn validate(&self) -> Result<(), crate::error::InputError> {
        let map = self.as_map();
        let total: f64 = map.values().sum();
        if (total - 1.0).abs() > 0.001 {
            return Err(crate::error::InputError::InvalidPayload(format!(
                "domain weights must sum to 1.0, got {total}"
            )));
        }
        for (domain, w) in &map {
            if *w < Self::W_MIN || *w > Self::W_MAX {
                return Err(crate::error::InputError::InvalidPayload(format!(
                    "weight for {domain} outside [{}, {}]: {w}",
                    Self::W_MIN,
                    Self::W_MAX
                )));
            }
        }
        Ok(())
    }
}

/// Risk limits feeding the kill-switch auto triggers and sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Position size before conviction and regime scaling, as a fraction
    /// of equity.
    pub base_size: f64,
    pub max_position_pct: f64,
    /// Equity base used to express absolute PnL as fractions for the
    /// kill-switch triggers.
    pub equity: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_size: 0.05,
            max_position_pct: 0.10,
            equity: 10_000.0,
        }
    }
}

/// Cycle timing and decision thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub cycle_deadline_ms: u64,
    pub phase_deadline_ms: u64,
    pub producer_fetch_timeout_ms: u64,
    /// Counter-thesis scoring triggers at this PCS.
    pub cts_trigger: f64,
    /// Minimum final conviction for an open intent.
    pub entry_threshold: f64,
    /// Per-domain signal freshness windows in seconds.
    pub freshness_seconds: BTreeMap<String, u64>,
    /// Consecutive producer failures before a failing event is emitted.
    pub max_consecutive_failures: u32,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            cycle_deadline_ms: 10_000,
            phase_deadline_ms: 2_500,
            producer_fetch_timeout_ms: 3_000,
            cts_trigger: 0.75,
            entry_threshold: 0.70,
            freshness_seconds: BTreeMap::from([
                ("curator".to_string(), 86_400),
                ("onchain".to_string(), 7_200),
                ("tradfi".to_string(), 3_600),
                ("social".to_string(), 3_600),
                ("technical".to_string(), 1_800),
                ("events".to_string(), 21_600),
            ]),
            max_consecutive_failures: 3,
        }
    }
}

/// Auto-escalation trigger thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// L1 at daily realized PnL at or below this (negative) fraction.
    pub l1_daily_loss_pct: f64,
    /// L2 at portfolio heat at or above this fraction.
    pub l2_portfolio_heat_pct: f64,
    /// L3 at CRISIS regime with at least this confidence.
    pub l3_crisis_confidence: f64,
    /// L4 at lifetime drawdown at or above this fraction.
    pub l4_max_drawdown_pct: f64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            l1_daily_loss_pct: -0.03,
            l2_portfolio_heat_pct: 0.06,
            l3_crisis_confidence: 0.80,
            l4_max_drawdown_pct: 0.30,
        }
    }
}

/// Karma settlement parameters. Disabled by default; enabling is a
/// deliberate configuration act.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KarmaConfig {
    pub enabled: bool,
    /// Fraction of realized profit per intent.
    pub percentage: f64,
    pub destination: String,
}

impl Default for KarmaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 0.005,
            destination: String::new(),
        }
    }
}
