//! # b1e55ed Models
//!
//! Canonical event types shared by every crate in the workspace.
//!
//! This crate provides:
//! - `Event` / `EventDraft` - the append unit and its pre-sequencing form
//! - `canonical` - deterministic encoding used for hashing (the
//!   compatibility surface: two independent implementations must agree
//!   byte-for-byte)
//! - `payloads` - typed payload structs per event type
//! - Error taxonomy (`LedgerError`, `PolicyError`, `InputError`,
//!   `TransientError`) with stable machine codes
//! - `Config` - the single immutable configuration value threaded through
//!   the writer process
//!
//! ## Ordering
//!
//! All totally-ordered observations use `seq`, never timestamps. `seq` is
//! assigned inside the write transaction and is gap-free per journal file.

pub mod canonical;
pub mod config;
pub mod error;
pub mod event;
pub mod payloads;

pub use canonical::{
    canonical_payload_bytes, compute_event_hash, genesis_prev_hash, payload_hash, signing_input,
    ENCODING_VERSION, GENESIS_DOMAIN, HEADER_SEP,
};
pub use config::{
    AuthConfig, BrainConfig, Config, DomainWeights, ExecutionMode, IdentityConfig, KarmaConfig,
    KillSwitchConfig, LedgerConfig, RiskConfig,
};
pub use error::{CoreError, InputError, LedgerError, PolicyError, TransientError};
pub use event::{Event, EventDraft, KillLevel};
pub use payloads::*;

/// Stable event type tags (egress surface).
pub mod event_types {
    pub const GENESIS: &str = "system.genesis.v1";
    pub const CHECKPOINT: &str = "system.checkpoint.v1";
    pub const KILL_SWITCH: &str = "system.kill_switch.v1";

    pub const CYCLE_MARKER: &str = "brain.cycle.v1";
    pub const CYCLE_PARTIAL: &str = "cycle.partial.v1";
    pub const CONVICTION: &str = "brain.conviction.v1";
    pub const REGIME_CHANGED: &str = "regime.changed.v1";

    pub const INTENT_OPEN: &str = "intent.open.v1";
    pub const INTENT_CLOSE: &str = "intent.close.v1";

    pub const CONTRIBUTOR_REGISTER: &str = "contributor.register.v1";
    pub const ATTRIBUTION: &str = "attribution.v1";
    pub const ATTRIBUTION_OUTCOME: &str = "attribution.outcome.v1";

    pub const KARMA_INTENT: &str = "karma.intent.v1";
    pub const KARMA_SETTLE: &str = "karma.settle.v1";
    pub const KARMA_POLICY_CHANGE: &str = "karma.policy_change.v1";

    pub const WEIGHT_ADJUSTMENT: &str = "learning.weight_adjustment.v1";

    pub const PRODUCER_STALE: &str = "producer_health.stale.v1";
    pub const PRODUCER_FAILING: &str = "producer_health.failing.v1";

    /// Prefix shared by every producer signal event.
    pub const SIGNAL_PREFIX: &str = "signal.";

    /// True when `event_type` is a producer signal.
    pub fn is_signal(event_type: &str) -> bool {
        event_type.starts_with(SIGNAL_PREFIX)
    }

    /// Validate a dotted type tag: `{category}.{domain}.{version}`.
    pub fn is_valid_type(event_type: &str) -> bool {
        let parts: Vec<&str> = event_type.split('.').collect();
        parts.len() >= 2
            && parts.iter().all(|p| {
                !p.is_empty()
                    && p.chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            })
    }
}
