//! Error taxonomy: typed kinds at every boundary.
//!
//! Four kinds, by consequence rather than by type name:
//! - **Ledger** errors are fatal - the store refuses further writes.
//! - **Policy** errors are refusals - reported, no state change.
//! - **Input** errors are caller mistakes - reported, no state change.
//! - **Transient** errors let a cycle degrade (`cycle.partial.v1`) and
//!   continue without automatic retry.
//!
//! Every kind carries a stable machine code for automation.

use crate::event::KillLevel;

/// Fatal ledger errors. Operator intervention required.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("hash chain broken at seq {seq}")]
    ChainBroken { seq: u64 },

    #[error("genesis event does not commit to this node's public key")]
    GenesisMismatch,

    #[error("another writer holds the journal lease")]
    WriterBusy,

    #[error("signer unavailable")]
    SignerUnavailable,

    #[error("store full: {0}")]
    StoreFull(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::ChainBroken { .. } => "chain_broken",
            LedgerError::GenesisMismatch => "genesis_mismatch",
            LedgerError::WriterBusy => "writer_busy",
            LedgerError::SignerUnavailable => "signer_unavailable",
            LedgerError::StoreFull(_) => "store_full",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Storage(_) => "storage",
        }
    }
}

/// Policy refusals. No state change.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("kill switch active at {level}")]
    KillSwitchActive { level: KillLevel },

    #[error("role '{role}' lacks permission '{permission}'")]
    RoleForbidden { role: String, permission: String },

    #[error("rate limited; retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("non-monotonic kill-switch transition {from} -> {to} requires elevated authorization")]
    NonMonotonicTransition { from: KillLevel, to: KillLevel },

    #[error("settlement policy is immutable after first settlement")]
    PolicyImmutable,

    #[error("operation requires live execution mode")]
    PaperModeRestricted,

    #[error("authorization rejected")]
    AuthorizationRejected,
}

impl PolicyError {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyError::KillSwitchActive { .. } => "kill_switch_active",
            PolicyError::RoleForbidden { .. } => "role_forbidden",
            PolicyError::RateLimited { .. } => "rate_limited",
            PolicyError::NonMonotonicTransition { .. } => "non_monotonic_transition",
            PolicyError::PolicyImmutable => "policy_immutable",
            PolicyError::PaperModeRestricted => "paper_mode_restricted",
            PolicyError::AuthorizationRejected => "authorization_rejected",
        }
    }
}

/// Caller mistakes. No state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("invalid event type '{0}'")]
    InvalidType(String),

    #[error("unknown schema version '{schema_version}' for '{event_type}'")]
    SchemaVersionUnknown {
        event_type: String,
        schema_version: String,
    },

    #[error("dedupe key '{0}' already used with a different payload")]
    DuplicateDedupeKey(String),

    #[error("contributor '{0}' not found")]
    ContributorNotFound(String),

    #[error("duplicate contributor node '{0}'")]
    DuplicateContributor(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl InputError {
    pub fn code(&self) -> &'static str {
        match self {
            InputError::InvalidType(_) => "invalid_type",
            InputError::SchemaVersionUnknown { .. } => "schema_version_unknown",
            InputError::DuplicateDedupeKey(_) => "duplicate_dedupe_key",
            InputError::ContributorNotFound(_) => "contributor_not_found",
            InputError::DuplicateContributor(_) => "duplicate_contributor",
            InputError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// Transient failures: the cycle records a partial and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientError {
    #[error("producer '{producer}' timed out")]
    ProducerTimeout { producer: String },

    #[error("snapshot is stale")]
    StaleSnapshot,
}

impl TransientError {
    pub fn code(&self) -> &'static str {
        match self {
            TransientError::ProducerTimeout { .. } => "producer_timeout",
            TransientError::StaleSnapshot => "stale_snapshot",
        }
    }
}

/// Unified result error for core APIs; ingress translates this into the
/// wire shape `{error: {code, message, detail?}}`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Transient(#[from] TransientError),
}

impl CoreError {
    /// Stable machine code for automation.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Ledger(e) => e.code(),
            CoreError::Policy(e) => e.code(),
            CoreError::Input(e) => e.code(),
            CoreError::Transient(e) => e.code(),
        }
    }

    /// Fatal errors halt the writer; everything else is reported and
    /// leaves state unchanged.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Ledger(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(LedgerError::ChainBroken { seq: 9 }.code(), "chain_broken");
        assert_eq!(
            CoreError::from(PolicyError::KillSwitchActive {
                level: KillLevel::L2Defensive
            })
            .code(),
            "kill_switch_active"
        );
        assert_eq!(
            CoreError::from(InputError::ContributorNotFound("c1".into())).code(),
            "contributor_not_found"
        );
    }

    #[test]
    fn test_only_ledger_errors_are_fatal() {
        assert!(CoreError::from(LedgerError::WriterBusy).is_fatal());
        assert!(!CoreError::from(TransientError::StaleSnapshot).is_fatal());
        assert!(!CoreError::from(InputError::InvalidType("x".into())).is_fatal());
    }
}
