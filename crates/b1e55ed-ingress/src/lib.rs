//! # b1e55ed Ingress
//!
//! The core-facing API boundary. Thin on purpose: every operation is a
//! permission check, an input check, and a delegation to a capability
//! object (store, brain, karma, registry). Errors cross the boundary as
//! `{error: {code, message, detail?}}` with stable codes; log lines pass
//! through the secret-redacting sanitizer first.

pub mod api;
pub mod permissions;
pub mod redact;
pub mod wire;

pub use api::{Authorization, Ingress, SignalReceipt};
pub use permissions::{Permission, RolePermissions};
pub use redact::Sanitizer;
pub use wire::ErrorBody;
