//! # b1e55ed Karma
//!
//! Profit-share ledger. Simple on purpose:
//!
//! - Realized profit only. Never losses, never paper PnL.
//! - Disabled by default; enabling is a deliberate configuration act.
//! - Two-phase flow: an intent records what would be contributed; an
//!   explicit settlement closes intents atomically. Half-settlement is
//!   forbidden.
//! - Settlement parameters freeze at the first settlement; only a
//!   `karma.policy_change.v1` under elevated authorization moves them.

pub mod engine;
pub mod view;

pub use engine::KarmaEngine;
pub use view::{KarmaIntentState, KarmaView};
