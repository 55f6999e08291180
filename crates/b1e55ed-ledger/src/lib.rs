//! # b1e55ed Ledger
//!
//! Single-writer, append-only journal with a signed hash chain.
//!
//! The journal file is the authoritative record. Every state change in the
//! system is an event here; projections are caches derived from it.
//!
//! ## Guarantees
//! - Gap-free `seq` per journal file; genesis at `seq == 0`
//! - `prev_hash` read inside the write transaction, never from a cache
//! - Atomic batch append: a batch commits in full or not at all
//! - Exactly one writer (advisory OS lock + in-process mutex); a second
//!   writer fails fast with `WriterBusy`
//! - Signed checkpoints every N events anchor fast verification
//! - Any hash/signature/linkage failure is fatal: the store poisons itself
//!   and refuses writes with `ChainBroken`

pub mod schema;
pub mod store;
pub mod verify;

pub use store::{EventStore, StoreOptions};
pub use verify::{VerifyMode, VerifyReport};
