//! # b1e55ed Projections
//!
//! A projection is a pure function of the event log: fold events in `seq`
//! order into a view. Views are caches, never sources of truth - they can
//! be dropped and rebuilt from the journal at any time, and
//! `P(replay(genesis..tip)) == P(live)` holds for every view.
//!
//! Historical payload shapes are lifted to the current shape by registered
//! upcasters before a view sees them; unknown newer schema versions are
//! quarantined and logged, never silently ignored.

pub mod positions;
pub mod projector;
pub mod regime;
pub mod snapshot;
pub mod tallies;
pub mod upcast;
pub mod weights;

pub use positions::{Position, PositionsView};
pub use projector::{Projector, View};
pub use regime::RegimeView;
pub use snapshot::{ProjectionSnapshot, SnapshotError};
pub use tallies::{ContributorRecord, ContributorTally, TalliesView};
pub use upcast::{UpcasterRegistry, Quarantined};
pub use weights::WeightsView;
