//! # b1e55ed Brain
//!
//! A single pass over the log: collect signals, judge their quality,
//! synthesize conviction per asset, classify the regime, apply the
//! counter-thesis, and decide intents - every decision gated by the kill
//! switch read inside the same snapshot.
//!
//! The orchestrator is one cooperative task inside the writer process.
//! Every suspension point carries a deadline; a blown deadline finishes
//! the asset in flight, emits `cycle.partial.v1`, and stops. Cycles are
//! never retried automatically.

pub mod collection;
pub mod conviction;
pub mod decision;
pub mod feed;
pub mod kill_switch;
pub mod learning;
pub mod orchestrator;
pub mod quality;
pub mod regime;
pub mod synthesis;

pub use collection::{AssetSignals, Collector};
pub use conviction::{ConvictionEngine, ConvictionResult};
pub use decision::{DecisionEngine, DecisionVerdict};
pub use feed::ProducerFeed;
pub use kill_switch::{KillSwitch, RiskMetrics};
pub use learning::{LearningLoop, LearningResult};
pub use orchestrator::{CycleResult, Orchestrator};
pub use quality::{QualityMonitor, QualityReport};
pub use regime::RegimeDetector;
pub use synthesis::{Synthesis, SynthesisResult};
