//! Producer feed seam.
//!
//! Producers are external collaborators; the orchestrator only refreshes
//! them on a full cycle, and every fetch runs under a deadline. Partial
//! results from a timed-out fetch are discarded.

use async_trait::async_trait;

use b1e55ed_models::{EventDraft, TransientError};

/// One external signal producer.
#[async_trait]
pub trait ProducerFeed: Send + Sync {
    /// Stable producer name (used in `producer_health.*` events).
    fn name(&self) -> &str;

    /// Synthesis domain this producer feeds.
    fn domain(&self) -> &str;

    /// Fetch fresh signal drafts for the given assets. The orchestrator
    /// wraps this in a timeout; implementations should not add their own
    /// indefinite waits.
    async fn fetch(&self, assets: &[String]) -> Result<Vec<EventDraft>, TransientError>;
}
