//! The replay engine.
//!
//! `Projector` folds a `seq` range of the journal into any `View`. Events
//! pass through the upcaster registry first; quarantined events are
//! collected, logged, and skipped - never silently ignored.

use std::sync::Arc;

use b1e55ed_ledger::EventStore;
use b1e55ed_models::{CoreError, Event};

use crate::upcast::{Quarantined, UpcasterRegistry};

/// A deterministic fold over events. State must serialize identically for
/// identical event streams (use ordered maps, never hash maps).
pub trait View: Default {
    /// Fold one event into the view. Payloads arrive already lifted to the
    /// current schema shape.
    fn apply(&mut self, event: &Event);

    /// Event types this view folds; others are skipped without upcasting.
    /// An empty slice means "all types".
    fn interested(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Replays journal ranges into views.
pub struct Projector {
    store: Arc<EventStore>,
    registry: UpcasterRegistry,
    quarantined: std::sync::Mutex<Vec<Quarantined>>,
}

impl Projector {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            registry: UpcasterRegistry::v1(),
            quarantined: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_registry(store: Arc<EventStore>, registry: UpcasterRegistry) -> Self {
        Self {
            store,
            registry,
            quarantined: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Rebuild a view over `[from, to]`.
    pub fn replay<V: View>(&self, from: u64, to: u64) -> Result<V, CoreError> {
        let mut view = V::default();
        self.replay_into(&mut view, from, to)?;
        Ok(view)
    }

    /// Rebuild a view from genesis to the current tip.
    pub fn replay_from_genesis<V: View>(&self) -> Result<V, CoreError> {
        let tip = self.store.tip_seq()?;
        self.replay(0, tip)
    }

    /// Fold `[from, to]` into an existing view (incremental catch-up).
    pub fn replay_into<V: View>(&self, view: &mut V, from: u64, to: u64) -> Result<(), CoreError> {
        let interested = view.interested();
        self.store.for_each(from, to, |event| {
            if !interested.is_empty() && !interested.contains(&event.event_type.as_str()) {
                return Ok(());
            }
            match self.registry.lift(&event) {
                Ok(payload) => {
                    let mut lifted = event;
                    lifted.payload = payload;
                    view.apply(&lifted);
                }
                Err(q) => {
                    tracing::warn!(
                        seq = q.seq,
                        event_type = %q.event_type,
                        schema_version = %q.schema_version,
                        "quarantined event skipped during replay"
                    );
                    if let Ok(mut held) = self.quarantined.lock() {
                        held.push(q);
                    }
                }
            }
            Ok(())
        })
    }

    /// Events held back by the upcaster registry so far.
    pub fn quarantined(&self) -> Vec<Quarantined> {
        self.quarantined
            .lock()
            .map(|held| held.clone())
            .unwrap_or_default()
    }

    /// Load a view from the `projections_state` cache and fold only the
    /// suffix, falling back to full replay when the cache is missing or
    /// unreadable. The refreshed state is written back. Cache rows carry
    /// no authority; a poisoned cache degrades to replay, never to wrong
    /// answers.
    pub fn cached_or_replay<V>(&self, name: &str) -> Result<V, CoreError>
    where
        V: View + serde::Serialize + serde::de::DeserializeOwned,
    {
        let tip = self.store.tip_seq()?;

        let view = match self.store.load_projection(name)? {
            Some((up_to_seq, bytes)) if up_to_seq <= tip => {
                match serde_json::from_slice::<V>(&bytes) {
                    Ok(mut view) => {
                        if up_to_seq < tip {
                            self.replay_into(&mut view, up_to_seq + 1, tip)?;
                        }
                        view
                    }
                    Err(err) => {
                        tracing::warn!(%name, error = %err, "projection cache unreadable; replaying");
                        self.replay(0, tip)?
                    }
                }
            }
            // A cache ahead of the tip means the journal shrank under us;
            // never trust it.
            Some(_) => self.replay(0, tip)?,
            None => self.replay(0, tip)?,
        };

        if let Ok(bytes) = serde_json::to_vec(&view) {
            // Best effort; a read-only store just skips the writeback.
            let _ = self.store.save_projection(name, tip, &bytes);
        }
        Ok(view)
    }
}
