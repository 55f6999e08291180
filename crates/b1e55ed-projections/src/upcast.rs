//! Schema-version upcasting.
//!
//! Every event carries `schema_version`. Projections run payloads through
//! this registry first: older shapes are lifted to the current one by a
//! registered upcaster; versions newer than the registry knows are
//! quarantined so a downgrade never silently mis-reads the log.

use std::collections::BTreeMap;

use serde_json::Value;

use b1e55ed_models::Event;

/// Payload transformer from one historical version to the current shape.
pub type Upcaster = fn(Value) -> Result<Value, String>;

/// An event held back because its schema version is unknown.
#[derive(Debug, Clone)]
pub struct Quarantined {
    pub seq: u64,
    pub event_type: String,
    pub schema_version: String,
}

/// Registry of current versions and upcasters per event type.
#[derive(Default)]
pub struct UpcasterRegistry {
    /// type -> current version ordinal (e.g. "v1" -> 1).
    current: BTreeMap<String, u32>,
    /// (type, historical version) -> upcaster to current.
    upcasters: BTreeMap<(String, String), Upcaster>,
}

impl UpcasterRegistry {
    /// Registry that treats `v1` as current for every known type.
    pub fn v1() -> Self {
        Self::default()
    }

    /// Declare the current version for a type. Unregistered types default
    /// to version 1.
    pub fn set_current(&mut self, event_type: impl Into<String>, version: u32) {
        self.current.insert(event_type.into(), version);
    }

    /// Register an upcaster for a historical version of a type.
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        from_version: impl Into<String>,
        upcaster: Upcaster,
    ) {
        self.upcasters
            .insert((event_type.into(), from_version.into()), upcaster);
    }

    /// Lift an event's payload to the current shape.
    ///
    /// `Err(Quarantined)` marks events the registry cannot lift (unknown
    /// newer version, missing upcaster, or a failed upcast); the caller
    /// records them and continues - they are never silently dropped.
    pub fn lift(&self, event: &Event) -> Result<Value, Quarantined> {
        let current = self.current.get(&event.event_type).copied().unwrap_or(1);
        let observed = parse_version(&event.schema_version);

        match observed {
            Some(v) if v == current => Ok(event.payload.clone()),
            Some(v) if v < current => {
                match self
                    .upcasters
                    .get(&(event.event_type.clone(), event.schema_version.clone()))
                {
                    Some(up) => match up(event.payload.clone()) {
                        Ok(lifted) => Ok(lifted),
                        Err(reason) => {
                            tracing::warn!(
                                seq = event.seq,
                                event_type = %event.event_type,
                                %reason,
                                "upcast failed; quarantining event"
                            );
                            Err(self.quarantine(event))
                        }
                    },
                    None => Err(self.quarantine(event)),
                }
            }
            // Newer than we know, or unparseable: quarantine.
            _ => Err(self.quarantine(event)),
        }
    }

    fn quarantine(&self, event: &Event) -> Quarantined {
        Quarantined {
            seq: event.seq,
            event_type: event.event_type.clone(),
            schema_version: event.schema_version.clone(),
        }
    }
}

fn parse_version(v: &str) -> Option<u32> {
    v.strip_prefix('v')?.parse().ok()
}
