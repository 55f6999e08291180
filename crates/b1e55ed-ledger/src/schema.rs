//! Journal schema.
//!
//! `events` is the only table with correctness weight. `projections_*`
//! tables (owned by the projections crate) are rebuildable and carry no
//! authority. `kill_switch` is a convenience view over the newest
//! transition event.

/// Current schema version, recorded in `schema_meta`.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER PRIMARY KEY,
    applied_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY,
    event_id TEXT NOT NULL UNIQUE,
    ts_ns INTEGER NOT NULL,
    type TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    source TEXT,
    trace_id TEXT,
    dedupe_key TEXT,
    payload BLOB NOT NULL,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL UNIQUE,
    signer TEXT NOT NULL,
    signature TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_type_seq ON events(type, seq);
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_type_dedupe
    ON events(type, dedupe_key) WHERE dedupe_key IS NOT NULL;

-- Rebuildable projection cache. No correctness dependency: any row can
-- be deleted and re-derived by replay.
CREATE TABLE IF NOT EXISTS projections_state (
    name TEXT PRIMARY KEY,
    up_to_seq INTEGER NOT NULL,
    state BLOB NOT NULL,
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE VIEW IF NOT EXISTS kill_switch AS
    SELECT seq, ts_ns, payload
    FROM events
    WHERE type = 'system.kill_switch.v1'
    ORDER BY seq DESC
    LIMIT 1;
"#;
