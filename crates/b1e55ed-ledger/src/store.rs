//! The event store.
//!
//! One writer, many readers. The writer holds an advisory OS lock on a
//! sidecar lease file for the life of the process plus an in-process mutex
//! around the connection; a second writer fails fast with `WriterBusy`.
//! Readers open the journal read-only and see a snapshot consistent with
//! the last committed `seq`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use b1e55ed_identity::NodeSigner;
use b1e55ed_models::canonical::{
    canonical_payload_bytes, compute_event_hash, genesis_prev_hash, payload_hash, signing_input,
    HashHeader,
};
use b1e55ed_models::event_types;
use b1e55ed_models::{
    CheckpointPayload, CoreError, Event, EventDraft, GenesisPayload, InputError, LedgerError,
};

use crate::schema::{SCHEMA, SCHEMA_VERSION};

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// A signed checkpoint is appended after every this many events.
    pub checkpoint_interval: u64,
    /// Single-transaction ceiling for `append_batch`.
    pub max_batch: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1_000,
            max_batch: 512,
        }
    }
}

impl From<&b1e55ed_models::LedgerConfig> for StoreOptions {
    fn from(config: &b1e55ed_models::LedgerConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval,
            max_batch: config.max_batch,
        }
    }
}

/// Append-only, hash-chained event journal over SQLite.
pub struct EventStore {
    conn: Mutex<Connection>,
    signer: Option<Arc<dyn NodeSigner>>,
    opts: StoreOptions,
    poisoned: AtomicBool,
    poisoned_seq: AtomicU64,
    path: PathBuf,
    // Held for the process lifetime; dropping releases the lease.
    _lease: Option<File>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").field("path", &self.path).finish()
    }
}

impl EventStore {
    /// Open the journal for writing.
    ///
    /// Acquires the exclusive write lease, initializes the schema, writes
    /// the signed genesis event when the journal is empty, and validates
    /// the genesis binding against the signer's key otherwise.
    pub fn open(
        path: &Path,
        signer: Arc<dyn NodeSigner>,
        opts: StoreOptions,
    ) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Storage(format!("create journal dir: {e}")))?;
        }

        let lease = acquire_lease(path)?;
        let conn = Connection::open(path).map_err(storage_err)?;
        init_connection(&conn)?;

        // IMMEDIATE-equivalent write probe: surfaces WriterBusy when some
        // other connection holds a write transaction despite the lease.
        conn.execute_batch("BEGIN IMMEDIATE; COMMIT;").map_err(|e| {
            if busy(&e) {
                CoreError::Ledger(LedgerError::WriterBusy)
            } else {
                storage_err(e)
            }
        })?;

        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(storage_err)?;

        let store = Self {
            conn: Mutex::new(conn),
            signer: Some(signer),
            opts,
            poisoned: AtomicBool::new(false),
            poisoned_seq: AtomicU64::new(0),
            path: path.to_path_buf(),
            _lease: Some(lease),
        };

        store.ensure_genesis()?;
        Ok(store)
    }

    /// Open the journal read-only. No lease, no signer, unbounded readers.
    pub fn open_read_only(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(storage_err)?;
        conn.query_row("PRAGMA busy_timeout=250", [], |_| Ok(()))
            .map_err(storage_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
            signer: None,
            opts: StoreOptions::default(),
            poisoned: AtomicBool::new(false),
            poisoned_seq: AtomicU64::new(0),
            path: path.to_path_buf(),
            _lease: None,
        })
    }

    /// The journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Node id of the writing identity, when opened for writing.
    pub fn node_id(&self) -> Option<String> {
        self.signer.as_ref().map(|s| s.node_id().to_string())
    }

    /// Append a single event. `seq`, `prev_hash`, `hash` and the signature
    /// are all assigned inside the write transaction.
    pub fn append(&self, draft: EventDraft) -> Result<Event, CoreError> {
        let out = self.append_batch(vec![draft])?;
        out.into_iter()
            .next()
            .ok_or_else(|| CoreError::Ledger(LedgerError::Storage("empty batch result".into())))
    }

    /// Append a batch atomically: either every event commits in order or
    /// none do. Batches above `max_batch` fail without partial commit.
    pub fn append_batch(&self, drafts: Vec<EventDraft>) -> Result<Vec<Event>, CoreError> {
        self.ensure_writable()?;
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        if drafts.len() > self.opts.max_batch {
            return Err(CoreError::Ledger(LedgerError::StoreFull(format!(
                "batch of {} exceeds single-transaction limit {}",
                drafts.len(),
                self.opts.max_batch
            ))));
        }
        for draft in &drafts {
            if !event_types::is_valid_type(&draft.event_type) {
                return Err(CoreError::Input(InputError::InvalidType(
                    draft.event_type.clone(),
                )));
            }
        }

        let signer = self.writer_signer()?;
        let mut conn = self.lock_conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| {
                if busy(&e) {
                    CoreError::Ledger(LedgerError::WriterBusy)
                } else {
                    storage_err(e)
                }
            })?;

        // prev_hash is read here, inside the transaction - never cached.
        let (mut seq, mut prev_hash) = read_tip(&tx)?
            .ok_or_else(|| CoreError::Ledger(LedgerError::Storage("journal has no genesis".into())))?;

        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if let Some(existing) = check_dedupe(&tx, &draft)? {
                out.push(existing);
                continue;
            }

            seq += 1;
            let event = insert_event(&tx, signer.as_ref(), draft, seq, &prev_hash)?;
            prev_hash = event.hash.clone();
            out.push(event);

            if self.opts.checkpoint_interval > 0 && seq % self.opts.checkpoint_interval == 0 {
                let anchor_seq = seq;
                let anchor_hash = prev_hash.clone();
                seq += 1;
                let ckpt = insert_event(
                    &tx,
                    signer.as_ref(),
                    checkpoint_draft(anchor_seq, &anchor_hash, signer.node_id()),
                    seq,
                    &prev_hash,
                )?;
                prev_hash = ckpt.hash.clone();
                tracing::debug!(seq = anchor_seq, "checkpoint appended");
            }
        }

        tx.commit().map_err(storage_err)?;
        Ok(out)
    }

    /// Highest committed `seq`.
    pub fn tip_seq(&self) -> Result<u64, CoreError> {
        let conn = self.lock_conn();
        let tip = tip_row(&conn)?;
        tip.map(|(seq, _)| seq)
            .ok_or_else(|| CoreError::Ledger(LedgerError::Storage("empty journal".into())))
    }

    /// Number of stored events.
    pub fn count(&self) -> Result<u64, CoreError> {
        let conn = self.lock_conn();
        conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(storage_err)
    }

    /// The genesis event.
    pub fn genesis(&self) -> Result<Event, CoreError> {
        self.event_at(0)?
            .ok_or_else(|| CoreError::Ledger(LedgerError::Storage("missing genesis".into())))
    }

    /// Event at an exact `seq`.
    pub fn event_at(&self, seq: u64) -> Result<Option<Event>, CoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id, dedupe_key,
                    payload, prev_hash, hash, signer, signature
             FROM events WHERE seq = ?1",
            params![seq as i64],
            row_to_event,
        )
        .optional()
        .map_err(storage_err)
    }

    /// Events in `[from, to]` ascending by `seq`, with linkage checked as
    /// rows stream by. Any discontinuity poisons the store.
    pub fn events_range(&self, from: u64, to: u64) -> Result<Vec<Event>, CoreError> {
        let mut out = Vec::new();
        self.for_each(from, to, |event| {
            out.push(event);
            Ok(())
        })?;
        Ok(out)
    }

    /// Stream events in `[from, to]` ascending, checking `prev_hash`
    /// linkage between consecutive rows.
    pub fn for_each<F>(&self, from: u64, to: u64, mut f: F) -> Result<(), CoreError>
    where
        F: FnMut(Event) -> Result<(), CoreError>,
    {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id, dedupe_key,
                        payload, prev_hash, hash, signer, signature
                 FROM events WHERE seq >= ?1 AND seq <= ?2 ORDER BY seq ASC",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map(params![from as i64, to as i64], row_to_event)
            .map_err(storage_err)?;

        let mut prev: Option<(u64, String)> = None;
        let mut broken_at: Option<u64> = None;
        for row in rows {
            let event = row.map_err(storage_err)?;
            if let Some((prev_seq, prev_hash)) = &prev {
                if event.seq != prev_seq + 1 || &event.prev_hash != prev_hash {
                    broken_at = Some(event.seq);
                    break;
                }
            }
            prev = Some((event.seq, event.hash.clone()));
            f(event)?;
        }

        if let Some(seq) = broken_at {
            return Err(self.poison(seq));
        }
        Ok(())
    }

    /// Newest events of a type at or below `max_seq`, descending.
    pub fn events_by_type_desc(
        &self,
        event_type: &str,
        max_seq: u64,
        limit: usize,
    ) -> Result<Vec<Event>, CoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id, dedupe_key,
                        payload, prev_hash, hash, signer, signature
                 FROM events WHERE type = ?1 AND seq <= ?2 ORDER BY seq DESC LIMIT ?3",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![event_type, max_seq as i64, limit as i64], row_to_event)
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// The newest event of a type at or below `max_seq`.
    pub fn latest_of_type(
        &self,
        event_type: &str,
        max_seq: u64,
    ) -> Result<Option<Event>, CoreError> {
        Ok(self
            .events_by_type_desc(event_type, max_seq, 1)?
            .into_iter()
            .next())
    }

    /// Look up an event by its id.
    pub fn event_by_id(&self, event_id: &Uuid) -> Result<Option<Event>, CoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id, dedupe_key,
                    payload, prev_hash, hash, signer, signature
             FROM events WHERE event_id = ?1",
            params![event_id.to_string()],
            row_to_event,
        )
        .optional()
        .map_err(storage_err)
    }

    /// Persist a projection's folded state. Cache only: rows here carry
    /// no authority and can be dropped at any time.
    pub fn save_projection(&self, name: &str, up_to_seq: u64, state: &[u8]) -> Result<(), CoreError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO projections_state (name, up_to_seq, state, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
                 up_to_seq = excluded.up_to_seq,
                 state = excluded.state,
                 updated_at = excluded.updated_at",
            params![name, up_to_seq as i64, state],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Load a cached projection state, if any.
    pub fn load_projection(&self, name: &str) -> Result<Option<(u64, Vec<u8>)>, CoreError> {
        let conn = self.lock_conn();
        conn.query_row(
            "SELECT up_to_seq, state FROM projections_state WHERE name = ?1",
            params![name],
            |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, Vec<u8>>(1)?)),
        )
        .optional()
        .map_err(storage_err)
    }

    /// Drop every cached projection row. Views rebuild by replay.
    pub fn truncate_projections(&self) -> Result<(), CoreError> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM projections_state", [])
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark the chain broken at `seq`. All further writes are refused.
    pub(crate) fn poison(&self, seq: u64) -> CoreError {
        self.poisoned.store(true, Ordering::SeqCst);
        self.poisoned_seq.store(seq, Ordering::SeqCst);
        tracing::error!(seq, "hash chain broken; store refuses further writes");
        CoreError::Ledger(LedgerError::ChainBroken { seq })
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), CoreError> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(CoreError::Ledger(LedgerError::ChainBroken {
                seq: self.poisoned_seq.load(Ordering::SeqCst),
            }));
        }
        Ok(())
    }

    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            // A panicked holder cannot have committed a partial batch
            // (transactions roll back); keep serving.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn writer_signer(&self) -> Result<Arc<dyn NodeSigner>, CoreError> {
        self.signer
            .clone()
            .ok_or_else(|| CoreError::Ledger(LedgerError::Conflict("store is read-only".into())))
    }

    /// Create the genesis event on first open; validate the binding
    /// otherwise.
    fn ensure_genesis(&self) -> Result<(), CoreError> {
        let signer = self.writer_signer()?;
        let mut conn = self.lock_conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;

        match read_tip(&tx)? {
            Some(_) => {
                let genesis = tx
                    .query_row(
                        "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id,
                                dedupe_key, payload, prev_hash, hash, signer, signature
                         FROM events WHERE seq = 0",
                        [],
                        row_to_event,
                    )
                    .optional()
                    .map_err(storage_err)?;

                let Some(genesis) = genesis else {
                    drop(tx);
                    drop(conn);
                    return Err(self.poison(0));
                };

                let expected_prev = genesis_prev_hash(&signer.public_key());
                let pubkey_hex = hex::encode(signer.public_key());
                let payload_key = genesis.payload.get("public_key").and_then(|v| v.as_str());
                if genesis.event_type != event_types::GENESIS
                    || genesis.prev_hash != expected_prev
                    || payload_key != Some(pubkey_hex.as_str())
                {
                    return Err(CoreError::Ledger(LedgerError::GenesisMismatch));
                }
                tx.commit().map_err(storage_err)?;
            }
            None => {
                let payload = GenesisPayload {
                    public_key: hex::encode(signer.public_key()),
                    node_id: signer.node_id().to_string(),
                    created_at: Utc::now(),
                };
                let draft = EventDraft::new(
                    event_types::GENESIS,
                    serde_json::to_value(&payload)
                        .map_err(|e| LedgerError::Storage(e.to_string()))?,
                )
                .with_source("ledger");

                let prev = genesis_prev_hash(&signer.public_key());
                let event = insert_event(&tx, signer.as_ref(), draft, 0, &prev)?;
                tx.commit().map_err(storage_err)?;
                tracing::info!(node_id = %signer.node_id(), hash = %event.hash, "genesis written");
            }
        }
        Ok(())
    }
}

fn checkpoint_draft(seq: u64, hash: &str, node_id: &str) -> EventDraft {
    let payload = CheckpointPayload {
        seq,
        hash: hash.to_string(),
        node_id: node_id.to_string(),
    };
    EventDraft::new(
        event_types::CHECKPOINT,
        serde_json::to_value(&payload).unwrap_or_default(),
    )
    .with_source("ledger")
}

/// Insert one event at `seq` chained to `prev_hash`. Runs inside the
/// caller's transaction.
fn insert_event(
    tx: &rusqlite::Transaction<'_>,
    signer: &dyn NodeSigner,
    draft: EventDraft,
    seq: u64,
    prev_hash: &str,
) -> Result<Event, CoreError> {
    let event_id = draft.event_id.unwrap_or_else(Uuid::new_v4);
    let ts = Utc::now();

    let hash = compute_event_hash(
        &HashHeader {
            event_id: &event_id,
            seq,
            ts: &ts,
            event_type: &draft.event_type,
            schema_version: &draft.schema_version,
            source: draft.source.as_deref(),
            trace_id: draft.trace_id.as_deref(),
            dedupe_key: draft.dedupe_key.as_deref(),
            prev_hash,
        },
        &draft.payload,
    );

    let msg = signing_input(&hash, signer.node_id())
        .ok_or_else(|| LedgerError::Storage("hash is not hex".into()))?;
    let signature = hex::encode(signer.try_sign(&msg)?);

    let payload_bytes = canonical_payload_bytes(&draft.payload);
    tx.execute(
        "INSERT INTO events (seq, event_id, ts_ns, type, schema_version, source, trace_id,
                             dedupe_key, payload, prev_hash, hash, signer, signature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            seq as i64,
            event_id.to_string(),
            ts.timestamp_nanos_opt().unwrap_or(0),
            draft.event_type,
            draft.schema_version,
            draft.source,
            draft.trace_id,
            draft.dedupe_key,
            payload_bytes,
            prev_hash,
            hash,
            signer.node_id(),
            signature,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CoreError::Ledger(LedgerError::Conflict(format!(
                "constraint violation at seq {seq}"
            )))
        }
        other => storage_err(other),
    })?;

    Ok(Event {
        event_id,
        seq,
        ts,
        event_type: draft.event_type,
        schema_version: draft.schema_version,
        source: draft.source,
        trace_id: draft.trace_id,
        dedupe_key: draft.dedupe_key,
        payload: draft.payload,
        prev_hash: prev_hash.to_string(),
        hash,
        signer: signer.node_id().to_string(),
        signature,
    })
}

/// Dedupe semantics: same `(type, dedupe_key)` with the same payload is
/// idempotent and returns the stored event; a different payload is a
/// conflict.
fn check_dedupe(
    tx: &rusqlite::Transaction<'_>,
    draft: &EventDraft,
) -> Result<Option<Event>, CoreError> {
    let Some(key) = &draft.dedupe_key else {
        return Ok(None);
    };
    let existing = tx
        .query_row(
            "SELECT seq, event_id, ts_ns, type, schema_version, source, trace_id, dedupe_key,
                    payload, prev_hash, hash, signer, signature
             FROM events WHERE type = ?1 AND dedupe_key = ?2",
            params![draft.event_type, key],
            row_to_event,
        )
        .optional()
        .map_err(storage_err)?;

    match existing {
        None => Ok(None),
        Some(event) => {
            if payload_hash(&event.payload) == payload_hash(&draft.payload) {
                Ok(Some(event))
            } else {
                Err(CoreError::Input(InputError::DuplicateDedupeKey(key.clone())))
            }
        }
    }
}

fn read_tip(tx: &rusqlite::Transaction<'_>) -> Result<Option<(u64, String)>, CoreError> {
    tx.query_row(
        "SELECT seq, hash FROM events ORDER BY seq DESC LIMIT 1",
        [],
        |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(storage_err)
}

fn tip_row(conn: &Connection) -> Result<Option<(u64, String)>, CoreError> {
    conn.query_row(
        "SELECT seq, hash FROM events ORDER BY seq DESC LIMIT 1",
        [],
        |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(storage_err)
}

pub(crate) fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let event_id: String = row.get(1)?;
    let ts_ns: i64 = row.get(2)?;
    let payload_bytes: Vec<u8> = row.get(8)?;
    let payload = serde_json::from_slice(&payload_bytes).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Blob, Box::new(e))
    })?;

    Ok(Event {
        event_id: Uuid::parse_str(&event_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        seq: row.get::<_, i64>(0)? as u64,
        ts: DateTime::<Utc>::from_timestamp_nanos(ts_ns),
        event_type: row.get(3)?,
        schema_version: row.get(4)?,
        source: row.get(5)?,
        trace_id: row.get(6)?,
        dedupe_key: row.get(7)?,
        payload,
        prev_hash: row.get(9)?,
        hash: row.get(10)?,
        signer: row.get(11)?,
        signature: row.get(12)?,
    })
}

fn init_connection(conn: &Connection) -> Result<(), CoreError> {
    // journal_mode and busy_timeout return a row when set.
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .map_err(storage_err)?;
    conn.execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
        .map_err(storage_err)?;
    conn.query_row("PRAGMA busy_timeout=0", [], |_| Ok(()))
        .map_err(storage_err)?;
    Ok(())
}

/// Advisory OS lock on a sidecar lease file. Released automatically when
/// the process exits, so a crash never leaves a stale lease.
fn acquire_lease(path: &Path) -> Result<File, CoreError> {
    let lease_path = path.with_extension("lease");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lease_path)
        .map_err(|e| LedgerError::Storage(format!("open lease file: {e}")))?;
    file.try_lock_exclusive()
        .map_err(|_| CoreError::Ledger(LedgerError::WriterBusy))?;
    Ok(file)
}

fn busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn storage_err(e: rusqlite::Error) -> CoreError {
    CoreError::Ledger(LedgerError::Storage(e.to_string()))
}
