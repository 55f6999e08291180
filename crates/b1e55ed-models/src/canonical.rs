//! Canonical encoding for deterministic event hashing.
//!
//! ## Why not plain JSON text?
//!
//! JSON text hashing is risky for determinism: serde field order can change
//! between versions, optional fields can be omitted vs defaulted, and map
//! iteration order is an implementation detail. The header is therefore
//! encoded in a strict binary form, and only the payload uses JSON - in a
//! normalized shape that two independent serializers reproduce byte-for-byte.
//!
//! ## Encoding rules
//!
//! Header (fixed field order):
//! - First byte: `ENCODING_VERSION`
//! - `event_id`: 16 raw UUID bytes
//! - `seq`: u64 little-endian
//! - `ts`: i64 nanoseconds since Unix epoch, little-endian
//! - `type`, `schema_version`: u32-length-prefixed UTF-8
//! - `source`, `trace_id`, `dedupe_key`: presence byte (0x00/0x01) then
//!   length-prefixed UTF-8 when present
//! - `prev_hash`: length-prefixed lowercase hex
//!
//! Payload: normalized JSON - object keys sorted lexicographically at every
//! nesting level, no insignificant whitespace, integers as integers, floats
//! in shortest round-trip form.
//!
//! `hash = SHA-256(header_bytes || HEADER_SEP || payload_bytes)`, lowercase
//! hex. The separator byte never occurs at a field boundary inside the
//! length-prefixed header, so header/payload splicing is unambiguous.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Encoding version. Bump when encoding rules change.
pub const ENCODING_VERSION: u8 = 0x01;

/// Separator between header bytes and canonical payload bytes.
pub const HEADER_SEP: u8 = 0x1f;

/// Domain prefix binding the genesis `prev_hash` to the signer key.
pub const GENESIS_DOMAIN: &[u8] = b"b1e55ed-genesis";

/// Serialize a JSON value into canonical bytes.
///
/// Object keys are sorted lexicographically at every level; arrays keep
/// their order. `serde_json::Number` renders integers without a fraction
/// and floats via shortest round-trip, which is the fixed form required
/// for cross-implementation agreement.
pub fn canonical_payload_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => buf.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            // serde_json escaping is deterministic for a given string.
            let quoted = serde_json::to_string(s).unwrap_or_default();
            buf.extend_from_slice(quoted.as_bytes());
        }
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_canonical(item, buf);
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            buf.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                let quoted = serde_json::to_string(key).unwrap_or_default();
                buf.extend_from_slice(quoted.as_bytes());
                buf.push(b':');
                write_canonical(&map[key], buf);
            }
            buf.push(b'}');
        }
    }
}

/// SHA-256 of the canonical payload bytes, lowercase hex.
///
/// Used for dedupe idempotency checks and commitment hashes.
pub fn payload_hash(payload: &Value) -> String {
    let bytes = canonical_payload_bytes(payload);
    hex::encode(Sha256::digest(&bytes))
}

/// Header fields that participate in the event hash.
pub struct HashHeader<'a> {
    pub event_id: &'a Uuid,
    pub seq: u64,
    pub ts: &'a DateTime<Utc>,
    pub event_type: &'a str,
    pub schema_version: &'a str,
    pub source: Option<&'a str>,
    pub trace_id: Option<&'a str>,
    pub dedupe_key: Option<&'a str>,
    pub prev_hash: &'a str,
}

/// Compute the event hash over header and canonical payload bytes.
pub fn compute_event_hash(header: &HashHeader<'_>, payload: &Value) -> String {
    let mut buf = Vec::with_capacity(512);
    buf.push(ENCODING_VERSION);
    buf.extend_from_slice(header.event_id.as_bytes());
    encode_u64(&mut buf, header.seq);
    encode_i64(&mut buf, header.ts.timestamp_nanos_opt().unwrap_or(0));
    encode_string(&mut buf, header.event_type);
    encode_string(&mut buf, header.schema_version);
    encode_optional_string(&mut buf, header.source);
    encode_optional_string(&mut buf, header.trace_id);
    encode_optional_string(&mut buf, header.dedupe_key);
    encode_string(&mut buf, header.prev_hash);
    buf.push(HEADER_SEP);
    buf.extend_from_slice(&canonical_payload_bytes(payload));

    hex::encode(Sha256::digest(&buf))
}

/// `prev_hash` of the genesis event: SHA-256 over the genesis domain prefix
/// and the signer's raw public key bytes. This binds the chain to the key;
/// splicing a new chain under a different key is detectable.
pub fn genesis_prev_hash(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_DOMAIN);
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

/// Message signed per event: raw hash bytes followed by the signer id.
///
/// Returns `None` when the hash is not valid hex (a malformed row; callers
/// treat this as a verification failure, never a panic).
pub fn signing_input(hash_hex: &str, signer: &str) -> Option<Vec<u8>> {
    let hash_bytes = hex::decode(hash_hex).ok()?;
    let mut msg = Vec::with_capacity(hash_bytes.len() + signer.len());
    msg.extend_from_slice(&hash_bytes);
    msg.extend_from_slice(signer.as_bytes());
    Some(msg)
}

#[inline]
fn encode_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
fn encode_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
fn encode_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

#[inline]
fn encode_optional_string(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => buf.push(0x00),
        Some(v) => {
            buf.push(0x01);
            encode_string(buf, v);
        }
    }
}
