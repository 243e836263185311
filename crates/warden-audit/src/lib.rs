//! Append-only, hash-chained audit log.
//!
//! Each entry's `hash` covers `seq‖event‖ts_iso‖actor‖payload‖prev_hash` in
//! canonical form, chaining to the previous entry's `hash` (or a zero hash for
//! the first entry). When a signing secret is configured each entry also
//! carries `sig = base64url_nopad(HMAC-SHA256(secret, hash))`, verified with
//! a constant-time comparison the same way the teacher workspace's plugin
//! sandbox pins digests with `subtle::ConstantTimeEq`.

#![deny(unsafe_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use warden_core::canonical::sha256_hex;
use warden_core::clock::Clock;
use warden_core::PipelineError;

type HmacSha256 = Hmac<Sha256>;

fn zero_hash() -> String {
    "0".repeat(64)
}

/// A single audit log entry, as persisted (one per JSONL line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Event kind, e.g. `"run_start"`, `"guardrail_drop"`.
    pub event: String,
    /// RFC 3339 timestamp.
    pub ts_iso: String,
    /// Actor recorded for this run.
    pub actor: String,
    /// Event-specific payload.
    pub payload: Value,
    /// Previous entry's `hash`, or a zero hash for the first entry.
    pub prev_hash: String,
    /// `sha256(canonical({seq,event,ts_iso,actor,payload,prev_hash}))`.
    pub hash: String,
    /// Optional HMAC-SHA256 signature over `hash`, present iff signing is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

/// Fields hashed to produce `AuditEntry::hash`. A distinct type (rather than
/// hashing `AuditEntry` itself) so `hash`/`sig` can never leak into their own
/// input.
#[derive(Serialize)]
struct Hashed<'a> {
    seq: u64,
    event: &'a str,
    ts_iso: &'a str,
    actor: &'a str,
    payload: &'a Value,
    prev_hash: &'a str,
}

fn compute_hash(seq: u64, event: &str, ts_iso: &str, actor: &str, payload: &Value, prev_hash: &str) -> String {
    let hashed = Hashed { seq, event, ts_iso, actor, payload, prev_hash };
    let canonical = warden_core::canonical::canonical_json(&hashed).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

fn sign(secret: &str, hash: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(hash.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

fn signatures_match(secret: &str, hash: &str, sig: &str) -> bool {
    let expected = sign(secret, hash);
    let expected_bytes = expected.as_bytes();
    let actual_bytes = sig.as_bytes();
    expected_bytes.len() == actual_bytes.len() && bool::from(expected_bytes.ct_eq(actual_bytes))
}

struct ChainState {
    next_seq: u64,
    prev_hash: String,
}

/// Append-only audit sink backed by a single JSONL file. Single-writer,
/// internally mutex-guarded.
pub struct AuditLog {
    path: PathBuf,
    actor: String,
    sign_secret: Option<String>,
    file: Mutex<File>,
    state: Mutex<ChainState>,
    clock: std::sync::Arc<dyn Clock>,
}

impl AuditLog {
    /// Open (creating if absent) the audit log at `path`. If `verify_on_start`
    /// is set, the existing chain is fully verified before the file is
    /// reopened for append.
    pub fn open(
        path: &Path,
        actor: &str,
        sign_secret: Option<&str>,
        verify_on_start: bool,
        require_signing: bool,
        clock: std::sync::Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        if verify_on_start && path.exists() {
            verify_chain(path, sign_secret, require_signing)?;
        }

        let (next_seq, prev_hash) = tail_state(path)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            actor: actor.to_string(),
            sign_secret: sign_secret.map(str::to_string),
            file: Mutex::new(file),
            state: Mutex::new(ChainState { next_seq, prev_hash }),
            clock,
        })
    }

    /// Append a new entry with `event` and `payload`, returning the persisted entry.
    pub fn append(&self, event: &str, payload: Value) -> Result<AuditEntry, PipelineError> {
        let mut state = self.state.lock().expect("audit state lock poisoned");
        let seq = state.next_seq;
        let ts_iso = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.clock.now_ms() as i64)
            .unwrap_or_default()
            .to_rfc3339();
        let hash = compute_hash(seq, event, &ts_iso, &self.actor, &payload, &state.prev_hash);
        let sig = self.sign_secret.as_deref().map(|secret| sign(secret, &hash));

        let entry = AuditEntry {
            seq,
            event: event.to_string(),
            ts_iso,
            actor: self.actor.clone(),
            payload,
            prev_hash: state.prev_hash.clone(),
            hash: hash.clone(),
            sig,
        };

        let line = serde_json::to_string(&entry).map_err(|e| PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        )))?;
        {
            let mut file = self.file.lock().expect("audit file lock poisoned");
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
        }

        state.next_seq += 1;
        state.prev_hash = hash;
        Ok(entry)
    }

    /// Path this log is backed by.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the last line's `(seq + 1, hash)` from an existing log, or `(1, zero_hash)`
/// if the file is absent or empty.
fn tail_state(path: &Path) -> Result<(u64, String), PipelineError> {
    if !path.exists() {
        return Ok((1, zero_hash()));
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut last: Option<AuditEntry> = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line)
            .map_err(|e| PipelineError::InputFormat(format!("corrupt audit line: {e}")))?;
        last = Some(entry);
    }
    Ok(match last {
        Some(entry) => (entry.seq + 1, entry.hash),
        None => (1, zero_hash()),
    })
}

/// Recompute the hash chain for the audit file at `path`, failing on the
/// first mismatch. If `sign_secret` is set, also verify every signature
/// (constant-time). If `require_signing` is set, every entry must carry a
/// `sig`.
pub fn verify_chain(path: &Path, sign_secret: Option<&str>, require_signing: bool) -> Result<(), PipelineError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut expected_prev = zero_hash();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| PipelineError::AuditTampered {
            line: line_no,
            message: format!("unparsable entry: {e}"),
        })?;

        if entry.prev_hash != expected_prev {
            return Err(PipelineError::AuditTampered {
                line: line_no,
                message: "prev_hash does not match preceding entry".to_string(),
            });
        }

        let recomputed = compute_hash(
            entry.seq,
            &entry.event,
            &entry.ts_iso,
            &entry.actor,
            &entry.payload,
            &entry.prev_hash,
        );
        if recomputed != entry.hash {
            return Err(PipelineError::AuditTampered {
                line: line_no,
                message: "hash does not match recomputed value".to_string(),
            });
        }

        match (&entry.sig, sign_secret) {
            (Some(sig), Some(secret)) => {
                if !signatures_match(secret, &entry.hash, sig) {
                    return Err(PipelineError::AuditTampered {
                        line: line_no,
                        message: "signature does not match".to_string(),
                    });
                }
            }
            (None, _) if require_signing => {
                return Err(PipelineError::AuditUnsigned { line: line_no });
            }
            _ => {}
        }

        expected_prev = entry.hash;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::clock::VirtualClock;

    fn log_at(dir: &tempfile::TempDir) -> (PathBuf, std::sync::Arc<VirtualClock>) {
        (dir.path().join("audit.jsonl"), std::sync::Arc::new(VirtualClock::new(1_000)))
    }

    #[test]
    fn append_chains_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let (path, clock) = log_at(&dir);
        let log = AuditLog::open(&path, "tester", None, false, false, clock).unwrap();
        let e1 = log.append("run_start", json!({"a": 1})).unwrap();
        let e2 = log.append("run_done", json!({"b": 2})).unwrap();
        assert_eq!(e1.prev_hash, zero_hash());
        assert_eq!(e2.prev_hash, e1.hash);
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn verify_chain_detects_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let (path, clock) = log_at(&dir);
        let log = AuditLog::open(&path, "tester", None, false, false, clock).unwrap();
        log.append("run_start", json!({"a": 1})).unwrap();
        log.append("run_done", json!({"b": 2})).unwrap();
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let tampered = contents.replacen("\"b\":2", "\"b\":3", 1);
        std::fs::write(&path, tampered).unwrap();

        let err = verify_chain(&path, None, false).unwrap_err();
        assert!(matches!(err, PipelineError::AuditTampered { .. }));
    }

    #[test]
    fn signatures_round_trip_and_detect_forgery() {
        let dir = tempfile::tempdir().unwrap();
        let (path, clock) = log_at(&dir);
        let log = AuditLog::open(&path, "tester", Some("s3cr3t"), false, false, clock).unwrap();
        log.append("run_start", json!({})).unwrap();
        drop(log);

        verify_chain(&path, Some("s3cr3t"), false).unwrap();
        assert!(verify_chain(&path, Some("wrong"), false).is_err());
    }

    #[test]
    fn require_signing_rejects_unsigned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (path, clock) = log_at(&dir);
        let log = AuditLog::open(&path, "tester", None, false, false, clock).unwrap();
        log.append("run_start", json!({})).unwrap();
        drop(log);

        let err = verify_chain(&path, None, true).unwrap_err();
        assert!(matches!(err, PipelineError::AuditUnsigned { .. }));
    }

    #[test]
    fn reopening_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let (path, clock) = log_at(&dir);
        let log = AuditLog::open(&path, "tester", None, false, false, clock.clone()).unwrap();
        let e1 = log.append("run_start", json!({})).unwrap();
        drop(log);

        let log2 = AuditLog::open(&path, "tester", None, false, false, clock).unwrap();
        let e2 = log2.append("run_done", json!({})).unwrap();
        assert_eq!(e2.seq, 2);
        assert_eq!(e2.prev_hash, e1.hash);
    }
}
