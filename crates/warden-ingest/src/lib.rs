//! Sensor reading ingest: scenario documents, bounded tail polling of a
//! line-delimited file, and a stub delegate to the (out-of-scope) external
//! media-modules adapter.
//!
//! Tail polling is the one ingest path that suspends on real wall-clock time;
//! it is the single place this crate reaches for `tokio`, matching the
//! overall pipeline's rule that async is reserved for I/O suspension points
//! rather than stage sequencing.

#![deny(unsafe_code)]

use serde::Deserialize;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use warden_core::types::SensorReading;
use warden_core::PipelineError;

const REQUIRED_KEYS: [&str; 5] = ["id", "sensor_id", "domain", "source_type", "ts_ms"];

#[derive(Debug, Deserialize)]
struct ScenarioDoc {
    sensor_readings: Vec<serde_yaml::Value>,
}

fn has_required_keys(value: &serde_yaml::Value) -> bool {
    let serde_yaml::Value::Mapping(map) = value else { return false };
    REQUIRED_KEYS
        .iter()
        .all(|key| map.contains_key(&serde_yaml::Value::String((*key).to_string())))
}

/// Parse a scenario document (YAML or JSON, both accepted via `serde_yaml`)
/// with a top-level `sensor_readings` list.
pub fn scenario(path: &Path) -> Result<Vec<SensorReading>, PipelineError> {
    let text = std::fs::read_to_string(path)?;
    let doc: ScenarioDoc = serde_yaml::from_str(&text)
        .map_err(|e| PipelineError::InputFormat(format!("scenario document malformed: {e}")))?;

    let mut readings = Vec::with_capacity(doc.sensor_readings.len());
    for (idx, raw) in doc.sensor_readings.into_iter().enumerate() {
        if !has_required_keys(&raw) {
            return Err(PipelineError::InputFormat(format!(
                "sensor_readings[{idx}] missing one of {REQUIRED_KEYS:?}"
            )));
        }
        let reading: SensorReading = serde_yaml::from_value(raw)
            .map_err(|e| PipelineError::InputFormat(format!("sensor_readings[{idx}] invalid: {e}")))?;
        readings.push(reading);
    }
    Ok(readings)
}

/// Outcome of a tail-mode ingest pass.
#[derive(Debug, Default)]
pub struct TailOutcome {
    /// Readings parsed from new lines, in file order.
    pub readings: Vec<SensorReading>,
    /// Number of lines that failed to parse (dropped from data, counted for audit).
    pub malformed_count: u64,
}

/// Poll `path` for new lines at `poll_interval_sec`, parsing each as one
/// `SensorReading`. Stops after `max_items` readings (`0` = unbounded), after
/// two consecutive polls see no new content, or when `cancel` is set;
/// honored within `poll_interval_sec`.
pub async fn tail(
    path: &Path,
    poll_interval_sec: u64,
    max_items: u64,
    cancel: &AtomicBool,
) -> Result<TailOutcome, PipelineError> {
    let mut outcome = TailOutcome::default();
    let mut offset: u64 = 0;
    let mut empty_polls: u32 = 0;

    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let mut saw_new_line = false;
        if path.exists() {
            let mut file = std::fs::File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut reader = BufReader::new(file);
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line)?;
                if read == 0 || !line.ends_with('\n') {
                    // EOF, or a partial trailing line not yet fully written.
                    break;
                }
                offset += read as u64;
                saw_new_line = true;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<SensorReading>(trimmed) {
                    Ok(reading) => outcome.readings.push(reading),
                    Err(_) => outcome.malformed_count += 1,
                }
                if max_items > 0 && outcome.readings.len() as u64 >= max_items {
                    return Ok(outcome);
                }
            }
        }

        if saw_new_line {
            empty_polls = 0;
        } else {
            empty_polls += 1;
            if empty_polls >= 2 {
                break;
            }
        }

        if cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_secs(poll_interval_sec.max(1))).await;
    }

    Ok(outcome)
}

/// Delegate to the external media-modules adapter. The adapter itself is out
/// of scope; this always reports itself unavailable so callers audit
/// `ingest_modules_skipped` and continue with an empty reading set.
#[must_use]
pub fn modules_media() -> Vec<SensorReading> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scenario_parses_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(
            &path,
            r#"
sensor_readings:
  - id: r1
    sensor_id: s1
    domain: air
    source_type: radar
    ts_ms: 1000
"#,
        )
        .unwrap();
        let readings = scenario(&path).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].id, "r1");
    }

    #[test]
    fn scenario_rejects_missing_required_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(&path, "sensor_readings:\n  - id: r1\n    domain: air\n").unwrap();
        let err = scenario(&path).unwrap_err();
        assert!(matches!(err, PipelineError::InputFormat(_)));
    }

    #[tokio::test]
    async fn tail_stops_after_max_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..3 {
            writeln!(
                file,
                r#"{{"id":"r{i}","sensor_id":"s","domain":"air","source_type":"radar","ts_ms":{i}}}"#
            )
            .unwrap();
        }
        drop(file);
        let cancel = AtomicBool::new(false);
        let outcome = tail(&path, 1, 2, &cancel).await.unwrap();
        assert_eq!(outcome.readings.len(), 2);
    }

    #[tokio::test]
    async fn tail_counts_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.jsonl");
        std::fs::write(&path, "not json\n{\"id\":\"r1\",\"sensor_id\":\"s\",\"domain\":\"air\",\"source_type\":\"radar\",\"ts_ms\":1}\n").unwrap();
        let cancel = AtomicBool::new(false);
        let outcome = tail(&path, 1, 1, &cancel).await.unwrap();
        assert_eq!(outcome.malformed_count, 1);
        assert_eq!(outcome.readings.len(), 1);
    }

    #[tokio::test]
    async fn tail_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.jsonl");
        std::fs::write(&path, "").unwrap();
        let cancel = AtomicBool::new(true);
        let outcome = tail(&path, 1, 0, &cancel).await.unwrap();
        assert!(outcome.readings.is_empty());
    }
}
