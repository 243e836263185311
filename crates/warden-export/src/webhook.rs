//! Outbound HTTP delivery with linear backoff and a dead-letter fallback.

use crate::atomic::append_with_rollover;
use std::path::Path;
use std::thread;
use std::time::Duration;
use warden_core::config::HttpForward;

/// POST `body` (already-serialized JSON) to `cfg.url`, retrying up to
/// `cfg.retries` additional times with linear backoff. On final failure,
/// append `body` to `cfg.dlq_path` if set and return the last error.
pub fn post_with_retries(cfg: &HttpForward, body: &str) -> Result<(), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_seconds))
        .build()
        .map_err(|e| e.to_string())?;

    let attempts = cfg.retries + 1;
    let mut last_err = String::new();
    for attempt in 0..attempts {
        match client
            .post(&cfg.url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
        {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => last_err = format!("http status {}", resp.status()),
            Err(e) => last_err = e.to_string(),
        }
        if attempt + 1 < attempts {
            thread::sleep(Duration::from_secs(cfg.backoff_seconds * u64::from(attempt + 1)));
        }
    }

    if let Some(dlq) = &cfg.dlq_path {
        let _ = append_with_rollover(Path::new(dlq), body, 0);
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_target_writes_to_dlq() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = dir.path().join("dlq.jsonl");
        let cfg = HttpForward {
            url: "http://127.0.0.1:1/unreachable".to_string(),
            timeout_seconds: 1,
            retries: 0,
            backoff_seconds: 0,
            dlq_path: Some(dlq.to_string_lossy().to_string()),
        };
        let result = post_with_retries(&cfg, r#"{"a":1}"#);
        assert!(result.is_err());
        assert!(std::fs::read_to_string(&dlq).unwrap().contains("\"a\":1"));
    }
}
