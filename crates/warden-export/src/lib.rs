//! Export stage: fan the run's results out to the configured sinks.
//!
//! Every sink token runs independently — one sink's failure produces an
//! `ExportFailure` (surfaced by the orchestrator as an `export_failed` audit
//! entry) but never stops the others from running.

#![deny(unsafe_code)]

mod atomic;
mod webhook;

use serde::Serialize;
use std::path::{Path, PathBuf};
use warden_core::config::ExportConfig;
use warden_core::types::{Event, TaskRecommendation};
use warden_telemetry::PrometheusRecorder;

/// Everything a run produced, as handed to Export by the orchestrator.
#[derive(Debug, Serialize)]
pub struct ExportPayload<'a> {
    /// Events surviving governance.
    pub events: &'a [Event],
    /// Tasks left `approved` after guardrails.
    pub tasks: &'a [TaskRecommendation],
    /// Tasks withheld for human approval.
    pub pending_tasks: &'a [TaskRecommendation],
    /// Tasks rolled back by a risk-budget breach.
    pub risk_held_tasks: &'a [TaskRecommendation],
}

/// One sink's failure, isolated from the rest of the export pass.
#[derive(Debug, Clone)]
pub struct ExportFailure {
    /// Sink token, e.g. `"webhook"`.
    pub sink: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Run every sink named in `cfg.formats` (plus the always-on `task_jsonl`/
/// `infrastructure`/`webhook` sinks when configured), collecting failures
/// rather than aborting on the first one. File sinks with a relative path are
/// resolved against `out_dir`; absolute paths are used as-is.
pub fn run(
    cfg: &ExportConfig,
    payload: &ExportPayload<'_>,
    metrics: &PrometheusRecorder,
    out_dir: &Path,
) -> Vec<ExportFailure> {
    let mut failures = Vec::new();

    for sink in &cfg.formats {
        let outcome = match sink.as_str() {
            "json" => export_json(payload, out_dir),
            "stdout" => export_stdout(payload),
            "metrics" => export_metrics(metrics, out_dir),
            "stix" => export_stix(),
            other => Err(format!("unknown export sink '{other}'")),
        };
        if let Err(message) = outcome {
            failures.push(ExportFailure { sink: sink.clone(), message });
        }
    }

    if let Some(path) = &cfg.task_jsonl.path {
        if let Err(message) =
            export_task_jsonl(&out_dir.join(path), cfg.task_jsonl.rotate_max_bytes, payload.tasks)
        {
            failures.push(ExportFailure { sink: "task_jsonl".to_string(), message });
        }
    }

    if let Some(path) = &cfg.infrastructure.path {
        if let Err(message) = export_infrastructure(&out_dir.join(path), cfg, payload.tasks) {
            failures.push(ExportFailure { sink: "infrastructure".to_string(), message });
        }
    }

    if let Some(http) = &cfg.webhook {
        let body = serde_json::to_string(payload).unwrap_or_default();
        if let Err(message) = webhook::post_with_retries(http, &body) {
            failures.push(ExportFailure { sink: "webhook".to_string(), message });
        }
    }

    failures
}

fn export_json(payload: &ExportPayload<'_>, out_dir: &Path) -> Result<(), String> {
    let body = serde_json::to_vec_pretty(payload).map_err(|e| e.to_string())?;
    atomic::write_atomic(&out_dir.join("events.json"), &body).map_err(|e| e.to_string())
}

fn export_stdout(payload: &ExportPayload<'_>) -> Result<(), String> {
    let body = serde_json::to_string_pretty(payload).map_err(|e| e.to_string())?;
    println!("{body}");
    Ok(())
}

fn export_metrics(metrics: &PrometheusRecorder, out_dir: &Path) -> Result<(), String> {
    let text = metrics.render().map_err(|e| e.to_string())?;
    atomic::write_atomic(&out_dir.join("metrics.prom"), text.as_bytes()).map_err(|e| e.to_string())
}

/// STIX bundle export is a delegate concern outside this pipeline's scope;
/// this sink only records that the delegation point exists.
fn export_stix() -> Result<(), String> {
    Err("stix sink is a delegate stub; no STIX bundler is configured".to_string())
}

fn export_task_jsonl(path: &PathBuf, rotate_max_bytes: u64, tasks: &[TaskRecommendation]) -> Result<(), String> {
    for task in tasks {
        let line = serde_json::to_string(task).map_err(|e| e.to_string())?;
        atomic::append_with_rollover(path, &line, rotate_max_bytes).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn export_infrastructure(
    path: &PathBuf,
    cfg: &ExportConfig,
    tasks: &[TaskRecommendation],
) -> Result<(), String> {
    let infra_tasks: Vec<&TaskRecommendation> =
        tasks.iter().filter(|t| t.infrastructure_type.is_some()).collect();

    for task in &infra_tasks {
        let line = serde_json::to_string(task).map_err(|e| e.to_string())?;
        atomic::append_with_rollover(path, &line, cfg.infrastructure.rotate_max_bytes)
            .map_err(|e| e.to_string())?;
    }

    if let Some(http) = &cfg.infrastructure.http {
        if !infra_tasks.is_empty() {
            let body = serde_json::to_string(&infra_tasks).map_err(|e| e.to_string())?;
            webhook::post_with_retries(http, &body)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::config::{HttpForward, InfraSinkConfig, JsonlSinkConfig};
    use warden_core::types::TaskStatus;

    fn task(id: &str, infra: bool) -> TaskRecommendation {
        TaskRecommendation {
            id: id.to_string(),
            event_id: "ev1".to_string(),
            action: "investigate".to_string(),
            assignee_domain: "air".to_string(),
            priority: 1,
            rationale: "r".to_string(),
            confidence: 0.5,
            infrastructure_type: infra.then(|| "door_lock".to_string()),
            asset_id: infra.then(|| "door-1".to_string()),
            requires_approval: false,
            status: TaskStatus::Approved,
            approved_by: None,
            tenant: "default".to_string(),
            hold_reason: None,
            hold_until_epoch: None,
            source_severity_critical: false,
        }
    }

    #[test]
    fn task_jsonl_writes_one_line_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let tasks = vec![task("t1", false), task("t2", false)];
        export_task_jsonl(&path, 0, &tasks).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn infrastructure_sink_only_writes_infra_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.jsonl");
        let tasks = vec![task("t1", true), task("t2", false)];
        let cfg = ExportConfig {
            formats: vec![],
            task_jsonl: JsonlSinkConfig::default(),
            infrastructure: InfraSinkConfig {
                path: Some(path.to_string_lossy().to_string()),
                rotate_max_bytes: 0,
                http: None,
            },
            webhook: None,
        };
        export_infrastructure(&path, &cfg, &tasks).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("door_lock"));
    }

    #[test]
    fn unknown_sink_token_is_reported_as_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExportConfig { formats: vec!["carrier_pigeon".to_string()], ..Default::default() };
        let payload = ExportPayload { events: &[], tasks: &[], pending_tasks: &[], risk_held_tasks: &[] };
        let metrics = PrometheusRecorder::new().unwrap();
        let failures = run(&cfg, &payload, &metrics, dir.path());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sink, "carrier_pigeon");
    }

    #[test]
    fn stix_sink_is_reported_as_a_stub_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ExportConfig { formats: vec!["stix".to_string()], ..Default::default() };
        let payload = ExportPayload { events: &[], tasks: &[], pending_tasks: &[], risk_held_tasks: &[] };
        let metrics = PrometheusRecorder::new().unwrap();
        let failures = run(&cfg, &payload, &metrics, dir.path());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].sink, "stix");
    }

    #[test]
    fn webhook_cfg_unused_directly_here_is_exercised_via_post_with_retries() {
        // sanity: HttpForward is constructible with the fields export expects.
        let _ = HttpForward {
            url: "http://example.invalid".to_string(),
            timeout_seconds: 1,
            retries: 0,
            backoff_seconds: 0,
            dlq_path: None,
        };
    }
}
