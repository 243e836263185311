//! Sequences the oversight pipeline's stages over a shared per-run context:
//! configuration, the audit sink, the risk-counter store and the metrics
//! recorder. Stage sequencing itself is plain synchronous Rust; `tokio` is
//! reserved for the bounded-polling suspension point in tail-mode ingest,
//! matching the teacher workspace's own rule that async lives at I/O
//! boundaries, not in control flow.

#![deny(unsafe_code)]

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use warden_core::clock::{process_clock, Clock};
use warden_core::config::{ActiveApprover, IngestMode, SimulationConfig};
use warden_core::types::{Event, TaskRecommendation, TaskStatus};
use warden_core::PipelineError;
use warden_export::ExportPayload;
use warden_governance::RulesEngine;
use warden_risk_store::RiskStore;
use warden_telemetry::{init_logging, DecisionMetrics, PrometheusRecorder};

/// Everything needed to run one simulation.
pub struct RunRequest {
    /// Scenario document path, required when the effective ingest mode is `scenario`.
    pub scenario_path: Option<PathBuf>,
    /// Config document path.
    pub config_path: PathBuf,
    /// Output directory; export sinks write relative paths under this directory.
    pub out_dir: PathBuf,
    /// Optional policy-pack document, deep-merged onto the base config.
    pub policy_pack: Option<PathBuf>,
    /// Overrides `pipeline.ingest.mode` from the config when set.
    pub ingest_mode_override: Option<IngestMode>,
    /// CLI-supplied approver id, appended to `rbac.active_approvers`.
    pub approver_id: Option<String>,
    /// CLI-supplied approver token, paired with `approver_id`.
    pub approver_token: Option<String>,
    /// Cooperative cancellation signal, honored within `poll_interval_sec` in tail mode.
    pub cancel: Arc<AtomicBool>,
}

/// Summary counts returned after a run completes (or is cancelled).
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Events surviving governance.
    pub event_count: usize,
    /// Tasks left `approved`.
    pub approved_count: usize,
    /// Tasks left `pending_approval`.
    pub pending_count: usize,
    /// Tasks rolled back to `risk_hold`.
    pub risk_held_count: usize,
    /// Per-sink export failures (non-fatal).
    pub export_failures: Vec<warden_export::ExportFailure>,
    /// Set if the run stopped early due to cancellation.
    pub cancelled: bool,
}

fn with_rbac_override(config: &mut SimulationConfig, request: &RunRequest) {
    if let (Some(id), Some(token)) = (&request.approver_id, &request.approver_token) {
        config.pipeline.rbac.active_approvers.push(ActiveApprover { id: id.clone(), token: token.clone() });
    }
}

fn effective_mode(config: &SimulationConfig, request: &RunRequest) -> IngestMode {
    request.ingest_mode_override.unwrap_or(config.pipeline.ingest.mode)
}

/// Run one simulation end to end, writing audit entries and export artifacts
/// under `request.out_dir`. Fatal errors (`ConfigError`, `AuditTampered`,
/// `AuditUnsigned`, `StoreError`) abort the run after a final `run_failed`
/// audit entry, when an audit sink was successfully opened.
pub fn run(request: &RunRequest) -> Result<RunOutcome, PipelineError> {
    let mut config = SimulationConfig::load(&request.config_path, request.policy_pack.as_deref())?;
    with_rbac_override(&mut config, request);
    init_logging(&config.logging);

    std::fs::create_dir_all(&request.out_dir)?;

    let clock = process_clock();
    let audit_path = request.out_dir.join(&config.audit.path);
    let audit = warden_audit::AuditLog::open(
        &audit_path,
        config.audit.actor.as_deref().unwrap_or("warden"),
        config.audit.sign_secret.as_deref(),
        config.audit.verify_on_start,
        config.audit.require_signing,
        clock.clone(),
    )?;

    match run_stages(&config, &audit, &clock, request) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            error!(category = e.category(), message = %e, "pipeline run failed");
            audit
                .append("run_failed", json!({"category": e.category(), "message": e.to_string()}))
                .ok();
            Err(e)
        }
    }
}

fn run_stages(
    config: &SimulationConfig,
    audit: &warden_audit::AuditLog,
    clock: &Arc<dyn Clock>,
    request: &RunRequest,
) -> Result<RunOutcome, PipelineError> {
    let config_hash = config.canonical_hash();
    let mode = effective_mode(config, request);
    info!(config_hash = %config_hash, ingest_mode = ?mode, "run starting");
    audit.append(
        "run_start",
        json!({"config_hash": config_hash, "ingest_mode": format!("{mode:?}")}),
    )?;

    let risk_store =
        RiskStore::open(&request.out_dir.join(&config.pipeline.guardrails.risk_store_path))?;
    let metrics = DecisionMetrics::new();
    let prom = PrometheusRecorder::new().map_err(|e| PipelineError::ConfigError {
        path: "metrics".to_string(),
        message: e.to_string(),
    })?;

    let (readings, cancelled) = run_ingest(config, mode, request, audit)?;
    info!(readings = readings.len(), "ingest complete");
    if cancelled {
        info!("run cancelled during ingest");
        audit.append("run_cancelled", json!({"readings_ingested": readings.len()}))?;
        return Ok(RunOutcome { cancelled: true, ..RunOutcome::default() });
    }

    let fusion = warden_fusion::fuse(&readings);
    audit.append(
        "fusion_done",
        json!({"tracks": fusion.tracks.len(), "domain_counts": fusion.domain_counts}),
    )?;

    let events = run_rules(config, &readings, audit)?;

    let (events, gov_counts) = warden_governance::pre_decision(&config.pipeline.governance, events);
    for _ in 0..gov_counts.blocked {
        metrics.record("governance", "blocked");
    }
    for _ in 0..gov_counts.capped {
        metrics.record("governance", "capped");
    }
    audit.append(
        "governance_pre_decision",
        json!({"blocked": gov_counts.blocked, "capped": gov_counts.capped}),
    )?;

    let decision = warden_decision::decide(
        &events,
        &config.pipeline.human_loop,
        &config.pipeline.rbac,
        &config.pipeline.infrastructure,
    );
    audit.append(
        "decision_done",
        json!({
            "approved": decision.counts.approved,
            "pending": decision.counts.pending,
            "generated_infra": decision.counts.generated_infra,
        }),
    )?;

    let (tasks, forbid_drops) =
        warden_governance::post_decision(&config.pipeline.governance, decision.tasks);
    for drop in &forbid_drops {
        metrics.record("governance", "forbid");
        audit.append(
            "governance_forbid",
            json!({"task_id": drop.task_id, "action": drop.action}),
        )?;
    }

    let (approved, pending): (Vec<TaskRecommendation>, Vec<TaskRecommendation>) =
        tasks.into_iter().partition(|t| t.status == TaskStatus::Approved);

    let now_epoch = clock.now_epoch_sec();
    let guardrails_outcome =
        warden_guardrails::apply(approved, &config.pipeline.guardrails, &risk_store, now_epoch)?;
    for drop in &guardrails_outcome.drops {
        metrics.record("guardrail", &drop.rule);
        audit.append(
            "guardrail_drop",
            json!({"rule": drop.rule, "dropped_count": drop.dropped_count}),
        )?;
    }
    audit.append(
        "guardrails_done",
        json!({
            "kept": guardrails_outcome.tasks.len(),
            "risk_held": guardrails_outcome.risk_held_tasks.len(),
            "drops": guardrails_outcome.drops.iter().map(|d| json!({"rule": d.rule, "dropped_count": d.dropped_count})).collect::<Vec<_>>(),
            "health_alert": guardrails_outcome.health_alert,
        }),
    )?;
    if guardrails_outcome.health_alert {
        audit.append("health_alert", json!({"reason": "drop_ratio_exceeded"}))?;
    }

    let plan = warden_autonomy::plan(&guardrails_outcome.tasks);
    audit.append(
        "autonomy_done",
        json!({"domains": plan.len(), "tasks": guardrails_outcome.tasks.len()}),
    )?;

    let payload = ExportPayload {
        events: &events,
        tasks: &guardrails_outcome.tasks,
        pending_tasks: &pending,
        risk_held_tasks: &guardrails_outcome.risk_held_tasks,
    };
    let export_failures = run_export(config, &request.out_dir, &payload, &prom, &metrics, audit)?;

    info!(
        events = events.len(),
        approved = guardrails_outcome.tasks.len(),
        pending = pending.len(),
        export_failures = export_failures.len(),
        "run complete"
    );
    audit.append(
        "run_done",
        json!({
            "events": events.len(),
            "approved": guardrails_outcome.tasks.len(),
            "pending": pending.len(),
            "risk_held": guardrails_outcome.risk_held_tasks.len(),
            "export_failures": export_failures.len(),
        }),
    )?;

    Ok(RunOutcome {
        event_count: events.len(),
        approved_count: guardrails_outcome.tasks.len(),
        pending_count: pending.len(),
        risk_held_count: guardrails_outcome.risk_held_tasks.len(),
        export_failures,
        cancelled: false,
    })
}

fn run_ingest(
    config: &SimulationConfig,
    mode: IngestMode,
    request: &RunRequest,
    audit: &warden_audit::AuditLog,
) -> Result<(Vec<warden_core::types::SensorReading>, bool), PipelineError> {
    match mode {
        IngestMode::Scenario => {
            let path = request.scenario_path.as_deref().ok_or_else(|| PipelineError::ConfigError {
                path: "--scenario".to_string(),
                message: "scenario ingest mode requires a scenario path".to_string(),
            })?;
            let readings = warden_ingest::scenario(path)?;
            audit.append("ingest_done", json!({"mode": "scenario", "count": readings.len()}))?;
            Ok((readings, false))
        }
        IngestMode::Tail => {
            let tail_cfg = &config.pipeline.ingest.tail;
            let path = tail_cfg.path.as_deref().ok_or_else(|| PipelineError::ConfigError {
                path: "pipeline.ingest.tail.path".to_string(),
                message: "tail ingest mode requires a path".to_string(),
            })?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(PipelineError::Io)?;
            let outcome = runtime.block_on(warden_ingest::tail(
                Path::new(path),
                tail_cfg.poll_interval_sec,
                tail_cfg.max_items,
                &request.cancel,
            ))?;
            audit.append(
                "ingest_done",
                json!({"mode": "tail", "count": outcome.readings.len(), "malformed_count": outcome.malformed_count}),
            )?;
            let cancelled = request.cancel.load(Ordering::SeqCst);
            Ok((outcome.readings, cancelled))
        }
        IngestMode::ModulesMedia => {
            let readings = warden_ingest::modules_media();
            audit.append("ingest_modules_skipped", json!({"reason": "media adapter out of scope"}))?;
            Ok((readings, false))
        }
    }
}

fn run_rules(
    config: &SimulationConfig,
    readings: &[warden_core::types::SensorReading],
    audit: &warden_audit::AuditLog,
) -> Result<Vec<Event>, PipelineError> {
    let events = match &config.rules_file {
        Some(path) => {
            let engine = RulesEngine::load_from_yaml(Path::new(path))?;
            engine.evaluate(readings)?
        }
        None => Vec::new(),
    };
    audit.append("rules_done", json!({"count": events.len()}))?;
    Ok(events)
}

fn run_export(
    config: &SimulationConfig,
    out_dir: &Path,
    payload: &ExportPayload<'_>,
    prom: &PrometheusRecorder,
    metrics: &DecisionMetrics,
    audit: &warden_audit::AuditLog,
) -> Result<Vec<warden_export::ExportFailure>, PipelineError> {
    prom.load(metrics);
    let failures = warden_export::run(&config.pipeline.export, payload, prom, out_dir);
    for failure in &failures {
        tracing::warn!(sink = %failure.sink, error = %failure.message, "export sink failed");
        metrics.record("export", "failed");
        audit.append(
            "export_failed",
            json!({"sink": failure.sink, "error_category": failure.message}),
        )?;
    }
    Ok(failures)
}
