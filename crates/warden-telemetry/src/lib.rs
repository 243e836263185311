//! Structured logging init and low-cardinality decision/export metrics.
//!
//! `init_logging` generalizes the teacher workspace's `telemetry::init_json_logging`
//! to the two formats the config's `logging.format` allows. `DecisionMetrics`
//! is a counter map keyed the same way the teacher's policy engine keys its
//! `PolicyMetrics` (`"{phase}:{kind}"`), and `PrometheusRecorder` renders those
//! counts as Prometheus text exposition for the `metrics` export sink.

#![deny(unsafe_code)]

use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry as TracingRegistry};
use warden_core::config::{LogFormat, LoggingConfig};

/// Telemetry setup failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Prometheus registry rejected a metric (duplicate registration).
    #[error("metrics registration failed: {0}")]
    Registration(String),
}

/// Initialize the global `tracing` subscriber per `logging.{level,format}`.
/// Idempotent: a second call is a no-op if a subscriber is already set.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_new(&cfg.level).unwrap_or_else(|_| EnvFilter::new("info"));
    match cfg.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
            let subscriber = TracingRegistry::default().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer().pretty();
            let subscriber = TracingRegistry::default().with(filter).with(fmt_layer);
            tracing::subscriber::set_global_default(subscriber).ok();
        }
    }
}

/// Decision/drop/export counters keyed `"{stage}:{kind}"`, e.g.
/// `"governance:severity_cap"`, `"guardrail:per_domain"`, `"export:failed"`.
#[derive(Default)]
pub struct DecisionMetrics {
    counts: Mutex<HashMap<String, u64>>,
}

impl DecisionMetrics {
    /// New, empty metrics map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `stage:kind` by one.
    pub fn record(&self, stage: &str, kind: &str) {
        let key = format!("{stage}:{kind}");
        let mut counts = self.counts.lock().expect("metrics lock poisoned");
        *counts.entry(key).or_insert(0) += 1;
    }

    /// Snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.lock().expect("metrics lock poisoned").clone()
    }
}

/// Renders a `DecisionMetrics` snapshot as Prometheus text exposition for the
/// `metrics.prom` export sink.
pub struct PrometheusRecorder {
    registry: Registry,
    decisions: IntCounterVec,
}

impl PrometheusRecorder {
    /// Build a fresh registry with the pipeline's metric families.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let decisions = IntCounterVec::new(
            Opts::new("warden_pipeline_decisions_total", "Decisions recorded per stage and kind"),
            &["stage", "kind"],
        )
        .map_err(|e| TelemetryError::Registration(e.to_string()))?;
        registry
            .register(Box::new(decisions.clone()))
            .map_err(|e| TelemetryError::Registration(e.to_string()))?;
        Ok(Self { registry, decisions })
    }

    /// Load a `DecisionMetrics` snapshot into the Prometheus counters.
    pub fn load(&self, metrics: &DecisionMetrics) {
        for (key, count) in metrics.snapshot() {
            let Some((stage, kind)) = key.split_once(':') else { continue };
            self.decisions.with_label_values(&[stage, kind]).inc_by(count);
        }
    }

    /// Render the registry as Prometheus text exposition format.
    pub fn render(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Registration(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Registration(e.to_string()))
    }
}
