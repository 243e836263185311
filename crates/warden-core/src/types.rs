//! Core data model: `SensorReading`, `EntityTrack`, `Event`, `TaskRecommendation`
//! and their supporting types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Free-form, dynamically-typed attribute map attached to readings, events and
/// rule evidence. Typed reads perform defaulted coercions; an invalid type
/// makes the read miss rather than error.
pub type Details = Map<String, Value>;

/// Geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// A single heterogeneous observation produced by Ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Unique id within the run.
    pub id: String,
    /// Originating sensor id.
    pub sensor_id: String,
    /// Domain label (e.g. `air`, `cyber`, `facility`); open vocabulary.
    pub domain: String,
    /// Source type (e.g. `netflow`, `radar`, `camera`).
    pub source_type: String,
    /// Milliseconds since epoch. Not required to be monotonic across readings.
    pub ts_ms: i64,
    /// Optional geolocation.
    #[serde(default)]
    pub geo: Option<Geo>,
    /// Free-form observation details.
    #[serde(default)]
    pub details: Details,
}

impl SensorReading {
    /// `details.track_id` as a string, if present and a string.
    #[must_use]
    pub fn track_id(&self) -> Option<&str> {
        self.details.get("track_id").and_then(Value::as_str)
    }
}

/// A fused, per-(domain, track) summary built by Fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTrack {
    /// `"{domain}:{track_key}"`.
    pub id: String,
    /// Domain label.
    pub domain: String,
    /// Human-readable label (defaults to the track key).
    pub label: String,
    /// Accumulated attributes (last-writer-wins per key across contributing readings).
    pub attributes: Details,
    /// Max `ts_ms` across contributing readings.
    pub last_seen_ms: i64,
}

/// Event severity. Ordered by ascending rank: info < notice < warning < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Rank 1.
    Info,
    /// Rank 2.
    Notice,
    /// Rank 3.
    Warning,
    /// Rank 4.
    Critical,
}

impl Severity {
    /// Numeric rank used for priority and cap computations (info=1 .. critical=4).
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Notice => 2,
            Severity::Warning => 3,
            Severity::Critical => 4,
        }
    }

    /// Parse a severity from a free-form string, case-insensitively. Unknown
    /// strings fall back to `info` (the lowest rank), per the spec's open
    /// question on unrecognized severities.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "notice" => Severity::Notice,
            "warning" => Severity::Warning,
            "critical" => Severity::Critical,
            _ => Severity::Info,
        }
    }

    /// Lowercase name, as used in rationale strings and audit payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Inclusive-start, exclusive/inclusive-end window over which evidence was observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start, ms since epoch.
    pub start_ms: i64,
    /// Window end, ms since epoch.
    pub end_ms: i64,
}

/// A single piece of evidence backing an event, carrying a content hash of
/// the source reading's `details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Evidence kind; always `"sensor_reading"` for rule-derived events.
    #[serde(rename = "type")]
    pub kind: String,
    /// Source reading id.
    pub id: String,
    /// Source sensor id.
    pub source: String,
    /// SHA-256 hex digest over the canonical serialization of `details`.
    pub hash: String,
    /// The raw observed details, for inspection.
    pub observables: Details,
}

/// Lifecycle status of an `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Created by Rules; eligible for Decision.
    Open,
}

/// A system-recognized occurrence derived from readings by Rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// `"ev_{reading_id}_{rule_id}"`.
    pub id: String,
    /// Rule-declared category.
    pub category: String,
    /// Severity (may be lowered by Governance, never raised after Rules).
    pub severity: Severity,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Domain, or `"multi"` for cross-domain events.
    pub domain: String,
    /// Human-readable summary.
    pub summary: String,
    /// Observation window.
    pub time_window: TimeWindow,
    /// Entity ids implicated (track ids, or `"unknown"`).
    pub entities: Vec<String>,
    /// Contributing sensor ids.
    pub sources: Vec<String>,
    /// Tags (rule ids that matched).
    pub tags: Vec<String>,
    /// Supporting evidence.
    pub evidence: Vec<Evidence>,
    /// Logical owner for risk-budget scoping; defaults to `"default"` in Decision.
    #[serde(default)]
    pub tenant: Option<String>,
}

/// Lifecycle status of a `TaskRecommendation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Auto-approved or approved via signed tokens.
    Approved,
    /// Awaiting human approval; withheld from plan and guardrail counts.
    PendingApproval,
    /// Rolled back from `Approved` by a risk-budget breach (terminal within run).
    RiskHold,
}

/// A recommended action associated with an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecommendation {
    /// Unique task id.
    pub id: String,
    /// Id of the event this task responds to.
    pub event_id: String,
    /// Action token (e.g. `"investigate"`, `"lock"`, `"notify"`).
    pub action: String,
    /// Domain responsible for executing the task.
    pub assignee_domain: String,
    /// 1 (highest) .. 5 (lowest).
    pub priority: u8,
    /// Human-readable justification.
    pub rationale: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Set for infrastructure tasks derived from `infrastructure.mappings`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_type: Option<String>,
    /// Set for infrastructure tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    /// Whether this task requires human/RBAC approval.
    pub requires_approval: bool,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Comma-joined ids of approvers whose signatures validated the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// Logical owner for risk-budget scoping.
    pub tenant: String,
    /// Set when `status == risk_hold`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_reason: Option<String>,
    /// Set when `status == risk_hold`: epoch seconds after which the hold may be reconsidered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_until_epoch: Option<u64>,
    /// True if this task was derived from the source event's severity being `critical`
    /// (drives risk-budget accounting in Guardrails).
    #[serde(skip)]
    pub source_severity_critical: bool,
}

/// A durable risk counter keyed by `(tenant, bucket)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskCounter {
    /// Current count within the active window.
    pub count: u64,
    /// Epoch seconds at which the current window began.
    pub window_start_epoch: u64,
}

/// Per-domain reading counts computed by Fusion, exposed for audit payloads.
pub type DomainCounts = HashMap<String, u64>;
