//! Top-level configuration schema and policy-pack deep merge.
//!
//! Config documents are YAML (a superset of JSON, so JSON files parse too),
//! mirroring how the teacher workspace's governance policy engine loads its
//! own rule files via `serde_yaml`.

use crate::error::PipelineError;
use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn default_true() -> bool {
    true
}

/// `ingest.tail` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailConfig {
    /// Path to the line-delimited file to poll.
    #[serde(default)]
    pub path: Option<String>,
    /// Stop after this many items (0 = unbounded, still stops at EOF-twice).
    #[serde(default)]
    pub max_items: u64,
    /// Poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_sec: u64,
}

fn default_poll_interval() -> u64 {
    1
}

/// `ingest.media` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path passed through to the external media-modules adapter.
    #[serde(default)]
    pub path: Option<String>,
}

/// `ingest.modules` section: toggles forwarded to the external media adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Enable vision analytics.
    #[serde(default)]
    pub enable_vision: bool,
    /// Enable audio analytics.
    #[serde(default)]
    pub enable_audio: bool,
    /// Enable thermal analytics.
    #[serde(default)]
    pub enable_thermal: bool,
    /// Enable gait analytics.
    #[serde(default)]
    pub enable_gait: bool,
    /// Enable scene analytics.
    #[serde(default)]
    pub enable_scene: bool,
}

/// Ingest mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Parse a structured scenario document.
    Scenario,
    /// Poll a line-delimited file.
    Tail,
    /// Delegate to the external media-modules adapter.
    ModulesMedia,
}

impl Default for IngestMode {
    fn default() -> Self {
        IngestMode::Scenario
    }
}

/// `pipeline.ingest` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Which ingest mode to run.
    #[serde(default)]
    pub mode: IngestMode,
    /// Tail-mode settings.
    #[serde(default)]
    pub tail: TailConfig,
    /// Media-adapter settings.
    #[serde(default)]
    pub media: MediaConfig,
    /// Media-adapter feature toggles.
    #[serde(default)]
    pub modules: ModulesConfig,
}

/// `pipeline.governance` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Domains whose events are dropped entirely.
    #[serde(default)]
    pub block_domains: Vec<String>,
    /// Categories whose events are dropped entirely.
    #[serde(default)]
    pub block_categories: Vec<String>,
    /// Per-domain severity ceiling.
    #[serde(default)]
    pub severity_caps: HashMap<String, Severity>,
    /// Actions that are always dropped before export.
    #[serde(default)]
    pub forbid_actions: Vec<String>,
}

/// `pipeline.human_loop` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HumanLoopConfig {
    /// Require approval for every task unless overridden.
    #[serde(default)]
    pub default_require_approval: bool,
    /// Domains that always require approval.
    #[serde(default)]
    pub domain_require_approval: Vec<String>,
    /// Allow auto-approval when at least one valid approver is present.
    #[serde(default)]
    pub auto_approve: bool,
    /// Allow auto-approval with zero approvers when no roles/min_approvals are required.
    #[serde(default)]
    pub allow_unsigned_auto_approve: bool,
    /// Name recorded as `approved_by` for the unsigned-auto-approve path.
    #[serde(default)]
    pub approver: Option<String>,
}

/// A registered approver: shared secret and roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverRecord {
    /// Approver id.
    pub id: String,
    /// Shared HMAC secret.
    pub secret: String,
    /// Roles held by this approver.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// An approver asserted as active for this run, with the signed token to verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveApprover {
    /// Approver id (looked up in `rbac.approvers`).
    pub id: String,
    /// `base64url_nopad(HMAC-SHA256(secret, message))`.
    pub token: String,
}

/// Required roles + minimum approval count for an action or domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRequirement {
    /// Roles that must be covered by the union of valid approvers.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Minimum number of distinct valid approvers.
    #[serde(default)]
    pub min_approvals: u32,
}

/// `pipeline.rbac` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RbacConfig {
    /// All known approvers (secret + roles).
    #[serde(default)]
    pub approvers: Vec<ApproverRecord>,
    /// Approvers asserted active for this run (CLI-provided ones are appended).
    #[serde(default)]
    pub active_approvers: Vec<ActiveApprover>,
    /// Default minimum approvals when no more specific rule applies.
    #[serde(default)]
    pub min_approvals: u32,
    /// Per-domain role requirements.
    #[serde(default)]
    pub required_roles: HashMap<String, Vec<String>>,
    /// Per-action role/approval requirements.
    #[serde(default)]
    pub action_requirements: HashMap<String, RoleRequirement>,
}

/// `pipeline.guardrails.rate_limits` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimits {
    /// Max approved tasks kept per event.
    #[serde(default)]
    pub per_event: Option<u64>,
    /// Max approved tasks kept per domain.
    #[serde(default)]
    pub per_domain: HashMap<String, u64>,
    /// Max approved tasks kept overall.
    #[serde(default)]
    pub total: Option<u64>,
    /// Max infra tasks kept per exact `asset_id`.
    #[serde(default)]
    pub per_asset_infra: HashMap<String, u64>,
    /// Max infra tasks kept per glob-matched `asset_id` pattern.
    #[serde(default)]
    pub per_asset_infra_patterns: Vec<AssetPattern>,
}

/// A single `asset_id` glob pattern cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPattern {
    /// `*`-wildcard glob pattern matched against `asset_id`.
    pub pattern: String,
    /// Cap for assets matching this pattern.
    pub n: u64,
}

/// A single tenant's risk budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskBudget {
    /// Maximum critical-task count allowed within the window.
    pub max: u64,
    /// Window length in seconds.
    pub window_sec: u64,
}

/// `pipeline.guardrails` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    /// Rate-limit caps.
    #[serde(default)]
    pub rate_limits: RateLimits,
    /// Per-tenant risk budgets.
    #[serde(default)]
    pub risk_budgets: HashMap<String, RiskBudget>,
    /// Base backoff (seconds) used in `hold_until_epoch = now + base * 2^overage`.
    #[serde(default = "default_backoff_base")]
    pub risk_backoff_base_sec: u64,
    /// Path to the risk-store SQLite database.
    #[serde(default = "default_risk_store_path")]
    pub risk_store_path: String,
    /// Ratio of dropped-to-total approved tasks above which a health alert is audited.
    #[serde(default = "default_health_alert_ratio")]
    pub health_alert_drop_ratio: f64,
}

fn default_backoff_base() -> u64 {
    10
}
fn default_risk_store_path() -> String {
    "risk_store.sqlite3".to_string()
}
fn default_health_alert_ratio() -> f64 {
    0.5
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimits::default(),
            risk_budgets: HashMap::new(),
            risk_backoff_base_sec: default_backoff_base(),
            risk_store_path: default_risk_store_path(),
            health_alert_drop_ratio: default_health_alert_ratio(),
        }
    }
}

/// `{category, domain}` match clause for an infrastructure mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraMatch {
    /// Event category to match.
    pub category: String,
    /// Event domain to match.
    pub domain: String,
}

/// A single infrastructure task template within a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraTaskSpec {
    /// Action token (e.g. `lock`, `unlock`, `open`, `close`, `notify`).
    pub action: String,
    /// Target asset id.
    pub asset_id: String,
    /// Infrastructure type label.
    pub infrastructure_type: String,
    /// Domain responsible for executing this task.
    pub assignee_domain: String,
    /// Task-level role override.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Task-level min-approvals override.
    #[serde(default)]
    pub min_approvals: Option<u32>,
}

/// One `infrastructure.mappings` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraMapping {
    /// Match clause.
    #[serde(rename = "match")]
    pub match_: InfraMatch,
    /// Tasks to emit when the match clause is satisfied.
    pub tasks: Vec<InfraTaskSpec>,
}

/// `pipeline.infrastructure` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    /// Category/domain-triggered infra task templates.
    #[serde(default)]
    pub mappings: Vec<InfraMapping>,
    /// Default role/approval requirements keyed by action.
    #[serde(default)]
    pub action_defaults: HashMap<String, RoleRequirement>,
}

/// `export.task_jsonl` / generic rollover-capable file sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonlSinkConfig {
    /// Output file path.
    #[serde(default)]
    pub path: Option<String>,
    /// Rotate (rename aside) once the file would exceed this many bytes. 0 disables rollover.
    #[serde(default)]
    pub rotate_max_bytes: u64,
}

/// Outbound HTTP forwarding settings shared by webhook and infra-HTTP sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpForward {
    /// Target URL.
    pub url: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_sec")]
    pub timeout_seconds: u64,
    /// Additional retry attempts after the first (total attempts = retries + 1).
    #[serde(default)]
    pub retries: u32,
    /// Backoff in seconds, applied linearly (`n * backoff`) between attempts.
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    /// Path to append failed payloads to after exhausting retries.
    #[serde(default)]
    pub dlq_path: Option<String>,
}

fn default_timeout_sec() -> u64 {
    10
}
fn default_backoff_seconds() -> u64 {
    1
}

/// `export.infrastructure` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraSinkConfig {
    /// Output file path.
    #[serde(default)]
    pub path: Option<String>,
    /// Rollover threshold in bytes.
    #[serde(default)]
    pub rotate_max_bytes: u64,
    /// Optional HTTP forwarding of each batch.
    #[serde(default)]
    pub http: Option<HttpForward>,
}

/// `pipeline.export` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Sink tokens to run, in configured order.
    #[serde(default)]
    pub formats: Vec<String>,
    /// `task_jsonl` sink settings.
    #[serde(default)]
    pub task_jsonl: JsonlSinkConfig,
    /// `infrastructure` sink settings.
    #[serde(default)]
    pub infrastructure: InfraSinkConfig,
    /// `webhook` sink settings.
    #[serde(default)]
    pub webhook: Option<HttpForward>,
}

/// Top-level `pipeline` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Ingest settings.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Governance settings.
    #[serde(default)]
    pub governance: GovernanceConfig,
    /// Human-in-the-loop approval policy.
    #[serde(default)]
    pub human_loop: HumanLoopConfig,
    /// RBAC settings.
    #[serde(default)]
    pub rbac: RbacConfig,
    /// Guardrail and risk-budget settings.
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    /// Infrastructure-task mapping settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,
}

/// `audit` top-level section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Path to the audit log (JSONL).
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// Actor name recorded on every entry.
    #[serde(default)]
    pub actor: Option<String>,
    /// HMAC signing secret; when set, every entry carries a `sig`.
    #[serde(default)]
    pub sign_secret: Option<String>,
    /// Verify the existing chain before appending.
    #[serde(default)]
    pub verify_on_start: bool,
    /// Fail if any existing entry lacks a signature.
    #[serde(default)]
    pub require_signing: bool,
}

fn default_audit_path() -> String {
    "audit_log.jsonl".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            actor: None,
            sign_secret: None,
            verify_on_start: false,
            require_signing: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Structured JSON lines (default).
    Json,
    /// Human-readable pretty format.
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Json
    }
}

/// Ambient `logging` section (not a pipeline stage; wired to `warden-telemetry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter`-compatible directive, e.g. `"info"` or `"info,warden_decision=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: LogFormat::default() }
    }
}

/// Full simulation configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Pipeline stage configuration.
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// Audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Path to the declarative rules document (§4.3).
    #[serde(default)]
    pub rules_file: Option<String>,
}

impl SimulationConfig {
    /// Load a config document from `path`, applying an optional policy pack
    /// deep-merged on top (leaf lists are replaced, not concatenated).
    pub fn load(path: &Path, policy_pack: Option<&Path>) -> Result<Self, PipelineError> {
        let base_text = std::fs::read_to_string(path).map_err(|e| PipelineError::ConfigError {
            path: path.display().to_string(),
            message: format!("failed to read config: {e}"),
        })?;
        let mut merged: serde_yaml::Value =
            serde_yaml::from_str(&base_text).map_err(|e| PipelineError::ConfigError {
                path: path.display().to_string(),
                message: format!("invalid YAML: {e}"),
            })?;

        if let Some(pack_path) = policy_pack {
            let pack_text =
                std::fs::read_to_string(pack_path).map_err(|e| PipelineError::ConfigError {
                    path: pack_path.display().to_string(),
                    message: format!("failed to read policy pack: {e}"),
                })?;
            let pack: serde_yaml::Value =
                serde_yaml::from_str(&pack_text).map_err(|e| PipelineError::ConfigError {
                    path: pack_path.display().to_string(),
                    message: format!("invalid YAML: {e}"),
                })?;
            merged = deep_merge(merged, pack);
        }

        serde_yaml::from_value(merged).map_err(|e| PipelineError::ConfigError {
            path: path.display().to_string(),
            message: format!("config does not match schema: {e}"),
        })
    }

    /// Canonical SHA-256 hash of this config, recorded in the `run_start` audit entry.
    #[must_use]
    pub fn canonical_hash(&self) -> String {
        // Route through serde_json for a stable canonical form (serde_yaml::Value
        // has no deterministic key ordering of its own).
        let v = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        crate::canonical::sha256_of_canonical(&v).unwrap_or_default()
    }
}

/// Deep-merge `pack` onto `base`: object keys merge recursively; any
/// non-object leaf (including arrays) in `pack` replaces the corresponding
/// value in `base` wholesale.
#[must_use]
pub fn deep_merge(base: serde_yaml::Value, pack: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, pack) {
        (Value::Mapping(mut base_map), Value::Mapping(pack_map)) => {
            for (k, pack_v) in pack_map {
                let merged = match base_map.remove(&k) {
                    Some(base_v) => deep_merge(base_v, pack_v),
                    None => pack_v,
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, pack_other) => pack_other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_replaces_leaf_lists() {
        let base: serde_yaml::Value = serde_yaml::from_str(
            "governance:\n  block_domains: [a, b]\n  forbid_actions: [x]\n",
        )
        .unwrap();
        let pack: serde_yaml::Value =
            serde_yaml::from_str("governance:\n  block_domains: [c]\n").unwrap();
        let merged = deep_merge(base, pack);
        let cfg: serde_yaml::Value = merged;
        let gov = cfg.get("governance").unwrap();
        assert_eq!(gov.get("block_domains").unwrap().as_sequence().unwrap().len(), 1);
        assert_eq!(gov.get("forbid_actions").unwrap().as_sequence().unwrap().len(), 1);
    }

    #[test]
    fn deep_merge_recurses_into_nested_objects() {
        let base: serde_yaml::Value =
            serde_yaml::from_str("a:\n  b: 1\n  c: 2\n").unwrap();
        let pack: serde_yaml::Value = serde_yaml::from_str("a:\n  b: 99\n").unwrap();
        let merged = deep_merge(base, pack);
        assert_eq!(merged.get("a").unwrap().get("b").unwrap().as_i64(), Some(99));
        assert_eq!(merged.get("a").unwrap().get("c").unwrap().as_i64(), Some(2));
    }

    #[test]
    fn default_config_parses_from_empty_document() {
        let cfg: SimulationConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.audit.path, "audit_log.jsonl");
    }
}
