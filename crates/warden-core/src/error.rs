//! Top-level error taxonomy shared by every stage.
//!
//! Fatal variants (`ConfigError`, `AuditTampered`, `AuditUnsigned`, `StoreError`)
//! abort the run; the orchestrator writes a final `run_failed` audit entry and
//! maps them to CLI exit codes. Recoverable variants (`ExportSinkError`,
//! `ExternalServiceError`) are audited and counted but never abort the run.

use thiserror::Error;

/// Unified pipeline error.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed config, unknown enum value, or duplicate id.
    #[error("config error at {path}: {message}")]
    ConfigError {
        /// Offending config key/path.
        path: String,
        /// Human-readable explanation.
        message: String,
    },

    /// Malformed scenario or tail input.
    #[error("input format error: {0}")]
    InputFormat(String),

    /// Audit chain hash mismatch detected during start-of-run verification.
    #[error("audit tampered at line {line}: {message}")]
    AuditTampered {
        /// 1-indexed line number of the first mismatch.
        line: usize,
        /// Human-readable explanation.
        message: String,
    },

    /// `require_signing` is set but an entry has no `sig`.
    #[error("audit entry at line {line} is unsigned but signing is required")]
    AuditUnsigned {
        /// 1-indexed line number of the unsigned entry.
        line: usize,
    },

    /// A single export sink failed; other sinks still run.
    #[error("export sink '{sink}' failed: {message}")]
    ExportSinkError {
        /// Sink token (e.g. "webhook", "task_jsonl").
        sink: String,
        /// Human-readable explanation.
        message: String,
    },

    /// A webhook/HTTP-infra call failed after exhausting retries.
    #[error("external service '{target}' failed: {message}")]
    ExternalServiceError {
        /// Target name/url.
        target: String,
        /// Human-readable explanation.
        message: String,
    },

    /// The risk store is unavailable (fails the run).
    #[error("risk store error: {0}")]
    StoreError(String),

    /// Wrapped I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Map to the CLI exit code this error category should produce.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::ConfigError { .. } | PipelineError::InputFormat(_) => 2,
            PipelineError::AuditTampered { .. } | PipelineError::AuditUnsigned { .. } => 3,
            PipelineError::StoreError(_) | PipelineError::Io(_) => 4,
            PipelineError::ExportSinkError { .. } | PipelineError::ExternalServiceError { .. } => 1,
        }
    }

    /// Short category tag used in the single-line diagnostic printed on failure.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::ConfigError { .. } => "ConfigError",
            PipelineError::InputFormat(_) => "InputFormat",
            PipelineError::AuditTampered { .. } => "AuditTampered",
            PipelineError::AuditUnsigned { .. } => "AuditUnsigned",
            PipelineError::ExportSinkError { .. } => "ExportSinkError",
            PipelineError::ExternalServiceError { .. } => "ExternalServiceError",
            PipelineError::StoreError(_) => "StoreError",
            PipelineError::Io(_) => "Io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(
            PipelineError::ConfigError { path: "x".into(), message: "y".into() }.exit_code(),
            2
        );
        assert_eq!(PipelineError::AuditTampered { line: 1, message: "x".into() }.exit_code(), 3);
        assert_eq!(PipelineError::StoreError("x".into()).exit_code(), 4);
    }
}
