//! Rate limits and risk-budget throttling over approved tasks.
//!
//! Caps are applied in the fixed order the spec defines: per-event, then
//! per-domain, then total, then per-asset-infra (exact and glob). Each
//! breach is reported as a named drop for the `guardrail_drop` audit entry;
//! risk-budget rollbacks are reported separately for `risk_hold` entries.

#![deny(unsafe_code)]

use regex::Regex;
use std::collections::HashMap;
use warden_core::config::{GuardrailsConfig, RateLimits};
use warden_core::types::{TaskRecommendation, TaskStatus};
use warden_core::PipelineError;
use warden_risk_store::RiskStore;

/// One rate-limit-cap breach, as reported to `guardrail_drop`.
#[derive(Debug, Clone)]
pub struct GuardrailDrop {
    /// Which rule dropped tasks: `per_event`, `per_domain`, `total`, or `per_asset_infra`.
    pub rule: String,
    /// Number of tasks dropped by this rule.
    pub dropped_count: u64,
}

/// Outcome of a full guardrails pass.
#[derive(Debug, Default)]
pub struct GuardrailsOutcome {
    /// Tasks that survived rate limiting and risk budgeting, still `approved`.
    pub tasks: Vec<TaskRecommendation>,
    /// Tasks rolled back to `risk_hold` by the risk budget step.
    pub risk_held_tasks: Vec<TaskRecommendation>,
    /// Rate-limit cap breaches.
    pub drops: Vec<GuardrailDrop>,
    /// Set when total dropped / total input exceeds `health_alert_drop_ratio`.
    pub health_alert: bool,
}

fn keep_first_n_per_key<K: std::hash::Hash + Eq>(
    tasks: Vec<TaskRecommendation>,
    cap: impl Fn(&K) -> Option<u64>,
    key_of: impl Fn(&TaskRecommendation) -> Option<K>,
) -> (Vec<TaskRecommendation>, u64) {
    let mut seen: HashMap<K, u64> = HashMap::new();
    let mut kept = Vec::with_capacity(tasks.len());
    let mut dropped = 0u64;

    for task in tasks {
        let Some(key) = key_of(&task) else {
            kept.push(task);
            continue;
        };
        let Some(limit) = cap(&key) else {
            kept.push(task);
            continue;
        };
        let count = seen.entry(key).or_insert(0);
        if *count < limit {
            *count += 1;
            kept.push(task);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    for part in pattern.split('*') {
        out.push_str(&regex::escape(part));
        out.push_str(".*");
    }
    // trailing ".*" added once too many; strip it back off.
    out.truncate(out.len() - 2);
    out.push('$');
    Regex::new(&out).ok()
}

/// Apply the four rate-limit caps in spec order, returning survivors and the
/// per-rule drop summary.
#[must_use]
pub fn apply_rate_limits(tasks: Vec<TaskRecommendation>, limits: &RateLimits) -> (Vec<TaskRecommendation>, Vec<GuardrailDrop>) {
    let mut drops = Vec::new();

    let (tasks, dropped) =
        keep_first_n_per_key(tasks, |_| limits.per_event, |t| Some(t.event_id.clone()));
    if dropped > 0 {
        drops.push(GuardrailDrop { rule: "per_event".to_string(), dropped_count: dropped });
    }

    let per_domain = limits.per_domain.clone();
    let (tasks, dropped) = keep_first_n_per_key(
        tasks,
        |k: &String| per_domain.get(k).copied(),
        |t| Some(t.assignee_domain.clone()),
    );
    if dropped > 0 {
        drops.push(GuardrailDrop { rule: "per_domain".to_string(), dropped_count: dropped });
    }

    let total_cap = limits.total;
    let (tasks, dropped) =
        keep_first_n_per_key(tasks, |_: &()| total_cap, |_| Some(()));
    if dropped > 0 {
        drops.push(GuardrailDrop { rule: "total".to_string(), dropped_count: dropped });
    }

    let exact = limits.per_asset_infra.clone();
    let patterns: Vec<(Regex, u64)> = limits
        .per_asset_infra_patterns
        .iter()
        .filter_map(|p| glob_to_regex(&p.pattern).map(|re| (re, p.n)))
        .collect();
    let (tasks, dropped) = keep_first_n_per_key(
        tasks,
        |asset_id: &String| {
            exact.get(asset_id).copied().or_else(|| {
                patterns.iter().find(|(re, _)| re.is_match(asset_id)).map(|(_, n)| *n)
            })
        },
        |t| t.asset_id.clone(),
    );
    if dropped > 0 {
        drops.push(GuardrailDrop { rule: "per_asset_infra".to_string(), dropped_count: dropped });
    }

    (tasks, drops)
}

/// Apply the risk-budget step: increment the `(tenant, "critical")` counter
/// for every task whose source event was `critical`; roll back to
/// `risk_hold` on breach.
pub fn apply_risk_budgets(
    tasks: Vec<TaskRecommendation>,
    cfg: &GuardrailsConfig,
    store: &RiskStore,
    now_epoch: u64,
) -> Result<(Vec<TaskRecommendation>, Vec<TaskRecommendation>), PipelineError> {
    let mut kept = Vec::with_capacity(tasks.len());
    let mut held = Vec::new();

    for mut task in tasks {
        if !task.source_severity_critical {
            kept.push(task);
            continue;
        }
        let Some(budget) = cfg.risk_budgets.get(&task.tenant) else {
            kept.push(task);
            continue;
        };
        let counter = store.increment(&task.tenant, "critical", now_epoch, budget.window_sec)?;
        if counter.count > budget.max {
            let overage = counter.count - budget.max;
            task.status = TaskStatus::RiskHold;
            task.hold_reason = Some("risk_budget_exceeded".to_string());
            task.hold_until_epoch =
                Some(now_epoch + cfg.risk_backoff_base_sec * 2u64.saturating_pow(overage.min(32) as u32));
            held.push(task);
        } else {
            kept.push(task);
        }
    }

    Ok((kept, held))
}

/// Run the full guardrails pipeline: rate limits then risk budgets, with the
/// health-alert ratio computed over rate-limit drops.
pub fn apply(
    tasks: Vec<TaskRecommendation>,
    cfg: &GuardrailsConfig,
    store: &RiskStore,
    now_epoch: u64,
) -> Result<GuardrailsOutcome, PipelineError> {
    let input_count = tasks.len() as f64;
    let (rate_limited, drops) = apply_rate_limits(tasks, &cfg.rate_limits);
    let total_dropped: u64 = drops.iter().map(|d| d.dropped_count).sum();
    let health_alert =
        input_count > 0.0 && (total_dropped as f64 / input_count) > cfg.health_alert_drop_ratio;

    let (kept, risk_held_tasks) = apply_risk_budgets(rate_limited, cfg, store, now_epoch)?;

    Ok(GuardrailsOutcome { tasks: kept, risk_held_tasks, drops, health_alert })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::config::AssetPattern;

    fn task(id: &str, event_id: &str, domain: &str, asset_id: Option<&str>, critical: bool, tenant: &str) -> TaskRecommendation {
        TaskRecommendation {
            id: id.to_string(),
            event_id: event_id.to_string(),
            action: "investigate".to_string(),
            assignee_domain: domain.to_string(),
            priority: 1,
            rationale: "r".to_string(),
            confidence: 0.5,
            infrastructure_type: None,
            asset_id: asset_id.map(str::to_string),
            requires_approval: false,
            status: TaskStatus::Approved,
            approved_by: None,
            tenant: tenant.to_string(),
            hold_reason: None,
            hold_until_epoch: None,
            source_severity_critical: critical,
        }
    }

    #[test]
    fn per_event_cap_keeps_first_n() {
        let tasks = vec![task("t1", "ev1", "air", None, false, "default"), task("t2", "ev1", "air", None, false, "default")];
        let limits = RateLimits { per_event: Some(1), ..Default::default() };
        let (kept, drops) = apply_rate_limits(tasks, &limits);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "t1");
        assert_eq!(drops[0].dropped_count, 1);
    }

    #[test]
    fn per_domain_cap_applies_after_per_event() {
        let tasks = vec![task("t1", "e1", "air", None, false, "default"), task("t2", "e2", "air", None, false, "default")];
        let mut per_domain = HashMap::new();
        per_domain.insert("air".to_string(), 1);
        let limits = RateLimits { per_domain, ..Default::default() };
        let (kept, drops) = apply_rate_limits(tasks, &limits);
        assert_eq!(kept.len(), 1);
        assert_eq!(drops[0].rule, "per_domain");
    }

    #[test]
    fn glob_pattern_caps_asset_group() {
        let tasks = vec![
            task("t1", "e1", "air", Some("door-1"), false, "default"),
            task("t2", "e2", "air", Some("door-2"), false, "default"),
        ];
        let limits = RateLimits {
            per_asset_infra_patterns: vec![AssetPattern { pattern: "door-*".to_string(), n: 1 }],
            ..Default::default()
        };
        let (kept, drops) = apply_rate_limits(tasks, &limits);
        assert_eq!(kept.len(), 1);
        assert_eq!(drops[0].rule, "per_asset_infra");
    }

    #[test]
    fn risk_budget_holds_tasks_beyond_max() {
        let store = RiskStore::open_in_memory().unwrap();
        let mut risk_budgets = HashMap::new();
        risk_budgets.insert("default".to_string(), warden_core::config::RiskBudget { max: 1, window_sec: 60 });
        let cfg = GuardrailsConfig { risk_budgets, risk_backoff_base_sec: 10, ..Default::default() };
        let tasks = vec![
            task("t1", "e1", "air", None, true, "default"),
            task("t2", "e2", "air", None, true, "default"),
        ];
        let (kept, held) = apply_risk_budgets(tasks, &cfg, &store, 1_000).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].status, TaskStatus::RiskHold);
        assert_eq!(held[0].hold_reason.as_deref(), Some("risk_budget_exceeded"));
        assert_eq!(held[0].hold_until_epoch, Some(1_000 + 10 * 2u64.pow(1)));
    }
}
