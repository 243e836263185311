//! Stateless governance filters applied at two points: after Rules (domain
//! and category blocking, severity caps) and before Export (forbidden-action
//! drop). Mirrors the teacher workspace's deterministic, fail-closed policy
//! engine in spirit, generalized from allow/deny/modify to drop-and-count.

use warden_core::config::GovernanceConfig;
use warden_core::types::{Event, TaskRecommendation};

/// Counts produced by a single governance pass, for audit payloads.
#[derive(Debug, Clone, Default)]
pub struct GovernanceCounts {
    /// Events dropped for a blocked domain or category.
    pub blocked: u64,
    /// Events whose severity was lowered by a cap.
    pub capped: u64,
}

/// Apply the post-Rules / pre-Decision filter: drop blocked domains/categories,
/// lower severity to any configured cap (never raise).
pub fn pre_decision(cfg: &GovernanceConfig, events: Vec<Event>) -> (Vec<Event>, GovernanceCounts) {
    let mut counts = GovernanceCounts::default();
    let mut kept = Vec::with_capacity(events.len());

    for mut event in events {
        if cfg.block_domains.iter().any(|d| d == &event.domain)
            || cfg.block_categories.iter().any(|c| c == &event.category)
        {
            counts.blocked += 1;
            continue;
        }
        if let Some(cap) = cfg.severity_caps.get(&event.domain) {
            if *cap < event.severity {
                event.severity = *cap;
                counts.capped += 1;
            }
        }
        kept.push(event);
    }

    (kept, counts)
}

/// A single `governance_forbid` audit fact.
#[derive(Debug, Clone)]
pub struct ForbidDrop {
    /// Id of the dropped task.
    pub task_id: String,
    /// The forbidden action that triggered the drop.
    pub action: String,
}

/// Apply the pre-Export filter: drop any task whose action is forbidden.
pub fn post_decision(
    cfg: &GovernanceConfig,
    tasks: Vec<TaskRecommendation>,
) -> (Vec<TaskRecommendation>, Vec<ForbidDrop>) {
    let mut kept = Vec::with_capacity(tasks.len());
    let mut drops = Vec::new();

    for task in tasks {
        if cfg.forbid_actions.iter().any(|a| a == &task.action) {
            drops.push(ForbidDrop { task_id: task.id.clone(), action: task.action.clone() });
            continue;
        }
        kept.push(task);
    }

    (kept, drops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_core::types::{EventStatus, Severity, TimeWindow};

    fn event(domain: &str, category: &str, severity: Severity) -> Event {
        Event {
            id: format!("ev_{domain}_{category}"),
            category: category.to_string(),
            severity,
            status: EventStatus::Open,
            domain: domain.to_string(),
            summary: "s".to_string(),
            time_window: TimeWindow { start_ms: 0, end_ms: 0 },
            entities: vec![],
            sources: vec![],
            tags: vec![],
            evidence: vec![],
            tenant: None,
        }
    }

    #[test]
    fn blocks_domains_and_categories() {
        let cfg = GovernanceConfig {
            block_domains: vec!["cyber".to_string()],
            block_categories: vec!["spam".to_string()],
            severity_caps: HashMap::new(),
            forbid_actions: vec![],
        };
        let events = vec![event("cyber", "x", Severity::Info), event("air", "spam", Severity::Info), event("air", "ok", Severity::Info)];
        let (kept, counts) = pre_decision(&cfg, events);
        assert_eq!(kept.len(), 1);
        assert_eq!(counts.blocked, 2);
    }

    #[test]
    fn caps_severity_but_never_raises() {
        let mut caps = HashMap::new();
        caps.insert("air".to_string(), Severity::Notice);
        let cfg = GovernanceConfig {
            block_domains: vec![],
            block_categories: vec![],
            severity_caps: caps,
            forbid_actions: vec![],
        };
        let events = vec![event("air", "x", Severity::Critical), event("air", "y", Severity::Info)];
        let (kept, counts) = pre_decision(&cfg, events);
        assert_eq!(kept[0].severity, Severity::Notice);
        assert_eq!(kept[1].severity, Severity::Info);
        assert_eq!(counts.capped, 1);
    }
}
