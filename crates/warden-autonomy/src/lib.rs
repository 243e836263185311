//! Clusters approved tasks by assignee domain into an execution plan.

#![deny(unsafe_code)]

use serde::Serialize;
use std::collections::BTreeMap;
use warden_core::types::TaskRecommendation;

/// One task's entry within a domain's plan list.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    /// Task id.
    pub id: String,
    /// Source event id.
    pub event_id: String,
    /// Task priority.
    pub priority: u8,
}

/// `{domain -> ordered plan entries}`.
pub type Plan = BTreeMap<String, Vec<PlanEntry>>;

/// Group approved tasks by `assignee_domain`, ordering each group by
/// `priority` ascending then task `id`.
#[must_use]
pub fn plan(tasks: &[TaskRecommendation]) -> Plan {
    let mut grouped: Plan = BTreeMap::new();
    for task in tasks {
        grouped.entry(task.assignee_domain.clone()).or_default().push(PlanEntry {
            id: task.id.clone(),
            event_id: task.event_id.clone(),
            priority: task.priority,
        });
    }
    for entries in grouped.values_mut() {
        entries.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::types::TaskStatus;

    fn task(id: &str, domain: &str, priority: u8) -> TaskRecommendation {
        TaskRecommendation {
            id: id.to_string(),
            event_id: "ev1".to_string(),
            action: "investigate".to_string(),
            assignee_domain: domain.to_string(),
            priority,
            rationale: "r".to_string(),
            confidence: 0.5,
            infrastructure_type: None,
            asset_id: None,
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
    fn orders_by_priority_then_id() {
        let tasks = vec![task("t2", "air", 2), task("t1", "air", 1), task("t3", "air", 1)];
        let grouped = plan(&tasks);
        let air = &grouped["air"];
        assert_eq!(air.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["t1", "t3", "t2"]);
    }

    #[test]
    fn separates_by_domain() {
        let tasks = vec![task("t1", "air", 1), task("t2", "land", 1)];
        let grouped = plan(&tasks);
        assert_eq!(grouped.len(), 2);
    }
}
