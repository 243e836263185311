//! Task recommendation generation and approval-state assignment.

use crate::rbac::{self, ValidApprovers};
use std::collections::HashSet;
use warden_core::config::{HumanLoopConfig, InfrastructureConfig, RbacConfig};
use warden_core::ids::next_monotonic_id;
use warden_core::types::{Event, TaskRecommendation, TaskStatus};

/// Counts reported in the `decision_done` audit entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecisionCounts {
    /// Tasks auto-approved.
    pub approved: u64,
    /// Tasks left `pending_approval`.
    pub pending: u64,
    /// Infrastructure-derived tasks generated (regardless of approval outcome).
    pub generated_infra: u64,
}

/// Everything Decision produces from a batch of `open` events.
#[derive(Debug, Default)]
pub struct DecisionOutcome {
    /// All emitted tasks, base and infrastructure-derived.
    pub tasks: Vec<TaskRecommendation>,
    /// Summary counts.
    pub counts: DecisionCounts,
}

fn priority_for(rank: u8) -> u8 {
    5u8.saturating_sub(rank).max(1)
}

fn confidence_for(rank: u8) -> f64 {
    (0.5 + 0.1 * f64::from(rank)).clamp(0.0, 1.0)
}

fn assignee_for(event: &Event) -> String {
    if event.domain == "multi" {
        "land".to_string()
    } else {
        event.domain.clone()
    }
}

/// Required roles and minimum approval count applicable to one task.
struct Requirement {
    roles: HashSet<String>,
    min_approvals: u32,
}

fn requirement_for(
    rbac: &RbacConfig,
    assignee_domain: &str,
    action: &str,
    task_roles: &[String],
    task_min_approvals: Option<u32>,
) -> Requirement {
    let mut roles: HashSet<String> = HashSet::new();
    if let Some(domain_roles) = rbac.required_roles.get(assignee_domain) {
        roles.extend(domain_roles.iter().cloned());
    }
    let mut min_approvals = rbac.min_approvals;
    if let Some(action_req) = rbac.action_requirements.get(action) {
        roles.extend(action_req.required_roles.iter().cloned());
        min_approvals = min_approvals.max(action_req.min_approvals);
    }
    roles.extend(task_roles.iter().cloned());
    if let Some(task_min) = task_min_approvals {
        min_approvals = min_approvals.max(task_min);
    }
    Requirement { roles, min_approvals }
}

/// Apply the approval gate to a freshly-built task (status/approved_by are
/// filled in place).
fn gate_approval(
    task: &mut TaskRecommendation,
    action: &str,
    task_roles: &[String],
    task_min_approvals: Option<u32>,
    human_loop: &HumanLoopConfig,
    rbac: &RbacConfig,
) {
    task.requires_approval =
        human_loop.domain_require_approval.iter().any(|d| d == &task.assignee_domain)
            || human_loop.default_require_approval;

    if !task.requires_approval {
        task.status = TaskStatus::Approved;
        task.approved_by = None;
        return;
    }

    let requirement = requirement_for(rbac, &task.assignee_domain, action, task_roles, task_min_approvals);
    let message = rbac::signing_message(&task.event_id, &task.assignee_domain, action, &task.tenant);
    let valid: ValidApprovers = rbac::verify_active_approvers(rbac, &message);

    let roles_satisfied = requirement.roles.iter().all(|r| valid.roles.contains(r));
    let count_satisfied = valid.count() as u32 >= requirement.min_approvals;
    let presence_satisfied = human_loop.auto_approve || valid.count() > 0;

    if count_satisfied && roles_satisfied && presence_satisfied {
        task.status = TaskStatus::Approved;
        task.approved_by = Some(valid.ids.join(","));
        return;
    }

    if requirement.min_approvals == 0 && human_loop.allow_unsigned_auto_approve && requirement.roles.is_empty() {
        task.status = TaskStatus::Approved;
        task.approved_by = human_loop.approver.clone();
        return;
    }

    task.status = TaskStatus::PendingApproval;
    task.approved_by = None;
}

/// Generate base and infrastructure-derived tasks for every `open` event and
/// evaluate their approval state.
#[must_use]
pub fn decide(
    events: &[Event],
    human_loop: &HumanLoopConfig,
    rbac: &RbacConfig,
    infrastructure: &InfrastructureConfig,
) -> DecisionOutcome {
    let mut outcome = DecisionOutcome::default();

    for event in events {
        let rank = event.severity.rank();
        let priority = priority_for(rank);
        let confidence = confidence_for(rank);
        let tenant = event.tenant.clone().unwrap_or_else(|| "default".to_string());
        let assignee_domain = assignee_for(event);
        let source_severity_critical = event.severity == warden_core::types::Severity::Critical;

        let mut base = TaskRecommendation {
            id: format!("task_{}", next_monotonic_id()),
            event_id: event.id.clone(),
            action: "investigate".to_string(),
            assignee_domain,
            priority,
            rationale: format!(
                "{} (severity={}, domain={})",
                event.summary,
                event.severity.as_str(),
                event.domain
            ),
            confidence,
            infrastructure_type: None,
            asset_id: None,
            requires_approval: false,
            status: TaskStatus::PendingApproval,
            approved_by: None,
            tenant: tenant.clone(),
            hold_reason: None,
            hold_until_epoch: None,
            source_severity_critical,
        };
        gate_approval(&mut base, "investigate", &[], None, human_loop, rbac);
        tally(&mut outcome.counts, &base);
        outcome.tasks.push(base);

        for mapping in &infrastructure.mappings {
            if mapping.match_.category != event.category || mapping.match_.domain != event.domain {
                continue;
            }
            for spec in &mapping.tasks {
                let mut task = TaskRecommendation {
                    id: format!("task_{}", next_monotonic_id()),
                    event_id: event.id.clone(),
                    action: spec.action.clone(),
                    assignee_domain: spec.assignee_domain.clone(),
                    priority,
                    rationale: format!(
                        "infrastructure task '{}' for {} ({})",
                        spec.action, event.category, event.domain
                    ),
                    confidence,
                    infrastructure_type: Some(spec.infrastructure_type.clone()),
                    asset_id: Some(spec.asset_id.clone()),
                    requires_approval: false,
                    status: TaskStatus::PendingApproval,
                    approved_by: None,
                    tenant: tenant.clone(),
                    hold_reason: None,
                    hold_until_epoch: None,
                    source_severity_critical,
                };
                gate_approval(
                    &mut task,
                    &spec.action,
                    &spec.required_roles,
                    spec.min_approvals,
                    human_loop,
                    rbac,
                );
                outcome.counts.generated_infra += 1;
                tally(&mut outcome.counts, &task);
                outcome.tasks.push(task);
            }
        }
    }

    outcome
}

fn tally(counts: &mut DecisionCounts, task: &TaskRecommendation) {
    match task.status {
        TaskStatus::Approved => counts.approved += 1,
        TaskStatus::PendingApproval => counts.pending += 1,
        TaskStatus::RiskHold => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::config::{ApproverRecord, RoleRequirement};
    use warden_core::types::{EventStatus, Severity, TimeWindow};

    fn event(domain: &str, severity: Severity) -> Event {
        Event {
            id: "ev1".to_string(),
            category: "c".to_string(),
            severity,
            status: EventStatus::Open,
            domain: domain.to_string(),
            summary: "summary".to_string(),
            time_window: TimeWindow { start_ms: 0, end_ms: 0 },
            entities: vec![],
            sources: vec![],
            tags: vec![],
            evidence: vec![],
            tenant: None,
        }
    }

    #[test]
    fn priority_and_confidence_follow_severity_rank() {
        let outcome = decide(
            &[event("air", Severity::Critical)],
            &HumanLoopConfig::default(),
            &RbacConfig::default(),
            &InfrastructureConfig::default(),
        );
        assert_eq!(outcome.tasks[0].priority, 1);
        assert!((outcome.tasks[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn no_approval_required_auto_approves() {
        let outcome = decide(
            &[event("air", Severity::Info)],
            &HumanLoopConfig::default(),
            &RbacConfig::default(),
            &InfrastructureConfig::default(),
        );
        assert_eq!(outcome.tasks[0].status, TaskStatus::Approved);
        assert_eq!(outcome.counts.approved, 1);
    }

    #[test]
    fn requires_approval_without_valid_approver_is_pending() {
        let human_loop = HumanLoopConfig { default_require_approval: true, ..Default::default() };
        let outcome =
            decide(&[event("air", Severity::Info)], &human_loop, &RbacConfig::default(), &InfrastructureConfig::default());
        assert_eq!(outcome.tasks[0].status, TaskStatus::PendingApproval);
        assert_eq!(outcome.counts.pending, 1);
    }

    #[test]
    fn valid_signed_approver_satisfies_gate() {
        let human_loop =
            HumanLoopConfig { default_require_approval: true, auto_approve: true, ..Default::default() };
        let event_v = event("air", Severity::Info);
        let message = rbac::signing_message(&event_v.id, "air", "investigate", "default");
        let mut rbac_cfg = RbacConfig {
            approvers: vec![ApproverRecord { id: "alice".to_string(), secret: "s".to_string(), roles: vec![] }],
            ..Default::default()
        };
        let token = {
            use base64::engine::general_purpose::URL_SAFE_NO_PAD;
            use base64::Engine as _;
            use hmac::{Hmac, Mac};
            use sha2::Sha256;
            let mut mac = Hmac::<Sha256>::new_from_slice(b"s").unwrap();
            mac.update(message.as_bytes());
            URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
        };
        rbac_cfg.active_approvers =
            vec![warden_core::config::ActiveApprover { id: "alice".to_string(), token }];

        let outcome = decide(&[event_v], &human_loop, &rbac_cfg, &InfrastructureConfig::default());
        assert_eq!(outcome.tasks[0].status, TaskStatus::Approved);
        assert_eq!(outcome.tasks[0].approved_by.as_deref(), Some("alice"));
    }

    #[test]
    fn unsigned_auto_approve_when_allowed_and_no_roles_required() {
        let human_loop = HumanLoopConfig {
            default_require_approval: true,
            allow_unsigned_auto_approve: true,
            approver: Some("ops-default".to_string()),
            ..Default::default()
        };
        let outcome =
            decide(&[event("air", Severity::Info)], &human_loop, &RbacConfig::default(), &InfrastructureConfig::default());
        assert_eq!(outcome.tasks[0].status, TaskStatus::Approved);
        assert_eq!(outcome.tasks[0].approved_by.as_deref(), Some("ops-default"));
    }

    #[test]
    fn role_requirement_blocks_unsigned_auto_approve() {
        let human_loop = HumanLoopConfig {
            default_require_approval: true,
            allow_unsigned_auto_approve: true,
            ..Default::default()
        };
        let mut required_roles = std::collections::HashMap::new();
        required_roles.insert("air".to_string(), vec!["supervisor".to_string()]);
        let rbac_cfg = RbacConfig { required_roles, ..Default::default() };
        let outcome = decide(&[event("air", Severity::Info)], &human_loop, &rbac_cfg, &InfrastructureConfig::default());
        assert_eq!(outcome.tasks[0].status, TaskStatus::PendingApproval);
    }

    #[test]
    fn action_requirements_are_respected() {
        let mut action_requirements = std::collections::HashMap::new();
        action_requirements
            .insert("investigate".to_string(), RoleRequirement { required_roles: vec![], min_approvals: 2 });
        let human_loop =
            HumanLoopConfig { default_require_approval: true, auto_approve: true, ..Default::default() };
        let rbac_cfg = RbacConfig { action_requirements, ..Default::default() };
        let outcome = decide(&[event("air", Severity::Info)], &human_loop, &rbac_cfg, &InfrastructureConfig::default());
        assert_eq!(outcome.tasks[0].status, TaskStatus::PendingApproval);
    }
}
