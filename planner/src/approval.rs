//! Approval workflow: `pending → approved | rejected | changes_requested`.
//! The first response is terminal; repeats are rejected.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::PlanError;
use crate::model::Plan;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    Plan,
    Step,
    StepGroup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    RequestChanges,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub action: ApprovalAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub plan_id: String,
    pub scope: ApprovalScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_numbers: Option<Vec<u32>>,
    pub summary: String,
    pub risks: Vec<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ApprovalResponse>,
}

/// In-memory approval registry, one per workspace.
#[derive(Default)]
pub struct ApprovalService {
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request with an auto-generated summary and risk roll-up.
    pub fn request(&self, plan: &Plan, step_numbers: Option<Vec<u32>>) -> ApprovalRequest {
        let scope = match step_numbers.as_deref() {
            None => ApprovalScope::Plan,
            Some([_]) => ApprovalScope::Step,
            Some(_) => ApprovalScope::StepGroup,
        };
        let summary = match &step_numbers {
            None => format!(
                "Approve plan \"{}\" ({} steps, {} files affected)",
                plan.goal,
                plan.steps.len(),
                plan.affected_files().len()
            ),
            Some(nums) => {
                let titles: Vec<&str> = plan
                    .steps
                    .iter()
                    .filter(|s| nums.contains(&s.step_number))
                    .map(|s| s.title.as_str())
                    .collect();
                format!("Approve steps {nums:?}: {}", titles.join("; "))
            }
        };

        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            scope,
            step_numbers,
            summary,
            risks: plan.risks.clone(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            response: None,
        };
        self.requests
            .lock()
            .expect("approval lock")
            .insert(request.id.clone(), request.clone());
        info!(request_id = %request.id, plan_id = %request.plan_id, ?request.scope, "approval requested");
        request
    }

    /// Resolve a pending request. A second response is a conflict.
    pub fn respond(
        &self,
        request_id: &str,
        action: ApprovalAction,
        comments: Option<String>,
        actor: &str,
    ) -> Result<ApprovalRequest, PlanError> {
        let mut requests = self.requests.lock().expect("approval lock");
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| PlanError::ApprovalNotFound(request_id.to_string()))?;
        if request.status != ApprovalStatus::Pending {
            return Err(PlanError::ApprovalConflict(request_id.to_string()));
        }

        request.status = match action {
            ApprovalAction::Approve => ApprovalStatus::Approved,
            ApprovalAction::Reject => ApprovalStatus::Rejected,
            ApprovalAction::RequestChanges => ApprovalStatus::ChangesRequested,
        };
        request.response = Some(ApprovalResponse {
            action,
            comments,
            actor: actor.to_string(),
            timestamp: Utc::now(),
        });
        info!(request_id, ?request.status, "approval resolved");
        Ok(request.clone())
    }

    pub fn get(&self, request_id: &str) -> Result<ApprovalRequest, PlanError> {
        self.requests
            .lock()
            .expect("approval lock")
            .get(request_id)
            .cloned()
            .ok_or_else(|| PlanError::ApprovalNotFound(request_id.to_string()))
    }

    /// Whether a plan-scope approval exists for automatic execution.
    pub fn plan_approved(&self, plan_id: &str) -> bool {
        self.requests
            .lock()
            .expect("approval lock")
            .values()
            .any(|r| {
                r.plan_id == plan_id
                    && r.scope == ApprovalScope::Plan
                    && r.status == ApprovalStatus::Approved
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        let mut p = Plan::new("p1".into(), "do things".into());
        p.risks = vec!["touches auth".into()];
        p
    }

    #[test]
    fn first_response_is_terminal() {
        let svc = ApprovalService::new();
        let req = svc.request(&plan(), None);
        assert_eq!(req.scope, ApprovalScope::Plan);
        assert_eq!(req.status, ApprovalStatus::Pending);

        let resolved = svc
            .respond(&req.id, ApprovalAction::Approve, None, "reviewer")
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(svc.plan_approved("p1"));

        assert!(matches!(
            svc.respond(&req.id, ApprovalAction::Reject, None, "reviewer"),
            Err(PlanError::ApprovalConflict(_))
        ));
    }

    #[test]
    fn scope_follows_step_numbers() {
        let svc = ApprovalService::new();
        assert_eq!(
            svc.request(&plan(), Some(vec![1])).scope,
            ApprovalScope::Step
        );
        assert_eq!(
            svc.request(&plan(), Some(vec![1, 2])).scope,
            ApprovalScope::StepGroup
        );
    }

    #[test]
    fn rejection_does_not_approve_plan() {
        let svc = ApprovalService::new();
        let req = svc.request(&plan(), None);
        svc.respond(&req.id, ApprovalAction::Reject, Some("nope".into()), "lead")
            .unwrap();
        assert!(!svc.plan_approved("p1"));
    }
}
