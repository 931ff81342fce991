//! Multi-step document approval.
//!
//! A request moves `pending -> approved | rejected | cancelled`. Every
//! transition is a conditional write on the request document that also
//! appends one hash-chained [`AuditEntry`].

mod audit;
mod service;
mod transition;

pub use audit::{verify_chain, AuditEntry};
pub use service::ApprovalWorkflow;
pub use transition::{cancel, decide, Transition};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::authz::Role;
use crate::errors::{AppError, AppResult};
use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// Whether a transition `self -> next` is allowed by the state machine.
    pub fn can_become(&self, next: ApprovalStatus) -> bool {
        // pending -> pending is a step advance.
        matches!((self, next), (ApprovalStatus::Pending, _))
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "cancelled" => Ok(ApprovalStatus::Cancelled),
            other => Err(AppError::bad_request(format!("unknown status `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStep {
    pub approver_role: Role,
    /// Assigns the step to one specific person instead of a role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ApprovalStep {
    pub fn for_role(role: Role) -> Self {
        Self {
            approver_role: role,
            approver_id: None,
            decision: None,
            decided_by: None,
            decided_at: None,
            comment: None,
        }
    }

    pub fn assigned_to(role: Role, approver_id: impl Into<String>) -> Self {
        Self {
            approver_id: Some(approver_id.into()),
            ..Self::for_role(role)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub document_type: String,
    pub document_id: String,
    pub status: ApprovalStatus,
    pub current_step_index: usize,
    pub steps: Vec<ApprovalStep>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub branch_code: String,
    #[serde(default)]
    pub province_id: Option<String>,
    /// Number of committed transitions; also the last audit sequence.
    #[serde(default)]
    pub revision: u64,
    /// Role the current step waits on; null once terminal.
    #[serde(default)]
    pub assigned_approver_role: Option<Role>,
    /// Hash of the newest audit entry.
    #[serde(default)]
    pub audit_head: Option<String>,
}

impl ApprovalRequest {
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step_index + 1 >= self.steps.len()
    }

    pub fn from_document(doc: serde_json::Value) -> AppResult<Self> {
        Ok(serde_json::from_value(doc)?)
    }
}

impl Loggable for ApprovalRequest {
    fn entity_type() -> &'static str {
        "approval"
    }

    fn subject_id(&self) -> String {
        self.id.clone()
    }

    fn severity(&self) -> Severity {
        if self.status.is_terminal() {
            Severity::Critical
        } else {
            Severity::Important
        }
    }
}

/// Input of [`ApprovalWorkflow::create`].
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewApproval {
    pub document_type: String,
    pub document_id: String,
    pub steps: Vec<ApprovalStep>,
    /// Defaults to the creator's home branch.
    #[serde(default)]
    pub branch_code: Option<String>,
}

impl NewApproval {
    pub fn new(document_type: impl Into<String>, document_id: impl Into<String>, steps: Vec<ApprovalStep>) -> Self {
        Self {
            document_type: document_type.into(),
            document_id: document_id.into(),
            steps,
            branch_code: None,
        }
    }

    pub fn at_branch(mut self, branch_code: impl Into<String>) -> Self {
        self.branch_code = Some(branch_code.into());
        self
    }

    /// Reject malformed chains before anything is written.
    pub fn validate(&self) -> AppResult<()> {
        if self.document_type.trim().is_empty() {
            return Err(AppError::invalid_workflow("documentType must not be empty"));
        }
        if self.document_id.trim().is_empty() {
            return Err(AppError::invalid_workflow("documentId must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(AppError::invalid_workflow("an approval chain needs at least one step"));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.decision.is_some() || step.decided_by.is_some() || step.decided_at.is_some() {
                return Err(AppError::invalid_workflow(format!("step {index} is already decided")));
            }
            if step.approver_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
                return Err(AppError::invalid_workflow(format!("step {index} has a blank approverId")));
            }
        }

        if matches!(&self.branch_code, Some(code) if code.trim().is_empty()) {
            return Err(AppError::invalid_workflow("branchCode must not be blank"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for status in [ApprovalStatus::Approved, ApprovalStatus::Rejected, ApprovalStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.can_become(ApprovalStatus::Pending));
            assert!(!status.can_become(ApprovalStatus::Cancelled));
        }
        assert!(ApprovalStatus::Pending.can_become(ApprovalStatus::Approved));
    }

    #[test]
    fn malformed_chains_are_rejected() {
        let empty = NewApproval::new("expense", "EXP-001", vec![]);
        assert!(matches!(empty.validate(), Err(AppError::InvalidWorkflow(_))));

        let blank_doc = NewApproval::new("expense", " ", vec![ApprovalStep::for_role(Role::BranchManager)]);
        assert!(matches!(blank_doc.validate(), Err(AppError::InvalidWorkflow(_))));

        let mut decided = ApprovalStep::for_role(Role::BranchManager);
        decided.decision = Some(Decision::Approve);
        let predecided = NewApproval::new("expense", "EXP-001", vec![decided]);
        assert!(matches!(predecided.validate(), Err(AppError::InvalidWorkflow(_))));

        let blank_approver = NewApproval::new("expense", "EXP-001", vec![ApprovalStep::assigned_to(Role::Accountant, "")]);
        assert!(matches!(blank_approver.validate(), Err(AppError::InvalidWorkflow(_))));

        let ok = NewApproval::new("expense", "EXP-001", vec![ApprovalStep::for_role(Role::BranchManager)]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn request_document_shape_is_camel_case() {
        let step = serde_json::to_value(ApprovalStep::assigned_to(Role::Accountant, "acc-1")).unwrap();
        assert_eq!(step, serde_json::json!({"approverRole": "ACCOUNTANT", "approverId": "acc-1"}));
        assert_eq!("Cancelled".parse::<ApprovalStatus>().unwrap(), ApprovalStatus::Cancelled);
    }
}
