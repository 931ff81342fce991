use chrono::{DateTime, Utc};

use super::{ApprovalRequest, ApprovalStatus, AuditEntry, Decision};
use crate::errors::{AppError, AppResult};

/// The result of applying one action to a request: its next state and the
/// audit entry that has to be committed with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub request: ApprovalRequest,
    pub audit: AuditEntry,
}

/// Apply an approver's decision to the current step.
///
/// A rejection at any step ends the request; an approval either advances to
/// the next step or, on the last step, approves the request.
pub fn decide(
    request: &ApprovalRequest,
    actor_id: &str,
    decision: Decision,
    comment: Option<String>,
    at: DateTime<Utc>,
) -> AppResult<Transition> {
    if request.status.is_terminal() {
        return Err(AppError::stale(&request.id));
    }

    let mut next = request.clone();
    let step_index = request.current_step_index;
    let step = next
        .steps
        .get_mut(step_index)
        .ok_or_else(|| AppError::internal(format!("request {} has no step {step_index}", request.id)))?;
    step.decision = Some(decision);
    step.decided_by = Some(actor_id.to_string());
    step.decided_at = Some(at);
    step.comment = comment.clone();

    next.status = match decision {
        Decision::Reject => ApprovalStatus::Rejected,
        Decision::Approve if request.is_last_step() => ApprovalStatus::Approved,
        Decision::Approve => {
            next.current_step_index += 1;
            ApprovalStatus::Pending
        }
    };

    Ok(finish(request, next, actor_id, Some(decision), comment, at))
}

pub fn cancel(
    request: &ApprovalRequest,
    actor_id: &str,
    comment: Option<String>,
    at: DateTime<Utc>,
) -> AppResult<Transition> {
    if request.status.is_terminal() {
        return Err(AppError::stale(&request.id));
    }

    let mut next = request.clone();
    next.status = ApprovalStatus::Cancelled;
    Ok(finish(request, next, actor_id, None, comment, at))
}

fn finish(
    before: &ApprovalRequest,
    mut next: ApprovalRequest,
    actor_id: &str,
    decision: Option<Decision>,
    comment: Option<String>,
    at: DateTime<Utc>,
) -> Transition {
    next.revision = before.revision + 1;
    next.updated_at = at;
    next.assigned_approver_role = if next.status.is_terminal() {
        None
    } else {
        next.current_step().map(|step| step.approver_role)
    };

    let audit = AuditEntry {
        id: AuditEntry::entry_id(&before.id, next.revision),
        request_id: before.id.clone(),
        sequence: next.revision,
        actor_id: actor_id.to_string(),
        from_status: before.status,
        to_status: next.status,
        step_index: before.current_step_index,
        decision,
        timestamp: at,
        comment,
        prev_hash: before.audit_head.clone(),
        hash: String::new(),
    }
    .seal();

    next.audit_head = Some(audit.hash.clone());
    Transition { request: next, audit }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use crate::workflow::{verify_chain, ApprovalStep};

    fn request(steps: Vec<ApprovalStep>) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: "req-1".into(),
            document_type: "expense".into(),
            document_id: "EXP-001".into(),
            status: ApprovalStatus::Pending,
            current_step_index: 0,
            assigned_approver_role: steps.first().map(|s| s.approver_role),
            steps,
            created_by: "userX".into(),
            created_at: now,
            updated_at: now,
            branch_code: "0452".into(),
            province_id: Some("nakhon-ratchasima".into()),
            revision: 0,
            audit_head: None,
        }
    }

    #[test]
    fn approvals_walk_the_chain() {
        let start = request(vec![
            ApprovalStep::for_role(Role::BranchManager),
            ApprovalStep::for_role(Role::Accountant),
        ]);

        let first = decide(&start, "bm", Decision::Approve, None, Utc::now()).unwrap();
        assert_eq!(first.request.status, ApprovalStatus::Pending);
        assert_eq!(first.request.current_step_index, 1);
        assert_eq!(first.request.assigned_approver_role, Some(Role::Accountant));
        assert_eq!(first.request.steps[0].decided_by.as_deref(), Some("bm"));

        let second = decide(&first.request, "acc", Decision::Approve, None, Utc::now()).unwrap();
        assert_eq!(second.request.status, ApprovalStatus::Approved);
        assert_eq!(second.request.assigned_approver_role, None);
        assert_eq!(second.request.revision, 2);

        assert!(verify_chain(&[first.audit, second.audit]));
    }

    #[test]
    fn reject_fails_fast_and_keeps_comment() {
        let start = request(vec![
            ApprovalStep::for_role(Role::BranchManager),
            ApprovalStep::for_role(Role::Accountant),
        ]);
        let t = decide(&start, "bm", Decision::Reject, Some("missing receipt".into()), Utc::now()).unwrap();
        assert_eq!(t.request.status, ApprovalStatus::Rejected);
        assert_eq!(t.request.current_step_index, 0);
        assert_eq!(t.audit.comment.as_deref(), Some("missing receipt"));
        assert_eq!(t.audit.to_status, ApprovalStatus::Rejected);
    }

    #[test]
    fn terminal_requests_are_stale() {
        let start = request(vec![ApprovalStep::for_role(Role::BranchManager)]);
        let done = decide(&start, "bm", Decision::Approve, None, Utc::now()).unwrap().request;

        assert!(matches!(
            decide(&done, "bm", Decision::Reject, None, Utc::now()),
            Err(AppError::StaleRequest(_))
        ));
        assert!(matches!(cancel(&done, "userX", None, Utc::now()), Err(AppError::StaleRequest(_))));
    }

    #[test]
    fn cancel_clears_assignment() {
        let start = request(vec![ApprovalStep::for_role(Role::BranchManager)]);
        let t = cancel(&start, "userX", None, Utc::now()).unwrap();
        assert_eq!(t.request.status, ApprovalStatus::Cancelled);
        assert_eq!(t.request.assigned_approver_role, None);
        assert_eq!(t.audit.decision, None);
    }
}
