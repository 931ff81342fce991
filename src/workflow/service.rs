use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::transition::{self, Transition};
use super::{audit, ApprovalRequest, ApprovalStatus, AuditEntry, Decision, NewApproval};
use crate::authz::{CurrentUser, Permission, PermissionResolver, PolicyEvaluator, ResourceContext, APPROVE_PERMISSION};
use crate::errors::{AppError, AppResult};
use crate::events::{publish_activity, EventBus};
use crate::notifications::{ApproverDirectory, NotificationDispatcher, NotificationKind, NotificationPayload};
use crate::store::{
    collections, ConditionalWrite, DocumentStore, NewDocument, Precondition, Query, SortDirection, WriteOutcome,
};

/// Approval state machine over the document store.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<PermissionResolver>,
    notifier: NotificationDispatcher,
    directory: Arc<dyn ApproverDirectory>,
    events: EventBus,
}

impl ApprovalWorkflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<PermissionResolver>,
        notifier: NotificationDispatcher,
        directory: Arc<dyn ApproverDirectory>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            resolver,
            notifier,
            directory,
            events,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub async fn create(&self, input: NewApproval, creator: &CurrentUser) -> AppResult<ApprovalRequest> {
        input.validate()?;

        let branch_code = input
            .branch_code
            .clone()
            .unwrap_or_else(|| creator.home_branch.clone());
        let ctx = ResourceContext::new().with_branch(branch_code.as_str());
        if !self.resolver.can(creator, Permission::DocumentCreate, &ctx) {
            return Err(AppError::forbidden(format!(
                "{} cannot submit documents for branch {branch_code}",
                creator.id
            )));
        }

        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            province_id: self
                .resolver
                .scope()
                .directory()
                .province_for_branch(&branch_code)
                .cloned(),
            document_type: input.document_type,
            document_id: input.document_id,
            status: ApprovalStatus::Pending,
            current_step_index: 0,
            assigned_approver_role: input.steps.first().map(|step| step.approver_role),
            steps: input.steps,
            created_by: creator.id.clone(),
            created_at: now,
            updated_at: now,
            branch_code,
            revision: 0,
            audit_head: None,
        };

        self.claim_document_slot(&request).await?;

        tracing::info!(
            request_id = %request.id,
            document_type = %request.document_type,
            document_id = %request.document_id,
            created_by = %creator.id,
            branch_code = %request.branch_code,
            steps = request.steps.len(),
            "approval request created"
        );

        let recipients = self.current_approvers(&request).await;
        self.notifier
            .notify(&recipients, &payload_for(&request, NotificationKind::ApprovalRequired))
            .await;
        publish_activity(&self.events, "created", Some(creator.id.as_str()), &request, None);

        Ok(request)
    }

    pub async fn decide(
        &self,
        request_id: &str,
        actor: &CurrentUser,
        decision: Decision,
        comment: Option<String>,
    ) -> AppResult<ApprovalRequest> {
        let request = self.get(request_id).await?;
        if request.status.is_terminal() {
            return Err(AppError::stale(request_id));
        }

        let step = request
            .current_step()
            .ok_or_else(|| AppError::internal(format!("request {request_id} has no current step")))?;

        let ctx = ResourceContext::new().with_branch(request.branch_code.as_str());
        if !self.resolver.can(actor, APPROVE_PERMISSION, &ctx) {
            return Err(AppError::forbidden(format!(
                "{} cannot approve documents for branch {}",
                actor.id, request.branch_code
            )));
        }

        let matches_step = match step.approver_id.as_deref() {
            Some(approver_id) => approver_id == actor.id,
            None => self.resolver.registry().is_at_least(actor.role, step.approver_role),
        };
        if !matches_step {
            tracing::debug!(
                user_id = %actor.id,
                role = %actor.role,
                required_role = %step.approver_role,
                request_id = %request_id,
                "permission denied: not the approver of the current step"
            );
            return Err(AppError::forbidden(format!(
                "step {} of request {request_id} is not assigned to {}",
                request.current_step_index, actor.id
            )));
        }

        let transition = transition::decide(&request, &actor.id, decision, comment, Utc::now())?;
        let updated = self.commit(&request, transition).await?;

        let action = match updated.status {
            ApprovalStatus::Pending => "advanced",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
        };
        tracing::info!(
            request_id = %updated.id,
            actor_id = %actor.id,
            status = %updated.status,
            step_index = updated.current_step_index,
            "approval decision recorded"
        );

        if updated.status.is_terminal() {
            let kind = match updated.status {
                ApprovalStatus::Rejected => NotificationKind::ApprovalRejected,
                _ => NotificationKind::ApprovalApproved,
            };
            let recipients = BTreeSet::from([updated.created_by.clone()]);
            self.notifier.notify(&recipients, &payload_for(&updated, kind)).await;
        } else {
            let recipients = self.current_approvers(&updated).await;
            self.notifier
                .notify(&recipients, &payload_for(&updated, NotificationKind::ApprovalRequired))
                .await;
        }
        publish_activity(&self.events, action, Some(actor.id.as_str()), &updated, Some(&request));

        Ok(updated)
    }

    /// Allowed for the creator, or for a role outranking every approver role
    /// of the chain that also has the branch in scope.
    pub async fn cancel(
        &self,
        request_id: &str,
        actor: &CurrentUser,
        comment: Option<String>,
    ) -> AppResult<ApprovalRequest> {
        let request = self.get(request_id).await?;
        if request.status.is_terminal() {
            return Err(AppError::stale(request_id));
        }

        let is_creator = request.created_by == actor.id;
        let registry = self.resolver.registry();
        let outranks_chain = request
            .steps
            .iter()
            .all(|step| registry.outranks(actor.role, step.approver_role));
        let in_scope = self.resolver.scope().can_access_branch(actor, &request.branch_code);

        if !is_creator && !(outranks_chain && in_scope) {
            tracing::debug!(
                user_id = %actor.id,
                role = %actor.role,
                request_id = %request_id,
                outranks_chain,
                in_scope,
                "permission denied: cannot cancel"
            );
            return Err(AppError::forbidden(format!("{} cannot cancel request {request_id}", actor.id)));
        }

        let transition = transition::cancel(&request, &actor.id, comment, Utc::now())?;
        let updated = self.commit(&request, transition).await?;

        tracing::info!(request_id = %updated.id, actor_id = %actor.id, "approval request cancelled");

        let recipients = if is_creator {
            self.current_approvers(&request).await
        } else {
            BTreeSet::from([updated.created_by.clone()])
        };
        self.notifier
            .notify(&recipients, &payload_for(&updated, NotificationKind::ApprovalCancelled))
            .await;
        publish_activity(&self.events, "cancelled", Some(actor.id.as_str()), &updated, Some(&request));

        Ok(updated)
    }

    /// Store a new request while taking the document's pending slot.
    ///
    /// The slot and the request commit together, so two creators racing on
    /// the same document cannot both succeed. A slot whose holder is no
    /// longer pending is taken over.
    async fn claim_document_slot(&self, request: &ApprovalRequest) -> AppResult<()> {
        let slot_id = format!("{}:{}", request.document_type, request.document_id);
        let slot = match self.store.get(collections::PENDING_APPROVALS, &slot_id).await? {
            Some(slot) => slot,
            None => {
                let empty = serde_json::json!({
                    "documentType": request.document_type,
                    "documentId": request.document_id,
                });
                match self.store.insert(collections::PENDING_APPROVALS, &slot_id, empty.clone()).await {
                    Ok(()) | Err(AppError::Conflict(_)) => {}
                    Err(err) => return Err(err),
                }
                self.store
                    .get(collections::PENDING_APPROVALS, &slot_id)
                    .await?
                    .unwrap_or(empty)
            }
        };

        let conflict = |holder: &str| {
            AppError::conflict(format!(
                "{} {} already has a pending request ({holder})",
                request.document_type, request.document_id
            ))
        };

        let precondition = match slot.get("requestId").and_then(Value::as_str) {
            Some(holder) => {
                let held = self.store.get(collections::APPROVAL_REQUESTS, holder).await?;
                let still_pending = held
                    .as_ref()
                    .and_then(|doc| doc.get("status"))
                    .and_then(Value::as_str)
                    == Some(ApprovalStatus::Pending.as_str());
                if still_pending {
                    return Err(conflict(holder));
                }
                Precondition::none().field_equals("requestId", holder)
            }
            None => Precondition::none().field_missing("requestId"),
        };

        let write = ConditionalWrite::new(collections::PENDING_APPROVALS, &slot_id)
            .precondition(precondition)
            .set("requestId", request.id.as_str())
            .set("claimedAt", serde_json::to_value(request.created_at)?)
            .append(NewDocument::new(
                collections::APPROVAL_REQUESTS,
                &request.id,
                serde_json::to_value(request)?,
            ));

        match self.store.transactional_update(write).await? {
            WriteOutcome::Committed(_) => Ok(()),
            WriteOutcome::PreconditionFailed => {
                tracing::info!(
                    document_type = %request.document_type,
                    document_id = %request.document_id,
                    "pending slot taken by a concurrent create"
                );
                Err(conflict("submitted concurrently"))
            }
            WriteOutcome::NotFound => Err(AppError::internal(format!("pending slot {slot_id} vanished"))),
        }
    }

    /// Conditional write keyed on the state the transition was computed from.
    async fn commit(&self, before: &ApprovalRequest, transition: Transition) -> AppResult<ApprovalRequest> {
        let Transition { request: next, audit } = transition;

        let precondition = Precondition::none()
            .field_equals("status", before.status.as_str())
            .field_equals("currentStepIndex", before.current_step_index)
            .field_equals("revision", before.revision);

        let mut write = ConditionalWrite::new(collections::APPROVAL_REQUESTS, &before.id)
            .precondition(precondition)
            .append(NewDocument::new(
                collections::AUDIT_TRAIL,
                &audit.id,
                serde_json::to_value(&audit)?,
            ));
        if let Value::Object(fields) = serde_json::to_value(&next)? {
            for (field, value) in fields {
                // the province may have been backfilled since the read
                if field == "provinceId" && value.is_null() {
                    continue;
                }
                write = write.set(field, value);
            }
        }

        match self.store.transactional_update(write).await? {
            WriteOutcome::Committed(doc) => ApprovalRequest::from_document(doc),
            WriteOutcome::PreconditionFailed => {
                tracing::info!(
                    request_id = %before.id,
                    expected_step = before.current_step_index,
                    expected_revision = before.revision,
                    "transition lost the race"
                );
                Err(AppError::stale(&before.id))
            }
            WriteOutcome::NotFound => Err(AppError::not_found(format!("approval request {}", before.id))),
        }
    }

    /// Who should hear about the current step. Lookup failures only cost the
    /// notification.
    async fn current_approvers(&self, request: &ApprovalRequest) -> BTreeSet<String> {
        let Some(step) = request.current_step() else {
            return BTreeSet::new();
        };
        if let Some(approver_id) = &step.approver_id {
            return BTreeSet::from([approver_id.clone()]);
        }

        match self.directory.approvers_for(step.approver_role, &request.branch_code).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(request_id = %request.id, error = %err, "approver lookup failed");
                BTreeSet::new()
            }
        }
    }

    pub async fn get(&self, request_id: &str) -> AppResult<ApprovalRequest> {
        let doc = self
            .store
            .get(collections::APPROVAL_REQUESTS, request_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("approval request {request_id}")))?;
        ApprovalRequest::from_document(doc)
    }

    /// [`get`](Self::get) for callers that must hold `DOCUMENT_VIEW` on the branch.
    pub async fn view(&self, request_id: &str, user: &CurrentUser) -> AppResult<ApprovalRequest> {
        let request = self.get(request_id).await?;
        let ctx = ResourceContext::new().with_branch(request.branch_code.as_str());
        if !self.resolver.can(user, Permission::DocumentView, &ctx) {
            return Err(AppError::forbidden(format!("{} cannot view request {request_id}", user.id)));
        }
        Ok(request)
    }

    pub async fn find_pending_for_document(
        &self,
        document_type: &str,
        document_id: &str,
    ) -> AppResult<Option<ApprovalRequest>> {
        let query = Query::collection(collections::APPROVAL_REQUESTS)
            .where_eq("documentType", document_type)
            .where_eq("documentId", document_id)
            .where_eq("status", ApprovalStatus::Pending.as_str())
            .limit(1);

        self.store
            .query(&query)
            .await?
            .into_iter()
            .next()
            .map(ApprovalRequest::from_document)
            .transpose()
    }

    /// Newest first.
    pub async fn list_by_status(&self, status: ApprovalStatus, limit: usize) -> AppResult<Vec<ApprovalRequest>> {
        let query = Query::collection(collections::APPROVAL_REQUESTS)
            .where_eq("status", status.as_str())
            .order_by("createdAt", SortDirection::Desc)
            .limit(limit);
        self.load(&query).await
    }

    /// Newest first, limited to requests the user may view. The branch scope
    /// is part of the query so out-of-scope requests never use up the limit.
    pub async fn list_visible(
        &self,
        status: ApprovalStatus,
        user: &CurrentUser,
        limit: usize,
    ) -> AppResult<Vec<ApprovalRequest>> {
        if !self.resolver.registry().has_permission(user.role, Permission::DocumentView) {
            return Ok(Vec::new());
        }
        let branches: Vec<Value> = self
            .resolver
            .scope()
            .accessible_branches(user)
            .into_iter()
            .map(Value::String)
            .collect();
        if branches.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::collection(collections::APPROVAL_REQUESTS)
            .where_eq("status", status.as_str())
            .where_in("branchCode", branches)
            .order_by("createdAt", SortDirection::Desc)
            .limit(limit);
        self.load(&query).await
    }

    /// Pending requests waiting on the user's role, inside the user's scope.
    pub async fn list_assigned(&self, user: &CurrentUser) -> AppResult<Vec<ApprovalRequest>> {
        let query = Query::collection(collections::APPROVAL_REQUESTS)
            .where_eq("assignedApproverRole", user.role.as_str())
            .where_eq("status", ApprovalStatus::Pending.as_str())
            .order_by("createdAt", SortDirection::Asc);
        let docs = self.store.query(&query).await?;

        self.resolver
            .scope()
            .filter_by_scope(user, &docs, "branchCode")
            .into_iter()
            .cloned()
            .map(ApprovalRequest::from_document)
            .collect()
    }

    /// Audit entries of a request in commit order.
    pub async fn audit_trail(&self, request_id: &str) -> AppResult<Vec<AuditEntry>> {
        let query = Query::collection(collections::AUDIT_TRAIL)
            .where_eq("requestId", request_id)
            .order_by("sequence", SortDirection::Asc);

        self.store
            .query(&query)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(AppError::from))
            .collect()
    }

    /// The trail is intact and ends at the hash the request points to.
    pub async fn verify_audit_chain(&self, request_id: &str) -> AppResult<bool> {
        let request = self.get(request_id).await?;
        let entries = self.audit_trail(request_id).await?;

        let head_matches = entries.last().map(|entry| entry.hash.as_str()) == request.audit_head.as_deref();
        let count_matches = entries.len() as u64 == request.revision;
        Ok(head_matches && count_matches && audit::verify_chain(&entries))
    }

    async fn load(&self, query: &Query) -> AppResult<Vec<ApprovalRequest>> {
        self.store
            .query(query)
            .await?
            .into_iter()
            .map(ApprovalRequest::from_document)
            .collect()
    }
}

fn payload_for(request: &ApprovalRequest, kind: NotificationKind) -> NotificationPayload {
    let subject = format!("{} {}", request.document_type, request.document_id);
    let (title, description) = match kind {
        NotificationKind::ApprovalRequired => (
            "Approval required".to_string(),
            format!("{subject} is waiting for your approval (step {})", request.current_step_index + 1),
        ),
        NotificationKind::ApprovalApproved => ("Request approved".to_string(), format!("{subject} was approved")),
        NotificationKind::ApprovalRejected => {
            let reason = request
                .steps
                .get(request.current_step_index)
                .and_then(|step| step.comment.as_deref())
                .map(|comment| format!(": {comment}"))
                .unwrap_or_default();
            ("Request rejected".to_string(), format!("{subject} was rejected{reason}"))
        }
        NotificationKind::ApprovalCancelled => ("Request cancelled".to_string(), format!("{subject} was cancelled")),
    };

    NotificationPayload::new(kind, title, description).with_link(format!("/approvals/{}", request.id))
}
