use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use faultdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use faultdesk_core::chain::ReviewDecision;
use faultdesk_core::domain::action::{Action, ActionId, ActionPriority, ActionStatus};
use faultdesk_core::domain::approval::{Approval, ApprovalStage};
use faultdesk_core::errors::ApplicationError;
use faultdesk_core::notify::{EmailRequest, Notification};
use faultdesk_core::routing::policy::RouteScope;
use faultdesk_core::routing::{
    OpenRouteProbe, ResolvedAssignee, RoutingInput, RoutingResolver,
};

use crate::chain_runner::ChainRunner;
use crate::ownership::OwnershipTransferManager;
use crate::WorkflowContext;

/// Inbound payload of `submit_routing`.
#[derive(Clone, Debug)]
pub struct RoutingRequest {
    pub team_label: String,
    pub issue_type: String,
    pub row: BTreeMap<String, String>,
    pub row_key: String,
    pub source_file_id: String,
    pub priority: ActionPriority,
    pub remark: Option<String>,
}

/// Inbound payload of `update_action_status`. The explicit `decision`
/// supersedes remark sniffing; when absent on a review action, the legacy
/// (status, remarks) translation applies at this edge.
#[derive(Clone, Debug)]
pub struct StatusUpdate {
    pub status: ActionStatus,
    pub decision: Option<ReviewDecision>,
    pub remarks: Option<String>,
}

/// Membership probe answered from the action store itself.
struct KnownOpenRoute(bool);

impl OpenRouteProbe for KnownOpenRoute {
    fn has_open_vendor_route(&self, _site: &str, _role: &str, _vendor: &str) -> bool {
        self.0
    }
}

/// CRUD and lifecycle of the Action store. The primary mutation always
/// commits (or fails) first; chain, ownership and delivery side effects
/// are isolated afterwards and can only be logged, never undo it.
pub struct ActionStore {
    ctx: Arc<WorkflowContext>,
    chain: Arc<ChainRunner>,
    ownership: Arc<OwnershipTransferManager>,
}

impl ActionStore {
    pub fn new(
        ctx: Arc<WorkflowContext>,
        chain: Arc<ChainRunner>,
        ownership: Arc<OwnershipTransferManager>,
    ) -> Self {
        Self { ctx, chain, ownership }
    }

    pub async fn create(
        &self,
        request: RoutingRequest,
        actor: &str,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        require_field("team_label", &request.team_label)?;
        require_field("issue_type", &request.issue_type)?;
        require_field("row_key", &request.row_key)?;
        require_field("source_file_id", &request.source_file_id)?;
        require_field("actor", actor)?;

        let resolved = self.resolve_assignee(&request, actor).await?;

        let actor_role = self
            .ctx
            .directory
            .find_user(actor)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            .map(|u| u.role)
            .unwrap_or_else(|| "controller".to_string());

        let now = Utc::now();
        let action = Action {
            id: ActionId(Uuid::new_v4().to_string()),
            row_snapshot: request.row.clone(),
            row_key: request.row_key.clone(),
            routing_team: request.team_label.clone(),
            issue_type: request.issue_type.clone(),
            site_code: resolved.site_code.clone(),
            assigned_to_user_id: resolved.user_id.clone(),
            assigned_to_role: resolved.role.clone(),
            assigned_to_division: resolved.division.clone(),
            assigned_to_vendor: resolved.vendor.clone(),
            assigned_by_user_id: actor.to_string(),
            assigned_by_role: actor_role,
            source_file_id: request.source_file_id.clone(),
            status: ActionStatus::Pending,
            priority: request.priority.clone(),
            remarks: request.remark.iter().cloned().collect(),
            photo_refs: Vec::new(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        self.ctx
            .actions
            .insert(action.clone())
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(action.id.clone()),
                action.site_code.clone(),
                correlation_id,
                "routing.action_created",
                AuditCategory::Routing,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("assignee", resolved.user_id.clone())
            .with_metadata("basis", format!("{:?}", resolved.basis)),
        );

        // Everything below is a secondary effect of the committed insert.
        if let Err(error) = self.ownership.on_first_routing(&action, correlation_id).await {
            self.log_secondary("ownership_pair", &action, &error, correlation_id);
        }

        self.dispatch_assignment_notice(&action, correlation_id).await;

        Ok(action)
    }

    pub async fn update_status(
        &self,
        action_id: &ActionId,
        actor: &str,
        update: StatusUpdate,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        let action = self.load(action_id).await?;
        self.authorize_transition(&action, actor).await?;

        let mut updated = action.clone();
        updated.transition_to(update.status.clone())?;
        if let Some(remarks) = &update.remarks {
            updated.append_remark(remarks.clone());
        }
        updated.state_version = action.state_version + 1;
        updated.updated_at = Utc::now();

        let matched = self
            .ctx
            .actions
            .update(updated.clone(), action.state_version)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        if !matched {
            return Err(ApplicationError::Conflict {
                entity: "action",
                key: action_id.0.clone(),
            });
        }

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(updated.id.clone()),
                updated.site_code.clone(),
                correlation_id,
                "lifecycle.status_updated",
                AuditCategory::Lifecycle,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("from", action.status.as_str())
            .with_metadata("to", updated.status.as_str()),
        );

        let remarks = update.remarks.clone().unwrap_or_default();
        if let Err(error) = self
            .chain
            .handle_transition(&updated, update.decision, &remarks, actor, correlation_id)
            .await
        {
            self.log_secondary("chain_advance", &updated, &error, correlation_id);
        }

        Ok(updated)
    }

    pub async fn reroute(
        &self,
        action_id: &ActionId,
        actor: &str,
        target_user_id: &str,
        target_role: &str,
        remarks: Option<String>,
        photos: Vec<String>,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        require_field("target_user_id", target_user_id)?;
        require_field("target_role", target_role)?;

        let action = self.load(action_id).await?;
        if action.status.is_terminal() {
            return Err(ApplicationError::Domain(
                faultdesk_core::errors::DomainError::InvalidActionTransition {
                    from: action.status.clone(),
                    to: ActionStatus::Pending,
                },
            ));
        }

        let target = self
            .ctx
            .directory
            .find_user(target_user_id)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            .ok_or(ApplicationError::NotFound {
                entity: "user",
                key: target_user_id.to_string(),
            })?;
        if !target.is_eligible() {
            return Err(ApplicationError::Validation {
                field: "target_user_id (user is inactive or unapproved)".to_string(),
            });
        }

        let previous_owner = action.assigned_to_user_id.clone();
        let mut updated = action.clone();
        updated.assigned_to_user_id = target.user_id.clone();
        updated.assigned_to_role = target_role.to_string();
        updated.assigned_to_vendor = target.vendor.clone();
        updated.assigned_to_division = target.divisions.first().cloned();
        updated.assigned_by_user_id = actor.to_string();
        updated.status = ActionStatus::Pending;
        if let Some(remarks) = &remarks {
            updated.append_remark(remarks.clone());
        }
        updated.append_photos(photos);
        updated.state_version = action.state_version + 1;
        updated.updated_at = Utc::now();

        let matched = self
            .ctx
            .actions
            .update(updated.clone(), action.state_version)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        if !matched {
            return Err(ApplicationError::Conflict {
                entity: "action",
                key: action_id.0.clone(),
            });
        }

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(updated.id.clone()),
                updated.site_code.clone(),
                correlation_id,
                "lifecycle.action_rerouted",
                AuditCategory::Ownership,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("from_user", previous_owner.clone())
            .with_metadata("to_user", target.user_id.clone()),
        );

        if let Err(error) =
            self.ownership.on_reroute(&updated, &previous_owner, correlation_id).await
        {
            self.log_secondary("ownership_transfer", &updated, &error, correlation_id);
        }

        self.dispatch_assignment_notice(&updated, correlation_id).await;

        Ok(updated)
    }

    pub async fn delete(
        &self,
        action_id: &ActionId,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let action = self.load(action_id).await?;
        if action.assigned_to_user_id != actor {
            return Err(ApplicationError::Authorization {
                actor: actor.to_string(),
                detail: "only the current assignee may delete an action".to_string(),
            });
        }

        // Hard delete; the Approval record deliberately survives as the
        // audit trail of any review this action carried.
        self.ctx
            .actions
            .delete(action_id)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(action_id.clone()),
                action.site_code.clone(),
                correlation_id,
                "lifecycle.action_deleted",
                AuditCategory::Lifecycle,
                actor,
                AuditOutcome::Success,
            ),
        );

        Ok(())
    }

    pub async fn list_my_actions(
        &self,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Action>, ApplicationError> {
        self.ctx
            .actions
            .list_for_user(user_id, include_completed)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))
    }

    /// Holders of the role-wide final role see the whole sign-off queue,
    /// not only reviews nominally assigned to them.
    pub async fn list_my_approvals(
        &self,
        user_id: &str,
        role: Option<&str>,
        pending_only: bool,
    ) -> Result<Vec<Approval>, ApplicationError> {
        if role.is_some_and(|r| {
            r.eq_ignore_ascii_case(&self.ctx.policy.final_sign_off_role)
        }) {
            return self
                .ctx
                .approvals
                .list_for_stage(ApprovalStage::FinalSignOff, pending_only)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()));
        }

        self.ctx
            .approvals
            .list_for_assignee(user_id, pending_only)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))
    }

    async fn load(&self, action_id: &ActionId) -> Result<Action, ApplicationError> {
        self.ctx
            .actions
            .find_by_id(action_id)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            .ok_or(ApplicationError::NotFound { entity: "action", key: action_id.0.clone() })
    }

    /// Owner-restricted, except on role-wide actions where any active,
    /// approved holder of the role may act.
    async fn authorize_transition(
        &self,
        action: &Action,
        actor: &str,
    ) -> Result<(), ApplicationError> {
        if action.assigned_to_user_id == actor {
            return Ok(());
        }

        if self.ctx.policy.scope_of_role(&action.assigned_to_role)
            == Some(RouteScope::RoleWide)
        {
            let holder = self
                .ctx
                .directory
                .find_user(actor)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
            if holder.is_some_and(|u| {
                u.is_eligible()
                    && u.role.eq_ignore_ascii_case(&action.assigned_to_role)
            }) {
                return Ok(());
            }
        }

        Err(ApplicationError::Authorization {
            actor: actor.to_string(),
            detail: "only the current assignee may update this action".to_string(),
        })
    }

    async fn resolve_assignee(
        &self,
        request: &RoutingRequest,
        actor: &str,
    ) -> Result<ResolvedAssignee, ApplicationError> {
        let users = self
            .ctx
            .directory
            .list_users()
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        let overrides = self.ctx.overrides.snapshot().await?;

        // The open-route probe is answered up front so resolution itself
        // stays pure.
        let mut open_route = false;
        if let Some(route) = self.ctx.policy.route_for(&request.team_label) {
            if route.scope == RouteScope::VendorMaintenance {
                if let Some(site) = self.ctx.policy.site_code_from_row(&request.row) {
                    let existing = self
                        .ctx
                        .actions
                        .find_open_by_site_vendor(
                            &site,
                            &route.role,
                            &self.ctx.policy.override_vendor,
                        )
                        .await
                        .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
                    open_route = !existing.is_empty();
                }
            }
        }

        let resolver = RoutingResolver::new(
            users,
            self.ctx.policy.clone(),
            overrides,
            KnownOpenRoute(open_route),
        );
        let input = RoutingInput {
            team_label: request.team_label.clone(),
            row: request.row.clone(),
            requested_by: actor.to_string(),
        };

        resolver.resolve(&input).map_err(ApplicationError::Routing)
    }

    async fn dispatch_assignment_notice(&self, action: &Action, correlation_id: &str) {
        let site = action.site_code.clone().unwrap_or_else(|| action.row_key.clone());
        let notification = Notification {
            user_id: action.assigned_to_user_id.clone(),
            message: format!("{} fault at {site} routed to you", action.issue_type),
            link: Some(format!("/actions/{}", action.id.0)),
            metadata: BTreeMap::from([("site_code".to_string(), site.clone())]),
        };
        if let Err(error) = self.ctx.notifier.notify(notification).await {
            tracing::warn!(
                event_name = "notify.delivery_failed",
                correlation_id = correlation_id,
                user_id = %action.assigned_to_user_id,
                error = %error,
                "assignment notification failed; routing stands"
            );
        }

        let email = EmailRequest {
            to_user_id: action.assigned_to_user_id.clone(),
            template: "action_assigned".to_string(),
            data: BTreeMap::from([
                ("site_code".to_string(), site),
                ("issue_type".to_string(), action.issue_type.clone()),
                ("action_id".to_string(), action.id.0.clone()),
            ]),
        };
        if let Err(error) = self.ctx.notifier.email(email).await {
            tracing::warn!(
                event_name = "notify.email_failed",
                correlation_id = correlation_id,
                user_id = %action.assigned_to_user_id,
                error = %error,
                "assignment email failed; routing stands"
            );
        }
    }

    fn log_secondary(
        &self,
        phase: &'static str,
        action: &Action,
        error: &ApplicationError,
        correlation_id: &str,
    ) {
        tracing::warn!(
            event_name = "workflow.secondary_effect_failed",
            correlation_id = correlation_id,
            action_id = %action.id.0,
            phase = phase,
            error = %error,
            "secondary effect failed after committed primary mutation"
        );
        self.ctx.audit.emit(
            AuditEvent::new(
                Some(action.id.clone()),
                action.site_code.clone(),
                correlation_id,
                format!("workflow.{phase}_failed"),
                AuditCategory::System,
                "workflow",
                AuditOutcome::Failed,
            )
            .with_metadata("error", error.to_string()),
        );
    }
}

fn require_field(field: &str, value: &str) -> Result<(), ApplicationError> {
    if value.trim().is_empty() {
        return Err(ApplicationError::Validation { field: field.to_string() });
    }
    Ok(())
}
