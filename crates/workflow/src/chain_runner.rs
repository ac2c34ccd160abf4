use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use faultdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use faultdesk_core::chain::{
    ChainDirective, ChainEngine, ChainOutcome, ChainTier, ReviewDecision, RouteClass,
};
use faultdesk_core::domain::action::{Action, ActionStatus};
use faultdesk_core::domain::approval::{Approval, ApprovalId, ApprovalStage, ApprovalStatus};
use faultdesk_core::domain::site_record::CcrStatus;
use faultdesk_core::errors::{ApplicationError, DomainError};
use faultdesk_core::notify::Notification;
use faultdesk_core::routing::policy::RouteScope;
use faultdesk_core::routing::{NoOpenRoutes, RoutingInput, RoutingResolver};

use crate::WorkflowContext;

/// The single chain-advancement entry point.
///
/// Both the primary status-update path and the site-observation resolution
/// path go through this runner, so the idempotence guard (existing Pending
/// review short-circuits creation, partial unique index backstops the race)
/// holds no matter which door the chain was entered through.
pub struct ChainRunner {
    ctx: Arc<WorkflowContext>,
    engine: ChainEngine,
}

impl ChainRunner {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx, engine: ChainEngine::new() }
    }

    /// Chain follow-up after an action reached Completed.
    pub async fn advance_on_completion(
        &self,
        action: &Action,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        if !self.ctx.policy.issue_type_participates(&action.issue_type) {
            return Ok(());
        }

        let tier = self.tier_of(action).await?;
        let outcome = self.engine.on_tier_completed(tier, self.route_class_of(action));
        self.apply(action, outcome, actor, correlation_id).await
    }

    /// Chain follow-up for a persisted status transition: the one call the
    /// primary update path makes, whatever tier the action sits on.
    pub async fn handle_transition(
        &self,
        action: &Action,
        decision: Option<ReviewDecision>,
        remarks: &str,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        if !self.ctx.policy.issue_type_participates(&action.issue_type) {
            return Ok(());
        }

        match self.tier_of(action).await? {
            ChainTier::FieldResolution => {
                if action.status == ActionStatus::Completed {
                    self.advance_on_completion(action, actor, correlation_id).await?;
                }
                Ok(())
            }
            ChainTier::EquipmentReview | ChainTier::FinalSignOff => {
                let decision = decision.unwrap_or_else(|| {
                    ReviewDecision::from_legacy(
                        action.status == ActionStatus::Completed,
                        remarks,
                    )
                });
                self.apply_review_decision(action, decision, actor, correlation_id).await
            }
        }
    }

    /// Chain follow-up after an explicit reviewer decision.
    pub async fn apply_review_decision(
        &self,
        action: &Action,
        decision: ReviewDecision,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let tier = self.tier_of(action).await?;
        let outcome = self
            .engine
            .on_review_decision(tier, decision)
            .map_err(DomainError::ChainTransition)?;
        self.apply(action, outcome, actor, correlation_id).await
    }

    async fn tier_of(&self, action: &Action) -> Result<ChainTier, ApplicationError> {
        let approval = self
            .ctx
            .approvals
            .find_by_action_id(&action.id)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        Ok(match approval.map(|a| a.stage) {
            None => ChainTier::FieldResolution,
            Some(ApprovalStage::EquipmentReview) => ChainTier::EquipmentReview,
            Some(ApprovalStage::FinalSignOff) => ChainTier::FinalSignOff,
        })
    }

    fn route_class_of(&self, action: &Action) -> RouteClass {
        match self.ctx.policy.scope_of_role(&action.assigned_to_role) {
            Some(RouteScope::VendorMaintenance) => RouteClass::VendorMaintenance,
            _ => RouteClass::TeamScoped,
        }
    }

    async fn apply(
        &self,
        current: &Action,
        outcome: ChainOutcome,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        for directive in outcome.directives {
            match directive {
                ChainDirective::OpenReview { tier } => {
                    self.open_review(current, tier, actor, correlation_id).await?;
                }
                ChainDirective::CloseReview { status } => {
                    self.close_review(current, status, actor).await?;
                }
                ChainDirective::RevertOriginToInProgress => {
                    self.revert_origin(current, correlation_id).await?;
                }
                ChainDirective::FinalizeSite { kept_for_monitoring } => {
                    self.finalize_site(current, kept_for_monitoring, actor, correlation_id)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn open_review(
        &self,
        origin: &Action,
        tier: ChainTier,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let stage = tier.approval_stage().ok_or_else(|| {
            DomainError::InvariantViolation("field resolution carries no review record".into())
        })?;
        // Rows without a site column key their chain on the row key.
        let site_code =
            origin.site_code.clone().unwrap_or_else(|| origin.row_key.clone());

        // Idempotence guard: an open review for this (site, stage) means a
        // concurrent or earlier advance already got here.
        let existing = self
            .ctx
            .approvals
            .find_pending_for_stage(&site_code, stage)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        if existing.is_some() {
            self.audit_chain(
                origin,
                &site_code,
                "chain.stage_already_open",
                AuditOutcome::Success,
                actor,
                correlation_id,
                stage,
            );
            return Ok(());
        }

        let reviewer = self.resolve_reviewer(origin, stage, actor).await?;
        let now = Utc::now();
        let review_action = Action {
            id: faultdesk_core::domain::action::ActionId(Uuid::new_v4().to_string()),
            row_snapshot: origin.row_snapshot.clone(),
            row_key: origin.row_key.clone(),
            routing_team: match stage {
                ApprovalStage::EquipmentReview => "Equipment".to_string(),
                ApprovalStage::FinalSignOff => "CCR".to_string(),
            },
            issue_type: origin.issue_type.clone(),
            site_code: Some(site_code.clone()),
            assigned_to_user_id: reviewer.user_id.clone(),
            assigned_to_role: reviewer.role.clone(),
            assigned_to_division: reviewer.division.clone(),
            assigned_to_vendor: reviewer.vendor.clone(),
            assigned_by_user_id: actor.to_string(),
            assigned_by_role: origin.assigned_to_role.clone(),
            source_file_id: origin.source_file_id.clone(),
            status: ActionStatus::Pending,
            priority: origin.priority.clone(),
            remarks: Vec::new(),
            photo_refs: Vec::new(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        let approval = Approval {
            id: ApprovalId(Uuid::new_v4().to_string()),
            action_id: review_action.id.clone(),
            site_code: site_code.clone(),
            stage,
            status: ApprovalStatus::Pending,
            submitted_by: actor.to_string(),
            assigned_to: reviewer.user_id.clone(),
            approved_by: None,
            approved_at: None,
            remarks: None,
            prior_action_id: Some(origin.id.clone()),
            created_at: now,
            updated_at: now,
        };

        // The approval goes first: its partial unique index is the race
        // backstop. Losing the race is success-already-advanced.
        match self.ctx.approvals.insert(approval).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                self.audit_chain(
                    origin,
                    &site_code,
                    "chain.stage_race_lost",
                    AuditOutcome::Success,
                    actor,
                    correlation_id,
                    stage,
                );
                return Ok(());
            }
            Err(e) => return Err(ApplicationError::Persistence(e.to_string())),
        }

        self.ctx
            .actions
            .insert(review_action.clone())
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        if stage == ApprovalStage::FinalSignOff {
            self.ctx
                .sites
                .set_ccr_status(&site_code, CcrStatus::Pending)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        }

        self.notify_best_effort(
            Notification {
                user_id: reviewer.user_id.clone(),
                message: format!(
                    "Site {site_code} awaits your {} review",
                    match stage {
                        ApprovalStage::EquipmentReview => "equipment",
                        ApprovalStage::FinalSignOff => "final",
                    }
                ),
                link: Some(format!("/actions/{}", review_action.id.0)),
                metadata: BTreeMap::from([(
                    "site_code".to_string(),
                    site_code.clone(),
                )]),
            },
            correlation_id,
        )
        .await;

        self.audit_chain(
            origin,
            &site_code,
            "chain.stage_opened",
            AuditOutcome::Success,
            actor,
            correlation_id,
            stage,
        );

        Ok(())
    }

    async fn resolve_reviewer(
        &self,
        origin: &Action,
        stage: ApprovalStage,
        actor: &str,
    ) -> Result<faultdesk_core::routing::ResolvedAssignee, ApplicationError> {
        let role = match stage {
            ApprovalStage::EquipmentReview => self.ctx.policy.equipment_review_role.clone(),
            ApprovalStage::FinalSignOff => self.ctx.policy.final_sign_off_role.clone(),
        };

        let users = self
            .ctx
            .directory
            .list_users()
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        let overrides = self.ctx.overrides.snapshot().await?;

        let resolver =
            RoutingResolver::new(users, self.ctx.policy.clone(), overrides, NoOpenRoutes);
        let input = RoutingInput {
            team_label: origin.routing_team.clone(),
            row: origin.row_snapshot.clone(),
            requested_by: actor.to_string(),
        };

        resolver.resolve_role(&role, &input).map_err(ApplicationError::Routing)
    }

    async fn close_review(
        &self,
        current: &Action,
        status: ApprovalStatus,
        actor: &str,
    ) -> Result<(), ApplicationError> {
        let Some(mut approval) = self
            .ctx
            .approvals
            .find_by_action_id(&current.id)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
        else {
            return Err(ApplicationError::NotFound {
                entity: "approval",
                key: current.id.0.clone(),
            });
        };

        if approval.status.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        if status == ApprovalStatus::Approved {
            approval.approved_by = Some(actor.to_string());
            approval.approved_at = Some(now);
        }
        approval.status = status;
        approval.updated_at = now;

        self.ctx
            .approvals
            .update(approval)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))
    }

    /// Walks `prior_action_id` links back to the originating field action
    /// and returns it to InProgress.
    async fn revert_origin(
        &self,
        current: &Action,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let mut cursor = current.clone();
        for _ in 0..8 {
            let Some(approval) = self
                .ctx
                .approvals
                .find_by_action_id(&cursor.id)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            else {
                break;
            };
            let Some(prior_id) = approval.prior_action_id else {
                break;
            };
            let Some(prior) = self
                .ctx
                .actions
                .find_by_id(&prior_id)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            else {
                tracing::warn!(
                    event_name = "chain.revert_target_missing",
                    correlation_id = correlation_id,
                    action_id = %prior_id.0,
                    "prior action of review chain no longer exists"
                );
                return Ok(());
            };
            cursor = prior;
        }

        if cursor.id == current.id {
            return Ok(());
        }

        for _ in 0..3 {
            if cursor.status == ActionStatus::InProgress {
                return Ok(());
            }
            let expected = cursor.state_version;
            let mut reverted = cursor.clone();
            reverted.status = ActionStatus::InProgress;
            reverted.state_version = expected + 1;
            reverted.updated_at = Utc::now();

            let matched = self
                .ctx
                .actions
                .update(reverted, expected)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
            if matched {
                return Ok(());
            }

            cursor = self
                .ctx
                .actions
                .find_by_id(&cursor.id)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?
                .ok_or(ApplicationError::NotFound {
                    entity: "action",
                    key: cursor.id.0.clone(),
                })?;
        }

        Err(ApplicationError::Conflict { entity: "action", key: cursor.id.0 })
    }

    async fn finalize_site(
        &self,
        current: &Action,
        kept_for_monitoring: bool,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let site_code =
            current.site_code.clone().unwrap_or_else(|| current.row_key.clone());
        let status =
            if kept_for_monitoring { CcrStatus::KeptForMonitoring } else { CcrStatus::Approved };

        let touched = self
            .ctx
            .sites
            .set_ccr_status(&site_code, status)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(current.id.clone()),
                Some(site_code),
                correlation_id,
                "chain.site_finalized",
                AuditCategory::Chain,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("records_touched", touched.to_string())
            .with_metadata("kept_for_monitoring", kept_for_monitoring.to_string()),
        );

        Ok(())
    }

    async fn notify_best_effort(&self, notification: Notification, correlation_id: &str) {
        let user_id = notification.user_id.clone();
        if let Err(error) = self.ctx.notifier.notify(notification).await {
            tracing::warn!(
                event_name = "notify.delivery_failed",
                correlation_id = correlation_id,
                user_id = %user_id,
                error = %error,
                "secondary effect failed; primary mutation stands"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_chain(
        &self,
        action: &Action,
        site_code: &str,
        event_type: &str,
        outcome: AuditOutcome,
        actor: &str,
        correlation_id: &str,
        stage: ApprovalStage,
    ) {
        self.ctx.audit.emit(
            AuditEvent::new(
                Some(action.id.clone()),
                Some(site_code.to_string()),
                correlation_id,
                event_type,
                AuditCategory::Chain,
                actor,
                outcome,
            )
            .with_metadata("stage", stage.as_str()),
        );
    }
}
