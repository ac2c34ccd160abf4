use std::sync::Arc;

use chrono::Utc;

use faultdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use faultdesk_core::domain::action::{Action, ActionStatus};
use faultdesk_core::domain::site_record::{
    CcrStatus, ObservationStatus, SiteRecord, SiteRecordKey,
};
use faultdesk_core::errors::ApplicationError;

use crate::chain_runner::ChainRunner;
use crate::WorkflowContext;

/// Keeps the per-user open-item projection consistent as tickets route and
/// resolve: the original+routed record pair on first routing, in-place
/// ownership transfer on reroute, and the secondary chain entry point when
/// a routed record is resolved directly.
pub struct OwnershipTransferManager {
    ctx: Arc<WorkflowContext>,
    chain: Arc<ChainRunner>,
}

impl OwnershipTransferManager {
    pub fn new(ctx: Arc<WorkflowContext>, chain: Arc<ChainRunner>) -> Self {
        Self { ctx, chain }
    }

    /// First routing of a (file, row): record A stays with the assigning
    /// user, record B (suffixed key) follows the assignee. Both coexist
    /// under the unique composite key.
    pub async fn on_first_routing(
        &self,
        action: &Action,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let site_code = action.site_code.clone().unwrap_or_else(|| action.row_key.clone());
        let base_key = SiteRecordKey::new(&action.source_file_id, &action.row_key);
        let now = Utc::now();

        let base_exists = self
            .ctx
            .sites
            .find_by_key(&base_key)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            .is_some();

        if !base_exists {
            let original = SiteRecord {
                key: base_key.clone(),
                site_code: site_code.clone(),
                owner_user_id: action.assigned_by_user_id.clone(),
                original_user_id: action.assigned_by_user_id.clone(),
                observation: ObservationStatus::Pending,
                ccr_status: CcrStatus::None,
                task_status: "routed".to_string(),
                provenance: "routing".to_string(),
                state_version: 1,
                created_at: now,
                updated_at: now,
            };
            match self.ctx.sites.insert(original).await {
                Ok(()) => {}
                // Lost a concurrent first-routing race; the pair exists.
                Err(e) if e.is_unique_violation() => {}
                Err(e) => return Err(ApplicationError::Persistence(e.to_string())),
            }
        }

        let routed = SiteRecord {
            key: base_key.routed_variant(&action.assigned_to_user_id, now),
            site_code: site_code.clone(),
            owner_user_id: action.assigned_to_user_id.clone(),
            original_user_id: action.assigned_to_user_id.clone(),
            observation: ObservationStatus::Pending,
            ccr_status: CcrStatus::None,
            task_status: "routed".to_string(),
            provenance: "routed".to_string(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        };
        match self.ctx.sites.insert(routed).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {}
            Err(e) => return Err(ApplicationError::Persistence(e.to_string())),
        }

        self.ctx.audit.emit(
            AuditEvent::new(
                Some(action.id.clone()),
                Some(site_code),
                correlation_id,
                "ownership.pair_created",
                AuditCategory::Ownership,
                &action.assigned_by_user_id,
                AuditOutcome::Success,
            )
            .with_metadata("assignee", action.assigned_to_user_id.clone()),
        );

        Ok(())
    }

    /// Transfer of an already-routed record: `owner_user_id` moves,
    /// `original_user_id` never does.
    pub async fn on_reroute(
        &self,
        action: &Action,
        previous_owner: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let site_code = action.site_code.clone().unwrap_or_else(|| action.row_key.clone());

        let records = self
            .ctx
            .sites
            .list_for_site(&site_code)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;

        let Some(routed) = records.into_iter().find(|r| {
            r.key.file_id == action.source_file_id
                && r.key.base_row_key() == action.row_key
                && r.owner_user_id == previous_owner
                && r.provenance == "routed"
        }) else {
            // The pair was never created (legacy data); treat as first
            // routing so the new owner gets an open item.
            return self.on_first_routing(action, correlation_id).await;
        };

        let mut current = routed;
        for _ in 0..3 {
            let expected = current.state_version;
            let mut updated = current.clone();
            updated.owner_user_id = action.assigned_to_user_id.clone();
            updated.state_version = expected + 1;
            updated.updated_at = Utc::now();

            let matched = self
                .ctx
                .sites
                .update(updated, expected)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
            if matched {
                self.ctx.audit.emit(
                    AuditEvent::new(
                        Some(action.id.clone()),
                        Some(site_code),
                        correlation_id,
                        "ownership.transferred",
                        AuditCategory::Ownership,
                        &action.assigned_by_user_id,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from_user", previous_owner.to_string())
                    .with_metadata("to_user", action.assigned_to_user_id.clone()),
                );
                return Ok(());
            }

            current = self
                .ctx
                .sites
                .find_by_key(&current.key)
                .await
                .map_err(|e| ApplicationError::Persistence(e.to_string()))?
                .ok_or(ApplicationError::NotFound {
                    entity: "site_record",
                    key: current.key.row_key.clone(),
                })?;
        }

        Err(ApplicationError::Conflict {
            entity: "site_record",
            key: action.row_key.clone(),
        })
    }

    /// Direct resolution of an open item. The primary mutation is the
    /// record itself; completing the underlying action and advancing the
    /// chain run through the same guarded runner as the primary path and
    /// are isolated as secondary effects.
    pub async fn resolve_site_observation(
        &self,
        key: &SiteRecordKey,
        observation: ObservationStatus,
        remarks: Option<String>,
        actor: &str,
        correlation_id: &str,
    ) -> Result<SiteRecord, ApplicationError> {
        let record = self
            .ctx
            .sites
            .find_by_key(key)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?
            .ok_or(ApplicationError::NotFound {
                entity: "site_record",
                key: format!("{}/{}", key.file_id, key.row_key),
            })?;

        self.authorize_resolution(&record, actor).await?;

        let mut updated = record.clone();
        updated.observation = observation.clone();
        if let Some(remarks) = &remarks {
            updated.task_status = remarks.clone();
        }
        updated.state_version = record.state_version + 1;
        updated.updated_at = Utc::now();

        let matched = self
            .ctx
            .sites
            .update(updated.clone(), record.state_version)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        if !matched {
            return Err(ApplicationError::Conflict {
                entity: "site_record",
                key: key.row_key.clone(),
            });
        }

        self.ctx.audit.emit(
            AuditEvent::new(
                None,
                Some(record.site_code.clone()),
                correlation_id,
                "ownership.site_resolved",
                AuditCategory::Ownership,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("row_key", key.row_key.clone()),
        );

        if observation == ObservationStatus::Resolved {
            if let Err(error) = self.complete_underlying_action(&updated, actor, correlation_id).await
            {
                tracing::warn!(
                    event_name = "ownership.chain_followup_failed",
                    correlation_id = correlation_id,
                    site_code = %updated.site_code,
                    error = %error,
                    "secondary chain follow-up failed; record resolution stands"
                );
                self.ctx.audit.emit(
                    AuditEvent::new(
                        None,
                        Some(updated.site_code.clone()),
                        correlation_id,
                        "ownership.chain_followup_failed",
                        AuditCategory::Ownership,
                        actor,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }

        Ok(updated)
    }

    /// Ordered fallback chain locating the field action behind a resolved
    /// record: exact row → site+assignee → site+role → site-only.
    async fn complete_underlying_action(
        &self,
        record: &SiteRecord,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let persistence = |e: faultdesk_db::repositories::RepositoryError| {
            ApplicationError::Persistence(e.to_string())
        };

        let mut action = self
            .ctx
            .actions
            .find_open_by_file_row(&record.key.file_id, record.key.base_row_key())
            .await
            .map_err(persistence)?;

        if action.is_none() {
            action = self
                .ctx
                .actions
                .find_open_by_site_assignee(&record.site_code, &record.owner_user_id)
                .await
                .map_err(persistence)?;
        }

        if action.is_none() {
            let owner_role = self
                .ctx
                .directory
                .find_user(&record.owner_user_id)
                .await
                .map_err(persistence)?
                .map(|u| u.role);
            if let Some(role) = owner_role {
                action = self
                    .ctx
                    .actions
                    .find_open_by_site_role(&record.site_code, &role)
                    .await
                    .map_err(persistence)?;
            }
        }

        if action.is_none() {
            action = self
                .ctx
                .actions
                .find_open_by_site(&record.site_code)
                .await
                .map_err(persistence)?;
        }

        let Some(action) = action else {
            tracing::info!(
                event_name = "ownership.no_underlying_action",
                correlation_id = correlation_id,
                site_code = %record.site_code,
                row_key = %record.key.row_key,
                "resolved record has no open action behind it"
            );
            return Ok(());
        };

        let mut completed = action.clone();
        completed.transition_to(ActionStatus::Completed)?;
        completed.append_remark(format!("resolved via site record {}", record.key.row_key));
        completed.state_version = action.state_version + 1;
        completed.updated_at = Utc::now();

        let matched = self
            .ctx
            .actions
            .update(completed.clone(), action.state_version)
            .await
            .map_err(persistence)?;
        if !matched {
            return Err(ApplicationError::Conflict {
                entity: "action",
                key: action.id.0.clone(),
            });
        }

        // Same guarded advancement as the primary status-update path.
        self.chain.advance_on_completion(&completed, actor, correlation_id).await
    }

    async fn authorize_resolution(
        &self,
        record: &SiteRecord,
        actor: &str,
    ) -> Result<(), ApplicationError> {
        if record.owner_user_id == actor {
            return Ok(());
        }

        let holder = self
            .ctx
            .directory
            .find_user(actor)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))?;
        if holder.is_some_and(|u| {
            u.is_eligible()
                && u.role.eq_ignore_ascii_case(&self.ctx.policy.final_sign_off_role)
        }) {
            return Ok(());
        }

        Err(ApplicationError::Authorization {
            actor: actor.to_string(),
            detail: "only the record owner or a final reviewer may resolve it".to_string(),
        })
    }

    pub async fn list_site_records(
        &self,
        user_id: &str,
        include_approved: bool,
    ) -> Result<Vec<SiteRecord>, ApplicationError> {
        self.ctx
            .sites
            .list_for_user(user_id, include_approved)
            .await
            .map_err(|e| ApplicationError::Persistence(e.to_string()))
    }
}
