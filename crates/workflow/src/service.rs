use std::sync::Arc;

use faultdesk_core::domain::action::{Action, ActionId};
use faultdesk_core::domain::approval::Approval;
use faultdesk_core::domain::site_record::{ObservationStatus, SiteRecord, SiteRecordKey};
use faultdesk_core::errors::ApplicationError;

use crate::action_store::{ActionStore, RoutingRequest, StatusUpdate};
use crate::chain_runner::ChainRunner;
use crate::overrides::CachedOverrideSet;
use crate::ownership::OwnershipTransferManager;
use crate::WorkflowContext;

/// The outbound surface the UI/API layer talks to. One facade so callers
/// never wire the runner/store/manager triple themselves.
pub struct WorkflowService {
    ctx: Arc<WorkflowContext>,
    store: ActionStore,
    ownership: Arc<OwnershipTransferManager>,
}

impl WorkflowService {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        let chain = Arc::new(ChainRunner::new(Arc::clone(&ctx)));
        let ownership =
            Arc::new(OwnershipTransferManager::new(Arc::clone(&ctx), Arc::clone(&chain)));
        let store = ActionStore::new(Arc::clone(&ctx), chain, Arc::clone(&ownership));

        Self { ctx, store, ownership }
    }

    pub fn overrides(&self) -> &Arc<CachedOverrideSet> {
        &self.ctx.overrides
    }

    pub async fn submit_routing(
        &self,
        request: RoutingRequest,
        actor: &str,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        self.store.create(request, actor, correlation_id).await
    }

    pub async fn update_action_status(
        &self,
        action_id: &ActionId,
        actor: &str,
        update: StatusUpdate,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        self.store.update_status(action_id, actor, update, correlation_id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn reroute_action(
        &self,
        action_id: &ActionId,
        actor: &str,
        target_user_id: &str,
        target_role: &str,
        remarks: Option<String>,
        photos: Vec<String>,
        correlation_id: &str,
    ) -> Result<Action, ApplicationError> {
        self.store
            .reroute(action_id, actor, target_user_id, target_role, remarks, photos, correlation_id)
            .await
    }

    pub async fn delete_action(
        &self,
        action_id: &ActionId,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        self.store.delete(action_id, actor, correlation_id).await
    }

    pub async fn resolve_site_observation(
        &self,
        file_id: &str,
        row_key: &str,
        observation: ObservationStatus,
        remarks: Option<String>,
        actor: &str,
        correlation_id: &str,
    ) -> Result<SiteRecord, ApplicationError> {
        self.ownership
            .resolve_site_observation(
                &SiteRecordKey::new(file_id, row_key),
                observation,
                remarks,
                actor,
                correlation_id,
            )
            .await
    }

    pub async fn list_my_actions(
        &self,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Action>, ApplicationError> {
        self.store.list_my_actions(user_id, include_completed).await
    }

    pub async fn list_my_approvals(
        &self,
        user_id: &str,
        role: Option<&str>,
        pending_only: bool,
    ) -> Result<Vec<Approval>, ApplicationError> {
        self.store.list_my_approvals(user_id, role, pending_only).await
    }

    pub async fn list_site_records(
        &self,
        user_id: &str,
        include_approved: bool,
    ) -> Result<Vec<SiteRecord>, ApplicationError> {
        self.ownership.list_site_records(user_id, include_approved).await
    }
}
