use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use faultdesk_core::domain::action::{Action, ActionId};
use faultdesk_core::domain::approval::{Approval, ApprovalId, ApprovalStage, ApprovalStatus};
use faultdesk_core::domain::directory::DirectoryUser;
use faultdesk_core::domain::site_record::{CcrStatus, SiteRecord, SiteRecordKey};
use faultdesk_core::routing::policy::normalize_site_code;

use super::{
    ActionRepository, ApprovalRepository, DirectoryRepository, RepositoryError,
    SiteRecordRepository, VendorOverrideRepository,
};

#[derive(Default)]
pub struct InMemoryActionRepository {
    actions: RwLock<HashMap<String, Action>>,
}

fn open(action: &Action) -> bool {
    !action.status.is_terminal()
}

fn earliest<'a>(mut actions: Vec<&'a Action>) -> Option<&'a Action> {
    actions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
    actions.first().copied()
}

#[async_trait::async_trait]
impl ActionRepository for InMemoryActionRepository {
    async fn find_by_id(&self, id: &ActionId) -> Result<Option<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(actions.get(&id.0).cloned())
    }

    async fn insert(&self, action: Action) -> Result<(), RepositoryError> {
        let mut actions = self.actions.write().await;
        if actions.contains_key(&action.id.0) {
            return Err(RepositoryError::UniqueViolation(format!("action `{}`", action.id.0)));
        }
        actions.insert(action.id.0.clone(), action);
        Ok(())
    }

    async fn update(
        &self,
        action: Action,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut actions = self.actions.write().await;
        match actions.get(&action.id.0) {
            Some(current) if current.state_version == expected_version => {
                actions.insert(action.id.0.clone(), action);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &ActionId) -> Result<bool, RepositoryError> {
        let mut actions = self.actions.write().await;
        Ok(actions.remove(&id.0).is_some())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        let mut matched: Vec<Action> = actions
            .values()
            .filter(|a| a.assigned_to_user_id == user_id && (include_completed || open(a)))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_open_by_site_vendor(
        &self,
        site_code: &str,
        role: &str,
        vendor: &str,
    ) -> Result<Vec<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(actions
            .values()
            .filter(|a| {
                open(a)
                    && a.site_code.as_deref() == Some(site_code)
                    && a.assigned_to_role == role
                    && a.assigned_to_vendor.as_deref() == Some(vendor)
            })
            .cloned()
            .collect())
    }

    async fn find_open_by_file_row(
        &self,
        source_file_id: &str,
        row_key: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(earliest(
            actions
                .values()
                .filter(|a| {
                    open(a) && a.source_file_id == source_file_id && a.row_key == row_key
                })
                .collect(),
        )
        .cloned())
    }

    async fn find_open_by_site_assignee(
        &self,
        site_code: &str,
        user_id: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(earliest(
            actions
                .values()
                .filter(|a| {
                    open(a)
                        && a.site_code.as_deref() == Some(site_code)
                        && a.assigned_to_user_id == user_id
                })
                .collect(),
        )
        .cloned())
    }

    async fn find_open_by_site_role(
        &self,
        site_code: &str,
        role: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(earliest(
            actions
                .values()
                .filter(|a| {
                    open(a)
                        && a.site_code.as_deref() == Some(site_code)
                        && a.assigned_to_role == role
                })
                .collect(),
        )
        .cloned())
    }

    async fn find_open_by_site(
        &self,
        site_code: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let actions = self.actions.read().await;
        Ok(earliest(
            actions
                .values()
                .filter(|a| open(a) && a.site_code.as_deref() == Some(site_code))
                .collect(),
        )
        .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, Approval>>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn find_by_action_id(
        &self,
        action_id: &ActionId,
    ) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<&Approval> =
            approvals.values().filter(|a| &a.action_id == action_id).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched.first().copied().cloned())
    }

    async fn find_pending_for_stage(
        &self,
        site_code: &str,
        stage: ApprovalStage,
    ) -> Result<Option<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .values()
            .find(|a| {
                a.site_code == site_code
                    && a.stage == stage
                    && a.status == ApprovalStatus::Pending
            })
            .cloned())
    }

    async fn insert(&self, approval: Approval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        // Mirror of the partial unique index on (site_code, stage, pending).
        let duplicate = approvals.values().any(|a| {
            a.site_code == approval.site_code
                && a.stage == approval.stage
                && a.status == ApprovalStatus::Pending
        });
        if duplicate {
            return Err(RepositoryError::UniqueViolation(format!(
                "pending approval for ({}, {})",
                approval.site_code,
                approval.stage.as_str()
            )));
        }
        if approvals.contains_key(&approval.id.0) {
            return Err(RepositoryError::UniqueViolation(format!(
                "approval `{}`",
                approval.id.0
            )));
        }
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn update(&self, approval: Approval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn list_for_assignee(
        &self,
        user_id: &str,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<Approval> = approvals
            .values()
            .filter(|a| {
                a.assigned_to == user_id
                    && (!pending_only || a.status == ApprovalStatus::Pending)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn list_for_stage(
        &self,
        stage: ApprovalStage,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<Approval> = approvals
            .values()
            .filter(|a| {
                a.stage == stage && (!pending_only || a.status == ApprovalStatus::Pending)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn list_for_site(&self, site_code: &str) -> Result<Vec<Approval>, RepositoryError> {
        let approvals = self.approvals.read().await;
        let mut matched: Vec<Approval> =
            approvals.values().filter(|a| a.site_code == site_code).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }
}

#[derive(Default)]
pub struct InMemorySiteRecordRepository {
    records: RwLock<HashMap<(String, String), SiteRecord>>,
}

#[async_trait::async_trait]
impl SiteRecordRepository for InMemorySiteRecordRepository {
    async fn find_by_key(
        &self,
        key: &SiteRecordKey,
    ) -> Result<Option<SiteRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&(key.file_id.clone(), key.row_key.clone())).cloned())
    }

    async fn insert(&self, record: SiteRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let key = (record.key.file_id.clone(), record.key.row_key.clone());
        if records.contains_key(&key) {
            return Err(RepositoryError::UniqueViolation(format!(
                "site_record ({}, {})",
                key.0, key.1
            )));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn update(
        &self,
        record: SiteRecord,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        let key = (record.key.file_id.clone(), record.key.row_key.clone());
        match records.get(&key) {
            Some(current) if current.state_version == expected_version => {
                records.insert(key, record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        include_approved: bool,
    ) -> Result<Vec<SiteRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matched: Vec<SiteRecord> = records
            .values()
            .filter(|r| r.owner_user_id == user_id && (include_approved || r.is_active()))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn list_for_site(&self, site_code: &str) -> Result<Vec<SiteRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matched: Vec<SiteRecord> =
            records.values().filter(|r| r.site_code == site_code).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn set_ccr_status(
        &self,
        site_code: &str,
        status: CcrStatus,
    ) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().await;
        let mut touched = 0;
        for record in records.values_mut().filter(|r| r.site_code == site_code) {
            record.ccr_status = status.clone();
            record.state_version += 1;
            touched += 1;
        }
        Ok(touched)
    }
}

#[derive(Default)]
pub struct InMemoryDirectoryRepository {
    users: RwLock<HashMap<String, DirectoryUser>>,
}

impl InMemoryDirectoryRepository {
    pub async fn with_users(users: Vec<DirectoryUser>) -> Self {
        let repo = Self::default();
        {
            let mut map = repo.users.write().await;
            for user in users {
                map.insert(user.user_id.clone(), user);
            }
        }
        repo
    }
}

#[async_trait::async_trait]
impl DirectoryRepository for InMemoryDirectoryRepository {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, RepositoryError> {
        let users = self.users.read().await;
        let mut all: Vec<DirectoryUser> = users.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<DirectoryUser>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn upsert_user(&self, user: DirectoryUser) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.user_id.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryVendorOverrideRepository {
    sites: RwLock<HashSet<String>>,
}

impl InMemoryVendorOverrideRepository {
    pub async fn with_sites(sites: Vec<String>) -> Self {
        let repo = Self::default();
        repo.replace_all(sites).await.expect("in-memory refresh cannot fail");
        repo
    }
}

#[async_trait::async_trait]
impl VendorOverrideRepository for InMemoryVendorOverrideRepository {
    async fn list_sites(&self) -> Result<Vec<String>, RepositoryError> {
        let sites = self.sites.read().await;
        let mut all: Vec<String> = sites.iter().cloned().collect();
        all.sort();
        Ok(all)
    }

    async fn replace_all(&self, sites: Vec<String>) -> Result<(), RepositoryError> {
        let mut stored = self.sites.write().await;
        *stored = sites.iter().map(|s| normalize_site_code(s)).collect();
        Ok(())
    }
}
