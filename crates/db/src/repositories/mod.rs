use async_trait::async_trait;
use thiserror::Error;

use faultdesk_core::domain::action::{Action, ActionId};
use faultdesk_core::domain::approval::{Approval, ApprovalId, ApprovalStage};
use faultdesk_core::domain::directory::DirectoryUser;
use faultdesk_core::domain::site_record::{CcrStatus, SiteRecord, SiteRecordKey};

pub mod action;
pub mod approval;
pub mod directory;
pub mod memory;
pub mod site_record;

pub use action::SqlActionRepository;
pub use approval::SqlApprovalRepository;
pub use directory::{SqlDirectoryRepository, SqlVendorOverrideRepository};
pub use memory::{
    InMemoryActionRepository, InMemoryApprovalRepository, InMemoryDirectoryRepository,
    InMemorySiteRecordRepository, InMemoryVendorOverrideRepository,
};
pub use site_record::SqlSiteRecordRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl RepositoryError {
    /// True when an insert lost the race against the partial unique index
    /// (or the in-memory equivalent). Callers re-read and continue.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::UniqueViolation(_) => true,
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn find_by_id(&self, id: &ActionId) -> Result<Option<Action>, RepositoryError>;
    async fn insert(&self, action: Action) -> Result<(), RepositoryError>;
    /// Conditional write: persists `action` only if the stored
    /// `state_version` still equals `expected_version`. Returns whether the
    /// guard matched.
    async fn update(&self, action: Action, expected_version: u32)
        -> Result<bool, RepositoryError>;
    async fn delete(&self, id: &ActionId) -> Result<bool, RepositoryError>;
    async fn list_for_user(
        &self,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Action>, RepositoryError>;
    async fn find_open_by_site_vendor(
        &self,
        site_code: &str,
        role: &str,
        vendor: &str,
    ) -> Result<Vec<Action>, RepositoryError>;
    async fn find_open_by_file_row(
        &self,
        source_file_id: &str,
        row_key: &str,
    ) -> Result<Option<Action>, RepositoryError>;
    async fn find_open_by_site_assignee(
        &self,
        site_code: &str,
        user_id: &str,
    ) -> Result<Option<Action>, RepositoryError>;
    async fn find_open_by_site_role(
        &self,
        site_code: &str,
        role: &str,
    ) -> Result<Option<Action>, RepositoryError>;
    async fn find_open_by_site(&self, site_code: &str)
        -> Result<Option<Action>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError>;
    async fn find_by_action_id(
        &self,
        action_id: &ActionId,
    ) -> Result<Option<Approval>, RepositoryError>;
    /// The chain-advance idempotence guard: the open review of a
    /// (site, stage), if any.
    async fn find_pending_for_stage(
        &self,
        site_code: &str,
        stage: ApprovalStage,
    ) -> Result<Option<Approval>, RepositoryError>;
    /// Plain insert; surfaces the partial-unique-index violation so racing
    /// creators can re-read instead of duplicating.
    async fn insert(&self, approval: Approval) -> Result<(), RepositoryError>;
    async fn update(&self, approval: Approval) -> Result<(), RepositoryError>;
    async fn list_for_assignee(
        &self,
        user_id: &str,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError>;
    /// Reviews of one stage across all assignees; the final tier is
    /// role-scoped, so every holder sees the whole pending queue.
    async fn list_for_stage(
        &self,
        stage: ApprovalStage,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError>;
    async fn list_for_site(&self, site_code: &str) -> Result<Vec<Approval>, RepositoryError>;
}

#[async_trait]
pub trait SiteRecordRepository: Send + Sync {
    async fn find_by_key(
        &self,
        key: &SiteRecordKey,
    ) -> Result<Option<SiteRecord>, RepositoryError>;
    async fn insert(&self, record: SiteRecord) -> Result<(), RepositoryError>;
    /// Conditional write guarded by `state_version`, like
    /// [`ActionRepository::update`].
    async fn update(
        &self,
        record: SiteRecord,
        expected_version: u32,
    ) -> Result<bool, RepositoryError>;
    async fn list_for_user(
        &self,
        user_id: &str,
        include_approved: bool,
    ) -> Result<Vec<SiteRecord>, RepositoryError>;
    async fn list_for_site(&self, site_code: &str) -> Result<Vec<SiteRecord>, RepositoryError>;
    /// Stamps the terminal sign-off outcome onto every record of a site.
    /// Returns the number of records touched.
    async fn set_ccr_status(
        &self,
        site_code: &str,
        status: CcrStatus,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, RepositoryError>;
    async fn find_user(&self, user_id: &str) -> Result<Option<DirectoryUser>, RepositoryError>;
    async fn upsert_user(&self, user: DirectoryUser) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait VendorOverrideRepository: Send + Sync {
    async fn list_sites(&self) -> Result<Vec<String>, RepositoryError>;
    /// Full refresh by the ingestion collaborator.
    async fn replace_all(&self, sites: Vec<String>) -> Result<(), RepositoryError>;
}
