use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use faultdesk_core::domain::action::ActionId;
use faultdesk_core::domain::approval::{Approval, ApprovalId, ApprovalStage, ApprovalStatus};

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT
        id, action_id, site_code, stage, status, submitted_by, assigned_to,
        approved_by, approved_at, remarks, prior_action_id, created_at, updated_at
     FROM approval";

fn get_text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn get_opt_text(row: &SqliteRow, column: &str) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_approval(row: &SqliteRow) -> Result<Approval, RepositoryError> {
    let stage_str = get_text(row, "stage")?;
    let status_str = get_text(row, "status")?;

    Ok(Approval {
        id: ApprovalId(get_text(row, "id")?),
        action_id: ActionId(get_text(row, "action_id")?),
        site_code: get_text(row, "site_code")?,
        stage: ApprovalStage::parse(&stage_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage_str}`")))?,
        status: ApprovalStatus::parse(&status_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_str}`")))?,
        submitted_by: get_text(row, "submitted_by")?,
        assigned_to: get_text(row, "assigned_to")?,
        approved_by: get_opt_text(row, "approved_by")?,
        approved_at: get_opt_text(row, "approved_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        remarks: get_opt_text(row, "remarks")?,
        prior_action_id: get_opt_text(row, "prior_action_id")?.map(ActionId),
        created_at: parse_timestamp(&get_text(row, "created_at")?),
        updated_at: parse_timestamp(&get_text(row, "updated_at")?),
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn find_by_action_id(
        &self,
        action_id: &ActionId,
    ) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE action_id = ? ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&action_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn find_pending_for_stage(
        &self,
        site_code: &str,
        stage: ApprovalStage,
    ) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE site_code = ? AND stage = ? AND status = 'pending'"
        ))
        .bind(site_code)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn insert(&self, approval: Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval (
                id, action_id, site_code, stage, status, submitted_by, assigned_to,
                approved_by, approved_at, remarks, prior_action_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.action_id.0)
        .bind(&approval.site_code)
        .bind(approval.stage.as_str())
        .bind(approval.status.as_str())
        .bind(&approval.submitted_by)
        .bind(&approval.assigned_to)
        .bind(approval.approved_by.as_deref())
        .bind(approval.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(approval.remarks.as_deref())
        .bind(approval.prior_action_id.as_ref().map(|id| id.0.as_str()))
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, approval: Approval) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE approval SET
                status = ?,
                assigned_to = ?,
                approved_by = ?,
                approved_at = ?,
                remarks = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(approval.status.as_str())
        .bind(&approval.assigned_to)
        .bind(approval.approved_by.as_deref())
        .bind(approval.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(approval.remarks.as_deref())
        .bind(approval.updated_at.to_rfc3339())
        .bind(&approval.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_assignee(
        &self,
        user_id: &str,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = if pending_only {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE assigned_to = ? AND status = 'pending'
                 ORDER BY created_at ASC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE assigned_to = ? ORDER BY created_at ASC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_approval).collect()
    }

    async fn list_for_stage(
        &self,
        stage: ApprovalStage,
        pending_only: bool,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = if pending_only {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE stage = ? AND status = 'pending'
                 ORDER BY created_at ASC"
            ))
            .bind(stage.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE stage = ? ORDER BY created_at ASC"
            ))
            .bind(stage.as_str())
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_approval).collect()
    }

    async fn list_for_site(&self, site_code: &str) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE site_code = ? ORDER BY created_at ASC"
        ))
        .bind(site_code)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }
}
