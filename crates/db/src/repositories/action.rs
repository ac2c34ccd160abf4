use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use faultdesk_core::domain::action::{Action, ActionId, ActionPriority, ActionStatus};

use super::{ActionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlActionRepository {
    pool: DbPool,
}

impl SqlActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT
        id, row_snapshot, row_key, routing_team, issue_type, site_code,
        assigned_to_user_id, assigned_to_role, assigned_to_division,
        assigned_to_vendor, assigned_by_user_id, assigned_by_role,
        source_file_id, status, priority, remarks, photo_refs,
        state_version, created_at, updated_at
     FROM action";

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

fn row_to_action(row: &SqliteRow) -> Result<Action, RepositoryError> {
    let snapshot_json = get_text(row, "row_snapshot")?;
    let remarks_json = get_text(row, "remarks")?;
    let photos_json = get_text(row, "photo_refs")?;
    let status_str = get_text(row, "status")?;
    let priority_str = get_text(row, "priority")?;
    let state_version: i64 =
        row.try_get("state_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let row_snapshot: BTreeMap<String, String> = serde_json::from_str(&snapshot_json)
        .map_err(|e| RepositoryError::Decode(format!("row_snapshot: {e}")))?;
    let remarks: Vec<String> = serde_json::from_str(&remarks_json)
        .map_err(|e| RepositoryError::Decode(format!("remarks: {e}")))?;
    let photo_refs: Vec<String> = serde_json::from_str(&photos_json)
        .map_err(|e| RepositoryError::Decode(format!("photo_refs: {e}")))?;

    Ok(Action {
        id: ActionId(get_text(row, "id")?),
        row_snapshot,
        row_key: get_text(row, "row_key")?,
        routing_team: get_text(row, "routing_team")?,
        issue_type: get_text(row, "issue_type")?,
        site_code: get_opt_text(row, "site_code")?,
        assigned_to_user_id: get_text(row, "assigned_to_user_id")?,
        assigned_to_role: get_text(row, "assigned_to_role")?,
        assigned_to_division: get_opt_text(row, "assigned_to_division")?,
        assigned_to_vendor: get_opt_text(row, "assigned_to_vendor")?,
        assigned_by_user_id: get_text(row, "assigned_by_user_id")?,
        assigned_by_role: get_text(row, "assigned_by_role")?,
        source_file_id: get_text(row, "source_file_id")?,
        status: ActionStatus::parse(&status_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_str}`")))?,
        priority: ActionPriority::parse(&priority_str).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown priority `{priority_str}`"))
        })?,
        remarks,
        photo_refs,
        state_version: state_version as u32,
        created_at: parse_timestamp(&get_text(row, "created_at")?),
        updated_at: parse_timestamp(&get_text(row, "updated_at")?),
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl ActionRepository for SqlActionRepository {
    async fn find_by_id(&self, id: &ActionId) -> Result<Option<Action>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn insert(&self, action: Action) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO action (
                id, row_snapshot, row_key, routing_team, issue_type, site_code,
                assigned_to_user_id, assigned_to_role, assigned_to_division,
                assigned_to_vendor, assigned_by_user_id, assigned_by_role,
                source_file_id, status, priority, remarks, photo_refs,
                state_version, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&action.id.0)
        .bind(encode_json(&action.row_snapshot)?)
        .bind(&action.row_key)
        .bind(&action.routing_team)
        .bind(&action.issue_type)
        .bind(action.site_code.as_deref())
        .bind(&action.assigned_to_user_id)
        .bind(&action.assigned_to_role)
        .bind(action.assigned_to_division.as_deref())
        .bind(action.assigned_to_vendor.as_deref())
        .bind(&action.assigned_by_user_id)
        .bind(&action.assigned_by_role)
        .bind(&action.source_file_id)
        .bind(action.status.as_str())
        .bind(action.priority.as_str())
        .bind(encode_json(&action.remarks)?)
        .bind(encode_json(&action.photo_refs)?)
        .bind(i64::from(action.state_version))
        .bind(action.created_at.to_rfc3339())
        .bind(action.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        action: Action,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE action SET
                row_snapshot = ?,
                routing_team = ?,
                issue_type = ?,
                site_code = ?,
                assigned_to_user_id = ?,
                assigned_to_role = ?,
                assigned_to_division = ?,
                assigned_to_vendor = ?,
                status = ?,
                priority = ?,
                remarks = ?,
                photo_refs = ?,
                state_version = ?,
                updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(encode_json(&action.row_snapshot)?)
        .bind(&action.routing_team)
        .bind(&action.issue_type)
        .bind(action.site_code.as_deref())
        .bind(&action.assigned_to_user_id)
        .bind(&action.assigned_to_role)
        .bind(action.assigned_to_division.as_deref())
        .bind(action.assigned_to_vendor.as_deref())
        .bind(action.status.as_str())
        .bind(action.priority.as_str())
        .bind(encode_json(&action.remarks)?)
        .bind(encode_json(&action.photo_refs)?)
        .bind(i64::from(action.state_version))
        .bind(action.updated_at.to_rfc3339())
        .bind(&action.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &ActionId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM action WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Action>, RepositoryError> {
        let rows = if include_completed {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE assigned_to_user_id = ? ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE assigned_to_user_id = ? AND status != 'completed'
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_action).collect()
    }

    async fn find_open_by_site_vendor(
        &self,
        site_code: &str,
        role: &str,
        vendor: &str,
    ) -> Result<Vec<Action>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE site_code = ? AND assigned_to_role = ? AND assigned_to_vendor = ?
               AND status != 'completed'
             ORDER BY created_at ASC"
        ))
        .bind(site_code)
        .bind(role)
        .bind(vendor)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_action).collect()
    }

    async fn find_open_by_file_row(
        &self,
        source_file_id: &str,
        row_key: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE source_file_id = ? AND row_key = ? AND status != 'completed'
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(source_file_id)
        .bind(row_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn find_open_by_site_assignee(
        &self,
        site_code: &str,
        user_id: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE site_code = ? AND assigned_to_user_id = ? AND status != 'completed'
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(site_code)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn find_open_by_site_role(
        &self,
        site_code: &str,
        role: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE site_code = ? AND assigned_to_role = ? AND status != 'completed'
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(site_code)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_action).transpose()
    }

    async fn find_open_by_site(
        &self,
        site_code: &str,
    ) -> Result<Option<Action>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE site_code = ? AND status != 'completed'
             ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(site_code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_action).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use faultdesk_core::domain::action::{Action, ActionId, ActionPriority, ActionStatus};

    use super::SqlActionRepository;
    use crate::repositories::ActionRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_action(id: &str, site: &str) -> Action {
        let now = Utc::now();
        Action {
            id: ActionId(id.to_string()),
            row_snapshot: BTreeMap::from([
                ("site code".to_string(), site.to_string()),
                ("fault".to_string(), "battery low".to_string()),
            ]),
            row_key: format!("row-{id}"),
            routing_team: "AMC".to_string(),
            issue_type: "battery fault".to_string(),
            site_code: Some(site.to_string()),
            assigned_to_user_id: "u-tech".to_string(),
            assigned_to_role: "amc_technician".to_string(),
            assigned_to_division: None,
            assigned_to_vendor: Some("northgrid".to_string()),
            assigned_by_user_id: "u-control".to_string(),
            assigned_by_role: "controller".to_string(),
            source_file_id: "file-1".to_string(),
            status: ActionStatus::Pending,
            priority: ActionPriority::Normal,
            remarks: vec!["initial report".to_string()],
            photo_refs: Vec::new(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = setup().await;
        let repo = SqlActionRepository::new(pool);
        let action = sample_action("ACT-1", "3W2872");

        repo.insert(action.clone()).await.expect("insert");
        let found = repo
            .find_by_id(&ActionId("ACT-1".to_string()))
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found.id, action.id);
        assert_eq!(found.site_code.as_deref(), Some("3W2872"));
        assert_eq!(found.remarks, vec!["initial report".to_string()]);
        assert_eq!(found.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_version() {
        let pool = setup().await;
        let repo = SqlActionRepository::new(pool);
        let action = sample_action("ACT-1", "3W2872");
        repo.insert(action.clone()).await.expect("insert");

        let mut updated = action.clone();
        updated.status = ActionStatus::InProgress;
        updated.state_version = 2;
        updated.updated_at = Utc::now();

        assert!(repo.update(updated.clone(), 1).await.expect("first write matches"));
        // Same expected version again: the guard must miss.
        assert!(!repo.update(updated, 1).await.expect("stale write misses"));
    }

    #[tokio::test]
    async fn open_site_queries_skip_completed_actions() {
        let pool = setup().await;
        let repo = SqlActionRepository::new(pool);

        let mut done = sample_action("ACT-1", "3W2872");
        done.status = ActionStatus::Completed;
        repo.insert(done).await.expect("insert completed");
        repo.insert(sample_action("ACT-2", "3W2872")).await.expect("insert open");

        let open = repo
            .find_open_by_site("3W2872")
            .await
            .expect("query")
            .expect("one open action remains");
        assert_eq!(open.id.0, "ACT-2");

        let by_vendor = repo
            .find_open_by_site_vendor("3W2872", "amc_technician", "northgrid")
            .await
            .expect("query");
        assert_eq!(by_vendor.len(), 1);
    }

    #[tokio::test]
    async fn list_for_user_filters_completed_by_default() {
        let pool = setup().await;
        let repo = SqlActionRepository::new(pool);

        repo.insert(sample_action("ACT-1", "3W2872")).await.expect("insert");
        let mut done = sample_action("ACT-2", "9K1001");
        done.status = ActionStatus::Completed;
        repo.insert(done).await.expect("insert completed");

        let open = repo.list_for_user("u-tech", false).await.expect("list open");
        assert_eq!(open.len(), 1);

        let all = repo.list_for_user("u-tech", true).await.expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let pool = setup().await;
        let repo = SqlActionRepository::new(pool);
        repo.insert(sample_action("ACT-1", "3W2872")).await.expect("insert");

        assert!(repo.delete(&ActionId("ACT-1".to_string())).await.expect("delete"));
        assert!(repo
            .find_by_id(&ActionId("ACT-1".to_string()))
            .await
            .expect("find")
            .is_none());
        assert!(!repo.delete(&ActionId("ACT-1".to_string())).await.expect("second delete"));
    }
}
