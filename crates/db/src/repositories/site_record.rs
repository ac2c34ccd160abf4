use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use faultdesk_core::domain::site_record::{
    CcrStatus, ObservationStatus, SiteRecord, SiteRecordKey,
};

use super::{RepositoryError, SiteRecordRepository};
use crate::DbPool;

pub struct SqlSiteRecordRepository {
    pool: DbPool,
}

impl SqlSiteRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT
        file_id, row_key, site_code, owner_user_id, original_user_id,
        observation, ccr_status, task_status, provenance, state_version,
        created_at, updated_at
     FROM site_record";

fn get_text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_record(row: &SqliteRow) -> Result<SiteRecord, RepositoryError> {
    let ccr_str = get_text(row, "ccr_status")?;
    let state_version: i64 =
        row.try_get("state_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(SiteRecord {
        key: SiteRecordKey::new(get_text(row, "file_id")?, get_text(row, "row_key")?),
        site_code: get_text(row, "site_code")?,
        owner_user_id: get_text(row, "owner_user_id")?,
        original_user_id: get_text(row, "original_user_id")?,
        // Stored in the legacy encoding: empty string means resolved.
        observation: ObservationStatus::parse_legacy(&get_text(row, "observation")?),
        ccr_status: CcrStatus::parse(&ccr_str)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown ccr_status `{ccr_str}`")))?,
        task_status: get_text(row, "task_status")?,
        provenance: get_text(row, "provenance")?,
        state_version: state_version as u32,
        created_at: parse_timestamp(&get_text(row, "created_at")?),
        updated_at: parse_timestamp(&get_text(row, "updated_at")?),
    })
}

#[async_trait::async_trait]
impl SiteRecordRepository for SqlSiteRecordRepository {
    async fn find_by_key(
        &self,
        key: &SiteRecordKey,
    ) -> Result<Option<SiteRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE file_id = ? AND row_key = ?"))
            .bind(&key.file_id)
            .bind(&key.row_key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: SiteRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO site_record (
                file_id, row_key, site_code, owner_user_id, original_user_id,
                observation, ccr_status, task_status, provenance, state_version,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.key.file_id)
        .bind(&record.key.row_key)
        .bind(&record.site_code)
        .bind(&record.owner_user_id)
        .bind(&record.original_user_id)
        .bind(record.observation.as_legacy_str())
        .bind(record.ccr_status.as_str())
        .bind(&record.task_status)
        .bind(&record.provenance)
        .bind(i64::from(record.state_version))
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(
        &self,
        record: SiteRecord,
        expected_version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE site_record SET
                site_code = ?,
                owner_user_id = ?,
                observation = ?,
                ccr_status = ?,
                task_status = ?,
                provenance = ?,
                state_version = ?,
                updated_at = ?
             WHERE file_id = ? AND row_key = ? AND state_version = ?",
        )
        .bind(&record.site_code)
        .bind(&record.owner_user_id)
        .bind(record.observation.as_legacy_str())
        .bind(record.ccr_status.as_str())
        .bind(&record.task_status)
        .bind(&record.provenance)
        .bind(i64::from(record.state_version))
        .bind(record.updated_at.to_rfc3339())
        .bind(&record.key.file_id)
        .bind(&record.key.row_key)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        include_approved: bool,
    ) -> Result<Vec<SiteRecord>, RepositoryError> {
        let rows = if include_approved {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE owner_user_id = ? ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "{SELECT_COLUMNS} WHERE owner_user_id = ? AND ccr_status != 'approved'
                 ORDER BY created_at DESC"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_record).collect()
    }

    async fn list_for_site(&self, site_code: &str) -> Result<Vec<SiteRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE site_code = ? ORDER BY created_at ASC"
        ))
        .bind(site_code)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn set_ccr_status(
        &self,
        site_code: &str,
        status: CcrStatus,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE site_record SET
                ccr_status = ?,
                state_version = state_version + 1,
                updated_at = ?
             WHERE site_code = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(site_code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use faultdesk_core::domain::site_record::{
        CcrStatus, ObservationStatus, SiteRecord, SiteRecordKey,
    };

    use super::SqlSiteRecordRepository;
    use crate::repositories::SiteRecordRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_record(row_key: &str, owner: &str) -> SiteRecord {
        let now = Utc::now();
        SiteRecord {
            key: SiteRecordKey::new("file-1", row_key),
            site_code: "3W2872".to_string(),
            owner_user_id: owner.to_string(),
            original_user_id: owner.to_string(),
            observation: ObservationStatus::Pending,
            ccr_status: CcrStatus::None,
            task_status: "routed".to_string(),
            provenance: "routing".to_string(),
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip_preserves_legacy_observation_encoding() {
        let pool = setup().await;
        let repo = SqlSiteRecordRepository::new(pool.clone());

        let mut record = sample_record("row-1", "u-control");
        record.observation = ObservationStatus::Resolved;
        repo.insert(record.clone()).await.expect("insert");

        // The stored cell must be the historical empty string.
        let raw: String =
            sqlx::query_scalar("SELECT observation FROM site_record WHERE row_key = 'row-1'")
                .fetch_one(&pool)
                .await
                .expect("raw read");
        assert_eq!(raw, "");

        let found = repo
            .find_by_key(&SiteRecordKey::new("file-1", "row-1"))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.observation, ObservationStatus::Resolved);
    }

    #[tokio::test]
    async fn duplicate_composite_key_is_rejected() {
        let pool = setup().await;
        let repo = SqlSiteRecordRepository::new(pool);

        repo.insert(sample_record("row-1", "u-control")).await.expect("first insert");
        let error = repo
            .insert(sample_record("row-1", "u-other"))
            .await
            .expect_err("composite key is unique");
        assert!(error.is_unique_violation());
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_version() {
        let pool = setup().await;
        let repo = SqlSiteRecordRepository::new(pool);
        let record = sample_record("row-1", "u-control");
        repo.insert(record.clone()).await.expect("insert");

        let mut updated = record.clone();
        updated.owner_user_id = "u-tech".to_string();
        updated.state_version = 2;
        updated.updated_at = Utc::now();

        assert!(repo.update(updated.clone(), 1).await.expect("first write"));
        assert!(!repo.update(updated, 1).await.expect("stale write misses"));
    }

    #[tokio::test]
    async fn approved_records_drop_out_of_default_listing() {
        let pool = setup().await;
        let repo = SqlSiteRecordRepository::new(pool);

        repo.insert(sample_record("row-1", "u-control")).await.expect("insert 1");
        repo.insert(sample_record("row-2", "u-control")).await.expect("insert 2");

        let touched = repo.set_ccr_status("3W2872", CcrStatus::Approved).await.expect("stamp");
        assert_eq!(touched, 2);

        let active = repo.list_for_user("u-control", false).await.expect("active list");
        assert!(active.is_empty());

        let all = repo.list_for_user("u-control", true).await.expect("full list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.ccr_status == CcrStatus::Approved));
    }
}
