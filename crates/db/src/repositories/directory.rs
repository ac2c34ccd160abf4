use sqlx::{sqlite::SqliteRow, Row};

use faultdesk_core::domain::directory::DirectoryUser;
use faultdesk_core::routing::policy::normalize_site_code;

use super::{DirectoryRepository, RepositoryError, VendorOverrideRepository};
use crate::DbPool;

pub struct SqlDirectoryRepository {
    pool: DbPool,
}

impl SqlDirectoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn get_text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_user(row: &SqliteRow) -> Result<DirectoryUser, RepositoryError> {
    let divisions_json = get_text(row, "divisions")?;
    let divisions: Vec<String> = serde_json::from_str(&divisions_json)
        .map_err(|e| RepositoryError::Decode(format!("divisions: {e}")))?;
    let active: i64 =
        row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approved: i64 =
        row.try_get("approved").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(DirectoryUser {
        user_id: get_text(row, "user_id")?,
        display_name: get_text(row, "display_name")?,
        role: get_text(row, "role")?,
        vendor: row.try_get("vendor").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        circle: row.try_get("circle").map_err(|e| RepositoryError::Decode(e.to_string()))?,
        divisions,
        active: active != 0,
        approved: approved != 0,
    })
}

#[async_trait::async_trait]
impl DirectoryRepository for SqlDirectoryRepository {
    async fn list_users(&self) -> Result<Vec<DirectoryUser>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, display_name, role, vendor, circle, divisions, active, approved
             FROM directory_user ORDER BY user_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<DirectoryUser>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, role, vendor, circle, divisions, active, approved
             FROM directory_user WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn upsert_user(&self, user: DirectoryUser) -> Result<(), RepositoryError> {
        let divisions = serde_json::to_string(&user.divisions)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO directory_user (
                user_id, display_name, role, vendor, circle, divisions, active, approved
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                vendor = excluded.vendor,
                circle = excluded.circle,
                divisions = excluded.divisions,
                active = excluded.active,
                approved = excluded.approved",
        )
        .bind(&user.user_id)
        .bind(&user.display_name)
        .bind(&user.role)
        .bind(user.vendor.as_deref())
        .bind(user.circle.as_deref())
        .bind(divisions)
        .bind(i64::from(user.active))
        .bind(i64::from(user.approved))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SqlVendorOverrideRepository {
    pool: DbPool,
}

impl SqlVendorOverrideRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl VendorOverrideRepository for SqlVendorOverrideRepository {
    async fn list_sites(&self) -> Result<Vec<String>, RepositoryError> {
        let rows =
            sqlx::query("SELECT site_code FROM vendor_override_site ORDER BY site_code ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(|row| get_text(row, "site_code")).collect()
    }

    async fn replace_all(&self, sites: Vec<String>) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM vendor_override_site").execute(&mut *tx).await?;
        for site in sites {
            sqlx::query("INSERT OR IGNORE INTO vendor_override_site (site_code) VALUES (?)")
                .bind(normalize_site_code(&site))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
