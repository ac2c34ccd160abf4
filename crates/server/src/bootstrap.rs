use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use faultdesk_core::audit::TracingAuditSink;
use faultdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use faultdesk_core::notify::Notifier;
use faultdesk_db::repositories::{
    SqlActionRepository, SqlApprovalRepository, SqlDirectoryRepository,
    SqlSiteRecordRepository, SqlVendorOverrideRepository,
};
use faultdesk_db::{connect_with_settings, migrations, DbPool};
use faultdesk_workflow::{CachedOverrideSet, WorkflowContext, WorkflowService};

use crate::notify::{DisabledNotifier, WebhookNotifier};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<WorkflowService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notifier initialization failed: {0}")]
    Notifier(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let policy = config.load_routing_policy()?;

    let notifier: Arc<dyn Notifier> = if config.notify.enabled {
        Arc::new(
            WebhookNotifier::from_config(&config.notify)
                .map_err(|e| BootstrapError::Notifier(e.to_string()))?,
        )
    } else {
        Arc::new(DisabledNotifier)
    };

    let overrides_repo = Arc::new(SqlVendorOverrideRepository::new(db_pool.clone()));
    let ctx = Arc::new(WorkflowContext {
        actions: Arc::new(SqlActionRepository::new(db_pool.clone())),
        approvals: Arc::new(SqlApprovalRepository::new(db_pool.clone())),
        sites: Arc::new(SqlSiteRecordRepository::new(db_pool.clone())),
        directory: Arc::new(SqlDirectoryRepository::new(db_pool.clone())),
        overrides: Arc::new(CachedOverrideSet::new(overrides_repo)),
        notifier,
        audit: Arc::new(TracingAuditSink),
        policy,
    });

    Ok(Application {
        config,
        db_pool,
        service: Arc::new(WorkflowService::new(ctx)),
    })
}

#[cfg(test)]
mod tests {
    use faultdesk_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_service() {
        let app = bootstrap(memory_options()).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('action', 'approval', 'site_record')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables exist after bootstrap");
        assert_eq!(table_count, 3, "bootstrap should expose the three workflow stores");

        let actions =
            app.service.list_my_actions("nobody", false).await.expect("service is wired");
        assert!(actions.is_empty());

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://nope/faultdesk".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }
}
