use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub type DbPool = DatabaseConnection;

/// Pool settings handed to sea-orm
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Wait for a free connection before failing the query
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(10 * 60),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        let secs = Duration::from_secs;
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: secs(cfg.db_connect_timeout_secs),
            idle_timeout: secs(cfg.db_idle_timeout_secs),
            acquire_timeout: secs(cfg.db_acquire_timeout_secs),
        }
    }
}

impl DbConfig {
    fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(self.url.clone());
        opt.max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .sqlx_logging(false);
        opt
    }
}

/// Opens the pool described by `config`.
///
/// # Errors
/// [`ServiceError::DatabaseError`] when the database is unreachable.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max = config.max_connections,
        min = config.min_connections,
        "opening database pool"
    );
    gauge!("storefront_db.max_connections", f64::from(config.max_connections));

    match Database::connect(config.connect_options()).await {
        Ok(pool) => {
            info!("database pool ready");
            Ok(pool)
        }
        Err(e) => {
            error!(error = %e, "could not open database pool");
            counter!("storefront_db.connection_failures", 1);
            Err(ServiceError::DatabaseError(e))
        }
    }
}

pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Applies every pending migration of [`crate::migrator::Migrator`]. Idempotent.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    let outcome = crate::migrator::Migrator::up(pool, None).await;
    let elapsed = started.elapsed();
    histogram!("storefront_db.migration_seconds", elapsed.as_secs_f64());

    match outcome {
        Ok(()) => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "migrations applied");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "migrations failed");
            Err(ServiceError::DatabaseError(e))
        }
    }
}

/// Round trip to the database, used by the health endpoint
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    pool.ping().await.map_err(|e| {
        error!(error = %e, "database ping failed");
        counter!("storefront_db.connection_failures", 1);
        ServiceError::DatabaseError(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_can_run_twice_on_a_fresh_database() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..DbConfig::default()
        })
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        check_connection(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_database_is_a_database_error() {
        let err = establish_connection_with_config(&DbConfig {
            url: "sqlite:///nonexistent-dir/storefront.db?mode=ro".into(),
            connect_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            ..DbConfig::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }

    #[test]
    fn pool_settings_come_from_app_config() {
        let mut cfg = AppConfig::new(
            "postgres://localhost/shop".into(),
            "x".repeat(64),
            3600,
            "127.0.0.1".into(),
            8080,
            "development".into(),
        );
        cfg.db_max_connections = 32;
        cfg.db_idle_timeout_secs = 45;

        let pool = DbConfig::from(&cfg);
        assert_eq!(pool.url, "postgres://localhost/shop");
        assert_eq!(pool.max_connections, 32);
        assert_eq!(pool.idle_timeout, Duration::from_secs(45));
        assert_eq!(pool.acquire_timeout, Duration::from_secs(8));
    }
}
