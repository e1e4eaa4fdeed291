use crate::error::AppError;
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tokio_postgres::NoTls;
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(database_url: &str, max_connections: usize) -> Result<Pool, AppError> {
    run_migrations(database_url).await?;

    let mut settings = PoolSettings::new();
    settings.url = Some(database_url.to_string());
    settings.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    settings.pool = Some(PoolConfig::new(max_connections));

    info!(max_connections, "creating database pool");

    settings
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))
}

/// Apply pending migrations over a short-lived sqlx connection; queries go
/// through the deadpool pool.
pub async fn run_migrations(database_url: &str) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    MIGRATOR.run(&pool).await?;
    pool.close().await;
    info!("database migrations applied");
    Ok(())
}
