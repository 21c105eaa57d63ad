use crate::error::AppError;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

const DEFAULT_DB_FILENAME: &str = "coinboard.db";

fn resolve_db_filename() -> String {
    std::env::var("COINBOARD_DB_FILENAME")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string())
}

fn resolve_db_path(data_dir: &Path) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join(resolve_db_filename()))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Opens (creating if needed) the database under `data_dir` and applies
/// pending migrations. The filename can be overridden through
/// `COINBOARD_DB_FILENAME`.
pub async fn initialize_pool(data_dir: &Path) -> Result<SqlitePool, AppError> {
    let db_path = resolve_db_path(data_dir)?;
    initialize_pool_from_path(&db_path).await
}

/// Single-connection in-memory pool with migrations applied, shared by the
/// unit tests across modules.
#[cfg(test)]
pub async fn memory_pool() -> Result<SqlitePool, AppError> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
