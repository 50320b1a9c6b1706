use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::IndexConfig;
use crate::error::IndexError;

/// Opens the index database at `<index.path>/index.sqlite`, creating the
/// directory and the file when absent.
pub async fn connect(index: &IndexConfig) -> Result<SqlitePool, IndexError> {
    std::fs::create_dir_all(&index.path).map_err(|source| IndexError::Directory {
        path: index.path.clone(),
        source,
    })?;

    let db_path = index.db_path();
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
