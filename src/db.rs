//! Database connection management and migrations.

use crate::error::{DbError, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Database connection bundle.
pub struct Db {
    /// SQLite pool for sessions, runs, fixes, and token usage.
    pub sqlite: SqlitePool,
}

impl Db {
    /// Connect to the database and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        let sqlite_url = format!("sqlite:{}?mode=rwc", path.display());
        let sqlite = SqlitePool::connect(&sqlite_url)
            .await
            .map_err(DbError::Query)?;

        sqlx::migrate!("./migrations")
            .run(&sqlite)
            .await
            .map_err(DbError::Migrate)?;

        Ok(Self { sqlite })
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.sqlite.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_the_database_and_applies_migrations() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let db = Db::connect(&dir.path().join("opsbot.db"))
            .await
            .expect("connect should succeed");

        // The migrated schema is queryable.
        sqlx::query("SELECT COUNT(*) FROM sessions")
            .fetch_one(&db.sqlite)
            .await
            .expect("sessions table should exist");
        sqlx::query("SELECT COUNT(*) FROM runs")
            .fetch_one(&db.sqlite)
            .await
            .expect("runs table should exist");

        db.close().await;
    }
}
