//! Database lifecycle and schema migrations.

use sqlx::sqlite::SqlitePool;
use sqlx::{ConnectOptions, SqliteConnection};

use crate::error::{DatabaseError, Error, Result};

use super::Database;

impl Database {
    /// Connect to the store at `url` (e.g. `sqlite://getex.db`), creating
    /// the database file if missing, and run migrations.
    ///
    /// `debug` leaves sqlx statement logging enabled ("store echo");
    /// otherwise statements are not logged.
    pub async fn connect(url: &str, debug: bool) -> Result<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "failed to parse store url '{url}': {e}"
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        if !debug {
            options = options.disable_statement_logging();
        }

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "failed to connect to store: {e}"
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run schema migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "failed to acquire connection: {e}"
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "failed to create schema_version table: {e}"
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "failed to query schema version: {e}"
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: the `download_task` table
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("applying store migration v1");

        let migration = |e: sqlx::Error| {
            Error::Database(DatabaseError::MigrationFailed(format!("migration v1: {e}")))
        };

        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(migration)?;

        let result: Result<()> = async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS download_task (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uri TEXT NOT NULL,
                    filesize INTEGER,
                    path TEXT NOT NULL,
                    support_range BOOLEAN NOT NULL DEFAULT 0,
                    options TEXT NOT NULL DEFAULT '{}',
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    status TEXT NOT NULL DEFAULT 'downloading',
                    speed REAL
                )
                "#,
            )
            .execute(&mut *conn)
            .await
            .map_err(migration)?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_download_task_status ON download_task(status)",
            )
            .execute(&mut *conn)
            .await
            .map_err(migration)?;

            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, unixepoch())")
                .execute(&mut *conn)
                .await
                .map_err(migration)?;

            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(migration)?;
                Ok(())
            }
            Err(e) => {
                // roll back so a partial migration doesn't brick the store
                sqlx::query("ROLLBACK").execute(&mut *conn).await.ok();
                Err(e)
            }
        }
    }
}
