//! SQLite storage engine implementation
//!
//! This module provides a SQLite-based implementation of the `StorageEngine` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Layout
//!
//! - `users`: one row per user, the monitor set stored as a JSON array
//! - `ping_rets`: one row per sample; the autoincrement id preserves append
//!   order within a server/location
//!
//! Monitor reference counts are not stored; they are derived from the users'
//! monitor sets at load time.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::engine::StorageEngine;
use super::error::{StorageError, StorageResult};
use crate::model::{PingRet, Servers, Snapshot, User, Users};

/// SQLite storage engine
///
/// Configured with the path of the database file via `load_config`; the
/// connection pool is opened by `init`.
#[derive(Debug, Default)]
pub struct SqliteEngine {
    db_path: Option<String>,
    pool: Option<Pool<Sqlite>>,
}

impl SqliteEngine {
    /// Create an unconfigured engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine configured for the database at `db_path`
    pub fn with_path(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: Some(db_path.as_ref().to_string_lossy().to_string()),
            pool: None,
        }
    }

    fn pool(&self) -> StorageResult<&Pool<Sqlite>> {
        self.pool
            .as_ref()
            .ok_or_else(|| StorageError::BackendError("SQLite engine not initialized".to_string()))
    }

    async fn connect(db_path: &str) -> StorageResult<Pool<Sqlite>> {
        info!("initializing SQLite engine at: {}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(pool)
    }

    async fn load_users(pool: &Pool<Sqlite>) -> StorageResult<Users> {
        let rows = sqlx::query("SELECT username, password, monitor_servers FROM users")
            .fetch_all(pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let username: String = row.get("username");
                let monitor_json: String = row.get("monitor_servers");
                let monitor_servers: HashSet<String> = serde_json::from_str(&monitor_json).map_err(|e| {
                    StorageError::SerializationError(format!(
                        "invalid monitor set for {username}: {e}"
                    ))
                })?;

                let user = User {
                    username: username.clone(),
                    password: row.get("password"),
                    monitor_servers,
                };
                Ok((username, user))
            })
            .collect()
    }

    async fn load_servers(pool: &Pool<Sqlite>) -> StorageResult<Servers> {
        let rows = sqlx::query(
            r#"
            SELECT server, location, time, ping
            FROM ping_rets
            ORDER BY id ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut servers = Servers::new();
        for row in rows {
            let server: String = row.get("server");
            let location: String = row.get("location");
            servers
                .entry(server)
                .or_default()
                .entry(location)
                .or_default()
                .push(PingRet {
                    time: row.get("time"),
                    ping: row.get("ping"),
                });
        }
        Ok(servers)
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    async fn load_config(&mut self, config: &str) -> StorageResult<()> {
        let path = config.trim();
        if path.is_empty() {
            return Err(StorageError::InvalidConfig(
                "SQLite engine requires a database path".to_string(),
            ));
        }
        self.db_path = Some(path.to_string());
        Ok(())
    }

    #[instrument(skip_all)]
    async fn init(&mut self) -> StorageResult<Snapshot> {
        let db_path = self.db_path.clone().ok_or_else(|| {
            StorageError::InvalidConfig("SQLite engine has no database path".to_string())
        })?;

        let pool = Self::connect(&db_path).await?;
        let users = Self::load_users(&pool).await?;
        let servers = Self::load_servers(&pool).await?;
        self.pool = Some(pool);

        info!(
            "loaded {} users and {} servers from SQLite",
            users.len(),
            servers.len()
        );
        Ok(Snapshot::from_parts(servers, users))
    }

    #[instrument(skip(self, user))]
    async fn write_user(&self, username: &str, user: &User) -> StorageResult<()> {
        let mut monitor_servers: Vec<&String> = user.monitor_servers.iter().collect();
        monitor_servers.sort();
        let monitor_json = serde_json::to_string(&monitor_servers)?;

        sqlx::query(
            r#"
            INSERT INTO users (username, password, monitor_servers)
            VALUES (?, ?, ?)
            ON CONFLICT (username) DO UPDATE SET
                password = excluded.password,
                monitor_servers = excluded.monitor_servers
            "#,
        )
        .bind(username)
        .bind(&user.password)
        .bind(monitor_json)
        .execute(self.pool()?)
        .await?;

        debug!("user record written");
        Ok(())
    }

    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn batch_write_ping_rets(
        &self,
        server: &str,
        location: &str,
        samples: &[PingRet],
    ) -> StorageResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool()?.begin().await?;

        for sample in samples {
            sqlx::query(
                r#"
                INSERT INTO ping_rets (server, location, time, ping)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(server)
            .bind(location)
            .bind(&sample.time)
            .bind(&sample.ping)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if let Some(pool) = &self.pool {
            info!("closing SQLite engine");
            pool.close().await;
        }
        Ok(())
    }
}
