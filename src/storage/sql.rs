//! SQL-backed core storage (SQLite or Postgres)
//!
//! Alert records live in one table keyed by name; checkouts are served from
//! an in-process arena loaded at open time, and every commit is upserted
//! before the checkout ends. KV operations go straight to the database.
//! Timestamps are stored as Unix milliseconds so both backends share one
//! schema.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::any::{AnyConnectOptions, AnyPool, AnyPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;

use super::alert::{Alert, AlertArena, AlertHandle};
use super::{AlertStore, CoreStorage, KvStore, StorageError};
use crate::alerts::Level;
use crate::config::{
    is_identifier, PostgresConnection, PostgresStorageConfig, SqlTables, SqliteStorageConfig,
};

const MAX_CONNECTIONS: u32 = 5;

type AlertRow = (String, i64, i64, i64, i64);

pub struct SqlStorage {
    name: String,
    kind: &'static str,
    pool: AnyPool,
    alerts: Arc<SqlAlertStore>,
    kv: Arc<SqlKvStore>,
}

impl SqlStorage {
    pub async fn sqlite(config: &SqliteStorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        Self::open(
            &config.name,
            "sqlite",
            AnyConnectOptions::from(options),
            &config.tables,
            config.timeout,
        )
        .await
    }

    pub async fn postgres(config: &PostgresStorageConfig) -> Result<Self, StorageError> {
        let options = postgres_options(&config.connection).map_err(StorageError::Config)?;
        Self::open(
            &config.name,
            "postgres",
            AnyConnectOptions::from(options),
            &config.tables,
            config.connection.timeout,
        )
        .await
    }

    /// Connect, create missing tables and load the alert records
    pub async fn open(
        name: &str,
        kind: &'static str,
        options: AnyConnectOptions,
        tables: &SqlTables,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        for table in [&tables.table_alerts, &tables.table_kv] {
            if !is_identifier(table) {
                return Err(StorageError::Config(format!("invalid table name '{}'", table)));
            }
        }

        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(timeout)
            .connect_with(options)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                level BIGINT NOT NULL,
                count BIGINT NOT NULL,
                last_change BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )",
            tables.table_alerts
        ))
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, value TEXT NOT NULL)",
            tables.table_kv
        ))
        .execute(&pool)
        .await?;

        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT name, level, count, last_change, updated_at FROM {}",
            tables.table_alerts
        ))
        .fetch_all(&pool)
        .await?;
        let alerts = rows
            .into_iter()
            .map(alert_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            storage = %name,
            kind,
            alerts = alerts.len(),
            "Loaded SQL storage"
        );

        Ok(Self {
            name: name.to_string(),
            kind,
            alerts: Arc::new(SqlAlertStore {
                arena: AlertArena::with_records(alerts),
                pool: pool.clone(),
                upsert: format!(
                    "INSERT INTO {} (name, level, count, last_change, updated_at)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (name) DO UPDATE SET
                        level = excluded.level,
                        count = excluded.count,
                        last_change = excluded.last_change,
                        updated_at = excluded.updated_at",
                    tables.table_alerts
                ),
            }),
            kv: Arc::new(SqlKvStore {
                pool: pool.clone(),
                table: tables.table_kv.clone(),
            }),
            pool,
        })
    }
}

/// Build Postgres connection options from config
pub(crate) fn postgres_options(conn: &PostgresConnection) -> Result<PgConnectOptions, String> {
    let mut options = PgConnectOptions::new()
        .host(&conn.host)
        .port(conn.port)
        .username(&conn.username)
        .password(&conn.password);
    if !conn.database.is_empty() {
        options = options.database(&conn.database);
    }
    if let Some(mode) = &conn.ssl_mode {
        let mode = PgSslMode::from_str(mode).map_err(|e| format!("ssl_mode '{}': {}", mode, e))?;
        options = options.ssl_mode(mode);
    }
    if let Some(path) = &conn.ssl_cert_path {
        options = options.ssl_root_cert(path);
    }
    Ok(options)
}

fn alert_from_row(row: AlertRow) -> Result<Alert, StorageError> {
    let (name, level, count, last_change, updated_at) = row;
    let level = Level::from_i64(level).ok_or_else(|| {
        StorageError::Serialization(format!("alert '{}': unknown level {}", name, level))
    })?;
    Ok(Alert {
        level,
        count: count.max(0) as u64,
        last_change: from_millis(&name, last_change)?,
        updated_at: from_millis(&name, updated_at)?,
        name,
    })
}

fn from_millis(name: &str, millis: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        StorageError::Serialization(format!("alert '{}': bad timestamp {}", name, millis))
    })
}

#[async_trait]
impl CoreStorage for SqlStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn alert(&self) -> Arc<dyn AlertStore> {
        Arc::clone(&self.alerts) as Arc<dyn AlertStore>
    }

    fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv) as Arc<dyn KvStore>
    }

    async fn stop(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

struct SqlAlertStore {
    arena: AlertArena,
    pool: AnyPool,
    upsert: String,
}

#[async_trait]
impl AlertStore for SqlAlertStore {
    async fn get_or_new(&self, name: &str) -> Result<AlertHandle, StorageError> {
        Ok(self.arena.checkout(name).await)
    }

    async fn release(&self, mut handle: AlertHandle) -> Result<(), StorageError> {
        let alert = handle.commit();
        let written = sqlx::query(&self.upsert)
            .bind(alert.name.as_str())
            .bind(alert.level.as_i64())
            .bind(alert.count as i64)
            .bind(alert.last_change.timestamp_millis())
            .bind(alert.updated_at.timestamp_millis())
            .execute(&self.pool)
            .await;

        if let Err(e) = written {
            handle.rollback();
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Alert>, StorageError> {
        Ok(self.arena.snapshot(name).await)
    }

    async fn all(&self) -> Result<Vec<Alert>, StorageError> {
        Ok(self.arena.snapshot_all().await)
    }
}

struct SqlKvStore {
    pool: AnyPool,
    table: String,
}

#[async_trait]
impl KvStore for SqlKvStore {
    async fn all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(&format!("SELECT name, value FROM {}", self.table))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar(&format!("SELECT value FROM {} WHERE name = $1", self.table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (name, value) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
            self.table
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::KeyExists(key.to_string()));
        }
        Ok(())
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "INSERT INTO {} (name, value) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
            self.table
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sqlite_config(path: &Path) -> SqliteStorageConfig {
        SqliteStorageConfig {
            name: "local".to_string(),
            path: path.join("state.db"),
            tables: SqlTables::default(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_alerts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = sqlite_config(dir.path());

        {
            let storage = SqlStorage::sqlite(&config).await.unwrap();
            let alerts = storage.alert();

            let mut handle = alerts.get_or_new("db/replica lag").await.unwrap();
            handle.update_level(Level::Warning);
            alerts.release(handle).await.unwrap();

            let mut handle = alerts.get_or_new("db/replica lag").await.unwrap();
            handle.inc();
            handle.inc();
            alerts.release(handle).await.unwrap();
            storage.stop().await.unwrap();
        }

        let storage = SqlStorage::sqlite(&config).await.unwrap();
        assert_eq!(storage.kind(), "sqlite");
        let alert = storage
            .alert()
            .get("db/replica lag")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.level, Level::Warning);
        assert_eq!(alert.count, 2);
        assert_eq!(storage.alert().all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_kv_contract() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqlStorage::sqlite(&sqlite_config(dir.path())).await.unwrap();
        let kv = storage.kv();

        kv.put("last_seen", "41").await.unwrap();
        assert!(matches!(
            kv.put("last_seen", "42").await,
            Err(StorageError::KeyExists(key)) if key == "last_seen"
        ));
        kv.upsert("last_seen", "42").await.unwrap();
        kv.upsert("fresh", "1").await.unwrap();
        assert_eq!(kv.get("last_seen").await.unwrap().as_deref(), Some("42"));
        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.delete("fresh").await.unwrap();
        assert!(matches!(
            kv.delete("fresh").await,
            Err(StorageError::KeyNotFound(_))
        ));

        let all = kv.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("last_seen").map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqlStorage::sqlite(&sqlite_config(dir.path())).await.unwrap();
        let alerts = storage.alert();

        let mut handle = alerts.get_or_new("disk").await.unwrap();
        handle.update_level(Level::Error);
        alerts.release(handle).await.unwrap();

        storage.stop().await.unwrap();
        let mut handle = alerts.get_or_new("disk").await.unwrap();
        handle.update_level(Level::Success);
        assert!(alerts.release(handle).await.is_err());

        let alert = alerts.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.level, Level::Error);
    }

    #[tokio::test]
    async fn test_invalid_table_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sqlite_config(dir.path());
        config.tables.table_alerts = "alerts; drop table x".to_string();

        assert!(matches!(
            SqlStorage::sqlite(&config).await,
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_row_with_unknown_level_rejected() {
        assert!(alert_from_row(("disk".to_string(), 2, 1, 0, 0)).is_ok());
        assert!(matches!(
            alert_from_row(("disk".to_string(), 9, 1, 0, 0)),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_postgres_options() {
        let conn = PostgresConnection {
            host: "db.internal".to_string(),
            port: 6432,
            username: "tripwire".to_string(),
            password: "secret".to_string(),
            database: "alerts".to_string(),
            ssl_mode: Some("require".to_string()),
            ssl_cert_path: None,
            timeout: Duration::from_secs(5),
        };
        assert!(postgres_options(&conn).is_ok());

        let bad = PostgresConnection {
            ssl_mode: Some("sometimes".to_string()),
            ..conn
        };
        assert!(postgres_options(&bad)
            .unwrap_err()
            .contains("sometimes"));
    }
}
