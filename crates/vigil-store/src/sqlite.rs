use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, info};
use vigil_models::store_schema::STATE_TABLE_DDL;
use vigil_models::StateKey;

use crate::channel::StateChannel;
use crate::error::StateError;
use crate::hot::HotCache;
use crate::hub::BroadcastHub;

/// Where the SQLite state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    File(String),
    /// Private in-memory database. Lost on `close()`.
    InMemory,
}

/// Durable state channel: SQLite `state_entries` table with a moka hot layer
/// in front for reads. Publish/subscribe is in-process.
///
/// The connection is opened on `connect()` and dropped on `close()`.
/// Access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct SqliteStateChannel {
    location: SqliteLocation,
    conn: Mutex<Option<Connection>>,
    hot: HotCache,
    hub: BroadcastHub,
    connected: AtomicBool,
}

impl SqliteStateChannel {
    pub fn new(location: SqliteLocation, hot_capacity: u64, hot_ttl: Duration) -> Self {
        Self {
            location,
            conn: Mutex::new(None),
            hot: HotCache::new(hot_capacity, hot_ttl),
            hub: BroadcastHub::new(256),
            connected: AtomicBool::new(false),
        }
    }

    pub fn file(path: &str, hot_capacity: u64, hot_ttl: Duration) -> Self {
        Self::new(SqliteLocation::File(path.to_string()), hot_capacity, hot_ttl)
    }

    pub fn in_memory() -> Self {
        Self::new(SqliteLocation::InMemory, 1_000, Duration::from_secs(60))
    }

    fn open_connection(&self) -> Result<Connection, StateError> {
        let conn = match &self.location {
            SqliteLocation::File(path) => {
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn
            }
            SqliteLocation::InMemory => Connection::open_in_memory()?,
        };
        conn.execute_batch(STATE_TABLE_DDL)?;
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StateError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StateError::Closed),
        }
    }

    /// Delete all expired entries. Returns the number of rows deleted.
    pub fn purge_expired(&self) -> Result<usize, StateError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM state_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                rusqlite::params![now],
            )?)
        })
    }

    /// Count all rows, expired or not.
    pub fn count(&self) -> Result<usize, StateError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM state_entries", [], |row| row.get(0))?)
        })
    }

    fn read_row(&self, key: &str) -> Result<Option<(String, Option<DateTime<Utc>>)>, StateError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value_json, expires_at FROM state_entries \
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            )?;
            let row = stmt
                .query_row(rusqlite::params![key, now], |row| {
                    let json: String = row.get(0)?;
                    let expires_at: Option<String> = row.get(1)?;
                    Ok((json, expires_at))
                })
                .optional()?;

            Ok(row.map(|(json, expires_at)| {
                let expires_at = expires_at
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                (json, expires_at)
            }))
        })
    }
}

#[async_trait]
impl StateChannel for SqliteStateChannel {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn connect(&self) -> Result<(), StateError> {
        let conn = self.open_connection()?;
        {
            let mut guard = self
                .conn
                .lock()
                .map_err(|e| StateError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            *guard = Some(conn);
        }
        self.connected.store(true, Ordering::Release);

        let purged = self.purge_expired()?;
        info!(location = ?self.location, purged, "SQLite state channel connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), StateError> {
        {
            let mut guard = self
                .conn
                .lock()
                .map_err(|e| StateError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            guard.take();
        }
        self.connected.store(false, Ordering::Release);
        self.hot.invalidate_all();
        self.hub.close_all();
        debug!("SQLite state channel closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        if !self.is_connected() {
            return Err(StateError::Closed);
        }

        if let Some(json) = self.hot.get(key.as_str()).await {
            return Ok(Some(json));
        }

        match self.read_row(key.as_str())? {
            Some((json, expires_at)) => {
                self.hot
                    .insert(key.as_str().to_string(), json.clone(), expires_at)
                    .await;
                Ok(Some(json))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &StateKey,
        value_json: String,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO state_entries (key, value_json, updated_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    key.as_str(),
                    value_json,
                    now.to_rfc3339(),
                    expires_at.map(|dt| dt.to_rfc3339()),
                ],
            )?;
            Ok(())
        })?;

        self.hot
            .insert(key.as_str().to_string(), value_json, expires_at)
            .await;
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let deleted = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM state_entries WHERE key = ?1",
                rusqlite::params![key.as_str()],
            )?)
        })?;
        self.hot.invalidate(key.as_str()).await;
        Ok(deleted > 0)
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StateError> {
        if !self.is_connected() {
            return Err(StateError::Closed);
        }
        self.hub.publish(channel, message)
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StateError> {
        if !self.is_connected() {
            return Err(StateError::Closed);
        }
        self.hub.subscribe(channel)
    }
}
