//! SQLite-backed flag store — for hosts that already keep app state in
//! SQLite and want the alarm flag next to it.

use std::path::Path;
use std::sync::Mutex;

use alarmclaw_core::error::StoreError;
use alarmclaw_core::traits::FlagStore;
use alarmclaw_core::types::AlarmFlag;
use chrono::{DateTime, Utc};

/// Row key of the single "last fired alarm" flag.
const ALARM_FLAG_KEY: &str = "alarm_flag";

/// SQLite flag store.
pub struct SqliteFlagStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteFlagStore {
    /// Open or create the flag database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS alarm_flags (
                key TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                recorded_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| StoreError::Backend(format!("Migration: {e}")))
    }
}

impl FlagStore for SqliteFlagStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn set(&self, event_id: &str, payload: &[u8]) -> Result<(), StoreError> {
        let flag = AlarmFlag::new(event_id, payload);
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO alarm_flags (key, event_id, payload, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    ALARM_FLAG_KEY,
                    flag.event_id,
                    flag.payload,
                    flag.recorded_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::Backend(format!("Save flag: {e}")))?;
        Ok(())
    }

    fn get(&self) -> Result<Option<AlarmFlag>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT event_id, payload, recorded_at FROM alarm_flags WHERE key = ?1")
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?;
        let mut rows = stmt
            .query(rusqlite::params![ALARM_FLAG_KEY])
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?;

        let Some(row) = rows
            .next()
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?
        else {
            return Ok(None);
        };

        let event_id: String = row
            .get(0)
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?;
        let payload: Vec<u8> = row
            .get(1)
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?;
        let recorded_at: String = row
            .get(2)
            .map_err(|e| StoreError::Backend(format!("Load flag: {e}")))?;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!("⚠️ Bad recorded_at '{recorded_at}' in alarm flag: {e}");
                Utc::now()
            });

        Ok(Some(AlarmFlag {
            event_id,
            payload,
            recorded_at,
        }))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM alarm_flags WHERE key = ?1",
                rusqlite::params![ALARM_FLAG_KEY],
            )
            .map_err(|e| StoreError::Backend(format!("Clear flag: {e}")))?;
        Ok(())
    }
}
