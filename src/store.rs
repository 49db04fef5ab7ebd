//! Credential, session and audit persistence.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE game_credential (
//!     id INTEGER PRIMARY KEY,
//!     team_id INTEGER NOT NULL,
//!     game_id INTEGER NOT NULL,
//!     username TEXT NOT NULL,
//!     password TEXT NOT NULL,
//!     created_at INTEGER NOT NULL,
//!     UNIQUE (team_id, game_id)
//! );
//!
//! CREATE TABLE session (
//!     id INTEGER PRIMARY KEY,
//!     user_id INTEGER NOT NULL,
//!     game_credential_id INTEGER NOT NULL,
//!     session_token TEXT,
//!     session_data TEXT,            -- serialized browser-session state
//!     is_active INTEGER NOT NULL,
//!     expires_at INTEGER,
//!     created_at INTEGER NOT NULL,
//!     FOREIGN KEY (game_credential_id)
//!         REFERENCES game_credential(id) ON DELETE CASCADE
//! );
//!
//! CREATE TABLE game_action_status (   -- append-only audit log
//!     id INTEGER PRIMARY KEY,
//!     team_id INTEGER NOT NULL,
//!     game_id INTEGER NOT NULL,
//!     action TEXT NOT NULL,
//!     status TEXT NOT NULL,           -- 'success', 'fail', 'unknown'
//!     inputs TEXT,
//!     execution_time_secs REAL,
//!     message TEXT,
//!     updated_at INTEGER NOT NULL
//! );
//! ```
//!
//! Session expiry is detected lazily: `check_session` flips `is_active`
//! off when it reads an expired row, there is no background sweep.

use crate::job::{now_millis, AuditStatus};
use anyhow::{Context as AnyhowContext, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stored login credential for one team+game panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCredential {
    pub id: i64,
    pub team_id: i64,
    pub game_id: i64,
    pub username: String,
    pub password: String,
    pub created_ms: u64,
}

/// Persisted login/session state, reusable across jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub user_id: i64,
    pub game_credential_id: i64,
    pub session_token: Option<String>,
    pub session_data: Option<String>,
    pub is_active: bool,
    pub expires_ms: Option<u64>,
    pub created_ms: u64,
}

/// One row of the append-only action audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAudit {
    pub team_id: i64,
    pub game_id: i64,
    pub action: String,
    pub status: AuditStatus,
    pub inputs: String,
    pub execution_time_secs: f64,
    pub message: String,
    pub updated_ms: u64,
}

/// SQLite-backed store for credentials, sessions and the audit log.
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS game_credential (
                id INTEGER PRIMARY KEY,
                team_id INTEGER NOT NULL,
                game_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (team_id, game_id)
            );

            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                game_credential_id INTEGER NOT NULL,
                session_token TEXT,
                session_data TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (game_credential_id)
                    REFERENCES game_credential(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS game_action_status (
                id INTEGER PRIMARY KEY,
                team_id INTEGER NOT NULL,
                game_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                inputs TEXT,
                execution_time_secs REAL,
                message TEXT,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Insert or update the credential for a team+game.
    pub fn upsert_credential(
        &self,
        team_id: i64,
        game_id: i64,
        username: &str,
        password: &str,
    ) -> Result<GameCredential> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_credential (team_id, game_id, username, password, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (team_id, game_id)
             DO UPDATE SET username = excluded.username, password = excluded.password",
            params![team_id, game_id, username, password, now_millis() as i64],
        )
        .context("Failed to upsert credential")?;

        conn.query_row(
            "SELECT id, team_id, game_id, username, password, created_at
             FROM game_credential WHERE team_id = ?1 AND game_id = ?2",
            params![team_id, game_id],
            Self::credential_from_row,
        )
        .context("Failed to read back credential")
    }

    pub fn get_credential(&self, team_id: i64, game_id: i64) -> Result<Option<GameCredential>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, team_id, game_id, username, password, created_at
             FROM game_credential WHERE team_id = ?1 AND game_id = ?2",
            params![team_id, game_id],
            Self::credential_from_row,
        )
        .optional()
        .context("Failed to query credential")
    }

    pub fn get_credential_by_id(&self, id: i64) -> Result<Option<GameCredential>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, team_id, game_id, username, password, created_at
             FROM game_credential WHERE id = ?1",
            params![id],
            Self::credential_from_row,
        )
        .optional()
        .context("Failed to query credential")
    }

    /// Delete a credential; sessions cascade away with it.
    pub fn delete_credential(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM game_credential WHERE id = ?1", params![id])
            .context("Failed to delete credential")?;
        Ok(())
    }

    fn credential_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GameCredential> {
        Ok(GameCredential {
            id: row.get(0)?,
            team_id: row.get(1)?,
            game_id: row.get(2)?,
            username: row.get(3)?,
            password: row.get(4)?,
            created_ms: row.get::<_, i64>(5)? as u64,
        })
    }

    /// Refresh the session row for (user, credential), or insert one.
    ///
    /// Keeps the invariant of at most one active session row per pair:
    /// an existing row is updated in place (token, payload, reactivated,
    /// expiry extended) rather than duplicated.
    pub fn get_or_create_session(
        &self,
        user_id: i64,
        game_credential_id: i64,
        session_token: Option<&str>,
        session_data: Option<&str>,
        ttl: Duration,
    ) -> Result<SessionRecord> {
        let now = now_millis() as i64;
        let expires_at = now + ttl.as_millis() as i64;
        let conn = self.conn.lock().unwrap();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM session WHERE user_id = ?1 AND game_credential_id = ?2",
                params![user_id, game_credential_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query session")?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE session
                     SET session_token = ?1, session_data = ?2, is_active = 1, expires_at = ?3
                     WHERE id = ?4",
                    params![session_token, session_data, expires_at, id],
                )
                .context("Failed to refresh session")?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO session
                     (user_id, game_credential_id, session_token, session_data,
                      is_active, expires_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)",
                    params![user_id, game_credential_id, session_token, session_data, expires_at, now],
                )
                .context("Failed to insert session")?;
                conn.last_insert_rowid()
            }
        };

        conn.query_row(
            "SELECT id, user_id, game_credential_id, session_token, session_data,
                    is_active, expires_at, created_at
             FROM session WHERE id = ?1",
            params![id],
            Self::session_from_row,
        )
        .context("Failed to read back session")
    }

    /// Whether a non-expired, active session exists for the credential.
    ///
    /// An expired row is deactivated as a side effect of this read before
    /// `false` is reported.
    pub fn check_session(&self, game_credential_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT id, expires_at FROM session
                 WHERE game_credential_id = ?1 AND is_active = 1
                 ORDER BY created_at DESC LIMIT 1",
                params![game_credential_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        let Some((id, expires_at)) = row else {
            return Ok(false);
        };

        if let Some(expires_at) = expires_at {
            if expires_at <= now_millis() as i64 {
                conn.execute(
                    "UPDATE session SET is_active = 0 WHERE id = ?1",
                    params![id],
                )
                .context("Failed to deactivate expired session")?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deactivate the session rows for a credential (logout).
    pub fn deactivate_session(&self, game_credential_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE session SET is_active = 0 WHERE game_credential_id = ?1",
            params![game_credential_id],
        )
        .context("Failed to deactivate session")?;
        Ok(())
    }

    /// Latest session row for a credential, regardless of state.
    pub fn session_row(&self, game_credential_id: i64) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, game_credential_id, session_token, session_data,
                    is_active, expires_at, created_at
             FROM session WHERE game_credential_id = ?1
             ORDER BY created_at DESC LIMIT 1",
            params![game_credential_id],
            Self::session_from_row,
        )
        .optional()
        .context("Failed to query session")
    }

    fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            game_credential_id: row.get(2)?,
            session_token: row.get(3)?,
            session_data: row.get(4)?,
            is_active: row.get::<_, i64>(5)? != 0,
            expires_ms: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
            created_ms: row.get::<_, i64>(7)? as u64,
        })
    }

    /// Append one audit row. The log is never updated after insert.
    pub fn record_action(&self, audit: &ActionAudit) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO game_action_status
             (team_id, game_id, action, status, inputs, execution_time_secs, message, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                audit.team_id,
                audit.game_id,
                audit.action,
                audit.status.to_string(),
                audit.inputs,
                audit.execution_time_secs,
                audit.message,
                audit.updated_ms as i64,
            ],
        )
        .context("Failed to record action audit")?;
        Ok(())
    }

    /// Most recent audit rows for a team, newest first.
    pub fn latest_actions(&self, team_id: i64, limit: usize) -> Result<Vec<ActionAudit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT team_id, game_id, action, status, inputs,
                        execution_time_secs, message, updated_at
                 FROM game_action_status WHERE team_id = ?1
                 ORDER BY updated_at DESC, id DESC LIMIT ?2",
            )
            .context("Failed to prepare audit query")?;

        let rows = stmt
            .query_map(params![team_id, limit as i64], |row| {
                let status: String = row.get(3)?;
                Ok(ActionAudit {
                    team_id: row.get(0)?,
                    game_id: row.get(1)?,
                    action: row.get(2)?,
                    status: status.parse().unwrap_or(AuditStatus::Unknown),
                    inputs: row.get(4)?,
                    execution_time_secs: row.get(5)?,
                    message: row.get(6)?,
                    updated_ms: row.get::<_, i64>(7)? as u64,
                })
            })
            .context("Failed to query audit rows")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
