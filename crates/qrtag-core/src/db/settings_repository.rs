//! Settings repository implementation
//!
//! Small key/value table for the signed-in session and sync bookkeeping.

use libsql::Connection;

use crate::error::{Error, Result};
use crate::remote::Session;

const KEY_SESSION_TOKEN: &str = "session_token";
const KEY_SESSION_EMAIL: &str = "session_email";
const KEY_LAST_SYNC_AT: &str = "last_sync_at";

/// Trait for settings storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SettingsRepository {
    /// Load the persisted session, if any
    async fn load_session(&self) -> Result<Option<Session>>;

    async fn save_session(&self, session: &Session) -> Result<()>;

    async fn clear_session(&self) -> Result<()>;

    /// Completion time of the last successful pass (Unix ms)
    async fn last_sync_at(&self) -> Result<Option<i64>>;

    async fn set_last_sync_at(&self, timestamp: i64) -> Result<()>;
}

/// libSQL implementation of `SettingsRepository`
pub struct LibSqlSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for LibSqlSettingsRepository<'_> {
    async fn load_session(&self) -> Result<Option<Session>> {
        let token = self.get_setting(KEY_SESSION_TOKEN).await?;
        let email = self.get_setting(KEY_SESSION_EMAIL).await?;

        Ok(match (token, email) {
            (Some(token), Some(email)) if !token.trim().is_empty() => Some(Session { token, email }),
            _ => None,
        })
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.set_setting(KEY_SESSION_TOKEN, &session.token).await?;
        self.set_setting(KEY_SESSION_EMAIL, &session.email).await?;
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM settings WHERE key IN (?1, ?2)",
                [KEY_SESSION_TOKEN, KEY_SESSION_EMAIL],
            )
            .await?;
        Ok(())
    }

    async fn last_sync_at(&self) -> Result<Option<i64>> {
        let Some(value) = self.get_setting(KEY_LAST_SYNC_AT).await? else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|_| Error::Database(format!("invalid {KEY_LAST_SYNC_AT} value '{value}'")))
    }

    async fn set_last_sync_at(&self, timestamp: i64) -> Result<()> {
        self.set_setting(KEY_LAST_SYNC_AT, &timestamp.to_string())
            .await
    }
}

impl LibSqlSettingsRepository<'_> {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}
