use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::models::{ChatMode, DialogInfo};

const DIALOG_INFO_KEY: &str = "cur_dialog_info";
const USER_ID_KEY: &str = "user_id";

/// Client-side state that must survive restarts. Conversations themselves
/// live on the server; only small keyed values are kept here.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }

            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;

            let store = Store {
                conn: Arc::new(Mutex::new(conn)),
            };
            store.run_migrations()?;
            Ok(store)
        })
        .await?
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
        conn.lock().map_err(|_| anyhow!("store connection lock poisoned"))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = Self::lock(&self.conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS prompt_codes (
                    conv_uid TEXT PRIMARY KEY,
                    prompt_code TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Current dialogue ---

    /// Scene and app the client was last in; default when never saved or unreadable.
    pub async fn dialog_info(&self) -> Result<DialogInfo> {
        match self.get_setting(DIALOG_INFO_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable dialog info: {}", e);
                DialogInfo::default()
            })),
            None => Ok(DialogInfo::default()),
        }
    }

    pub async fn save_dialog_info(&self, info: &DialogInfo) -> Result<()> {
        let json = serde_json::to_string(info)?;
        self.set_setting(DIALOG_INFO_KEY, &json).await
    }

    // --- User id ---

    /// The persisted client user id, generated on first use.
    pub async fn user_id(&self) -> Result<String> {
        if let Some(id) = self.get_setting(USER_ID_KEY).await? {
            if !id.is_empty() {
                return Ok(id);
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set_setting(USER_ID_KEY, &id).await?;
        tracing::info!("Generated client user id {}", id);
        Ok(id)
    }

    // --- Pending prompt codes ---

    /// Queue a prompt template for the next message of `conv_uid`.
    pub async fn set_prompt_code(&self, conv_uid: &str, prompt_code: &str) -> Result<()> {
        let conn = self.conn.clone();
        let conv_uid = conv_uid.to_string();
        let prompt_code = prompt_code.to_string();
        task::spawn_blocking(move || {
            let conn = Self::lock(&conn)?;
            conn.execute(
                "INSERT INTO prompt_codes (conv_uid, prompt_code, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(conv_uid) DO UPDATE SET prompt_code = ?2, created_at = ?3",
                params![conv_uid, prompt_code, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?
    }

    /// Prompt code for the next message. Consumed on read, except on
    /// dashboards where it applies to every message.
    pub async fn take_prompt_code(&self, conv_uid: &str, mode: &ChatMode) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let conv_uid = conv_uid.to_string();
        let keep = *mode == ChatMode::Dashboard;
        task::spawn_blocking(move || {
            let mut conn = Self::lock(&conn)?;
            let tx = conn.transaction()?;
            let code: Option<String> = tx
                .query_row(
                    "SELECT prompt_code FROM prompt_codes WHERE conv_uid = ?1",
                    params![conv_uid],
                    |row| row.get(0),
                )
                .optional()?;
            if code.is_some() && !keep {
                tx.execute(
                    "DELETE FROM prompt_codes WHERE conv_uid = ?1",
                    params![conv_uid],
                )?;
            }
            tx.commit()?;
            Ok(code)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = Store::new_in_memory().unwrap();
        assert!(store.get_setting("k").await.unwrap().is_none());

        store.set_setting("k", "a").await.unwrap();
        store.set_setting("k", "b").await.unwrap();
        assert_eq!(store.get_setting("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_dialog_info_round_trip() {
        let store = Store::new_in_memory().unwrap();
        assert_eq!(store.dialog_info().await.unwrap(), DialogInfo::default());

        let info = DialogInfo {
            chat_scene: "chat_with_db_execute".into(),
            app_code: "sales".into(),
        };
        store.save_dialog_info(&info).await.unwrap();
        assert_eq!(store.dialog_info().await.unwrap(), info);
    }

    #[tokio::test]
    async fn test_unreadable_dialog_info_falls_back() {
        let store = Store::new_in_memory().unwrap();
        store.set_setting(DIALOG_INFO_KEY, "{not json").await.unwrap();
        assert_eq!(store.dialog_info().await.unwrap(), DialogInfo::default());
    }

    #[tokio::test]
    async fn test_user_id_is_stable() {
        let store = Store::new_in_memory().unwrap();
        let first = store.user_id().await.unwrap();
        let second = store.user_id().await.unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_prompt_code_consumed_once() {
        let store = Store::new_in_memory().unwrap();
        store.set_prompt_code("c1", "sql_expert").await.unwrap();

        let first = store.take_prompt_code("c1", &ChatMode::DbExecute).await.unwrap();
        assert_eq!(first.as_deref(), Some("sql_expert"));
        assert!(store
            .take_prompt_code("c1", &ChatMode::DbExecute)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_prompt_code_kept_for_dashboard() {
        let store = Store::new_in_memory().unwrap();
        store.set_prompt_code("c1", "report").await.unwrap();

        for _ in 0..2 {
            let code = store.take_prompt_code("c1", &ChatMode::Dashboard).await.unwrap();
            assert_eq!(code.as_deref(), Some("report"));
        }
        assert!(store.take_prompt_code("c2", &ChatMode::Dashboard).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = std::env::temp_dir().join(format!("datachat-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("datachat.db");
        let store = Store::open(&path).await.unwrap();
        store.set_setting("k", "v").await.unwrap();
        drop(store);

        let reopened = Store::open(&path).await.unwrap();
        assert_eq!(reopened.get_setting("k").await.unwrap().as_deref(), Some("v"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
