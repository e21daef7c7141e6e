//! Conversation and profile persistence.
//!
//! A small sqlite store: conversations, their messages, and a key/value user
//! profile. The rest of the system only ever calls these operations; no SQL
//! leaks out of this module. At least one conversation always exists.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::{JarvinError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Role {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationInfo {
    pub id: i64,
    pub title: String,
    pub created_at: String,
    pub messages: i64,
}

pub struct ConversationStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> JarvinError {
    JarvinError::Storage(e.to_string())
}

impl ConversationStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and as a fallback.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS conversations (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 active INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 conversation_id INTEGER NOT NULL
                     REFERENCES conversations(id) ON DELETE CASCADE,
                 role TEXT NOT NULL,
                 message TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS profile (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )
        .map_err(db_err)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_default_conversation()?;
        Ok(store)
    }

    fn ensure_default_conversation(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store poisoned");
        let existing: Option<i64> = conn
            .query_row("SELECT id FROM conversations ORDER BY id LIMIT 1", [], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO conversations (title, created_at, active) VALUES (?1, ?2, 1)",
            params!["New conversation", Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_active_conversation_id(&self) -> Result<i64> {
        {
            let conn = self.conn.lock().expect("store poisoned");
            let active: Option<i64> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE active = 1 ORDER BY id LIMIT 1",
                    [],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if let Some(id) = active {
                return Ok(id);
            }
        }
        // No active row: fall back to (or create) the default and mark it.
        let id = self.ensure_default_conversation()?;
        self.set_active_conversation(id)?;
        Ok(id)
    }

    pub fn set_active_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute("UPDATE conversations SET active = 0", [])
            .map_err(db_err)?;
        let changed = conn
            .execute("UPDATE conversations SET active = 1 WHERE id = ?1", params![id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(JarvinError::Storage(format!("no conversation with id {}", id)));
        }
        Ok(())
    }

    pub fn new_conversation(&self, title: &str, activate: bool) -> Result<i64> {
        let id = {
            let conn = self.conn.lock().expect("store poisoned");
            conn.execute(
                "INSERT INTO conversations (title, created_at, active) VALUES (?1, ?2, 0)",
                params![title, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            conn.last_insert_rowid()
        };
        if activate {
            self.set_active_conversation(id)?;
        }
        Ok(id)
    }

    /// Conversations newest-first, with message counts.
    pub fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.title, c.created_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
                 FROM conversations c ORDER BY c.id DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ConversationInfo {
                    id: r.get(0)?,
                    title: r.get(1)?,
                    created_at: r.get(2)?,
                    messages: r.get(3)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<_, _>>().map_err(db_err)
    }

    pub fn rename_conversation(&self, id: i64, title: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![title, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Delete a conversation; the store never ends up empty, and the active
    /// pointer moves to the newest remaining conversation if needed.
    pub fn delete_conversation(&self, id: i64) -> Result<()> {
        {
            let conn = self.conn.lock().expect("store poisoned");
            conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])
                .map_err(db_err)?;
        }
        let _ = self.get_active_conversation_id()?;
        Ok(())
    }

    pub fn clear_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    /// Append one turn; `conversation_id = None` targets the active one.
    pub fn append_turn(&self, role: Role, message: &str, conversation_id: Option<i64>) -> Result<()> {
        let cid = match conversation_id {
            Some(id) => id,
            None => self.get_active_conversation_id()?,
        };
        let conn = self.conn.lock().expect("store poisoned");
        conn.execute(
            "INSERT INTO messages (conversation_id, role, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![cid, role.as_str(), message, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Ordered `(role, message)` history for a conversation.
    pub fn get_history(&self, conversation_id: Option<i64>) -> Result<Vec<(Role, String)>> {
        let cid = match conversation_id {
            Some(id) => id,
            None => self.get_active_conversation_id()?,
        };
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT role, message FROM messages
                 WHERE conversation_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![cid], |r| {
                let role: String = r.get(0)?;
                let message: String = r.get(1)?;
                Ok((Role::from_str(&role), message))
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<_, _>>().map_err(db_err)
    }

    pub fn get_user_profile(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().expect("store poisoned");
        let mut stmt = conn
            .prepare("SELECT key, value FROM profile")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<_, _>>().map_err(db_err)
    }

    /// Upsert profile fields; untouched keys are preserved.
    pub fn set_user_profile(&self, fields: &HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn.lock().expect("store poisoned");
        let tx = conn.transaction().map_err(db_err)?;
        for (key, value) in fields {
            tx.execute(
                "INSERT INTO profile (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_default_conversation() {
        let store = ConversationStore::open_in_memory().unwrap();
        let items = store.list_conversations().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].messages, 0);
        let cid = store.get_active_conversation_id().unwrap();
        assert_eq!(cid, items[0].id);
    }

    #[test]
    fn multi_conversation_lifecycle() {
        let store = ConversationStore::open_in_memory().unwrap();
        let base_active = store.get_active_conversation_id().unwrap();

        let new_id = store.new_conversation("Test convo", true).unwrap();
        assert_eq!(store.get_active_conversation_id().unwrap(), new_id);

        store.append_turn(Role::User, "hello", Some(new_id)).unwrap();
        store
            .append_turn(Role::Assistant, "hi", Some(new_id))
            .unwrap();
        let hist = store.get_history(Some(new_id)).unwrap();
        assert_eq!(
            hist,
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, "hi".to_string())
            ]
        );

        store.rename_conversation(new_id, "Renamed convo").unwrap();
        let titles: Vec<String> = store
            .list_conversations()
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert!(titles.contains(&"Renamed convo".to_string()));

        store.set_active_conversation(base_active).unwrap();
        store.delete_conversation(new_id).unwrap();
        let ids: Vec<i64> = store
            .list_conversations()
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert!(!ids.contains(&new_id));
        assert!(!ids.is_empty());
    }

    #[test]
    fn append_without_id_targets_active_conversation() {
        let store = ConversationStore::open_in_memory().unwrap();
        store.append_turn(Role::User, "u1", None).unwrap();
        store.append_turn(Role::Assistant, "a1", None).unwrap();
        assert_eq!(store.get_history(None).unwrap().len(), 2);

        let cid = store.get_active_conversation_id().unwrap();
        store.clear_conversation(cid).unwrap();
        assert!(store.get_history(None).unwrap().is_empty());
    }

    #[test]
    fn profile_upsert_preserves_and_overwrites() {
        let store = ConversationStore::open_in_memory().unwrap();
        let mut p = HashMap::new();
        p.insert("name".to_string(), "Alice".to_string());
        p.insert("goal".to_string(), "Ship Jarvin".to_string());
        store.set_user_profile(&p).unwrap();

        let mut p2 = HashMap::new();
        p2.insert("goal".to_string(), "Fix tests".to_string());
        store.set_user_profile(&p2).unwrap();

        let out = store.get_user_profile().unwrap();
        assert_eq!(out.get("name").unwrap(), "Alice");
        assert_eq!(out.get("goal").unwrap(), "Fix tests");
    }

    #[test]
    fn deleting_last_conversation_recreates_default() {
        let store = ConversationStore::open_in_memory().unwrap();
        let cid = store.get_active_conversation_id().unwrap();
        store.delete_conversation(cid).unwrap();
        let items = store.list_conversations().unwrap();
        assert_eq!(items.len(), 1);
        assert_ne!(items[0].id, cid);
    }
}
