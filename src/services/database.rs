use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::task;

use crate::models::{Conversation, Message, MessageKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    ConversationNotFound(i64),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Listing controls: pinned conversations are always returned first and
/// never count against the cutoff; the rest honor visibility and the
/// most-recent-N limit.
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub include_hidden: bool,
    pub limit: usize,
    pub order: ListOrder,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            include_hidden: false,
            limit: 10,
            order: ListOrder::Updated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Created,
    Updated,
}

impl ListOrder {
    fn column(&self) -> &'static str {
        match self {
            ListOrder::Created => "created_at",
            ListOrder::Updated => "updated_at",
        }
    }
}

const CONVERSATION_COLUMNS: &str = "c.id, c.name, c.description, c.assistant, c.pinned, c.visible, c.priority, c.created_at, c.updated_at, \
     (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count";

#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

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
                "CREATE TABLE conversations (
                    id INTEGER PRIMARY KEY,
                    name TEXT,
                    description TEXT,
                    assistant TEXT,
                    pinned INTEGER NOT NULL DEFAULT 0,
                    visible INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id INTEGER PRIMARY KEY,
                    conversation_id INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE INDEX idx_conversations_updated ON conversations(updated_at DESC);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "ALTER TABLE conversations ADD COLUMN priority INTEGER NOT NULL DEFAULT 0;

                 UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    // --- Conversations ---

    pub async fn create_conversation(
        &self,
        name: Option<String>,
        description: Option<String>,
        assistant: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations (name, description, assistant, pinned, visible, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, 1, 0, ?4, ?4)",
                params![name, description, assistant, now.to_rfc3339()],
            )?;
            Ok(Conversation {
                id: conn.last_insert_rowid(),
                name,
                description,
                assistant,
                pinned: false,
                visible: true,
                priority: 0,
                message_count: 0,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Conversation, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"
            ))?;
            let result = stmt
                .query_row(params![id], |row| Ok(row_to_conversation(row)))
                .optional()?;
            match result {
                Some(conversation) => conversation,
                None => Err(StoreError::ConversationNotFound(id)),
            }
        })
        .await
    }

    pub async fn list_conversations(
        &self,
        filter: ListFilter,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.with_conn(move |conn| {
            let order = filter.order.column();

            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                 WHERE c.pinned = 1 ORDER BY c.priority DESC, c.{order} DESC"
            ))?;
            let mut conversations = stmt
                .query_map([], |row| Ok(row_to_conversation(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations c
                 WHERE c.pinned = 0 AND (?1 OR c.visible = 1)
                 ORDER BY c.{order} DESC LIMIT ?2"
            ))?;
            let unpinned = stmt
                .query_map(
                    params![filter.include_hidden, filter.limit as i64],
                    |row| Ok(row_to_conversation(row)),
                )?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, StoreError>>()?;

            conversations.extend(unpinned);
            Ok(conversations)
        })
        .await
    }

    pub async fn rename_conversation(&self, id: i64, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, Utc::now().to_rfc3339(), id],
            )?;
            if changed == 0 {
                return Err(StoreError::ConversationNotFound(id));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_flags(
        &self,
        id: i64,
        pinned: Option<bool>,
        visible: Option<bool>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET pinned = COALESCE(?1, pinned), visible = COALESCE(?2, visible) WHERE id = ?3",
                params![pinned, visible, id],
            )?;
            if changed == 0 {
                return Err(StoreError::ConversationNotFound(id));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_priority(&self, id: i64, priority: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET priority = ?1 WHERE id = ?2",
                params![priority, id],
            )?;
            if changed == 0 {
                return Err(StoreError::ConversationNotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Permanent deletion removes the row and cascades to its messages.
    /// Otherwise the conversation is only hidden from default listings.
    pub async fn delete_conversation(&self, id: i64, permanent: bool) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let changed = if permanent {
                conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?
            } else {
                conn.execute(
                    "UPDATE conversations SET visible = 0 WHERE id = ?1",
                    params![id],
                )?
            };
            if changed == 0 {
                return Err(StoreError::ConversationNotFound(id));
            }
            Ok(())
        })
        .await
    }

    // --- Messages ---

    pub async fn append_message(
        &self,
        conversation_id: i64,
        kind: MessageKind,
        content: &str,
    ) -> Result<Message, StoreError> {
        let content = content.to_string();
        let now = Utc::now();
        self.with_conn(move |conn| {
            ensure_conversation(conn, conversation_id)?;
            conn.execute(
                "INSERT INTO messages (conversation_id, kind, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, kind.as_str(), content, now.to_rfc3339()],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), conversation_id],
            )?;
            Ok(Message {
                id,
                conversation_id,
                kind,
                content,
                created_at: now,
            })
        })
        .await
    }

    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, StoreError> {
        self.with_conn(move |conn| {
            ensure_conversation(conn, conversation_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, kind, content, created_at
                 FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], |row| Ok(row_to_message(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, StoreError>>()?;
            Ok(messages)
        })
        .await
    }

    #[cfg(test)]
    async fn count_all_messages(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
        .await
    }
}

fn ensure_conversation(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::ConversationNotFound(id));
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation, StoreError> {
    let pinned: i64 = row.get(4)?;
    let visible: i64 = row.get(5)?;
    let created_raw: String = row.get(7)?;
    let updated_raw: String = row.get(8)?;

    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        assistant: row.get(3)?,
        pinned: pinned != 0,
        visible: visible != 0,
        priority: row.get(6)?,
        message_count: row.get(9)?,
        created_at: parse_timestamp(&created_raw)?,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> Result<Message, StoreError> {
    let kind_raw: String = row.get(2)?;
    let created_raw: String = row.get(4)?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        kind: MessageKind::from_str(&kind_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown message kind {kind_raw:?}")))?,
        content: row.get(3)?,
        created_at: parse_timestamp(&created_raw)?,
    })
}
