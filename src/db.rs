//! Database module
//!
//! Persistence for assistants, conversations and messages. This is the only
//! component that creates or deletes those records.

mod schema;

pub use schema::*;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Assistant not found: {0}")]
    AssistantNotFound(String),
    #[error("Invalid assistant: {0}")]
    InvalidAssistant(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Multi-statement writes are transactions, so a poisoned lock holds no
    /// partial write and is reused.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Assistant Operations ====================

    /// Create an assistant
    pub fn create_assistant(&self, fields: &NewAssistant) -> DbResult<Assistant> {
        fields.validate().map_err(DbError::InvalidAssistant)?;

        let conn = self.conn();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let channel_address = fields
            .channel_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());

        conn.execute(
            "INSERT INTO assistants (id, name, model, personality, instructions, channel_address, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                fields.name.trim(),
                fields.model.trim(),
                fields.personality.trim(),
                fields.instructions,
                channel_address,
                format_datetime(&now),
            ],
        )?;

        Ok(Assistant {
            id,
            name: fields.name.trim().to_string(),
            model: fields.model.trim().to_string(),
            personality: fields.personality.trim().to_string(),
            instructions: fields.instructions.clone(),
            channel_address: channel_address.map(String::from),
            created_at: now,
        })
    }

    /// Get assistant by ID
    pub fn get_assistant(&self, id: &str) -> DbResult<Assistant> {
        let conn = self.conn();
        fetch_assistant(&conn, id)
    }

    /// List all assistants, oldest first
    pub fn list_assistants(&self) -> DbResult<Vec<Assistant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, model, personality, instructions, channel_address, created_at
             FROM assistants ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], parse_assistant_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Find the assistant linked to a messaging-channel address
    pub fn find_assistant_by_channel_address(&self, address: &str) -> DbResult<Option<Assistant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, model, personality, instructions, channel_address, created_at
             FROM assistants WHERE channel_address = ?1
             ORDER BY created_at ASC LIMIT 1",
            params![address],
            parse_assistant_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    // ==================== Conversation Operations ====================

    /// Create a conversation and its seed system message in one transaction
    pub fn create_conversation(&self, assistant_id: &str) -> DbResult<ConversationDetail> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let detail = insert_conversation(&tx, assistant_id)?;
        tx.commit()?;
        Ok(detail)
    }

    /// Get a conversation with its assistant and ordered messages
    pub fn get_conversation(&self, id: &str) -> DbResult<ConversationDetail> {
        let conn = self.conn();
        let conversation = fetch_conversation(&conn, id)?;
        let assistant = fetch_assistant(&conn, &conversation.assistant_id)?;
        let messages = fetch_messages(&conn, id)?;

        Ok(ConversationDetail {
            conversation,
            assistant,
            messages,
        })
    }

    /// List conversations newest-updated first, each with its latest visible message
    pub fn list_conversations(&self) -> DbResult<Vec<ConversationPreview>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, assistant_id, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC, rowid DESC",
        )?;
        let conversations = stmt
            .query_map([], parse_conversation_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut latest_stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1 AND role != 'system'
             ORDER BY sequence_id DESC LIMIT 1",
        )?;

        let mut previews = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let assistant = fetch_assistant(&conn, &conversation.assistant_id)?;
            let latest = latest_stmt
                .query_row(params![conversation.id], parse_message_row)
                .optional()?;
            previews.push(ConversationPreview {
                conversation,
                assistant,
                messages: latest.into_iter().collect(),
            });
        }

        Ok(previews)
    }

    /// Delete every message of a conversation and re-seed the system message,
    /// atomically. Returns the fresh seed.
    pub fn clear_conversation(&self, id: &str) -> DbResult<Message> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let conversation = fetch_conversation(&tx, id)?;
        let assistant = fetch_assistant(&tx, &conversation.assistant_id)?;

        // Sequence ids are never reused across clears
        let last_sequence = last_sequence_id(&tx, id)?;
        tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        let seed = insert_message_after(
            &tx,
            id,
            Role::System,
            assistant.system_prompt(),
            last_sequence,
            None,
        )?;

        tx.commit()?;
        Ok(seed)
    }

    // ==================== Message Operations ====================

    /// Append a message; its sequence id and timestamp sort after every
    /// existing message of the conversation
    pub fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> DbResult<Message> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        fetch_conversation(&tx, conversation_id)?;
        let message = insert_message(&tx, conversation_id, role, content)?;
        tx.commit()?;
        Ok(message)
    }

    /// Get all messages for a conversation in canonical order
    pub fn get_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn();
        fetch_conversation(&conn, conversation_id)?;
        fetch_messages(&conn, conversation_id)
    }

    /// Messages for an end-user view: system entries removed, user entries
    /// annotated with their delivery status
    pub fn get_public_messages(&self, conversation_id: &str) -> DbResult<Vec<PublicMessage>> {
        let conn = self.conn();
        fetch_conversation(&conn, conversation_id)?;
        let messages = fetch_messages(&conn, conversation_id)?;

        let mut failure_stmt = conn.prepare(
            "SELECT detail FROM turn_failures WHERE message_id = ?1",
        )?;

        let visible: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();
        let mut public = Vec::with_capacity(visible.len());
        for (idx, message) in visible.iter().enumerate() {
            let (status, failure) = if message.role == Role::User {
                let answered = visible
                    .get(idx + 1)
                    .is_some_and(|next| next.role == Role::Assistant);
                if answered {
                    (Some(DeliveryStatus::Answered), None)
                } else {
                    let failure: Option<String> = failure_stmt
                        .query_row(params![message.id], |row| row.get(0))
                        .optional()?;
                    match failure {
                        Some(detail) => (Some(DeliveryStatus::Failed), Some(detail)),
                        None => (Some(DeliveryStatus::Pending), None),
                    }
                }
            } else {
                (None, None)
            };

            public.push(PublicMessage {
                id: message.id.clone(),
                role: message.role,
                content: message.content.clone(),
                created_at: message.created_at,
                status,
                failure,
            });
        }

        Ok(public)
    }

    /// Record that the turn started by `message_id` ended without a reply
    pub fn record_turn_failure(&self, conversation_id: &str, message_id: &str, kind: &str, detail: &str) -> DbResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO turn_failures (message_id, conversation_id, kind, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message_id, conversation_id, kind, detail, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    // ==================== Channel Mapping ====================

    /// Conversation bound to a channel address for an assistant, created and
    /// bound on first use. Returns the id and whether it was just created.
    pub fn bound_channel_conversation(&self, address: &str, assistant_id: &str) -> DbResult<(String, bool)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT conversation_id FROM channel_conversations
                 WHERE channel_address = ?1 AND assistant_id = ?2",
                params![address, assistant_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }

        let detail = insert_conversation(&tx, assistant_id)?;
        tx.execute(
            "INSERT INTO channel_conversations (channel_address, assistant_id, conversation_id)
             VALUES (?1, ?2, ?3)",
            params![address, assistant_id, detail.conversation.id],
        )?;
        tx.commit()?;

        Ok((detail.conversation.id, true))
    }
}

// ============================================================
// Row helpers
// ============================================================

/// Insert a conversation and its seed system message
fn insert_conversation(conn: &Connection, assistant_id: &str) -> DbResult<ConversationDetail> {
    let assistant = fetch_assistant(conn, assistant_id)?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO conversations (id, assistant_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![id, assistant.id, format_datetime(&now)],
    )?;
    let seed = insert_message(conn, &id, Role::System, assistant.system_prompt())?;
    let conversation = fetch_conversation(conn, &id)?;

    Ok(ConversationDetail {
        conversation,
        assistant,
        messages: vec![seed],
    })
}

fn fetch_assistant(conn: &Connection, id: &str) -> DbResult<Assistant> {
    conn.query_row(
        "SELECT id, name, model, personality, instructions, channel_address, created_at
         FROM assistants WHERE id = ?1",
        params![id],
        parse_assistant_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::AssistantNotFound(id.to_string()),
        other => DbError::Sqlite(other),
    })
}

fn fetch_conversation(conn: &Connection, id: &str) -> DbResult<Conversation> {
    conn.query_row(
        "SELECT id, assistant_id, created_at, updated_at FROM conversations WHERE id = ?1",
        params![id],
        parse_conversation_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::ConversationNotFound(id.to_string()),
        other => DbError::Sqlite(other),
    })
}

fn fetch_messages(conn: &Connection, conversation_id: &str) -> DbResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, sequence_id, role, content, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
    )?;

    let rows = stmt.query_map(params![conversation_id], parse_message_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
}

fn last_sequence_id(conn: &Connection, conversation_id: &str) -> DbResult<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )
    .map_err(DbError::from)
}

fn insert_message(conn: &Connection, conversation_id: &str, role: Role, content: &str) -> DbResult<Message> {
    let last: Option<(i64, String)> = conn
        .query_row(
            "SELECT sequence_id, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY sequence_id DESC LIMIT 1",
            params![conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (last_sequence, last_created) = match last {
        Some((seq, created)) => (seq, Some(parse_datetime(&created))),
        None => (0, None),
    };

    insert_message_after(conn, conversation_id, role, content, last_sequence, last_created)
}

fn insert_message_after(
    conn: &Connection,
    conversation_id: &str,
    role: Role,
    content: &str,
    last_sequence: i64,
    last_created: Option<DateTime<Utc>>,
) -> DbResult<Message> {
    let now = micros_now();
    let created_at = match last_created {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    };
    let sequence_id = last_sequence + 1;
    let id = uuid::Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO messages (id, conversation_id, sequence_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            conversation_id,
            sequence_id,
            role.as_str(),
            content,
            format_datetime(&created_at),
        ],
    )?;

    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![format_datetime(&created_at), conversation_id],
    )?;

    Ok(Message {
        id,
        conversation_id: conversation_id.to_string(),
        sequence_id,
        role,
        content: content.to_string(),
        created_at,
    })
}

fn parse_assistant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assistant> {
    Ok(Assistant {
        id: row.get(0)?,
        name: row.get(1)?,
        model: row.get(2)?,
        personality: row.get(3)?,
        instructions: row.get(4)?,
        channel_address: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        assistant_id: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

/// Parse a message row; unknown roles are rejected at this boundary
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_text: String = row.get(3)?;
    let role = role_text.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role,
        content: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

/// Fixed-width microsecond timestamps sort lexically in time order
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn micros_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
