// Message persistence.
//
// `MessageStore::Postgres` is the production path; `Memory` backs tests
// and DB-less local development with the same semantics (append order,
// soft deletes, newest-first pages).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use lectern_common::types::{Attachment, ChatMessage, Principal, Role};

/// Input for [`MessageStore::append`]. The store assigns the id and
/// timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub classroom_id: Uuid,
    pub author: Principal,
    pub content: String,
    pub attachment: Option<Attachment>,
}

#[derive(Clone)]
pub enum MessageStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<Vec<ChatMessage>>>),
}

impl MessageStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(Vec::new())))
    }

    /// Persist a new message and return it with id and timestamp assigned.
    pub async fn append(&self, new: NewMessage) -> Result<ChatMessage> {
        match self {
            Self::Postgres(pool) => {
                let id = Uuid::new_v4();
                let attachment_json = new
                    .attachment
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()
                    .context("failed to serialize message attachment")?;
                let row = sqlx::query(
                    "INSERT INTO messages \
                     (id, classroom_id, user_id, user_name, role, content, attachment) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING created_at",
                )
                .bind(id)
                .bind(new.classroom_id)
                .bind(new.author.id)
                .bind(new.author.name.as_str())
                .bind(new.author.role.as_str())
                .bind(new.content.as_str())
                .bind(attachment_json)
                .fetch_one(pool)
                .await
                .context("failed to insert chat message")?;

                let created_at: DateTime<Utc> =
                    row.try_get("created_at").context("message row is missing created_at")?;

                Ok(ChatMessage {
                    id,
                    classroom_id: new.classroom_id,
                    user_id: new.author.id,
                    user_name: new.author.name,
                    role: new.author.role,
                    content: new.content,
                    created_at,
                    edited: false,
                    deleted: false,
                    attachment: new.attachment,
                })
            }
            Self::Memory(messages) => {
                let mut messages = messages.write().await;
                // Keep created_at non-decreasing in append order even if
                // the clock stalls within a millisecond.
                let now = Utc::now();
                let created_at = match messages.last() {
                    Some(last) if last.created_at > now => last.created_at,
                    _ => now,
                };
                let message = ChatMessage {
                    id: Uuid::new_v4(),
                    classroom_id: new.classroom_id,
                    user_id: new.author.id,
                    user_name: new.author.name,
                    role: new.author.role,
                    content: new.content,
                    created_at,
                    edited: false,
                    deleted: false,
                    attachment: new.attachment,
                };
                messages.push(message.clone());
                Ok(message)
            }
        }
    }

    /// Fetch up to `limit` non-deleted messages for a room, newest first.
    /// `before` pages further back in time.
    pub async fn list_recent(
        &self,
        classroom_id: Uuid,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query(
                    "SELECT id, classroom_id, user_id, user_name, role, content, \
                            created_at, edited, deleted, attachment \
                     FROM messages \
                     WHERE classroom_id = $1 \
                       AND deleted = FALSE \
                       AND ($2::timestamptz IS NULL OR created_at < $2) \
                     ORDER BY created_at DESC \
                     LIMIT $3",
                )
                .bind(classroom_id)
                .bind(before)
                .bind(limit)
                .fetch_all(pool)
                .await
                .context("failed to load chat message history")?;

                rows.iter().map(message_from_row).collect()
            }
            Self::Memory(messages) => {
                let messages = messages.read().await;
                let mut page: Vec<ChatMessage> = messages
                    .iter()
                    .filter(|message| {
                        message.classroom_id == classroom_id
                            && !message.deleted
                            && before.map_or(true, |cursor| message.created_at < cursor)
                    })
                    .cloned()
                    .collect();
                // The vec is append-ordered; newest-first is the reverse
                // tail.
                page.reverse();
                page.truncate(limit.max(0) as usize);
                Ok(page)
            }
        }
    }

    pub async fn find(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    "SELECT id, classroom_id, user_id, user_name, role, content, \
                            created_at, edited, deleted, attachment \
                     FROM messages WHERE id = $1",
                )
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .context("failed to look up chat message")?;

                row.as_ref().map(message_from_row).transpose()
            }
            Self::Memory(messages) => {
                let messages = messages.read().await;
                Ok(messages.iter().find(|message| message.id == message_id).cloned())
            }
        }
    }

    /// Replace a message's content and mark it edited. Returns the
    /// updated message, or `None` if it does not exist.
    pub async fn edit_content(
        &self,
        message_id: Uuid,
        content: &str,
    ) -> Result<Option<ChatMessage>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    "UPDATE messages SET content = $2, edited = TRUE \
                     WHERE id = $1 \
                     RETURNING id, classroom_id, user_id, user_name, role, content, \
                               created_at, edited, deleted, attachment",
                )
                .bind(message_id)
                .bind(content)
                .fetch_optional(pool)
                .await
                .context("failed to edit chat message")?;

                row.as_ref().map(message_from_row).transpose()
            }
            Self::Memory(messages) => {
                let mut messages = messages.write().await;
                let Some(message) =
                    messages.iter_mut().find(|message| message.id == message_id)
                else {
                    return Ok(None);
                };
                message.content = content.to_string();
                message.edited = true;
                Ok(Some(message.clone()))
            }
        }
    }

    /// Soft-delete a message. Content is retained in storage but the
    /// message disappears from history. Returns false for unknown ids.
    pub async fn soft_delete(&self, message_id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = $1")
                    .bind(message_id)
                    .execute(pool)
                    .await
                    .context("failed to delete chat message")?;
                Ok(result.rows_affected() > 0)
            }
            Self::Memory(messages) => {
                let mut messages = messages.write().await;
                let Some(message) =
                    messages.iter_mut().find(|message| message.id == message_id)
                else {
                    return Ok(false);
                };
                message.deleted = true;
                Ok(true)
            }
        }
    }
}

fn message_from_row(row: &PgRow) -> Result<ChatMessage> {
    let role_text: String = row.try_get("role").context("message row is missing role")?;
    let attachment_json: Option<serde_json::Value> =
        row.try_get("attachment").context("message row has malformed attachment")?;
    let attachment = attachment_json
        .map(serde_json::from_value)
        .transpose()
        .context("failed to decode message attachment")?;

    Ok(ChatMessage {
        id: row.try_get("id").context("message row is missing id")?,
        classroom_id: row
            .try_get("classroom_id")
            .context("message row is missing classroom_id")?,
        user_id: row.try_get("user_id").context("message row is missing user_id")?,
        user_name: row.try_get("user_name").context("message row is missing user_name")?,
        role: role_from_str(&role_text)?,
        content: row.try_get("content").context("message row is missing content")?,
        created_at: row.try_get("created_at").context("message row is missing created_at")?,
        edited: row.try_get("edited").context("message row is missing edited")?,
        deleted: row.try_get("deleted").context("message row is missing deleted")?,
        attachment,
    })
}

fn role_from_str(value: &str) -> Result<Role> {
    match value {
        "LEARNER" => Ok(Role::Learner),
        "FACILITATOR" => Ok(Role::Facilitator),
        other => anyhow::bail!("unknown role '{other}' in message row"),
    }
}
