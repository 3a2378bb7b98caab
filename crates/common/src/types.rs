// Core domain types shared across the Lectern crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum chat message length in characters, measured after trimming.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Role of an authenticated participant.
///
/// Facilitators own classrooms and carry moderation rights (delete-any);
/// learners are enrolled members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Learner,
    Facilitator,
}

impl Role {
    pub const fn is_facilitator(self) -> bool {
        matches!(self, Self::Facilitator)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Learner => "LEARNER",
            Self::Facilitator => "FACILITATOR",
        }
    }
}

/// The authenticated identity attached to a connection.
///
/// Produced by credential verification; immutable for the life of the
/// connection. Not persisted by the messaging service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
}

/// A persisted chat message.
///
/// `id` and `user_id` are immutable once created; only `content`, `edited`
/// and `deleted` may change afterwards (edits and soft deletes).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub classroom_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attachment: Option<Attachment>,
}

/// File attached to a chat message. Uploaded out-of-band; the messaging
/// service only carries the reference through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error("Message content cannot be empty")]
    Empty,
    #[error("Message too long (max {max} characters)")]
    TooLong { max: usize },
}

/// Validate and normalize message content.
///
/// Returns the trimmed content. Whitespace-only content is rejected, and
/// over-length content is rejected rather than truncated. Length is counted
/// in characters, not bytes.
pub fn validate_content(content: &str) -> Result<&str, ContentError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ContentError::Empty);
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ContentError::TooLong { max: MAX_MESSAGE_CHARS });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::{validate_content, ContentError, Role, MAX_MESSAGE_CHARS};

    #[test]
    fn roles_serialize_in_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Learner).expect("role should serialize"), "\"LEARNER\"");
        assert_eq!(
            serde_json::to_string(&Role::Facilitator).expect("role should serialize"),
            "\"FACILITATOR\""
        );
    }

    #[test]
    fn empty_and_whitespace_content_is_rejected() {
        assert_eq!(validate_content(""), Err(ContentError::Empty));
        assert_eq!(validate_content("   "), Err(ContentError::Empty));
        assert_eq!(validate_content("\n\t"), Err(ContentError::Empty));
    }

    #[test]
    fn content_is_trimmed() {
        assert_eq!(validate_content("  hello  "), Ok("hello"));
    }

    #[test]
    fn boundary_length_is_accepted_and_one_over_is_rejected() {
        let at_limit = "a".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(validate_content(&at_limit), Ok(at_limit.as_str()));

        let over_limit = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            validate_content(&over_limit),
            Err(ContentError::TooLong { max: MAX_MESSAGE_CHARS })
        );
    }

    #[test]
    fn length_is_counted_in_characters_not_bytes() {
        // Multi-byte characters at exactly the limit must pass.
        let at_limit = "ä".repeat(MAX_MESSAGE_CHARS);
        assert!(validate_content(&at_limit).is_ok());
    }
}
