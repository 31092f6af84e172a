use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachment::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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
}

/// Outcome of the turn that produced an assistant message. Failed turns
/// stay in the history with their notice text in `content`; this field is
/// what consumers branch on instead of matching that text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Ok,
    StreamFailed,
    AuthFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    pub fn user(content: String, attachments: Vec<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content,
            attachments,
            created_at: Utc::now(),
            is_streaming: false,
            status: MessageStatus::Ok,
        }
    }

    /// Empty assistant message appended at the start of a turn and patched
    /// chunk by chunk until the stream finishes.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            is_streaming: true,
            status: MessageStatus::Ok,
        }
    }
}
