use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Role;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// The credential-rejection class: missing, invalid, or revoked key.
    /// The session controller re-locks the auth gate on these and on
    /// nothing else.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::AuthError(_))
    }
}

/// One prior turn as the provider sees it: role, text, and any inline
/// media that accompanied it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<InlineMedia>,
}

/// Binary payload already encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

/// Everything one streaming call needs. `history` is the conversation
/// before this turn; the new user input travels only in `text`/`media`.
#[derive(Clone)]
pub struct ChatRequest {
    pub api_key: String,
    pub model: String,
    pub history: Vec<ChatTurn>,
    pub text: String,
    pub media: Vec<InlineMedia>,
    pub system_prompt: Option<String>,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("history", &self.history)
            .field("text", &self.text)
            .field("media", &format!("[{} items]", self.media.len()))
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One UTF-8 text fragment. May be empty; empty fragments still count
    /// as events and must be applied (as no-ops) in order.
    Token(String),
    /// Natural end of the stream.
    Done,
    /// The stream broke. Carries the structured reason so the caller can
    /// distinguish credential rejection from everything else.
    Error(ProviderError),
}
