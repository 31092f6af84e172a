use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;

use super::models::{GeminiContent, GeminiInlineData, GeminiPart, GeminiRequest};
use super::stream::parse_sse_stream;
use crate::models::Role;
use crate::providers::traits::ChatProvider;
use crate::providers::types::{ChatRequest, InlineMedia, ProviderError, StreamEvent};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Error-body markers for the credential-rejection class. The hosted API
/// reports a missing key as a generic "entity was not found" 404, so the
/// status code alone is not enough.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "Requested entity was not found",
    "API key not valid",
    "API_KEY_INVALID",
];

/// Streaming client for the hosted Generative Language API.
pub struct GeminiClient {
    client: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }

    fn media_part(media: &InlineMedia) -> GeminiPart {
        GeminiPart {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: media.mime_type.clone(),
                data: media.data.clone(),
            }),
        }
    }

    fn text_part(text: &str) -> GeminiPart {
        GeminiPart {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn build_body(request: &ChatRequest) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = request
            .history
            .iter()
            .map(|turn| {
                let mut parts: Vec<GeminiPart> =
                    turn.media.iter().map(Self::media_part).collect();
                parts.push(Self::text_part(&turn.text));
                GeminiContent {
                    role: Self::translate_role(&turn.role).to_string(),
                    parts,
                }
            })
            .collect();

        let mut parts: Vec<GeminiPart> = request.media.iter().map(Self::media_part).collect();
        parts.push(Self::text_part(&request.text));
        contents.push(GeminiContent {
            role: "user".to_string(),
            parts,
        });

        let system_instruction = request.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: "user".to_string(),
            parts: vec![Self::text_part(prompt)],
        });

        GeminiRequest {
            contents,
            system_instruction,
        }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = parsed["error"]["message"].as_str() {
            return format!("HTTP {}: {}", status.as_u16(), msg);
        }
    }
    format!("HTTP {}: request failed", status.as_u16())
}

pub(crate) fn classify_http_error(status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ProviderError::AuthError(parse_error_message(status, body));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited {
            retry_after_secs: None,
        };
    }
    if AUTH_ERROR_MARKERS.iter().any(|m| body.contains(m)) {
        return ProviderError::AuthError(parse_error_message(status, body));
    }
    ProviderError::RequestFailed(parse_error_message(status, body))
}

/// Classify an error event arriving inside an already-open stream.
pub(crate) fn classify_stream_error(message: &str) -> ProviderError {
    if AUTH_ERROR_MARKERS.iter().any(|m| message.contains(m)) {
        ProviderError::AuthError(message.to_string())
    } else {
        ProviderError::RequestFailed(message.to_string())
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    async fn stream_reply(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            DEFAULT_BASE_URL, request.model
        );

        let body = Self::build_body(&request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }

        parse_sse_stream(response, tx).await;

        Ok(())
    }
}
