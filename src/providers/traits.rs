use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, ProviderError, StreamEvent};

/// The one external collaborator: given a role-tagged history and a new
/// user message, produce a finite, non-restartable sequence of text
/// fragments. Events go through `tx` in generation order; a setup failure
/// may instead be returned directly and the caller folds both paths into
/// the same terminal handling.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_reply(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}
