use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::auth::{AuthGate, GateState};
use super::store::ConversationStore;
use crate::config::{AUTH_FAILURE_NOTICE, STREAM_FAILURE_NOTICE, SYSTEM_PROMPT};
use crate::models::{Attachment, Message, MessageStatus, ModelTier};
use crate::providers::{ChatProvider, ChatRequest, ChatTurn, InlineMedia, StreamEvent};

/// Why a turn could not start. Once a turn has started it always runs to a
/// terminal state; stream trouble surfaces as the assistant message's
/// status, not as an error here.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("a turn is already in flight")]
    Busy,
    #[error("no API key is linked")]
    NotConnected,
    #[error("no API key could be resolved")]
    KeyUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// One conversation surface: owns the store, the provider handle, and the
/// auth gate, and executes one turn at a time.
pub struct ChatSession {
    store: ConversationStore,
    provider: Arc<dyn ChatProvider>,
    gate: AuthGate,
    busy: bool,
}

impl ChatSession {
    pub fn new(store: ConversationStore, provider: Arc<dyn ChatProvider>, gate: AuthGate) -> Self {
        Self {
            store,
            provider,
            gate,
            busy: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub async fn resolve_gate(&mut self) -> GateState {
        self.gate.resolve().await
    }

    pub async fn connect(&mut self) -> anyhow::Result<GateState> {
        self.gate.connect().await
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn tier(&self) -> ModelTier {
        self.store.tier()
    }

    pub fn set_tier(&mut self, tier: ModelTier) -> anyhow::Result<()> {
        self.store.set_tier(tier)
    }

    /// The confirmation step belongs to the surface calling this.
    pub fn clear_history(&mut self) -> anyhow::Result<()> {
        self.store.clear()
    }

    /// Execute one conversational turn. Appends the user message and a
    /// streaming assistant placeholder, then patches the placeholder chunk
    /// by chunk in arrival order until the stream finishes or fails.
    /// `on_token` fires once per received fragment for live rendering.
    pub async fn send(
        &mut self,
        text: String,
        attachments: Vec<Attachment>,
        mut on_token: impl FnMut(&str),
    ) -> Result<MessageStatus, SendError> {
        if self.busy {
            return Err(SendError::Busy);
        }
        if !self.gate.is_available() {
            return Err(SendError::NotConnected);
        }
        let api_key = self
            .gate
            .api_key()
            .await?
            .ok_or(SendError::KeyUnavailable)?;

        self.busy = true;
        let result = self.run_turn(api_key, text, attachments, &mut on_token).await;
        self.busy = false;
        result
    }

    async fn run_turn(
        &mut self,
        api_key: String,
        text: String,
        attachments: Vec<Attachment>,
        on_token: &mut impl FnMut(&str),
    ) -> Result<MessageStatus, SendError> {
        // Outbound history is the conversation before this turn. Anything
        // still streaming is excluded; under the single-in-flight
        // invariant nothing can be, but an incomplete turn must never
        // reach the provider.
        let history: Vec<ChatTurn> = self
            .store
            .messages()
            .iter()
            .filter(|m| !m.is_streaming)
            .map(|m| ChatTurn {
                role: m.role,
                text: m.content.clone(),
                media: m.attachments.iter().map(inline_media).collect(),
            })
            .collect();

        let media: Vec<InlineMedia> = attachments.iter().map(inline_media).collect();

        self.store
            .append_message(Message::user(text.clone(), attachments))?;

        let placeholder = Message::assistant_placeholder();
        let assistant_id = placeholder.id.clone();
        self.store.append_message(placeholder)?;

        let request = ChatRequest {
            api_key,
            model: self.store.tier().model_id().to_string(),
            history,
            text,
            media,
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
        };

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let provider = self.provider.clone();
        tokio::spawn(async move {
            // Setup failures join the same channel as mid-stream ones.
            if let Err(e) = provider.stream_reply(request, tx.clone()).await {
                let _ = tx.send(StreamEvent::Error(e)).await;
            }
        });

        let mut accumulated = String::new();

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    accumulated.push_str(&token);
                    self.store
                        .patch_message(&assistant_id, |m| m.content = accumulated.clone())?;
                    on_token(&token);
                }
                StreamEvent::Done => {
                    self.store
                        .patch_message(&assistant_id, |m| m.is_streaming = false)?;
                    return Ok(MessageStatus::Ok);
                }
                StreamEvent::Error(e) => {
                    tracing::warn!("turn failed: {}", e);
                    let status = if e.is_auth() {
                        self.gate.relock();
                        MessageStatus::AuthFailed
                    } else {
                        MessageStatus::StreamFailed
                    };
                    self.fail_placeholder(&assistant_id, status)?;
                    return Ok(status);
                }
            }
        }

        // The producer went away without a terminal event. A reply that
        // already streamed counts as finished; silence is a failure.
        if accumulated.is_empty() {
            self.fail_placeholder(&assistant_id, MessageStatus::StreamFailed)?;
            Ok(MessageStatus::StreamFailed)
        } else {
            self.store
                .patch_message(&assistant_id, |m| m.is_streaming = false)?;
            Ok(MessageStatus::Ok)
        }
    }

    /// Terminal failure transition: the notice replaces whatever content
    /// had accumulated, wholesale.
    fn fail_placeholder(&mut self, id: &str, status: MessageStatus) -> anyhow::Result<()> {
        let notice = match status {
            MessageStatus::AuthFailed => AUTH_FAILURE_NOTICE,
            _ => STREAM_FAILURE_NOTICE,
        };
        self.store.patch_message(id, |m| {
            m.content = notice.to_string();
            m.is_streaming = false;
            m.status = status;
        })
    }
}

fn inline_media(attachment: &Attachment) -> InlineMedia {
    InlineMedia {
        mime_type: attachment.mime_type.clone(),
        data: attachment.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use anyhow::Result;

    use crate::models::Role;
    use crate::providers::types::ProviderError;
    use crate::services::auth::KeyAccess;
    use crate::services::storage::MemoryStorage;

    enum Script {
        Events(Vec<StreamEvent>),
        FailSetup(ProviderError),
    }

    #[derive(Default)]
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn replying(events: Vec<StreamEvent>) -> Arc<Self> {
            let provider = Self::default();
            provider.scripts.lock().unwrap().push_back(Script::Events(events));
            Arc::new(provider)
        }

        fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        fn last_request(&self) -> ChatRequest {
            self.requests.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn stream_reply(
            &self,
            request: ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            self.requests.lock().unwrap().push(request);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left");
            match script {
                Script::FailSetup(e) => Err(e),
                Script::Events(events) => {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                    Ok(())
                }
            }
        }
    }

    struct AlwaysLinked;

    #[async_trait]
    impl KeyAccess for AlwaysLinked {
        async fn has_key(&self) -> Result<bool> {
            Ok(true)
        }
        async fn open_key_selection(&self) -> Result<()> {
            Ok(())
        }
        async fn api_key(&self) -> Result<Option<String>> {
            Ok(Some("sk-test".to_string()))
        }
    }

    struct NeverLinked(AtomicBool);

    #[async_trait]
    impl KeyAccess for NeverLinked {
        async fn has_key(&self) -> Result<bool> {
            Ok(false)
        }
        async fn open_key_selection(&self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn api_key(&self) -> Result<Option<String>> {
            Ok(None)
        }
    }

    async fn session_with(provider: Arc<ScriptedProvider>) -> ChatSession {
        let store = ConversationStore::open(Box::new(MemoryStorage::new()));
        let mut gate = AuthGate::new(Some(Arc::new(AlwaysLinked)));
        gate.resolve().await;
        ChatSession::new(store, provider, gate)
    }

    fn token(s: &str) -> StreamEvent {
        StreamEvent::Token(s.to_string())
    }

    #[tokio::test]
    async fn streams_chunks_in_order_into_the_placeholder() {
        let provider = ScriptedProvider::replying(vec![
            token("Hi"),
            token(""),
            token(" there"),
            StreamEvent::Done,
        ]);
        let mut session = session_with(provider).await;

        let mut seen = Vec::new();
        let status = session
            .send("Hello".to_string(), Vec::new(), |t| seen.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::Ok);
        assert_eq!(seen, vec!["Hi", "", " there"]);

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert!(!messages[1].is_streaming);
        assert_eq!(messages[1].status, MessageStatus::Ok);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn attachments_reach_the_provider_and_stay_in_history() {
        let provider = ScriptedProvider::replying(vec![token("A cat."), StreamEvent::Done]);
        let mut session = session_with(provider.clone()).await;

        let attachment = Attachment::from_bytes("image/png", b"pixels");
        let payload = attachment.data.clone();
        session
            .send("What is this?".to_string(), vec![attachment], |_| {})
            .await
            .unwrap();

        let request = provider.last_request();
        assert!(request.history.is_empty());
        assert_eq!(
            request.media,
            vec![InlineMedia {
                mime_type: "image/png".to_string(),
                data: payload.clone(),
            }]
        );

        // The stored user message keeps the attachment, and a preview is
        // still derivable from it.
        let user = &session.messages()[0];
        assert_eq!(user.attachments.len(), 1);
        assert!(user.attachments[0]
            .preview_url()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn second_turn_sends_prior_turns_as_history() {
        let provider = ScriptedProvider::replying(vec![token("Hi there"), StreamEvent::Done]);
        provider.push(Script::Events(vec![token("Again"), StreamEvent::Done]));
        let mut session = session_with(provider.clone()).await;

        session.send("Hello".to_string(), Vec::new(), |_| {}).await.unwrap();
        session.send("More".to_string(), Vec::new(), |_| {}).await.unwrap();

        let request = provider.last_request();
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[0].role, Role::User);
        assert_eq!(request.history[0].text, "Hello");
        assert_eq!(request.history[1].role, Role::Assistant);
        assert_eq!(request.history[1].text, "Hi there");
        assert_eq!(request.text, "More");
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn credential_rejection_relocks_the_gate_with_guidance_content() {
        let provider = ScriptedProvider::replying(vec![
            token("partial"),
            StreamEvent::Error(ProviderError::AuthError(
                "Requested entity was not found.".to_string(),
            )),
        ]);
        let mut session = session_with(provider).await;

        let status = session
            .send("Hello".to_string(), Vec::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::AuthFailed);
        assert_eq!(session.gate_state(), GateState::Unavailable);

        // The failed turn stays: exactly the user message and the
        // finalized placeholder, whose content is the guidance notice
        // (accumulated text replaced wholesale).
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, AUTH_FAILURE_NOTICE);
        assert!(!messages[1].is_streaming);
        assert_eq!(messages[1].status, MessageStatus::AuthFailed);
    }

    #[tokio::test]
    async fn setup_failure_takes_the_same_failure_path() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push(Script::FailSetup(ProviderError::NetworkError(
            "connection refused".to_string(),
        )));
        let mut session = session_with(provider).await;

        let status = session
            .send("Hello".to_string(), Vec::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::StreamFailed);
        assert_eq!(session.gate_state(), GateState::Available);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, STREAM_FAILURE_NOTICE);
        assert_eq!(messages[1].status, MessageStatus::StreamFailed);
    }

    #[tokio::test]
    async fn generic_stream_failure_leaves_gate_open() {
        let provider = ScriptedProvider::replying(vec![StreamEvent::Error(
            ProviderError::RequestFailed("HTTP 500: model overloaded".to_string()),
        )]);
        let mut session = session_with(provider).await;

        let status = session
            .send("Hello".to_string(), Vec::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::StreamFailed);
        assert_eq!(session.gate_state(), GateState::Available);
    }

    #[tokio::test]
    async fn closed_gate_blocks_the_turn_before_any_mutation() {
        let provider = Arc::new(ScriptedProvider::default());
        let store = ConversationStore::open(Box::new(MemoryStorage::new()));
        let mut gate = AuthGate::new(Some(Arc::new(NeverLinked(AtomicBool::new(false)))));
        gate.resolve().await;
        let mut session = ChatSession::new(store, provider, gate);

        let result = session.send("Hello".to_string(), Vec::new(), |_| {}).await;
        assert!(matches!(result, Err(SendError::NotConnected)));
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn dropped_stream_with_partial_content_finalizes_the_reply() {
        // Producer sends tokens, then disappears without Done or Error.
        let provider = ScriptedProvider::replying(vec![token("Hi"), token(" there")]);
        let mut session = session_with(provider).await;

        let status = session
            .send("Hello".to_string(), Vec::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::Ok);
        assert_eq!(session.messages()[1].content, "Hi there");
        assert!(!session.messages()[1].is_streaming);
    }

    #[tokio::test]
    async fn dropped_stream_with_no_content_is_a_failure() {
        let provider = ScriptedProvider::replying(Vec::new());
        let mut session = session_with(provider).await;

        let status = session
            .send("Hello".to_string(), Vec::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(status, MessageStatus::StreamFailed);
        assert_eq!(session.messages()[1].content, STREAM_FAILURE_NOTICE);
    }

    #[tokio::test]
    async fn turn_uses_the_selected_tier() {
        let provider = ScriptedProvider::replying(vec![StreamEvent::Done]);
        let mut session = session_with(provider.clone()).await;
        session.set_tier(ModelTier::Deep).unwrap();

        session.send("Hello".to_string(), Vec::new(), |_| {}).await.unwrap();

        assert_eq!(provider.last_request().model, ModelTier::Deep.model_id());
    }
}
