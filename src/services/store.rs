use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;

use super::storage::Storage;
use crate::config::{MESSAGES_KEY, MODEL_KEY, STREAM_FAILURE_NOTICE};
use crate::models::{Message, MessageStatus, ModelTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A message joined the tail; dependents scroll to the bottom.
    Appended,
    Updated,
    Cleared,
}

/// Canonical message sequence plus the selected model tier. Every mutation
/// is mirrored to storage before control returns; dependents observe
/// changes through `subscribe`.
pub struct ConversationStore {
    storage: Box<dyn Storage>,
    messages: Vec<Message>,
    tier: ModelTier,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    /// Reconstruct state from storage. Missing or malformed data loads as
    /// an empty conversation and the default tier; corruption is never an
    /// error here.
    pub fn open(storage: Box<dyn Storage>) -> Self {
        let mut store = Self {
            storage,
            messages: Vec::new(),
            tier: ModelTier::default(),
            subscribers: Vec::new(),
        };

        match store.storage.get(MESSAGES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) => store.messages = messages,
                Err(e) => {
                    tracing::warn!("discarding malformed persisted history: {}", e);
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("could not read persisted history: {:#}", e);
            }
        }

        match store.storage.get(MODEL_KEY) {
            Ok(Some(raw)) => {
                store.tier = ModelTier::from_str(raw.trim()).unwrap_or_default();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("could not read persisted model selection: {:#}", e);
            }
        }

        store.repair_interrupted_turns();
        store
    }

    /// A message still marked streaming at load time means the process
    /// died mid-turn. Demote it to a failed turn so the single-in-flight
    /// invariant holds for the new session.
    fn repair_interrupted_turns(&mut self) {
        let mut repaired = false;
        for msg in &mut self.messages {
            if msg.is_streaming {
                tracing::warn!(id = %msg.id, "finalizing turn interrupted by shutdown");
                msg.is_streaming = false;
                msg.status = MessageStatus::StreamFailed;
                if msg.content.is_empty() {
                    msg.content = STREAM_FAILURE_NOTICE.to_string();
                }
                repaired = true;
            }
        }
        if repaired {
            if let Err(e) = self.persist_messages() {
                tracing::error!("could not persist repaired history: {:#}", e);
            }
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    pub fn append_message(&mut self, msg: Message) -> Result<()> {
        if msg.is_streaming && self.messages.iter().any(|m| m.is_streaming) {
            bail!("conversation already has a streaming message");
        }
        self.messages.push(msg);
        self.persist_messages()?;
        self.emit(StoreEvent::Appended);
        Ok(())
    }

    /// Apply `mutate` to the message with the given id. A missing id is a
    /// programming error, not a user-visible condition.
    pub fn patch_message(&mut self, id: &str, mutate: impl FnOnce(&mut Message)) -> Result<()> {
        let msg = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| anyhow!("no message with id {id}"))?;
        mutate(msg);
        self.persist_messages()?;
        self.emit(StoreEvent::Updated);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.messages.clear();
        self.storage
            .remove(MESSAGES_KEY)
            .context("Failed to remove persisted history")?;
        self.emit(StoreEvent::Cleared);
        Ok(())
    }

    pub fn set_tier(&mut self, tier: ModelTier) -> Result<()> {
        self.tier = tier;
        self.storage
            .set(MODEL_KEY, tier.as_str())
            .context("Failed to persist model selection")
    }

    fn persist_messages(&mut self) -> Result<()> {
        let json = serde_json::to_string(&self.messages)?;
        self.storage
            .set(MESSAGES_KEY, &json)
            .context("Failed to persist history")
    }
}
