mod config;
mod models;
mod providers;
mod repl;
mod services;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use providers::gemini::GeminiClient;
use repl::TerminalKeyPicker;
use services::auth::KeyAccess;
use services::{AuthGate, ChatSession, ConversationStore, FileStorage, KeyringStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let storage = FileStorage::open_default()?;
    let store = ConversationStore::open(Box::new(storage));

    let env_key_present = std::env::var(config::API_KEY_ENV)
        .map(|v| !v.is_empty())
        .unwrap_or(false);

    // With an out-of-band credential there is nothing to select; the gate
    // treats the absent capability as always available.
    let capability: Option<Arc<dyn KeyAccess>> = if env_key_present {
        None
    } else {
        match KeyringStore::new().await {
            Ok(keys) => Some(Arc::new(TerminalKeyPicker::new(keys))),
            Err(e) => {
                tracing::warn!(
                    "keyring unavailable ({:#}); set {} to supply a key",
                    e,
                    config::API_KEY_ENV
                );
                None
            }
        }
    };

    let gate = AuthGate::new(capability);
    let provider = Arc::new(GeminiClient::new());
    let session = ChatSession::new(store, provider, gate);

    repl::run(session).await
}
