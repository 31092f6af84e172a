use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::API_KEY_ENV;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Startup check still pending; the surface shows a wait state and
    /// suppresses sending.
    Unknown,
    Available,
    Unavailable,
}

/// Optional host capability for key management. Absent in environments
/// where the credential is supplied out-of-band (environment variable),
/// in which case availability is taken as always true.
#[async_trait]
pub trait KeyAccess: Send + Sync {
    async fn has_key(&self) -> Result<bool>;
    /// Runs the key-selection interaction; returns once the user is done
    /// with it. Success is not re-verified here.
    async fn open_key_selection(&self) -> Result<()>;
    async fn api_key(&self) -> Result<Option<String>>;
}

/// Prerequisite in front of the session controller: no turn starts unless
/// the gate is `Available`. Never touches the conversation.
pub struct AuthGate {
    capability: Option<Arc<dyn KeyAccess>>,
    state: GateState,
}

impl AuthGate {
    pub fn new(capability: Option<Arc<dyn KeyAccess>>) -> Self {
        Self {
            capability,
            state: GateState::Unknown,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_available(&self) -> bool {
        self.state == GateState::Available
    }

    /// Startup availability check.
    pub async fn resolve(&mut self) -> GateState {
        self.state = match &self.capability {
            None => GateState::Available,
            Some(cap) => match cap.has_key().await {
                Ok(true) => GateState::Available,
                Ok(false) => GateState::Unavailable,
                Err(e) => {
                    tracing::warn!("key availability check failed: {:#}", e);
                    GateState::Unavailable
                }
            },
        };
        self.state
    }

    /// Run the key-selection interaction and unlock optimistically: the
    /// selected key is not re-verified. A bad key fails the next turn,
    /// which lands back in `relock`.
    pub async fn connect(&mut self) -> Result<GateState> {
        if let Some(cap) = &self.capability {
            cap.open_key_selection().await?;
        }
        self.state = GateState::Available;
        Ok(self.state)
    }

    /// Re-arm after a credential rejection.
    pub fn relock(&mut self) {
        self.state = GateState::Unavailable;
    }

    /// Credential for the next turn. The environment variable wins;
    /// otherwise the capability's stored key.
    pub async fn api_key(&self) -> Result<Option<String>> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Ok(Some(key));
            }
        }
        match &self.capability {
            Some(cap) => cap.api_key().await,
            None => Ok(None),
        }
    }
}
