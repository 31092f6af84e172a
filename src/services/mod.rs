pub mod auth;
pub mod chat;
pub mod keyring;
pub mod storage;
pub mod store;

pub use auth::{AuthGate, GateState, KeyAccess};
pub use chat::{ChatSession, SendError};
pub use keyring::KeyringStore;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{ConversationStore, StoreEvent};
