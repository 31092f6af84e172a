pub mod gemini;
pub mod traits;
pub mod types;

pub use traits::ChatProvider;
pub use types::{ChatRequest, ChatTurn, InlineMedia, ProviderError, StreamEvent};
