pub mod attachment;
pub mod message;
pub mod tier;

pub use attachment::Attachment;
pub use message::{Message, MessageStatus, Role};
pub use tier::ModelTier;
