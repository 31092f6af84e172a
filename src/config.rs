//! App-level constants shared across services and the terminal surface.

pub const APP_ID: &str = "io.nexuslabs.Nexus";

/// Storage keys. Versioned so a future format change can migrate or ignore
/// old blobs instead of tripping over them.
pub const MESSAGES_KEY: &str = "nexus_v1_messages";
pub const MODEL_KEY: &str = "nexus_v1_model";

/// Out-of-band credential override. When set, the key-selection capability
/// is not consulted at all.
pub const API_KEY_ENV: &str = "NEXUS_API_KEY";

/// Shown in place of the assistant reply when the stream breaks for any
/// reason other than a rejected credential.
pub const STREAM_FAILURE_NOTICE: &str =
    "The connection was interrupted before the response finished. Send your message again to retry.";

/// Shown when the provider rejects the credential mid-turn. Directs the
/// user back to `/connect`.
pub const AUTH_FAILURE_NOTICE: &str =
    "Your API key was rejected by the provider. Reconnect a valid key with /connect to continue.";

pub const SYSTEM_PROMPT: &str = "\
You are Nexus, an advanced reasoning assistant built by Nexus Labs.

GROUND RULES:
1. IDENTITY: You are Nexus. Your creator is Nexus Labs.
2. RESTRICTED TERMS: Never mention the names of real-world AI vendors or their models.
3. TONE: Professional, concise, and precise.
4. FORMATTING: Always answer in clean Markdown. For code, name the language on the fence.";
