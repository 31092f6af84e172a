use serde::{Deserialize, Serialize};

/// Which backend model the next turn uses. Persisted independently of the
/// conversation; anything unrecognized in storage falls back to `Fast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Fast,
    Deep,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Deep => "deep",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fast" => Some(ModelTier::Fast),
            "deep" => Some(ModelTier::Deep),
            _ => None,
        }
    }

    /// Concrete hosted model id sent to the provider.
    pub fn model_id(&self) -> &'static str {
        match self {
            ModelTier::Fast => "gemini-3-flash-preview",
            ModelTier::Deep => "gemini-3-pro-preview",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast (low latency)",
            ModelTier::Deep => "deep (stronger reasoning)",
        }
    }
}
