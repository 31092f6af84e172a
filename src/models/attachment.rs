use base64::Engine;
use serde::{Deserialize, Serialize};

/// One user-supplied image accompanying a message. The payload is held as
/// base64 text end-to-end: that is what the provider wire format wants and
/// what the persisted history stores. No preview handle is persisted;
/// renderers derive one on demand from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub data: String,
}

impl Attachment {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Display handle for the payload, valid for the lifetime of the data
    /// itself. Never persisted.
    pub fn preview_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_encodes_payload() {
        let att = Attachment::from_bytes("image/png", b"\x89PNG");
        assert_eq!(att.mime_type, "image/png");
        assert_eq!(att.data, "iVBORw==");
    }

    #[test]
    fn preview_url_is_derived_from_payload() {
        let att = Attachment {
            mime_type: "image/png".to_string(),
            data: "QUJD".to_string(),
        };
        assert_eq!(att.preview_url(), "data:image/png;base64,QUJD");
    }
}
