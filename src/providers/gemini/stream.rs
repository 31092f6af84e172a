use futures::StreamExt;
use tokio::sync::mpsc;

use super::adapter::classify_stream_error;
use super::models::GeminiStreamChunk;
use crate::providers::types::StreamEvent;

/// Incremental SSE framing. Network chunks can split anywhere, including
/// mid-codepoint, so bytes are buffered until they decode, then text is
/// buffered until a full `\n\n`-delimited event is present.
#[derive(Default)]
pub struct SseBuffer {
    bytes: Vec<u8>,
    text: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk; returns the `data:` payload of every SSE
    /// event completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);

        let decoded = match std::str::from_utf8(&self.bytes) {
            Ok(s) => {
                let s = s.to_string();
                self.bytes.clear();
                s
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to == 0 {
                    return Vec::new();
                }
                let s = std::str::from_utf8(&self.bytes[..valid_up_to])
                    .unwrap()
                    .to_string();
                self.bytes.drain(..valid_up_to);
                s
            }
        };

        // The API uses \r\n line endings.
        self.text.push_str(&decoded.replace("\r\n", "\n"));

        let mut payloads = Vec::new();
        while let Some(event_end) = self.text.find("\n\n") {
            let event_text = self.text[..event_end].to_string();
            self.text.drain(..event_end + 2);

            let mut data = String::new();
            for line in event_text.lines() {
                if let Some(payload) = line.strip_prefix("data: ") {
                    data.push_str(payload);
                } else if let Some(payload) = line.strip_prefix("data:") {
                    data.push_str(payload);
                }
            }

            if !data.is_empty() {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Drive a streaming response to completion, translating wire chunks into
/// `StreamEvent`s. Always terminates the channel with `Done` or `Error`.
pub async fn parse_sse_stream(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseBuffer::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(
                        crate::providers::types::ProviderError::NetworkError(e.to_string()),
                    ))
                    .await;
                return;
            }
        };

        for data in buffer.push(&bytes) {
            match serde_json::from_str::<GeminiStreamChunk>(&data) {
                Ok(chunk) => {
                    if let Some(error) = &chunk.error {
                        let message = error.message.as_deref().unwrap_or("unknown error");
                        let _ = tx.send(StreamEvent::Error(classify_stream_error(message))).await;
                        return;
                    }

                    if let Some(candidates) = &chunk.candidates {
                        if let Some(candidate) = candidates.first() {
                            if let Some(content) = &candidate.content {
                                for part in &content.parts {
                                    if let Some(text) = &part.text {
                                        if tx.send(StreamEvent::Token(text.clone())).await.is_err() {
                                            return; // receiver dropped
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("skipping unparseable SSE payload: {}", e);
                }
            }
        }
    }

    let _ = tx.send(StreamEvent::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_complete_events() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn holds_partial_events_until_terminated() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert!(buf.push(b":1}\n").is_empty());
        assert_eq!(buf.push(b"\n"), vec!["{\"a\":1}"]);
    }

    #[test]
    fn normalizes_crlf_framing() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b"data: x\r\n\r\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn reassembles_split_utf8() {
        // "é" is 0xC3 0xA9; split it across chunks.
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: \xC3").is_empty());
        let out = buf.push(b"\xA9\n\n");
        assert_eq!(out, vec!["\u{e9}"]);
    }

    #[test]
    fn parses_a_wire_chunk_with_text_parts() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi"},{"text":" there"}]}}]}"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(data).unwrap();
        let candidates = chunk.candidates.unwrap();
        let content = candidates[0].content.as_ref().unwrap();
        let texts: Vec<_> = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(texts, vec!["Hi", " there"]);
    }

    #[test]
    fn parses_a_wire_error_chunk() {
        let data = r#"{"error":{"message":"Requested entity was not found.","code":404}}"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(
            chunk.error.unwrap().message.as_deref(),
            Some("Requested entity was not found.")
        );
    }

    #[test]
    fn joins_multiple_data_lines_and_skips_comments() {
        let mut buf = SseBuffer::new();
        let out = buf.push(b": keepalive\ndata: ab\ndata:cd\n\n");
        assert_eq!(out, vec!["abcd"]);
    }
}
