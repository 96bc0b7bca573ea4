//! Line-delimited `data: …` stream decoding.
//!
//! Chunks arrive at arbitrary byte boundaries.  [`LineDecoder`] buffers
//! bytes until a newline so neither an event nor a multi-byte character is
//! ever split, and [`parse_event`] turns one complete line into a token.

use serde_json::Value;

/// Reassembles complete lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk`, returning every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever trailing text was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Meaning of one stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
    /// Blank lines, comments, `event:` lines and payloads without text.
    Skip,
}

/// Decode a single line.
///
/// Understands OpenAI-style `choices[0].delta.content` deltas and Anthropic
/// `content_block_delta` / `text_delta` events.  Malformed JSON is an error
/// the caller logs and skips.
///
/// ```
/// use voice_assistant::brain::{parse_event, StreamEvent};
///
/// let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
/// assert_eq!(parse_event(line).unwrap(), StreamEvent::Token("Hi".into()));
/// assert_eq!(parse_event("data: [DONE]").unwrap(), StreamEvent::Done);
/// ```
pub fn parse_event(line: &str) -> Result<StreamEvent, serde_json::Error> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(StreamEvent::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    let json: Value = serde_json::from_str(data)?;

    if let Some(token) = json["choices"][0]["delta"]["content"].as_str() {
        return Ok(token_or_skip(token));
    }

    match json["type"].as_str() {
        Some("content_block_delta") if json["delta"]["type"] == "text_delta" => Ok(
            json["delta"]["text"]
                .as_str()
                .map_or(StreamEvent::Skip, token_or_skip),
        ),
        Some("message_stop") => Ok(StreamEvent::Done),
        _ => Ok(StreamEvent::Skip),
    }
}

fn token_or_skip(token: &str) -> StreamEvent {
    if token.is_empty() {
        StreamEvent::Skip
    } else {
        StreamEvent::Token(token.to_string())
    }
}
