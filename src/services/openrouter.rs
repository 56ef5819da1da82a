//! OpenRouter chat-completions client and the incremental SSE decoder for
//! its streamed responses.

use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    base_url: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.openrouter_base_url.trim_end_matches('/').to_owned(),
            referer: config.public_url.clone(),
            title: config.app_title.clone(),
        }
    }

    pub fn request_body(model: &str, messages: &[ChatMessage], paid: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });
        if paid {
            body["plugins"] = json!([{ "id": "file-parser", "pdf": { "engine": "native" } }]);
        }
        body
    }

    /// Opens a streaming completion. Returns the response only for a 2xx
    /// status; anything else becomes `openrouter_error` with the body text.
    pub async fn open_stream(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        paid: bool,
    ) -> Result<reqwest::Response, AppError> {
        info!(
            "CHAT: OpenRouter request - model={} messages={}",
            model,
            messages.len()
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&Self::request_body(model, messages, paid))
            .send()
            .await
            .map_err(|e| AppError::UpstreamTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Splits a byte stream into lines. Bytes after the last newline are held
/// until more input arrives, so multi-byte characters split across chunks
/// decode intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Delta(String),
    Done,
    Skip,
}

type DeltaRule = fn(&Value) -> Option<&str>;

/// Where a text fragment may live in `choices[0]`, tried in order.
const DELTA_RULES: &[(&str, DeltaRule)] = &[
    ("delta_string", delta_string),
    ("delta_content", delta_content),
    ("message_string", message_string),
    ("message_content", message_content),
    ("choice_content", choice_content),
];

fn delta_string(choice: &Value) -> Option<&str> {
    choice.get("delta")?.as_str()
}

fn delta_content(choice: &Value) -> Option<&str> {
    non_empty(choice.get("delta")?.get("content")?.as_str())
}

fn message_string(choice: &Value) -> Option<&str> {
    choice.get("message")?.as_str()
}

fn message_content(choice: &Value) -> Option<&str> {
    non_empty(choice.get("message")?.get("content")?.as_str())
}

fn choice_content(choice: &Value) -> Option<&str> {
    non_empty(choice.get("content")?.as_str())
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

pub fn extract_delta(payload: &Value) -> Option<&str> {
    let choice = payload.get("choices")?.get(0)?;
    DELTA_RULES.iter().find_map(|(name, rule)| {
        let delta = rule(choice)?;
        debug!("delta matched rule {name}");
        Some(delta)
    })
}

/// Interprets one line of the provider stream. Comments, blank lines and
/// anything that is not a `data:` JSON payload are skipped.
pub fn parse_sse_line(line: &str) -> SseFrame {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseFrame::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseFrame::Done;
    }
    let Ok(payload) = serde_json::from_str::<Value>(data) else {
        return SseFrame::Skip;
    };
    match extract_delta(&payload) {
        Some(delta) if !delta.is_empty() => SseFrame::Delta(delta.to_owned()),
        _ => SseFrame::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_holds_partial_lines() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\ndata: x"), vec!["data: {\"a\":1}\r", ""]);
        assert_eq!(decoder.finish().as_deref(), Some("data: x"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_keeps_split_utf8_intact() {
        let mut decoder = SseLineDecoder::new();
        let bytes = "data: …\n".as_bytes();
        assert!(decoder.push(&bytes[..7]).is_empty());
        assert_eq!(decoder.push(&bytes[7..]), vec!["data: …"]);
    }

    #[test]
    fn delta_rules_apply_in_order() {
        let cases = [
            (r#"{"choices":[{"delta":{"content":"Hel"}}]}"#, SseFrame::Delta("Hel".into())),
            (r#"{"choices":[{"delta":"raw"}]}"#, SseFrame::Delta("raw".into())),
            (r#"{"choices":[{"message":{"content":"whole"}}]}"#, SseFrame::Delta("whole".into())),
            (r#"{"choices":[{"message":"msg"}]}"#, SseFrame::Delta("msg".into())),
            (r#"{"choices":[{"content":"bare"}]}"#, SseFrame::Delta("bare".into())),
            (
                r#"{"choices":[{"delta":{"content":""},"message":{"content":"fallback"}}]}"#,
                SseFrame::Delta("fallback".into()),
            ),
            (r#"{"choices":[{"delta":{"role":"assistant"}}]}"#, SseFrame::Skip),
            (r#"{"choices":[]}"#, SseFrame::Skip),
        ];
        for (json, expected) in cases {
            assert_eq!(parse_sse_line(&format!("data: {json}")), expected, "{json}");
        }
    }

    #[test]
    fn non_data_and_malformed_lines_are_skipped() {
        assert_eq!(parse_sse_line(": OPENROUTER PROCESSING"), SseFrame::Skip);
        assert_eq!(parse_sse_line(""), SseFrame::Skip);
        assert_eq!(parse_sse_line("data: {not json"), SseFrame::Skip);
        assert_eq!(parse_sse_line("event: ping"), SseFrame::Skip);
        assert_eq!(parse_sse_line("data: [DONE]\r"), SseFrame::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), SseFrame::Done);
    }

    #[test]
    fn paid_requests_carry_the_pdf_hint() {
        let messages = vec![ChatMessage::new("user", "hi")];
        let free = OpenRouterClient::request_body("m", &messages, false);
        assert!(free.get("plugins").is_none());
        assert_eq!(free["stream"], true);
        assert_eq!(free["messages"][0]["content"], "hi");

        let paid = OpenRouterClient::request_body("m", &messages, true);
        assert_eq!(paid["plugins"][0]["id"], "file-parser");
        assert_eq!(paid["plugins"][0]["pdf"]["engine"], "native");
    }
}
