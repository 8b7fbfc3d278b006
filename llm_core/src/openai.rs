use std::env;
use std::time::Duration;

use anyhow::Context;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use crate::sse::LineBuffer;
use crate::{ChatMessage, ChatService, FragmentStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions, consumed as server-sent events.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct SseChunk {
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    content: Option<String>,
}

#[derive(Debug)]
enum SseEvent {
    Fragment(String),
    Empty,
    Done,
}

impl OpenAiChat {
    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional,
    /// for compatible gateways).
    pub fn new(model: impl Into<String>) -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatService for OpenAiChat {
    async fn open(&self, messages: Vec<ChatMessage>) -> anyhow::Result<FragmentStream> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach the completions API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("completions API returned {status}: {detail}");
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut lines = LineBuffer::new();
            'read: while let Some(piece) = bytes.next().await {
                let piece = piece.context("completions stream interrupted")?;
                lines.push_bytes(&piece);
                for line in lines.take_lines() {
                    match decode_sse_line(&line)? {
                        SseEvent::Fragment(text) => yield text,
                        SseEvent::Done => break 'read,
                        SseEvent::Empty => {}
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Decode one SSE line. Anything that is not a `data:` payload (comments,
/// event names, blanks) carries nothing.
fn decode_sse_line(line: &str) -> anyhow::Result<SseEvent> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Empty);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let chunk: SseChunk = serde_json::from_str(payload)
        .with_context(|| format!("invalid completion chunk: {payload}"))?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
    {
        Some(text) if !text.is_empty() => Ok(SseEvent::Fragment(text)),
        _ => Ok(SseEvent::Empty),
    }
}
