use std::env;
use std::time::Duration;

use anyhow::Context;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::sse::LineBuffer;
use crate::{ChatMessage, ChatService, FragmentStream};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama's native chat API, consumed as streaming JSON lines.
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: String,
}

#[derive(Debug)]
enum LineEvent {
    Fragment(String),
    Empty,
    Done,
}

impl OllamaChat {
    /// Point at the daemon named by `OLLAMA_URL`, or the local default.
    pub fn new(model: impl Into<String>) -> anyhow::Result<Self> {
        let base_url = env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url, model)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        // Connect timeout only. Generation can legitimately take minutes, so
        // there is no whole-response deadline here.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatService for OllamaChat {
    async fn open(&self, messages: Vec<ChatMessage>) -> anyhow::Result<FragmentStream> {
        let payload = ChatPayload {
            model: &self.model,
            messages: &messages,
            stream: true,
        };
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("Failed to reach ollama")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama returned {status}: {detail}");
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut lines = LineBuffer::new();
            'read: while let Some(piece) = bytes.next().await {
                let piece = piece.context("ollama stream interrupted")?;
                lines.push_bytes(&piece);
                for line in lines.take_lines() {
                    match decode_line(&line)? {
                        LineEvent::Fragment(text) => yield text,
                        LineEvent::Done => break 'read,
                        LineEvent::Empty => {}
                    }
                }
            }
            // A final line may arrive without its newline.
            let tail = lines.residue();
            let tail = tail.trim();
            if !tail.is_empty() {
                if let LineEvent::Fragment(text) = decode_line(tail)? {
                    yield text;
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Decode one JSON line of the chat stream. An inline `error` field fails
/// the stream; empty-content keepalives carry nothing.
fn decode_line(line: &str) -> anyhow::Result<LineEvent> {
    let chunk: StreamChunk =
        serde_json::from_str(line).with_context(|| format!("invalid ollama chunk: {line}"))?;
    if let Some(message) = chunk.error {
        anyhow::bail!("ollama error: {message}");
    }
    if let Some(msg) = chunk.message {
        if !msg.content.is_empty() {
            return Ok(LineEvent::Fragment(msg.content));
        }
    }
    if chunk.done {
        return Ok(LineEvent::Done);
    }
    Ok(LineEvent::Empty)
}
