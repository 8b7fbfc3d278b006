pub mod ollama;
pub mod openai;
pub mod store;

mod sse;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use ollama::OllamaChat;
pub use openai::OpenAiChat;
pub use store::{InMemoryMessageStore, MessageStore};

/// Fragments of a model reply, in generation order. The stream ends after the
/// final fragment; an `Err` item ends it early.
pub type FragmentStream = BoxStream<'static, anyhow::Result<String>>;

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, in the shape chat APIs expect on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat backend that streams its reply.
///
/// `open` performs the request handshake, so transport and authentication
/// failures surface before any fragment exists. Failures after that arrive
/// as the stream's final `Err` item. Dropping the stream abandons the
/// request.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn open(&self, messages: Vec<ChatMessage>) -> anyhow::Result<FragmentStream>;
}
