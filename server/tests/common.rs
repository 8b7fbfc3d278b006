//! Shared fixtures for the HTTP integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use futures::stream::{self, StreamExt};

use llm_core::{ChatMessage, ChatService, FragmentStream, InMemoryMessageStore};
use server::metrics::AppMetrics;
use server::{create_app, AppState};
use tts_core::{PcmStream, SpeechEngine};

pub const TEST_SAMPLE_RATE: u32 = 22050;

/// One step of a scripted model reply.
#[derive(Clone)]
pub enum ScriptStep {
    Fragment(&'static str),
    Fail(&'static str),
}

/// Chat backend that replays a fixed script and records every request
/// it was opened with.
pub struct ScriptedChat {
    script: Vec<ScriptStep>,
    pub calls: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedChat {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn open(&self, messages: Vec<ChatMessage>) -> anyhow::Result<FragmentStream> {
        self.calls.lock().unwrap().push(messages);
        let steps = self.script.clone();
        Ok(stream::iter(steps)
            .map(|step| match step {
                ScriptStep::Fragment(text) => Ok(text.to_string()),
                ScriptStep::Fail(reason) => Err(anyhow::anyhow!("{reason}")),
            })
            .boxed())
    }
}

/// Chat backend whose handshake itself fails.
pub struct FailingChat;

#[async_trait]
impl ChatService for FailingChat {
    async fn open(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<FragmentStream> {
        anyhow::bail!("chat backend unreachable")
    }
}

/// Engine producing one silent 16-bit sample per input character, so tests
/// can predict payload sizes exactly. Sentences containing `fail_on` fail.
pub struct MockSpeechEngine {
    pub fail_on: Option<&'static str>,
}

impl MockSpeechEngine {
    pub fn new() -> Self {
        Self { fail_on: None }
    }
}

impl SpeechEngine for MockSpeechEngine {
    fn sample_rate(&self) -> u32 {
        TEST_SAMPLE_RATE
    }

    fn synthesize(&self, text: &str) -> PcmStream {
        if let Some(marker) = self.fail_on {
            if text.contains(marker) {
                return Box::pin(stream::once(async {
                    Err(anyhow::anyhow!("mock synthesis failure"))
                }));
            }
        }
        let pcm = vec![0u8; text.chars().count() * 2];
        Box::pin(stream::once(async move { Ok(pcm) }))
    }
}

pub fn test_state(chat: Arc<dyn ChatService>, engine: Arc<dyn SpeechEngine>) -> AppState {
    AppState {
        chat,
        engine,
        store: Arc::new(InMemoryMessageStore::new()),
        metrics: Arc::new(AppMetrics::new()),
    }
}

/// Build the real application router over mock backends.
pub fn test_app(chat: Arc<dyn ChatService>, engine: Arc<dyn SpeechEngine>) -> Router {
    create_app(test_state(chat, engine))
}

/// Split a body of concatenated WAV files on their RIFF size fields.
pub fn split_wav_containers(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut containers = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= 44, "truncated WAV header");
        assert_eq!(&bytes[..4], b"RIFF", "container does not start with RIFF");
        let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let total = riff_size + 8;
        assert!(bytes.len() >= total, "container shorter than its RIFF size");
        containers.push(bytes[..total].to_vec());
        bytes = &bytes[total..];
    }
    containers
}
