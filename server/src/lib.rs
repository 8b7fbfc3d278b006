pub mod error;
pub mod validation;
pub mod config;
pub mod metrics;
pub mod segment;
pub mod pipeline;

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use llm_core::{ChatMessage, ChatService, MessageStore};
use tts_core::{encode_wav_base64, render_sentence, SpeechEngine};

use crate::error::ApiError;
use crate::metrics::{AppMetrics, MetricsResponse, SystemStats};
use crate::pipeline::VoicePipeline;
use crate::validation::{validate_prompt, validate_session_id, validate_text};

pub use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatService>,
    pub engine: Arc<dyn SpeechEngine>,
    pub store: Arc<dyn MessageStore>,
    pub metrics: Arc<AppMetrics>,
}

#[derive(Deserialize)]
pub struct VoiceChatRequest {
    prompt: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    prompt: String,
    session_id: Option<String>,
}

#[derive(Deserialize)]
pub struct TtsRequest {
    text: String,
}

#[derive(Serialize)]
pub struct TtsResponse {
    audio_base64: String,
    duration_ms: u64,
    sample_rate: u32,
}

/// Build the application router. Routes are served both at the root and
/// under `/api`; transport middleware is layered on by the binary.
pub fn create_app(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voice-chat", post(voice_chat_endpoint))
        .route("/chat", post(chat_endpoint))
        .route("/tts", post(tts_endpoint))
        .route("/sessions/{session_id}", delete(clear_session_endpoint));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .fallback(not_found)
        .with_state(state)
}

pub async fn health_check() -> &'static str {
    "ok"
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record process start for the uptime gauge. Idempotent.
pub fn mark_started() {
    let _ = START_TIME.set(Instant::now());
}

/// Tag every request and its response with a correlation id.
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    match HeaderValue::from_str(&request_id) {
        Ok(value) => {
            request.headers_mut().insert("x-request-id", value.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert("x-request-id", value);
            response
        }
        Err(_) => next.run(request).await,
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| {
                    loadavg
                        .split_whitespace()
                        .next()
                        .and_then(|s| s.parse::<f64>().ok())
                })
        }
        #[cfg(not(unix))]
        None
    };

    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        system: SystemStats {
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_used_mb: system.used_memory() / 1024 / 1024, // bytes to MB
            memory_total_mb: system.total_memory() / 1024 / 1024,
            system_load,
            uptime_seconds: uptime,
        },
        pipeline: state.metrics.snapshot(),
    })
}

/// Stream a spoken reply for the prompt as concatenated WAV files.
///
/// The first segment is produced before the response commits to streaming,
/// so a prompt that fails upfront still gets a proper status code. Once
/// bytes are out, failures end the body early after the last whole file.
pub async fn voice_chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<VoiceChatRequest>,
) -> Result<Response, ApiError> {
    state.metrics.record_request();
    validate_prompt(&req.prompt)?;

    let prompt_chars = req.prompt.chars().count();
    let fragments = state
        .chat
        .open(vec![ChatMessage::user(req.prompt.as_str())])
        .await
        .map_err(|e| ApiError::LlmError(format!("{e:#}")))?;

    let mut pipeline = VoicePipeline::new(
        fragments,
        Arc::clone(&state.engine),
        Arc::clone(&state.metrics),
        prompt_chars,
    );
    let first = pipeline.next_segment().await?;

    let body = async_stream::stream! {
        if let Some(first) = first {
            yield Ok::<_, Infallible>(first.container);
            loop {
                match pipeline.next_segment().await {
                    Ok(Some(segment)) => yield Ok(segment.container),
                    Ok(None) => break,
                    Err(err) => {
                        warn!("terminating audio stream early: {err}");
                        break;
                    }
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::InternalError(format!("Failed to build response: {e}")))
}

/// Stream the model reply as plain text, optionally carrying session
/// history. Both turns are recorded only once the reply is complete.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    state.metrics.record_request();
    validate_prompt(&req.prompt)?;

    let mut messages = Vec::new();
    if let Some(session_id) = &req.session_id {
        validate_session_id(session_id)?;
        messages = state.store.messages(session_id);
    }
    messages.push(ChatMessage::user(req.prompt.as_str()));

    let mut fragments = state
        .chat
        .open(messages)
        .await
        .map_err(|e| ApiError::LlmError(format!("{e:#}")))?;

    let store = Arc::clone(&state.store);
    let session_id = req.session_id.clone();
    let prompt = req.prompt.clone();
    let body = async_stream::stream! {
        let mut reply = String::new();
        let mut failed = false;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    reply.push_str(&fragment);
                    yield Ok::<_, Infallible>(fragment.into_bytes());
                }
                Err(err) => {
                    warn!("terminating text stream early: {err}");
                    failed = true;
                    break;
                }
            }
        }
        // Only complete exchanges become history.
        if let Some(session_id) = session_id {
            if !failed {
                store.append(&session_id, ChatMessage::user(prompt));
                if !reply.is_empty() {
                    store.append(&session_id, ChatMessage::assistant(reply));
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::InternalError(format!("Failed to build response: {e}")))
}

/// One-shot synthesis of a piece of text, returned as Base64 WAV.
pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    state.metrics.record_request();
    validate_text(&req.text)?;

    let audio = render_sentence(state.engine.as_ref(), &req.text).await?;
    let sample_rate = state.engine.sample_rate();
    let duration_ms = (audio.duration_secs(sample_rate) * 1000.0).round() as u64;
    info!(
        "synthesized {} chars into {} PCM bytes ({duration_ms} ms)",
        req.text.chars().count(),
        audio.pcm.len()
    );

    Ok(Json(TtsResponse {
        audio_base64: encode_wav_base64(&audio.pcm, sample_rate),
        duration_ms,
        sample_rate,
    }))
}

pub async fn clear_session_endpoint(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.metrics.record_request();
    validate_session_id(&session_id)?;
    state.store.clear(&session_id);
    Ok(StatusCode::NO_CONTENT)
}
