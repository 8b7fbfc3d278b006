use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use anyhow::Context;
use llm_core::{ChatService, InMemoryMessageStore, OllamaChat, OpenAiChat};
use server::error::ApiError;
use server::metrics::AppMetrics;
use server::{add_request_id, create_app, mark_started, AppState, ServerConfig};
use tts_core::{PiperSpeechEngine, SpeechEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice chat server...");

    let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "ollama".into());
    let chat: Arc<dyn ChatService> = match provider.as_str() {
        "ollama" => {
            let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "qwen2.5".into());
            info!("Chat backend: ollama, model {model}");
            Arc::new(OllamaChat::new(model)?)
        }
        "openai" => {
            let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
            info!("Chat backend: OpenAI, model {model}");
            Arc::new(OpenAiChat::new(model)?)
        }
        other => anyhow::bail!("Unknown LLM_PROVIDER {other:?} (expected \"ollama\" or \"openai\")"),
    };

    info!("Loading voice model...");
    let voice_config =
        std::env::var("TTS_VOICE_CONFIG").unwrap_or_else(|_| "models/voice.onnx.json".into());
    let engine = PiperSpeechEngine::from_config_path(&voice_config)
        .with_context(|| format!("Could not load voice config {voice_config}"))?;
    info!("Voice model ready: {} Hz", engine.sample_rate());

    mark_started();

    let config = ServerConfig::from_env();

    let state = AppState {
        chat,
        engine: Arc::new(engine),
        store: Arc::new(InMemoryMessageStore::new()),
        metrics: Arc::new(AppMetrics::new()),
    };
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, timeout={}s",
        config.port, config.rate_limit_per_minute, config.request_timeout_secs
    );

    // CORS configuration - environment-aware
    let cors = if let Some(ref allowed_origins) = config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(false)
    };

    // Global key: every client shares one limit, which behaves predictably
    // behind Docker and reverse proxies where peer IPs are unreliable.
    let governor_conf = GovernorConfigBuilder::default()
        .per_second((config.rate_limit_per_minute / 60) as u64)
        .burst_size(config.rate_limit_per_minute)
        .key_extractor(GlobalKeyExtractor)
        .finish()
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid rate limit configuration (RATE_LIMIT_PER_MINUTE must be at least 60)"
            )
        })?;
    let governor_conf = Arc::new(governor_conf);

    info!(
        "Rate limiting: {} requests per minute",
        config.rate_limit_per_minute
    );

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            GovernorLayer::new(governor_conf)
                .error_handler(|_| ApiError::RateLimitExceeded.into_response()),
        )
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let app = create_app(state)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
