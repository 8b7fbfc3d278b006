//! Behavior of the incremental voice-chat stream: sentence boundaries,
//! container framing, and how failures at each stage surface to the client.

mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::*;
use server::create_app;

fn voice_request(prompt: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/voice-chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "prompt": prompt }).to_string()))
        .unwrap()
}

fn assert_wav_samples(container: &[u8], expected_samples: u32) {
    let reader = hound::WavReader::new(std::io::Cursor::new(container)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(reader.len(), expected_samples);
}

#[tokio::test]
async fn test_each_sentence_becomes_its_own_wav_file() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![
            ScriptStep::Fragment("Hello"),
            ScriptStep::Fragment(". "),
            ScriptStep::Fragment("How are you"),
            ScriptStep::Fragment("? "),
            ScriptStep::Fragment("Good"),
        ])),
        Arc::new(MockSpeechEngine::new()),
    );
    let response = app.oneshot(voice_request("Say hi")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/wav"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let containers = split_wav_containers(&body);
    assert_eq!(containers.len(), 3);

    // "Hello.", " How are you?", and the flushed tail "Good".
    for (container, expected) in containers.iter().zip([6u32, 13, 4]) {
        assert_wav_samples(container, expected);
    }
}

#[tokio::test]
async fn test_mid_stream_chat_failure_ends_after_last_whole_file() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![
            ScriptStep::Fragment("One."),
            ScriptStep::Fragment(" Two."),
            ScriptStep::Fail("connection reset"),
        ])),
        Arc::new(MockSpeechEngine::new()),
    );
    let response = app.oneshot(voice_request("count")).await.unwrap();

    // Audio already went out, so the failure can only truncate the body.
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let containers = split_wav_containers(&body);
    assert_eq!(containers.len(), 2);
    assert_wav_samples(&containers[0], 4);
    assert_wav_samples(&containers[1], 5);
}

#[tokio::test]
async fn test_upfront_chat_failure_is_a_status_code() {
    let app = test_app(Arc::new(FailingChat), Arc::new(MockSpeechEngine::new()));
    let response = app.oneshot(voice_request("hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["code"], 502);
}

#[tokio::test]
async fn test_chat_failure_before_first_sentence_is_a_status_code() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![ScriptStep::Fail("boom")])),
        Arc::new(MockSpeechEngine::new()),
    );
    let response = app.oneshot(voice_request("hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_synthesis_failure_on_first_sentence_is_a_status_code() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![ScriptStep::Fragment("Hello.")])),
        Arc::new(MockSpeechEngine {
            fail_on: Some("Hello"),
        }),
    );
    let response = app.oneshot(voice_request("hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["code"], 500);
}

#[tokio::test]
async fn test_synthesis_failure_mid_stream_keeps_earlier_audio() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![
            ScriptStep::Fragment("One."),
            ScriptStep::Fragment(" Two."),
        ])),
        Arc::new(MockSpeechEngine {
            fail_on: Some("Two"),
        }),
    );
    let response = app.oneshot(voice_request("count")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let containers = split_wav_containers(&body);
    assert_eq!(containers.len(), 1);
    assert_wav_samples(&containers[0], 4);
}

#[tokio::test]
async fn test_empty_reply_is_an_empty_body() {
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![])),
        Arc::new(MockSpeechEngine::new()),
    );
    let response = app.oneshot(voice_request("say nothing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());

    // Whitespace with no terminator flushes to nothing as well.
    let app = test_app(
        Arc::new(ScriptedChat::new(vec![ScriptStep::Fragment("   ")])),
        Arc::new(MockSpeechEngine::new()),
    );
    let response = app.oneshot(voice_request("say nothing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_finished_stream_lands_in_the_counters() {
    let state = test_state(
        Arc::new(ScriptedChat::new(vec![ScriptStep::Fragment("Count me.")])),
        Arc::new(MockSpeechEngine::new()),
    );
    let metrics = Arc::clone(&state.metrics);
    let app = create_app(state);

    let response = app.oneshot(voice_request("count")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(split_wav_containers(&body).len(), 1);

    let stats = metrics.snapshot();
    assert_eq!(stats.request_count, 1);
    assert_eq!(stats.streams_completed, 1);
    assert_eq!(stats.sentences_synthesized, 1);
    assert_eq!(stats.audio_bytes_emitted, (44 + "Count me.".len() * 2) as u64);
}
