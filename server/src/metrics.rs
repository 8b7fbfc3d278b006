// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Measurements for one streaming request, accumulated sentence by sentence.
#[derive(Debug)]
pub struct RunMetrics {
    started: Instant,
    synthesis: Vec<Duration>,
    prompt_chars: usize,
    sentence_chars: usize,
    pcm_bytes: u64,
    container_bytes: u64,
}

impl RunMetrics {
    pub fn begin(prompt_chars: usize) -> Self {
        Self {
            started: Instant::now(),
            synthesis: Vec::new(),
            prompt_chars,
            sentence_chars: 0,
            pcm_bytes: 0,
            container_bytes: 0,
        }
    }

    /// Record one synthesized sentence.
    pub fn record_sentence(
        &mut self,
        chars: usize,
        pcm_bytes: usize,
        container_bytes: usize,
        took: Duration,
    ) {
        self.synthesis.push(took);
        self.sentence_chars += chars;
        self.pcm_bytes += pcm_bytes as u64;
        self.container_bytes += container_bytes as u64;
    }

    /// Close the run and compute its summary at the engine's sample rate.
    pub fn finish(self, sample_rate: u32) -> StreamSummary {
        let wall = self.started.elapsed();
        // Audio playback time comes from the raw payload: two bytes per
        // sample, mono. Container headers are transfer overhead.
        let audio_secs = self.pcm_bytes as f64 / (sample_rate as f64 * 2.0);
        let rtf = if audio_secs > 0.0 {
            wall.as_secs_f64() / audio_secs
        } else {
            0.0
        };
        StreamSummary {
            wall,
            synthesis_total: self.synthesis.iter().sum(),
            sentences: self.synthesis.len(),
            prompt_chars: self.prompt_chars,
            sentence_chars: self.sentence_chars,
            pcm_bytes: self.pcm_bytes,
            container_bytes: self.container_bytes,
            audio_secs,
            rtf,
        }
    }
}

/// Final accounting for one stream.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub wall: Duration,
    pub synthesis_total: Duration,
    pub sentences: usize,
    pub prompt_chars: usize,
    pub sentence_chars: usize,
    pub pcm_bytes: u64,
    pub container_bytes: u64,
    /// Seconds of playable audio produced.
    pub audio_secs: f64,
    /// Real-time factor: wall time over audio time. Zero when no audio.
    pub rtf: f64,
}

/// Process-wide counters, updated as requests arrive and streams finish.
#[derive(Debug, Default)]
pub struct AppMetrics {
    request_count: AtomicU64,
    streams_completed: AtomicU64,
    sentences_synthesized: AtomicU64,
    audio_bytes_emitted: AtomicU64,
    synthesis_time_ms: AtomicU64,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream(&self, summary: &StreamSummary) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
        self.sentences_synthesized
            .fetch_add(summary.sentences as u64, Ordering::Relaxed);
        self.audio_bytes_emitted
            .fetch_add(summary.container_bytes, Ordering::Relaxed);
        self.synthesis_time_ms
            .fetch_add(summary.synthesis_total.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let sentences = self.sentences_synthesized.load(Ordering::Relaxed);
        let synthesis_ms = self.synthesis_time_ms.load(Ordering::Relaxed);
        PipelineStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            sentences_synthesized: sentences,
            audio_bytes_emitted: self.audio_bytes_emitted.load(Ordering::Relaxed),
            avg_synthesis_ms: if sentences > 0 {
                synthesis_ms as f64 / sentences as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineStats {
    pub request_count: u64,
    pub streams_completed: u64,
    pub sentences_synthesized: u64,
    pub audio_bytes_emitted: u64,
    pub avg_synthesis_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub system_load: Option<f64>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemStats,
    pub pipeline: PipelineStats,
}
