use std::time::{Duration, Instant};

use futures_util::StreamExt;

use crate::SpeechEngine;

/// One fully rendered sentence: concatenated PCM plus the wall-clock time the
/// engine spent producing it.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub pcm: Vec<u8>,
    pub elapsed: Duration,
}

impl SynthesizedAudio {
    /// Seconds of playback this payload represents at `sample_rate`.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.pcm.len() as f64 / (sample_rate as f64 * 2.0)
    }
}

/// Drive one sentence through the engine and collect every chunk.
///
/// The timer spans the whole call. A failed chunk fails the sentence; partial
/// audio is discarded, never returned.
pub async fn render_sentence(
    engine: &dyn SpeechEngine,
    text: &str,
) -> anyhow::Result<SynthesizedAudio> {
    let started = Instant::now();
    let mut stream = engine.synthesize(text);

    let mut pcm = Vec::new();
    while let Some(chunk) = stream.next().await {
        pcm.extend_from_slice(&chunk?);
    }

    Ok(SynthesizedAudio {
        pcm,
        elapsed: started.elapsed(),
    })
}
