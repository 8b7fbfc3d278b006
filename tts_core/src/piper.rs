use std::{
    fs,
    path::Path,
    sync::{Arc, RwLock},
};

use anyhow::Context;
use piper_rs::synth::PiperSpeechSynthesizer;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{PcmStream, SpeechEngine};

/// Piper-backed engine. One voice, loaded once; synthesis runs on the
/// blocking pool and chunks flow out through a bounded channel.
pub struct PiperSpeechEngine {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct VoiceConfig {
    audio: AudioConfig,
}

#[derive(Deserialize)]
struct AudioConfig {
    sample_rate: u32,
}

impl PiperSpeechEngine {
    /// Load a voice from its piper config JSON (the `.onnx.json` next to the
    /// model file).
    pub fn from_config_path<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<Self> {
        let sample_rate = read_sample_rate(cfg_path.as_ref())?;
        let model = piper_rs::from_config_path(cfg_path.as_ref())
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)
            .map_err(|e| anyhow::anyhow!("piper init error: {e}"))?;
        Ok(Self {
            synth: Arc::new(RwLock::new(synth)),
            sample_rate,
        })
    }
}

impl SpeechEngine for PiperSpeechEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(&self, text: &str) -> PcmStream {
        let synth = Arc::clone(&self.synth);
        let text = text.to_string();
        let (tx, mut rx) = mpsc::channel::<anyhow::Result<Vec<u8>>>(8);

        tokio::task::spawn_blocking(move || {
            let guard = match synth.read() {
                Ok(g) => g,
                Err(_) => {
                    let _ = tx.blocking_send(Err(anyhow::anyhow!(
                        "synthesizer lock poisoned by an earlier panic"
                    )));
                    return;
                }
            };
            let parts = match guard.synthesize_parallel(text, None) {
                Ok(parts) => parts,
                Err(e) => {
                    let _ = tx.blocking_send(Err(anyhow::anyhow!("piper synth error: {e}")));
                    return;
                }
            };
            for part in parts {
                let chunk = match part {
                    Ok(audio) => samples_to_pcm(&audio.into_vec()),
                    Err(e) => {
                        let _ = tx.blocking_send(Err(anyhow::anyhow!("piper chunk error: {e}")));
                        return;
                    }
                };
                // Receiver gone means the request was cancelled; stop rendering.
                if tx.blocking_send(Ok(chunk)).is_err() {
                    return;
                }
            }
        });

        Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        })
    }
}

/// Read `audio.sample_rate` from the voice config.
fn read_sample_rate(cfg_path: &Path) -> anyhow::Result<u32> {
    let text = fs::read_to_string(cfg_path)
        .with_context(|| format!("Failed to read config file: {}", cfg_path.display()))?;
    let config: VoiceConfig =
        serde_json::from_str(&text).context("Config file is not valid JSON")?;
    Ok(config.audio.sample_rate)
}

/// f32 samples in [-1.0, 1.0] to interleaved s16le bytes.
fn samples_to_pcm(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
