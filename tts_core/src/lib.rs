pub mod piper;
pub mod synth;
pub mod wav;

use std::pin::Pin;

use futures_core::Stream;

pub use piper::PiperSpeechEngine;
pub use synth::{render_sentence, SynthesizedAudio};
pub use wav::{encode_wav, encode_wav_base64};

/// Chunked output of a single synthesis call: interleaved s16le bytes, mono,
/// at the engine's sample rate.
pub type PcmStream = Pin<Box<dyn Stream<Item = anyhow::Result<Vec<u8>>> + Send>>;

/// A speech synthesizer that renders one sentence at a time.
pub trait SpeechEngine: Send + Sync {
    /// Output sample rate in Hz. Fixed for the life of the engine.
    fn sample_rate(&self) -> u32;

    /// Start rendering `text` and return its chunk stream.
    ///
    /// Chunks arrive in utterance order. An `Err` item ends the stream and
    /// invalidates anything yielded before it.
    fn synthesize(&self, text: &str) -> PcmStream;
}
