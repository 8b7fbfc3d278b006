use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use llm_core::FragmentStream;
use thiserror::Error;
use tracing::{debug, info};
use tts_core::{encode_wav, render_sentence, SpeechEngine};

use crate::metrics::{AppMetrics, RunMetrics};
use crate::segment::SentenceSegmenter;

/// Why a stream stopped before its natural end.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("chat stream failed: {0:#}")]
    Chat(anyhow::Error),

    #[error("synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),
}

/// Where the orchestrator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Consuming chat fragments, waiting for a sentence to complete.
    AwaitingFragments,
    /// At least one sentence is queued for synthesis.
    SentenceReady,
    /// Chat ended; the segmenter tail is being drained.
    Flushing,
    /// Nothing further will be produced.
    Done,
}

/// One framed sentence ready to go out on the wire.
#[derive(Debug)]
pub struct AudioSegment {
    pub index: usize,
    pub container: Vec<u8>,
}

/// Drives chat fragments through segmentation and synthesis into framed
/// containers, one sentence at a time.
///
/// Synthesis is strictly sequential: the next fragment is not read while a
/// sentence is rendering, and segments come out in sentence order. Any chat
/// or synthesis failure parks the machine in `Done`; callers decide whether
/// that becomes an error response or an early end of the stream.
pub struct VoicePipeline {
    fragments: FragmentStream,
    engine: Arc<dyn SpeechEngine>,
    segmenter: SentenceSegmenter,
    queued: VecDeque<String>,
    state: PipelineState,
    index: usize,
    run: Option<RunMetrics>,
    metrics: Arc<AppMetrics>,
}

impl VoicePipeline {
    pub fn new(
        fragments: FragmentStream,
        engine: Arc<dyn SpeechEngine>,
        metrics: Arc<AppMetrics>,
        prompt_chars: usize,
    ) -> Self {
        Self {
            fragments,
            engine,
            segmenter: SentenceSegmenter::new(),
            queued: VecDeque::new(),
            state: PipelineState::AwaitingFragments,
            index: 0,
            run: Some(RunMetrics::begin(prompt_chars)),
            metrics,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Produce the next framed segment, or `None` once the stream is over.
    ///
    /// After an `Err` or a `None` the machine stays in `Done` and keeps
    /// returning `None`.
    pub async fn next_segment(&mut self) -> Result<Option<AudioSegment>, PipelineError> {
        loop {
            match self.state {
                PipelineState::SentenceReady => match self.queued.pop_front() {
                    Some(sentence) => {
                        if self.queued.is_empty() {
                            self.state = PipelineState::AwaitingFragments;
                        }
                        return Ok(Some(self.emit(sentence).await?));
                    }
                    // An empty queue in this state should not happen;
                    // fall back to reading fragments.
                    None => self.state = PipelineState::AwaitingFragments,
                },
                PipelineState::AwaitingFragments => match self.fragments.next().await {
                    Some(Ok(fragment)) => {
                        let sentences = self.segmenter.feed(&fragment);
                        if !sentences.is_empty() {
                            self.queued.extend(sentences);
                            self.state = PipelineState::SentenceReady;
                        }
                    }
                    Some(Err(err)) => {
                        self.state = PipelineState::Done;
                        self.finalize();
                        return Err(PipelineError::Chat(err));
                    }
                    None => self.state = PipelineState::Flushing,
                },
                PipelineState::Flushing => {
                    self.state = PipelineState::Done;
                    match self.segmenter.flush() {
                        Some(tail) => {
                            let segment = self.emit(tail).await?;
                            self.finalize();
                            return Ok(Some(segment));
                        }
                        None => {
                            self.finalize();
                            return Ok(None);
                        }
                    }
                }
                PipelineState::Done => return Ok(None),
            }
        }
    }

    async fn emit(&mut self, sentence: String) -> Result<AudioSegment, PipelineError> {
        let audio = match render_sentence(self.engine.as_ref(), &sentence).await {
            Ok(audio) => audio,
            Err(err) => {
                self.state = PipelineState::Done;
                self.finalize();
                return Err(PipelineError::Synthesis(err));
            }
        };

        let container = encode_wav(&audio.pcm, self.engine.sample_rate());
        if let Some(run) = self.run.as_mut() {
            run.record_sentence(
                sentence.chars().count(),
                audio.pcm.len(),
                container.len(),
                audio.elapsed,
            );
        }

        let index = self.index;
        self.index += 1;
        debug!(
            "segment {index}: {} chars -> {} PCM bytes in {:.0?}",
            sentence.chars().count(),
            audio.pcm.len(),
            audio.elapsed
        );
        Ok(AudioSegment { index, container })
    }

    fn finalize(&mut self) {
        if let Some(run) = self.run.take() {
            let summary = run.finish(self.engine.sample_rate());
            info!(
                "stream finished: {} sentence(s) from a {}-char prompt, {:.2}s audio, rtf={:.2}, wall={:.0?}, synthesis={:.0?}",
                summary.sentences, summary.prompt_chars, summary.audio_secs, summary.rtf,
                summary.wall, summary.synthesis_total
            );
            self.metrics.record_stream(&summary);
        }
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        // A client disconnect drops the pipeline mid-run; the run is still
        // accounted for exactly once.
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tts_core::PcmStream;

    struct StubEngine {
        rate: u32,
        fail_on: Option<&'static str>,
    }

    impl SpeechEngine for StubEngine {
        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn synthesize(&self, text: &str) -> PcmStream {
            if let Some(marker) = self.fail_on {
                if text.contains(marker) {
                    return Box::pin(stream::iter(vec![Err(anyhow::anyhow!(
                        "no voice for {marker}"
                    ))]));
                }
            }
            // Two bytes per char keeps payload sizes predictable.
            let pcm = vec![0u8; text.chars().count() * 2];
            Box::pin(stream::iter(vec![Ok(pcm)]))
        }
    }

    fn pipeline_over(
        fragments: Vec<anyhow::Result<&'static str>>,
        engine: StubEngine,
    ) -> VoicePipeline {
        let stream = stream::iter(fragments.into_iter().map(|r| r.map(String::from))).boxed();
        VoicePipeline::new(stream, Arc::new(engine), Arc::new(AppMetrics::new()), 0)
    }

    #[tokio::test]
    async fn walks_awaiting_ready_flushing_done() {
        let mut pipeline = pipeline_over(
            vec![Ok("Hello"), Ok(". How are you"), Ok("? Fine")],
            StubEngine {
                rate: 22050,
                fail_on: None,
            },
        );
        assert_eq!(pipeline.state(), PipelineState::AwaitingFragments);

        // "Hello." then " How are you?" then the flushed "Fine".
        let first = pipeline.next_segment().await.unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.container.len(), 44 + "Hello.".len() * 2);

        let second = pipeline.next_segment().await.unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.container.len(), 44 + " How are you?".len() * 2);

        let third = pipeline.next_segment().await.unwrap().unwrap();
        assert_eq!(third.index, 2);
        assert_eq!(third.container.len(), 44 + "Fine".len() * 2);

        assert!(pipeline.next_segment().await.unwrap().is_none());
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(pipeline.next_segment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_source_finishes_without_segments() {
        let mut pipeline = pipeline_over(
            vec![],
            StubEngine {
                rate: 22050,
                fail_on: None,
            },
        );
        assert!(pipeline.next_segment().await.unwrap().is_none());
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn whitespace_tail_flushes_to_nothing() {
        let mut pipeline = pipeline_over(
            vec![Ok("Complete. "), Ok("   ")],
            StubEngine {
                rate: 22050,
                fail_on: None,
            },
        );
        assert!(pipeline.next_segment().await.unwrap().is_some());
        assert!(pipeline.next_segment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_error_before_any_sentence_is_fatal() {
        let mut pipeline = pipeline_over(
            vec![Err(anyhow::anyhow!("connection reset"))],
            StubEngine {
                rate: 22050,
                fail_on: None,
            },
        );
        let err = pipeline.next_segment().await.unwrap_err();
        assert!(matches!(err, PipelineError::Chat(_)));
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn chat_error_stops_after_the_last_good_segment() {
        let mut pipeline = pipeline_over(
            vec![Ok("One. "), Ok("Two. "), Err(anyhow::anyhow!("upstream died"))],
            StubEngine {
                rate: 22050,
                fail_on: None,
            },
        );
        assert!(pipeline.next_segment().await.unwrap().is_some());
        assert!(pipeline.next_segment().await.unwrap().is_some());
        let err = pipeline.next_segment().await.unwrap_err();
        assert!(matches!(err, PipelineError::Chat(_)));
        assert!(pipeline.next_segment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn synthesis_failure_after_a_good_segment_is_fatal() {
        let mut pipeline = pipeline_over(
            vec![Ok("Good one. "), Ok("Bad one. "), Ok("Never read. ")],
            StubEngine {
                rate: 22050,
                fail_on: Some("Bad"),
            },
        );
        assert!(pipeline.next_segment().await.unwrap().is_some());
        let err = pipeline.next_segment().await.unwrap_err();
        assert!(matches!(err, PipelineError::Synthesis(_)));
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(pipeline.next_segment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finished_streams_land_in_the_process_counters() {
        let metrics = Arc::new(AppMetrics::new());
        let fragments = stream::iter(vec![Ok::<_, anyhow::Error>("Count me. ".to_string())]).boxed();
        let engine = StubEngine {
            rate: 22050,
            fail_on: None,
        };
        let mut pipeline =
            VoicePipeline::new(fragments, Arc::new(engine), Arc::clone(&metrics), 9);

        while pipeline.next_segment().await.unwrap().is_some() {}
        drop(pipeline);

        let stats = metrics.snapshot();
        assert_eq!(stats.streams_completed, 1);
        assert_eq!(stats.sentences_synthesized, 1);
        assert_eq!(
            stats.audio_bytes_emitted,
            44 + "Count me.".len() as u64 * 2
        );
    }
}
