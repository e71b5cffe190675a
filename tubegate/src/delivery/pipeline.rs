//! Streaming pipeline.
//!
//! Opens the upstream stream(s) for a [`FormatSelection`] and, when needed,
//! threads them through a transform. The caller gets one output stream
//! regardless of shape.

use std::sync::Arc;

use futures::StreamExt;
use media_extractor::{ByteStream, Extractor, VariantDescriptor};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

use super::lifecycle::{GuardedStream, LifecycleGuard};
use super::range::RangeWindow;
use super::selector::FormatSelection;
use crate::transform::{
    AudioTarget, BoxedReader, InputChannel, TransformJob, TransformProcess, Transformer,
};
use crate::{Error, Result};

/// Output of [`StreamPipeline::open`].
pub struct PipelineOutput {
    pub stream: ByteStream,
    /// Container of the delivered bytes.
    pub container: String,
    pub mime_type: String,
    /// Total length of the full body. Unknown for transformed output.
    pub content_length: Option<u64>,
    /// Whether a transform produced the bytes.
    pub transformed: bool,
}

impl std::fmt::Debug for PipelineOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOutput")
            .field("container", &self.container)
            .field("mime_type", &self.mime_type)
            .field("content_length", &self.content_length)
            .field("transformed", &self.transformed)
            .finish()
    }
}

/// Wires upstreams, transforms and the lifecycle guard together.
#[derive(Clone)]
pub struct StreamPipeline {
    extractor: Arc<dyn Extractor>,
    transformer: Arc<dyn Transformer>,
}

impl StreamPipeline {
    pub fn new(extractor: Arc<dyn Extractor>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            extractor,
            transformer,
        }
    }

    /// Open the output stream for `selection`.
    ///
    /// `range` only applies to passthrough. On error everything opened so far
    /// is torn down before returning.
    pub async fn open(
        &self,
        selection: &FormatSelection,
        range: Option<RangeWindow>,
        reencode: Option<AudioTarget>,
        guard: &Arc<LifecycleGuard>,
    ) -> Result<PipelineOutput> {
        let result = match (selection, reencode) {
            (FormatSelection::Single(variant), None) => {
                self.passthrough(variant, range, guard).await
            }
            (FormatSelection::Single(variant), Some(target)) => {
                self.reencode(variant, target, guard).await
            }
            (FormatSelection::Mux { video, audio }, _) => self.mux(video, audio, guard).await,
            (FormatSelection::None, _) => {
                Err(Error::no_viable_format("no variant selected"))
            }
        };

        if let Err(ref e) = result {
            guard.fail(e.to_string());
            guard.teardown("pipeline setup failed");
        }
        result
    }

    async fn passthrough(
        &self,
        variant: &VariantDescriptor,
        range: Option<RangeWindow>,
        guard: &Arc<LifecycleGuard>,
    ) -> Result<PipelineOutput> {
        debug!(request_id = %guard.request_id(), %variant, ?range, "Opening passthrough");
        let upstream = self
            .extractor
            .open_stream(variant, range.map(Into::into))
            .await?;
        let (upstream, handle) = futures::stream::abortable(upstream);
        guard.register_stream(handle);

        Ok(PipelineOutput {
            stream: GuardedStream::new(upstream.boxed(), guard.clone()).boxed(),
            container: variant.container.clone(),
            mime_type: variant.mime_type.clone(),
            content_length: variant.content_length,
            transformed: false,
        })
    }

    async fn reencode(
        &self,
        variant: &VariantDescriptor,
        target: AudioTarget,
        guard: &Arc<LifecycleGuard>,
    ) -> Result<PipelineOutput> {
        debug!(request_id = %guard.request_id(), %variant, ?target, "Opening audio re-encode");
        let upstream = self.extractor.open_stream(variant, None).await?;

        let job = TransformJob::Reencode { target };
        let process = self.transformer.spawn(&job).await?;
        self.wire(job, process, vec![("audio", upstream)], guard)
    }

    async fn mux(
        &self,
        video: &VariantDescriptor,
        audio: &VariantDescriptor,
        guard: &Arc<LifecycleGuard>,
    ) -> Result<PipelineOutput> {
        debug!(request_id = %guard.request_id(), %video, %audio, "Opening mux");
        let (video_stream, audio_stream) = futures::try_join!(
            self.extractor.open_stream(video, None),
            self.extractor.open_stream(audio, None),
        )?;

        let job = TransformJob::Mux {
            video_container: video.container.clone(),
            audio_container: audio.container.clone(),
        };
        let process = self.transformer.spawn(&job).await?;
        self.wire(
            job,
            process,
            vec![("video", video_stream), ("audio", audio_stream)],
            guard,
        )
    }

    /// Register the process, start one feeder per input and expose the output.
    fn wire(
        &self,
        job: TransformJob,
        process: TransformProcess,
        upstreams: Vec<(&'static str, ByteStream)>,
        guard: &Arc<LifecycleGuard>,
    ) -> Result<PipelineOutput> {
        let TransformProcess {
            inputs,
            output,
            errors,
            handle,
        } = process;
        guard.register_process(handle);

        if inputs.len() != upstreams.len() {
            return Err(Error::transform(format!(
                "{} returned {} inputs, expected {}",
                self.transformer.name(),
                inputs.len(),
                upstreams.len()
            )));
        }

        if let Some(errors) = errors {
            spawn_diagnostics(errors, guard.request_id().to_string());
        }

        // All feeders run concurrently; the transform reads its inputs interleaved.
        for ((label, upstream), input) in upstreams.into_iter().zip(inputs) {
            spawn_feeder(label, upstream, input, guard);
        }

        let format = job.output_format();
        Ok(PipelineOutput {
            stream: GuardedStream::new(ReaderStream::new(output).boxed(), guard.clone()).boxed(),
            container: format.container.to_string(),
            mime_type: format.mime_type.to_string(),
            content_length: None,
            transformed: true,
        })
    }
}

/// Copy `upstream` into `input` on its own task.
fn spawn_feeder(
    label: &'static str,
    upstream: ByteStream,
    input: InputChannel,
    guard: &Arc<LifecycleGuard>,
) {
    let task_guard = guard.clone();
    let task = tokio::spawn(async move {
        match feed(upstream, input).await {
            Ok(bytes) => {
                debug!(request_id = %task_guard.request_id(), input = label, bytes, "Transform input finished");
            }
            // Broken pipes after teardown are expected.
            Err(_) if task_guard.is_closed() => {}
            Err(e) => {
                task_guard.fail(format!("{} input failed: {}", label, e));
                task_guard.teardown("transform input failed");
            }
        }
    });
    guard.register_task(task.abort_handle());
}

async fn feed(upstream: ByteStream, input: InputChannel) -> std::io::Result<u64> {
    let mut writer = input.open().await?;
    let mut reader = StreamReader::new(upstream);
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(bytes)
}

/// Log the transform's diagnostic channel until it closes.
fn spawn_diagnostics(errors: BoxedReader, request_id: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(errors).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if line.to_ascii_lowercase().contains("error") {
                        warn!(request_id = %request_id, "Transform: {}", line);
                    } else {
                        debug!(request_id = %request_id, "Transform: {}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(request_id = %request_id, error = %e, "Transform diagnostics closed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::lifecycle::LifecyclePhase;
    use crate::transform::ProcessControl;
    use async_trait::async_trait;
    use bytes::Bytes;
    use media_extractor::{ByteRange, ExtractionError, MediaInfo, QualityRank, VariantSet};
    use parking_lot::Mutex;
    use process_utils::ProcessState;
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    /// Serves `b"<itag>:"`; records requested ranges.
    struct StaticExtractor {
        ranges: Mutex<Vec<Option<ByteRange>>>,
        /// Fails to open.
        fail_itag: Option<u32>,
        /// Opens, yields one chunk, then errors.
        broken_itag: Option<u32>,
    }

    #[async_trait]
    impl Extractor for StaticExtractor {
        fn name(&self) -> &'static str {
            "static"
        }

        fn validate(&self, _url: &str) -> bool {
            true
        }

        async fn fetch_variants(&self, _url: &str) -> std::result::Result<MediaInfo, ExtractionError> {
            Ok(MediaInfo::new("id", "title", VariantSet::default()))
        }

        async fn open_stream(
            &self,
            variant: &VariantDescriptor,
            range: Option<ByteRange>,
        ) -> std::result::Result<ByteStream, ExtractionError> {
            if self.fail_itag == Some(variant.itag) {
                return Err(ExtractionError::Forbidden);
            }
            self.ranges.lock().push(range);
            let body = Bytes::from(format!("{}:", variant.itag));
            let mut items = vec![Ok(body)];
            if self.broken_itag == Some(variant.itag) {
                items.push(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                )));
            }
            Ok(futures::stream::iter(items).boxed())
        }
    }

    #[derive(Debug, Default)]
    struct Flag(CancellationToken);

    #[async_trait]
    impl ProcessControl for Flag {
        fn id(&self) -> Option<u32> {
            None
        }
        fn terminate(&self) {
            self.0.cancel();
        }
        fn is_running(&self) -> bool {
            !self.0.is_cancelled()
        }
        async fn wait(&self) -> ProcessState {
            ProcessState::Exited(Some(0))
        }
    }

    /// Concatenates its inputs in order through in-memory pipes.
    #[derive(Default)]
    struct ConcatTransformer {
        /// Keep the output open until terminated.
        hold_open: bool,
        last: Mutex<Option<Arc<Flag>>>,
    }

    #[async_trait]
    impl Transformer for ConcatTransformer {
        fn name(&self) -> &'static str {
            "concat"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn spawn(&self, job: &TransformJob) -> Result<TransformProcess> {
            let (out_tx, out_rx) = tokio::io::duplex(1024);
            let mut inputs = Vec::new();
            let mut readers = Vec::new();
            for _ in 0..job.input_count() {
                let (tx, rx) = tokio::io::duplex(1024);
                inputs.push(InputChannel::Writer(Box::pin(tx)));
                readers.push(rx);
            }
            let process = Arc::new(Flag::default());
            let task_process = process.clone();
            let hold_open = self.hold_open;
            tokio::spawn(async move {
                let mut out_tx = out_tx;
                for mut reader in readers {
                    let mut buf = Vec::new();
                    reader.read_to_end(&mut buf).await.unwrap();
                    out_tx.write_all(&buf).await.unwrap();
                }
                if hold_open {
                    task_process.0.cancelled().await;
                }
            });
            *self.last.lock() = Some(process.clone());
            Ok(TransformProcess {
                inputs,
                output: Box::pin(out_rx),
                errors: None,
                handle: process,
            })
        }
    }

    fn pipeline(fail_itag: Option<u32>) -> (StreamPipeline, Arc<StaticExtractor>) {
        let extractor = Arc::new(StaticExtractor {
            ranges: Mutex::new(Vec::new()),
            fail_itag,
            broken_itag: None,
        });
        (
            StreamPipeline::new(extractor.clone(), Arc::new(ConcatTransformer::default())),
            extractor,
        )
    }

    /// Pipeline whose `broken_itag` upstream fails after the transform started.
    fn broken_pipeline(broken_itag: u32) -> (StreamPipeline, Arc<ConcatTransformer>) {
        let extractor = Arc::new(StaticExtractor {
            ranges: Mutex::new(Vec::new()),
            fail_itag: None,
            broken_itag: Some(broken_itag),
        });
        let transformer = Arc::new(ConcatTransformer {
            hold_open: true,
            ..Default::default()
        });
        (StreamPipeline::new(extractor, transformer.clone()), transformer)
    }

    /// Drain the output, returning the bytes before the error and the error.
    async fn drain_until_error(output: PipelineOutput) -> (Vec<u8>, Option<std::io::Error>) {
        let mut stream = output.stream;
        let mut bytes = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => bytes.extend_from_slice(&chunk),
                Err(e) => return (bytes, Some(e)),
            }
        }
        (bytes, None)
    }

    fn variant(itag: u32, container: &str, video: bool, audio: bool) -> VariantDescriptor {
        VariantDescriptor::builder(itag, container)
            .video(video)
            .audio(audio)
            .content_length(1000)
            .quality_rank(QualityRank::new(if video { 720 } else { 0 }, 128_000))
            .build()
    }

    async fn collect(output: PipelineOutput) -> Vec<u8> {
        let chunks: Vec<Bytes> = futures::TryStreamExt::try_collect(output.stream)
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_passthrough_forwards_range() {
        let (pipeline, extractor) = pipeline(None);
        let guard = LifecycleGuard::new("p1");
        let selection = FormatSelection::Single(variant(18, "mp4", true, true));
        let range = RangeWindow { start: 10, end: 19 };

        let output = pipeline.open(&selection, Some(range), None, &guard).await.unwrap();
        assert!(!output.transformed);
        assert_eq!(output.content_length, Some(1000));
        assert_eq!(collect(output).await, b"18:");
        assert_eq!(
            extractor.ranges.lock().as_slice(),
            &[Some(ByteRange { start: 10, end: 19 })]
        );
        assert_eq!(guard.phase(), LifecyclePhase::Closed);
    }

    #[tokio::test]
    async fn test_mux_feeds_both_inputs_in_order() {
        let (pipeline, _) = pipeline(None);
        let guard = LifecycleGuard::new("p2");
        let selection = FormatSelection::Mux {
            video: variant(137, "mp4", true, false),
            audio: variant(140, "m4a", false, true),
        };

        let output = pipeline.open(&selection, None, None, &guard).await.unwrap();
        assert!(output.transformed);
        assert_eq!(output.container, "mp4");
        assert_eq!(output.content_length, None);
        assert_eq!(collect(output).await, b"137:140:");
    }

    #[tokio::test]
    async fn test_reencode_uses_target_container() {
        let (pipeline, _) = pipeline(None);
        let guard = LifecycleGuard::new("p3");
        let selection = FormatSelection::Single(variant(251, "webm", false, true));

        let output = pipeline
            .open(&selection, None, Some(AudioTarget::Mp3), &guard)
            .await
            .unwrap();
        assert_eq!(output.container, "mp3");
        assert_eq!(output.mime_type, "audio/mpeg");
        assert_eq!(collect(output).await, b"251:");
    }

    #[tokio::test]
    async fn test_open_failure_tears_down() {
        let (pipeline, _) = pipeline(Some(140));
        let guard = LifecycleGuard::new("p4");
        let selection = FormatSelection::Mux {
            video: variant(137, "mp4", true, false),
            audio: variant(140, "m4a", false, true),
        };

        let err = pipeline.open(&selection, None, None, &guard).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(ExtractionError::Forbidden)));
        assert_eq!(guard.phase(), LifecyclePhase::Closed);
        assert!(guard.failure().is_some());
    }

    #[tokio::test]
    async fn test_mux_upstream_failure_kills_transform() {
        let (pipeline, transformer) = broken_pipeline(140);
        let guard = LifecycleGuard::new("p5");
        let selection = FormatSelection::Mux {
            video: variant(137, "mp4", true, false),
            audio: variant(140, "m4a", false, true),
        };

        let output = pipeline.open(&selection, None, None, &guard).await.unwrap();
        let process = transformer.last.lock().clone().unwrap();
        let (bytes, err) = drain_until_error(output).await;

        assert!(bytes.starts_with(b"137:"));
        let err = err.expect("body should end with an error");
        assert!(err.to_string().contains("audio input failed"), "{err}");
        assert!(!process.is_running());
        assert_eq!(guard.phase(), LifecyclePhase::Closed);
        assert!(guard.failure().unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn test_reencode_upstream_failure_kills_transform() {
        let (pipeline, transformer) = broken_pipeline(251);
        let guard = LifecycleGuard::new("p6");
        let selection = FormatSelection::Single(variant(251, "webm", false, true));

        let output = pipeline
            .open(&selection, None, Some(AudioTarget::Opus), &guard)
            .await
            .unwrap();
        let process = transformer.last.lock().clone().unwrap();
        let (_, err) = drain_until_error(output).await;

        assert!(err.unwrap().to_string().contains("audio input failed"));
        assert!(!process.is_running());
        assert_eq!(guard.phase(), LifecyclePhase::Closed);
    }
}
