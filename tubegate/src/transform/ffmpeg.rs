//! ffmpeg-backed transformer.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::ChildProcess;
use tracing::{debug, info};

use super::{AudioTarget, InputChannel, TransformJob, TransformProcess, Transformer};
use crate::{Error, Result};

/// ffmpeg transformer configuration.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Path to the ffmpeg binary.
    pub binary_path: String,
    /// How long a secondary input waits for ffmpeg to open it.
    pub connect_timeout: Duration,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Runs transform jobs through an ffmpeg child process.
///
/// Input 0 is fed through stdin, further inputs through private named pipes
/// (loopback sockets off unix). Output is read from stdout, diagnostics from
/// stderr.
pub struct FfmpegTransformer {
    config: FfmpegConfig,
    /// Cached version string.
    version: Option<String>,
}

impl FfmpegTransformer {
    pub fn new(config: FfmpegConfig) -> Self {
        let version = process_utils::probe_version(&config.binary_path, "-version");
        Self { config, version }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Build ffmpeg arguments. `extra_inputs` are the endpoints of the inputs
    /// after the first.
    fn build_args(job: &TransformJob, extra_inputs: &[String]) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .into_iter()
            .map(String::from)
            .collect();

        args.extend(["-i".to_string(), "pipe:0".to_string()]);
        for input in extra_inputs {
            args.extend(["-i".to_string(), input.clone()]);
        }

        match job {
            TransformJob::Mux { .. } => {
                args.extend(
                    ["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"]
                        .into_iter()
                        .map(String::from),
                );
                if job.output_format().container == "mp4" {
                    args.extend([
                        "-movflags".to_string(),
                        "frag_keyframe+empty_moov+default_base_moof".to_string(),
                        "-f".to_string(),
                        "mp4".to_string(),
                    ]);
                } else {
                    args.extend(["-f".to_string(), "matroska".to_string()]);
                }
            }
            TransformJob::Reencode { target } => {
                args.push("-vn".to_string());
                args.extend(audio_codec_args(*target));
                args.extend(["-f".to_string(), muxer_name(*target).to_string()]);
            }
        }

        args.push("pipe:1".to_string());
        args
    }
}

fn audio_codec_args(target: AudioTarget) -> Vec<String> {
    let args: &[&str] = match target {
        AudioTarget::Mp3 => &["-c:a", "libmp3lame", "-b:a", "192k"],
        AudioTarget::Aac => &["-c:a", "aac", "-b:a", "192k"],
        AudioTarget::Opus | AudioTarget::Webm => &["-c:a", "libopus", "-b:a", "160k"],
        AudioTarget::Flac => &["-c:a", "flac"],
        AudioTarget::Wav => &["-c:a", "pcm_s16le"],
    };
    args.iter().map(|s| s.to_string()).collect()
}

fn muxer_name(target: AudioTarget) -> &'static str {
    match target {
        AudioTarget::Mp3 => "mp3",
        AudioTarget::Aac => "adts",
        AudioTarget::Opus => "ogg",
        AudioTarget::Flac => "flac",
        AudioTarget::Wav => "wav",
        AudioTarget::Webm => "webm",
    }
}

#[async_trait]
impl Transformer for FfmpegTransformer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    async fn spawn(&self, job: &TransformJob) -> Result<TransformProcess> {
        let mut extra = Vec::with_capacity(job.input_count().saturating_sub(1));
        for _ in 1..job.input_count() {
            extra.push(InputChannel::dedicated(self.config.connect_timeout).await?);
        }
        let endpoints = extra
            .iter()
            .map(|channel| {
                channel
                    .endpoint()
                    .ok_or_else(|| Error::transform("Input channel has no endpoint"))
            })
            .collect::<Result<Vec<_>>>()?;

        let args = Self::build_args(job, &endpoints);
        info!(job = ?job, "Starting ffmpeg transform");
        debug!(args = ?args, "ffmpeg arguments");

        let mut child = process_utils::tokio_command(&self.config.binary_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transform(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transform("Failed to capture ffmpeg stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transform("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::transform("Failed to capture ffmpeg stderr"))?;

        let handle = Arc::new(ChildProcess::supervise(child));
        debug!(pid = ?handle.id(), "ffmpeg spawned");

        let mut inputs = vec![InputChannel::Stdin(stdin)];
        inputs.extend(extra);

        Ok(TransformProcess {
            inputs,
            output: Box::pin(stdout),
            errors: Some(Box::pin(stderr)),
            handle,
        })
    }
}
