//! External transform processes.
//!
//! A [`Transformer`] turns one or more input byte streams into one output
//! byte stream. The gateway only sees [`TransformProcess`]: writable input
//! channels, a readable output, an optional diagnostic channel and a control
//! handle. Whether the work happens in ffmpeg or in-process is hidden behind
//! the trait.

pub mod ffmpeg;

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{ChildProcess, ProcessState};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::process::ChildStdin;
#[cfg(unix)]
use tempfile::TempDir;
use tracing::debug;

use crate::Result;

pub use ffmpeg::{FfmpegConfig, FfmpegTransformer};

#[cfg(unix)]
const FIFO_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Control handle of a running transform.
#[async_trait]
pub trait ProcessControl: Send + Sync + fmt::Debug {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Forced, non-blocking termination. Must be idempotent.
    fn terminate(&self);

    /// `false` as soon as [`terminate`](Self::terminate) returned.
    fn is_running(&self) -> bool;

    /// Wait for the transform to end.
    async fn wait(&self) -> ProcessState;
}

#[async_trait]
impl ProcessControl for ChildProcess {
    fn id(&self) -> Option<u32> {
        ChildProcess::id(self)
    }

    fn terminate(&self) {
        ChildProcess::terminate(self)
    }

    fn is_running(&self) -> bool {
        ChildProcess::is_running(self)
    }

    async fn wait(&self) -> ProcessState {
        ChildProcess::wait(self).await
    }
}

/// One writable input of a transform.
pub enum InputChannel {
    /// Standard input of the child.
    Stdin(ChildStdin),
    /// Named pipe in a private directory the child opens for reading.
    #[cfg(unix)]
    Fifo {
        path: PathBuf,
        /// Owns the directory; dropping it removes the pipe.
        dir: TempDir,
        open_timeout: Duration,
    },
    /// Loopback listener the child connects to.
    Socket {
        listener: TcpListener,
        accept_timeout: Duration,
    },
    /// Any in-process writer.
    Writer(BoxedWriter),
}

impl InputChannel {
    /// Secondary input only the spawned child can attach to: a named pipe on
    /// unix, a loopback socket elsewhere.
    pub async fn dedicated(timeout: Duration) -> io::Result<Self> {
        #[cfg(unix)]
        {
            Self::fifo(timeout)
        }
        #[cfg(not(unix))]
        {
            Self::socket(timeout).await
        }
    }

    /// Create a named pipe readable and writable by the owner only, inside a
    /// fresh owner-only temporary directory.
    #[cfg(unix)]
    pub fn fifo(open_timeout: Duration) -> io::Result<Self> {
        use nix::sys::stat::Mode;

        let dir = tempfile::Builder::new().prefix("tubegate-").tempdir()?;
        let path = dir.path().join("input");
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)?;
        Ok(Self::Fifo {
            path,
            dir,
            open_timeout,
        })
    }

    /// Bind a loopback listener on an ephemeral port.
    pub async fn socket(accept_timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        Ok(Self::Socket {
            listener,
            accept_timeout,
        })
    }

    /// Location the child process opens to read this input, in ffmpeg URL
    /// syntax. `None` for channels the child does not open itself.
    pub fn endpoint(&self) -> Option<String> {
        match self {
            #[cfg(unix)]
            Self::Fifo { path, .. } => Some(format!("file:{}", path.display())),
            Self::Socket { listener, .. } => listener
                .local_addr()
                .ok()
                .map(|addr| format!("tcp://{}", addr)),
            Self::Stdin(_) | Self::Writer(_) => None,
        }
    }

    /// Resolve the channel into a writer, waiting for the peer if needed.
    pub async fn open(self) -> io::Result<BoxedWriter> {
        match self {
            Self::Stdin(stdin) => Ok(Box::pin(stdin)),
            #[cfg(unix)]
            Self::Fifo {
                path,
                dir,
                open_timeout,
            } => {
                let sender = open_fifo_sender(&path, open_timeout).await?;
                debug!(path = %path.display(), "Transform input pipe opened");
                // The open descriptor keeps the pipe alive.
                drop(dir);
                Ok(Box::pin(sender))
            }
            Self::Socket {
                listener,
                accept_timeout,
            } => {
                let (stream, peer) = tokio::time::timeout(accept_timeout, listener.accept())
                    .await
                    .map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::TimedOut,
                            "transform did not connect to its input channel",
                        )
                    })??;
                debug!(%peer, "Transform input channel connected");
                stream.set_nodelay(true)?;
                Ok(Box::pin(stream))
            }
            Self::Writer(writer) => Ok(writer),
        }
    }
}

/// Open the write end of a FIFO once a reader has it open.
///
/// A non-blocking open fails with `ENXIO` until the reader arrives.
#[cfg(unix)]
async fn open_fifo_sender(path: &Path, timeout: Duration) -> io::Result<pipe::Sender> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(e) if e.raw_os_error() == Some(nix::errno::Errno::ENXIO as i32) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "transform did not open its input pipe",
                    ));
                }
                tokio::time::sleep(FIFO_POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

impl fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin(_) => f.write_str("Stdin"),
            #[cfg(unix)]
            Self::Fifo { path, .. } => write!(f, "Fifo({})", path.display()),
            Self::Socket { listener, .. } => {
                write!(f, "Socket({:?})", listener.local_addr().ok())
            }
            Self::Writer(_) => f.write_str("Writer"),
        }
    }
}

/// A spawned transform.
pub struct TransformProcess {
    /// Inputs in job order: video then audio for a mux.
    pub inputs: Vec<InputChannel>,
    pub output: BoxedReader,
    /// Diagnostic text, for logging only.
    pub errors: Option<BoxedReader>,
    pub handle: Arc<dyn ProcessControl>,
}

/// Target codec and container for audio conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioTarget {
    Mp3,
    /// AAC in an ADTS stream.
    Aac,
    /// Opus in Ogg.
    Opus,
    Flac,
    Wav,
    /// Opus in WebM.
    Webm,
}

impl AudioTarget {
    /// Parse a requested format name.
    ///
    /// `m4a` maps to ADTS AAC: a non-seekable output cannot carry an mp4 index.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "aac" | "m4a" => Some(Self::Aac),
            "opus" | "ogg" => Some(Self::Opus),
            "flac" => Some(Self::Flac),
            "wav" => Some(Self::Wav),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    pub fn container(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Webm => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Aac => "audio/aac",
            Self::Opus => "audio/ogg",
            Self::Flac => "audio/flac",
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
        }
    }
}

/// Output container of a transform job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub container: &'static str,
    pub mime_type: &'static str,
}

/// Work a transformer is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformJob {
    /// Copy one video and one audio elementary stream into one container.
    Mux {
        video_container: String,
        audio_container: String,
    },
    /// Re-encode a single audio stream.
    Reencode { target: AudioTarget },
}

impl TransformJob {
    pub fn input_count(&self) -> usize {
        match self {
            Self::Mux { .. } => 2,
            Self::Reencode { .. } => 1,
        }
    }

    /// Fragmented mp4 when both inputs are mp4-family, Matroska otherwise.
    pub fn output_format(&self) -> OutputFormat {
        match self {
            Self::Mux {
                video_container,
                audio_container,
            } => {
                if is_mp4_family(video_container) && is_mp4_family(audio_container) {
                    OutputFormat {
                        container: "mp4",
                        mime_type: "video/mp4",
                    }
                } else {
                    OutputFormat {
                        container: "mkv",
                        mime_type: "video/x-matroska",
                    }
                }
            }
            Self::Reencode { target } => OutputFormat {
                container: target.container(),
                mime_type: target.mime_type(),
            },
        }
    }
}

fn is_mp4_family(container: &str) -> bool {
    matches!(
        container.to_ascii_lowercase().as_str(),
        "mp4" | "m4a" | "m4v" | "mov"
    )
}

/// Spawns transform processes.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether jobs can currently be run.
    fn is_available(&self) -> bool;

    /// Start a job. Inputs are returned in [`TransformJob`] order.
    async fn spawn(&self, job: &TransformJob) -> Result<TransformProcess>;
}
