//! Per-request resource tracking and teardown.
//!
//! [`LifecycleGuard`] owns the [`PipelineResources`] of one request. Any
//! number of triggers (stream end, client disconnect, errors) may call
//! [`LifecycleGuard::teardown`]; the resources are released exactly once.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use media_extractor::ByteStream;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::transform::ProcessControl;
use crate::{Error, Result};

/// Lifecycle phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Nothing registered yet.
    Idle,
    /// At least one resource registered.
    Active,
    /// Teardown in progress.
    Draining,
    /// Terminal.
    Closed,
}

/// Handle to an open upstream.
enum UpstreamHandle {
    /// Task copying an upstream into a transform input.
    Task(tokio::task::AbortHandle),
    /// Upstream served directly as the response body.
    Stream(futures::stream::AbortHandle),
}

impl UpstreamHandle {
    fn abort(&self) {
        match self {
            Self::Task(handle) => handle.abort(),
            Self::Stream(handle) => handle.abort(),
        }
    }
}

/// Everything a request opened that needs releasing.
#[derive(Default)]
pub struct PipelineResources {
    upstreams: Vec<UpstreamHandle>,
    process: Option<Arc<dyn ProcessControl>>,
}

impl PipelineResources {
    pub fn upstream_count(&self) -> usize {
        self.upstreams.len()
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Destroy upstreams first, then kill the process.
    fn release(self) {
        for upstream in &self.upstreams {
            upstream.abort();
        }
        if let Some(process) = self.process {
            process.terminate();
        }
    }
}

impl fmt::Debug for PipelineResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineResources")
            .field("upstreams", &self.upstreams.len())
            .field("process", &self.process)
            .finish()
    }
}

struct GuardState {
    phase: LifecyclePhase,
    resources: PipelineResources,
    /// First failure recorded for this request.
    failure: Option<String>,
}

/// Request-scoped resource registry with idempotent teardown.
pub struct LifecycleGuard {
    request_id: String,
    state: Mutex<GuardState>,
}

impl LifecycleGuard {
    pub fn new(request_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            request_id: request_id.into(),
            state: Mutex::new(GuardState {
                phase: LifecyclePhase::Idle,
                resources: PipelineResources::default(),
                failure: None,
            }),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.phase(),
            LifecyclePhase::Draining | LifecyclePhase::Closed
        )
    }

    /// Register a task feeding an upstream into a transform input.
    pub fn register_task(&self, handle: tokio::task::AbortHandle) {
        self.register_upstream(UpstreamHandle::Task(handle));
    }

    /// Register an upstream served as-is.
    pub fn register_stream(&self, handle: futures::stream::AbortHandle) {
        self.register_upstream(UpstreamHandle::Stream(handle));
    }

    fn register_upstream(&self, handle: UpstreamHandle) {
        let mut state = self.state.lock();
        if Self::accepting(&mut state) {
            state.resources.upstreams.push(handle);
        } else {
            drop(state);
            debug!(request_id = %self.request_id, "Upstream registered after teardown, aborting");
            handle.abort();
        }
    }

    /// Register the transform process. At most one per request.
    pub fn register_process(&self, process: Arc<dyn ProcessControl>) {
        let mut state = self.state.lock();
        if Self::accepting(&mut state) && state.resources.process.is_none() {
            state.resources.process = Some(process);
        } else {
            drop(state);
            warn!(request_id = %self.request_id, pid = ?process.id(), "Rejected transform process registration, terminating");
            process.terminate();
        }
    }

    fn accepting(state: &mut GuardState) -> bool {
        match state.phase {
            LifecyclePhase::Idle => {
                state.phase = LifecyclePhase::Active;
                true
            }
            LifecyclePhase::Active => true,
            LifecyclePhase::Draining | LifecyclePhase::Closed => false,
        }
    }

    /// The registered transform process, if any.
    pub fn process(&self) -> Option<Arc<dyn ProcessControl>> {
        self.state.lock().resources.process.clone()
    }

    /// Record a failure. Only the first one is kept.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            let reason = reason.into();
            warn!(request_id = %self.request_id, reason = %reason, "Delivery failed");
            state.failure = Some(reason);
        }
    }

    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    /// Release every registered resource.
    ///
    /// Returns `true` for the call that actually performed the teardown and
    /// `false` for every later call. Never blocks on the process exiting.
    pub fn teardown(&self, reason: &str) -> bool {
        let resources = {
            let mut state = self.state.lock();
            match state.phase {
                LifecyclePhase::Draining | LifecyclePhase::Closed => return false,
                LifecyclePhase::Idle | LifecyclePhase::Active => {
                    state.phase = LifecyclePhase::Draining;
                    std::mem::take(&mut state.resources)
                }
            }
        };

        debug!(
            request_id = %self.request_id,
            reason,
            upstreams = resources.upstream_count(),
            process = resources.has_process(),
            "Tearing down request resources"
        );
        // Keep the handle so wait() still works after release.
        let process = resources.process.clone();
        resources.release();

        let mut state = self.state.lock();
        state.phase = LifecyclePhase::Closed;
        state.resources.process = process;
        true
    }

    /// Wait for the pipeline to finish after its output was exhausted.
    ///
    /// Fails if a failure was recorded or the transform did not exit cleanly.
    /// Tears the request down either way.
    pub async fn finish(&self) -> Result<()> {
        // Upstreams aborted by an earlier teardown end as a clean EOF.
        if self.is_closed() {
            self.fail("pipeline torn down before the output completed");
        }
        let result = match self.process() {
            Some(process) => {
                let state = process.wait().await;
                if state.success() {
                    Ok(())
                } else {
                    Err(format!("transform ended with {:?}", state))
                }
            }
            None => Ok(()),
        };

        let result = match (self.failure(), result) {
            (Some(reason), _) => Err(reason),
            (None, Err(reason)) => {
                self.fail(reason.clone());
                Err(reason)
            }
            (None, Ok(())) => Ok(()),
        };

        self.teardown("completed");
        result.map_err(Error::delivery)
    }
}

impl fmt::Debug for LifecycleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LifecycleGuard")
            .field("request_id", &self.request_id)
            .field("phase", &state.phase)
            .field("resources", &state.resources)
            .finish()
    }
}

/// Output stream bound to a [`LifecycleGuard`].
///
/// Errors tear the request down. At end of stream the pipeline is finished
/// and a late failure is surfaced as a final error item, so an HTTP body is
/// aborted rather than completed. Dropping the stream early (client
/// disconnect) tears the request down.
pub struct GuardedStream {
    inner: ByteStream,
    guard: Arc<LifecycleGuard>,
    finishing: Option<BoxFuture<'static, Result<()>>>,
    done: bool,
    bytes: u64,
}

impl GuardedStream {
    pub fn new(inner: ByteStream, guard: Arc<LifecycleGuard>) -> Self {
        Self {
            inner,
            guard,
            finishing: None,
            done: false,
            bytes: 0,
        }
    }
}

impl Stream for GuardedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            if let Some(finishing) = this.finishing.as_mut() {
                let result = ready!(finishing.as_mut().poll(cx));
                this.finishing = None;
                this.done = true;
                return match result {
                    Ok(()) => {
                        info!(request_id = %this.guard.request_id(), bytes = this.bytes, "Delivery complete");
                        Poll::Ready(None)
                    }
                    Err(e) => Poll::Ready(Some(Err(io::Error::other(e.to_string())))),
                };
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    this.bytes += chunk.len() as u64;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Some(Err(e)) => {
                    this.guard.fail(format!("output stream failed: {}", e));
                    this.guard.teardown("output error");
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let guard = this.guard.clone();
                    this.finishing = Some(Box::pin(async move { guard.finish().await }));
                }
            }
        }
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        if !self.done && self.guard.teardown("client disconnected") {
            info!(request_id = %self.guard.request_id(), bytes = self.bytes, "Client disconnected, pipeline torn down");
        }
    }
}
