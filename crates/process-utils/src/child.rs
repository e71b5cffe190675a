//! Supervised child processes.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle state of a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The process has not exited and no termination was requested.
    Running,
    /// The process exited on its own. `None` when it was ended by a signal.
    Exited(Option<i32>),
    /// The process was killed through [`ChildProcess::terminate`].
    Killed,
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the process exited on its own with status 0.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(Some(0)))
    }
}

/// Handle to a spawned child process.
///
/// The child itself is owned by a background waiter task that reaps it when it
/// exits. [`terminate`](Self::terminate) never blocks: it flips the handle into
/// the killed state and signals the waiter, which sends the kill and reaps.
/// Dropping the handle terminates the child as well.
pub struct ChildProcess {
    pid: Option<u32>,
    cancellation_token: CancellationToken,
    state_rx: watch::Receiver<ProcessState>,
    terminated: AtomicBool,
}

impl ChildProcess {
    /// Take ownership of `child` and start supervising it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn supervise(child: Child) -> Self {
        let pid = child.id();
        let cancellation_token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ProcessState::Running);

        tokio::spawn(wait_or_kill(child, cancellation_token.clone(), state_tx));

        Self {
            pid,
            cancellation_token,
            state_rx,
            terminated: AtomicBool::new(false),
        }
    }

    /// OS process id, if the child was still alive when supervised.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Request a forced kill. Idempotent; returns immediately.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            debug!(pid = ?self.pid, "Terminating child process");
            self.cancellation_token.cancel();
        }
    }

    /// Whether the process is still considered alive.
    ///
    /// Returns `false` as soon as [`terminate`](Self::terminate) was called.
    pub fn is_running(&self) -> bool {
        !self.terminated.load(Ordering::Acquire) && self.state_rx.borrow().is_running()
    }

    /// Current state without waiting.
    pub fn state(&self) -> ProcessState {
        let state = *self.state_rx.borrow();
        if state.is_running() && self.terminated.load(Ordering::Acquire) {
            ProcessState::Killed
        } else {
            state
        }
    }

    /// Wait until the process has exited or been killed and reaped.
    pub async fn wait(&self) -> ProcessState {
        let mut rx = self.state_rx.clone();
        match rx.wait_for(|state| !state.is_running()).await {
            Ok(state) => *state,
            // Waiter vanished without publishing (runtime shutting down).
            Err(_) => ProcessState::Killed,
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

async fn wait_or_kill(
    mut child: Child,
    cancellation_token: CancellationToken,
    state_tx: watch::Sender<ProcessState>,
) {
    let state = tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => {
            if let Err(e) = child.kill().await {
                // Already gone; nothing left to do.
                debug!("Failed to kill child process: {}", e);
            }
            ProcessState::Killed
        }
        status = child.wait() => {
            match status {
                Ok(exit_status) => {
                    if !exit_status.success() {
                        warn!("Process exited with status: {}", exit_status);
                    }
                    ProcessState::Exited(exit_status.code())
                }
                Err(e) => {
                    error!("Error waiting for process: {}", e);
                    ProcessState::Exited(None)
                }
            }
        }
    };
    let _ = state_tx.send(state);
}
