//! Client runner: one platform connection on its own thread.
//!
//! The thread builds a single-threaded tokio runtime, connects, installs the
//! message handler and drives the receive loop until the connection ends or
//! a close is requested. Whatever happens (including a panic) is reported to
//! the [`StatusStore`] under the runner's generation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use courier_channel::{ChannelError, MessageHandler, Platform};
use courier_types::{CourierError, Credential};

use crate::error::SupervisorError;
use crate::status::{RunnerExit, StatusStore};

/// Outcome of connecting, sent once to whoever waits on the settle window.
pub type ReadySignal = mpsc::Sender<Result<(), CourierError>>;

/// Result of a bounded join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Panicked,
    /// Still running after the timeout; the thread was left to finish alone.
    Abandoned,
}

/// Everything a runner thread needs.
pub struct RunnerSpec {
    pub generation: u64,
    pub platform: Arc<dyn Platform>,
    pub credential: Credential,
    pub handler: Arc<dyn MessageHandler>,
    pub status: Arc<StatusStore>,
    pub ready: Option<ReadySignal>,
}

/// A live runner thread. Dropping the handle requests a close.
pub struct RunnerHandle {
    generation: u64,
    close_tx: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    pub fn spawn(spec: RunnerSpec) -> Result<Self, SupervisorError> {
        let generation = spec.generation;
        let (close_tx, close_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name(format!("courier-runner-{generation}"))
            .spawn(move || run_thread(spec, close_rx))
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        info!(generation, "runner spawned");
        Ok(Self {
            generation,
            close_tx,
            thread: Some(thread),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the runner thread is still executing.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the connection to close. Does not block.
    ///
    /// Returns `true` if the runner was active, `false` if it had already
    /// stopped or a close was already requested.
    pub fn request_stop(&mut self) -> bool {
        let already_requested = self.close_tx.send_replace(true);
        !already_requested && self.is_alive()
    }

    /// Wait up to `timeout` for the thread to finish.
    pub fn join_timeout(mut self, timeout: Duration) -> JoinOutcome {
        let Some(thread) = self.thread.take() else {
            return JoinOutcome::Joined;
        };

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline && !thread.is_finished() {
            std::thread::sleep(Duration::from_millis(20));
        }

        if !thread.is_finished() {
            warn!(
                generation = self.generation,
                timeout_ms = timeout.as_millis() as u64,
                "runner did not stop in time, abandoning it"
            );
            return JoinOutcome::Abandoned;
        }

        match thread.join() {
            Ok(()) => {
                debug!(generation = self.generation, "runner joined");
                JoinOutcome::Joined
            }
            Err(_) => {
                error!(generation = self.generation, "runner thread panicked");
                JoinOutcome::Panicked
            }
        }
    }
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_thread(mut spec: RunnerSpec, close_rx: watch::Receiver<bool>) {
    let generation = spec.generation;
    let status = Arc::clone(&spec.status);
    let mut ready = spec.ready.take();

    let exit = match panic::catch_unwind(AssertUnwindSafe(|| drive(spec, close_rx, &mut ready))) {
        Ok(Ok(())) => RunnerExit::Clean,
        Ok(Err(err)) => RunnerExit::Failed(err),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(generation, panic = %msg, "runner panicked");
            RunnerExit::Failed(CourierError::UnexpectedRunnerFailure(format!("panic: {msg}")))
        }
    };

    // Record the crash before signalling it, so a failed start is already
    // visible to status reads.
    let failure = match &exit {
        RunnerExit::Failed(err) => Some(err.clone()),
        RunnerExit::Clean => None,
    };
    status.report_exit(generation, exit);
    if let (Some(tx), Some(err)) = (ready, failure) {
        let _ = tx.send(Err(err));
    }
}

/// Resolves when a close is requested or the handle is gone.
async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|closing| *closing).await;
}

enum LoopEnd {
    Ended(Result<(), ChannelError>),
    CloseRequested,
}

/// Connect and run the receive loop. A successful connect is signalled on
/// `ready` (taking it); failures are left for the caller to signal.
fn drive(
    spec: RunnerSpec,
    mut close_rx: watch::Receiver<bool>,
    ready: &mut Option<ReadySignal>,
) -> Result<(), CourierError> {
    let RunnerSpec {
        generation,
        platform,
        credential,
        handler,
        ..
    } = spec;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CourierError::UnexpectedRunnerFailure(format!("failed to create runtime: {e}")))?;

    rt.block_on(async move {
        let mut connection = tokio::select! {
            result = platform.connect(&credential) => match result {
                Ok(connection) => connection,
                Err(e) => {
                    let err = CourierError::from(e);
                    warn!(generation, error = %err, "connect failed");
                    return Err(err);
                }
            },
            _ = close_requested(&mut close_rx) => {
                info!(generation, "close requested before connect finished");
                return Ok(());
            }
        };

        connection.on_message(handler);
        info!(generation, platform = platform.name(), "connected");
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let end = tokio::select! {
            result = connection.run() => LoopEnd::Ended(result),
            _ = close_requested(&mut close_rx) => LoopEnd::CloseRequested,
        };

        connection.close().await;

        match end {
            LoopEnd::Ended(Ok(())) => Ok(()),
            LoopEnd::Ended(Err(e)) => Err(CourierError::from(e)),
            LoopEnd::CloseRequested => {
                info!(generation, "connection closed on request");
                Ok(())
            }
        }
    })
}
