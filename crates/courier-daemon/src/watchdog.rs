//! Fixed-interval timer that drives the supervisor's health check.
//!
//! The callback runs on a dedicated thread. Errors and panics it raises are
//! logged and the loop keeps going; only [`Watchdog::stop`] (or dropping the
//! watchdog) ends it.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;

pub struct Watchdog {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Invoke `callback` every `interval`, starting one interval from now.
    pub fn spawn<F, T, E>(interval: Duration, mut callback: F) -> Result<Self, SupervisorError>
    where
        F: FnMut() -> Result<T, E> + Send + 'static,
        T: std::fmt::Debug,
        E: Display,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("courier-watchdog".into())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "watchdog started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                    match panic::catch_unwind(AssertUnwindSafe(&mut callback)) {
                        Ok(Ok(outcome)) => debug!(?outcome, "health check"),
                        Ok(Err(e)) => warn!(error = %e, "health check failed"),
                        Err(payload) => {
                            let msg = payload
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".into());
                            error!(panic = %msg, "health check panicked");
                        }
                    }
                }
                info!("watchdog stopped");
            })
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop the timer and wait for an in-flight tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
