//! Scripted in-memory platform for supervisor tests.
//!
//! Each `connect` consumes the next queued [`ConnectBehavior`] (falling back
//! to the default). Tests end or fail the active connection from any thread
//! and observe how many connections are live at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use courier_types::Credential;

use crate::channel::{ChannelError, Connection, MessageHandler, Platform};

/// What the next connection attempt does.
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    /// Connect and run until ended from the test.
    Accept,
    /// Refuse the credential.
    Reject(String),
    /// Fail with a transient network error.
    Fail(String),
    /// Never finish connecting.
    Hang,
    /// Connect normally but take this long to close.
    StuckOnClose(Duration),
    /// Connect, then panic inside the receive loop.
    PanicOnRun,
}

#[derive(Debug, Clone)]
enum Ending {
    Clean,
    Failed(String),
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    handlers: AtomicUsize,
    closes: AtomicUsize,
}

struct Script {
    queue: VecDeque<ConnectBehavior>,
    default: ConnectBehavior,
    active: Option<watch::Sender<Option<Ending>>>,
    credentials: Vec<String>,
}

/// A [`Platform`] whose connections are driven by the test.
#[derive(Clone)]
pub struct ScriptedPlatform {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
}

impl Default for ScriptedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::with_default(ConnectBehavior::Accept)
    }

    pub fn with_default(default: ConnectBehavior) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                queue: VecDeque::new(),
                default,
                active: None,
                credentials: Vec::new(),
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Queue the behavior of the next connection attempt.
    pub fn push(&self, behavior: ConnectBehavior) {
        self.script.lock().queue.push_back(behavior);
    }

    pub fn set_default(&self, behavior: ConnectBehavior) {
        self.script.lock().default = behavior;
    }

    /// Make the active connection's receive loop fail.
    pub fn fail_active(&self, message: &str) -> bool {
        self.end_with(Ending::Failed(message.to_string()))
    }

    /// Make the active connection's receive loop return cleanly.
    pub fn end_active(&self) -> bool {
        self.end_with(Ending::Clean)
    }

    fn end_with(&self, ending: Ending) -> bool {
        match self.script.lock().active.as_ref() {
            Some(tx) => tx.send(Some(ending)).is_ok(),
            None => false,
        }
    }

    /// Connection attempts so far, including failed ones.
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of connections ever open at the same time.
    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    /// How many times a message handler was installed.
    pub fn handlers_installed(&self) -> usize {
        self.counters.handlers.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Exposed credentials passed to `connect`, in order.
    pub fn credentials(&self) -> Vec<String> {
        self.script.lock().credentials.clone()
    }
}

#[async_trait]
impl Platform for ScriptedPlatform {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, ChannelError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = {
            let mut script = self.script.lock();
            script.credentials.push(credential.expose().to_string());
            script
                .queue
                .pop_front()
                .unwrap_or_else(|| script.default.clone())
        };

        let panic_on_run = matches!(behavior, ConnectBehavior::PanicOnRun);
        let close_delay = match behavior {
            ConnectBehavior::Reject(msg) => return Err(ChannelError::Authentication(msg)),
            ConnectBehavior::Fail(msg) => return Err(ChannelError::Gateway(msg)),
            ConnectBehavior::Hang => std::future::pending::<Option<Duration>>().await,
            ConnectBehavior::StuckOnClose(delay) => Some(delay),
            ConnectBehavior::Accept | ConnectBehavior::PanicOnRun => None,
        };

        let (tx, rx) = watch::channel(None);
        self.script.lock().active = Some(tx);

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(ScriptedConnection {
            counters: self.counters.clone(),
            ending: rx,
            close_delay,
            panic_on_run,
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    counters: Arc<Counters>,
    ending: watch::Receiver<Option<Ending>>,
    close_delay: Option<Duration>,
    panic_on_run: bool,
    closed: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn on_message(&mut self, _handler: Arc<dyn MessageHandler>) {
        self.counters.handlers.fetch_add(1, Ordering::SeqCst);
    }

    async fn run(&mut self) -> Result<(), ChannelError> {
        if self.panic_on_run {
            panic!("scripted connection panicked");
        }
        let ending = match self.ending.wait_for(|e| e.is_some()).await {
            Ok(ending) => ending.clone(),
            Err(_) => return Err(ChannelError::Gateway("script dropped".into())),
        };
        match ending {
            Some(Ending::Failed(msg)) => Err(ChannelError::Disconnected {
                code: 1006,
                reason: msg,
            }),
            _ => Ok(()),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}
