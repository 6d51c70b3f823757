//! Buffered stdio endpoints and copy-completion tracking.
//!
//! A [`StreamConfig`] sits between the execution engine's raw pipes and the
//! consumers of a container's output (the log driver and interactive
//! clients). The attach pump writes into the stdout/stderr endpoints and
//! drains the stdin endpoint; it never takes the container's state lock.
//! The state machine only observes the pump through the completion counter.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use krane_common::{KraneError, KraneResult};

use crate::logger::{LogDriver, Source, copier};

/// Write half of an execution-engine pipe.
pub type EnginePipe = Box<dyn AsyncWrite + Send + Unpin>;

/// Counts in-flight stream copies.
///
/// Increment before starting work, decrement on completion, wait blocks
/// until the count reaches zero.
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: AtomicUsize,
    zero: Notify,
}

impl WaitGroup {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.zero.notify_waiters();
        }
    }

    /// Current number of in-flight copies.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Block until the count reaches zero.
    pub async fn wait(&self) {
        loop {
            if self.count() == 0 {
                return;
            }
            // Register before re-checking so a concurrent `done` cannot slip
            // between the check and the await.
            let notified = self.zero.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the owning wait group when dropped.
pub struct CopyGuard {
    group: Arc<WaitGroup>,
}

impl Drop for CopyGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}

struct StdinEndpoint {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl StdinEndpoint {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

struct OutputEndpoint {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl OutputEndpoint {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

struct LogAttachment {
    driver: Arc<dyn LogDriver>,
    tasks: Vec<JoinHandle<()>>,
}

struct StreamInner {
    stdin: Option<StdinEndpoint>,
    stdout: OutputEndpoint,
    stderr: OutputEndpoint,
    /// Engine-side stdin pipe held open for a tty container without a
    /// buffered stdin.
    parked_stdin: Option<EnginePipe>,
    log: Option<LogAttachment>,
}

/// Stdio endpoints for a container or exec process.
pub struct StreamConfig {
    open_stdin: bool,
    copies: Arc<WaitGroup>,
    inner: Mutex<StreamInner>,
}

impl StreamConfig {
    /// Create endpoints; a stdin endpoint exists only when `open_stdin` is
    /// set.
    #[must_use]
    pub fn new(open_stdin: bool) -> Self {
        Self {
            open_stdin,
            copies: Arc::new(WaitGroup::default()),
            inner: Mutex::new(StreamInner {
                stdin: open_stdin.then(StdinEndpoint::new),
                stdout: OutputEndpoint::new(),
                stderr: OutputEndpoint::new(),
                parked_stdin: None,
                log: None,
            }),
        }
    }

    /// Sender interactive clients write container input into.
    #[must_use]
    pub fn stdin_writer(&self) -> Option<mpsc::UnboundedSender<Bytes>> {
        self.inner.lock().stdin.as_ref().map(|s| s.tx.clone())
    }

    /// Claim the buffered stdin source for the attach pump.
    pub(crate) fn take_stdin_reader(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inner.lock().stdin.as_mut().and_then(|s| s.rx.take())
    }

    /// Claim the buffered stdout source.
    ///
    /// For containers this is claimed by the log attachment; for exec
    /// processes an interactive client claims it before the engine delivers
    /// the pipes. Whatever is still unclaimed when the pipes arrive gets
    /// drained and discarded.
    #[must_use]
    pub fn take_stdout_reader(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inner.lock().stdout.rx.take()
    }

    /// Claim the buffered stderr source.
    #[must_use]
    pub fn take_stderr_reader(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inner.lock().stderr.rx.take()
    }

    /// Sender the attach pump forwards stdout chunks into.
    pub(crate) fn stdout_writer(&self) -> mpsc::UnboundedSender<Bytes> {
        self.inner.lock().stdout.tx.clone()
    }

    /// Sender the attach pump forwards stderr chunks into.
    pub(crate) fn stderr_writer(&self) -> mpsc::UnboundedSender<Bytes> {
        self.inner.lock().stderr.tx.clone()
    }

    /// Hold the engine's stdin pipe open without wiring it anywhere.
    pub(crate) fn park_stdin(&self, pipe: EnginePipe) {
        self.inner.lock().parked_stdin = Some(pipe);
    }

    /// Take a completion-counter guard for one copy task.
    #[must_use]
    pub fn copy_guard(&self) -> CopyGuard {
        self.copies.add();
        CopyGuard {
            group: Arc::clone(&self.copies),
        }
    }

    /// Block until every in-flight copy has completed.
    pub async fn wait(&self) {
        self.copies.wait().await;
    }

    /// Attach a log driver, spawning one copier per output stream.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver is already attached.
    pub fn attach_log_driver(&self, id: &str, driver: Arc<dyn LogDriver>) -> KraneResult<()> {
        let mut inner = self.inner.lock();
        if inner.log.is_some() {
            return Err(KraneError::Config {
                message: format!("log driver already attached for {id}"),
            });
        }
        let (Some(stdout_rx), Some(stderr_rx)) = (inner.stdout.rx.take(), inner.stderr.rx.take())
        else {
            return Err(KraneError::Internal {
                message: format!("output endpoints for {id} already claimed"),
            });
        };
        let tasks = vec![
            copier::spawn(id.to_string(), Source::Stdout, stdout_rx, driver.clone()),
            copier::spawn(id.to_string(), Source::Stderr, stderr_rx, driver.clone()),
        ];
        inner.log = Some(LogAttachment { driver, tasks });
        Ok(())
    }

    /// The currently attached log driver, if any.
    #[must_use]
    pub fn log_driver(&self) -> Option<Arc<dyn LogDriver>> {
        self.inner.lock().log.as_ref().map(|l| l.driver.clone())
    }

    /// Tear down the endpoints and detach the log driver.
    ///
    /// Closes the daemon-side senders, waits for the log copiers to finish
    /// forwarding everything already written (copiers only terminate after
    /// the pump's own senders are gone as well), re-creates fresh endpoints
    /// for a possible restart, and returns the driver that was attached.
    /// After this returns, [`log_driver`](Self::log_driver) reads as none.
    pub async fn reset(&self, keep_stdin: bool) -> Option<Arc<dyn LogDriver>> {
        let (attachment, parked) = {
            let mut inner = self.inner.lock();
            let attachment = inner.log.take();
            let parked = inner.parked_stdin.take();
            inner.stdout = OutputEndpoint::new();
            inner.stderr = OutputEndpoint::new();
            if !keep_stdin {
                inner.stdin = self.open_stdin.then(StdinEndpoint::new);
            }
            (attachment, parked)
        };
        drop(parked);

        let attachment = attachment?;
        for task in attachment.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Log copier task failed");
            }
        }
        Some(attachment.driver)
    }

    /// Close the endpoints for good; used when retiring an exec process.
    ///
    /// # Errors
    ///
    /// Returns an error if shutting down a held engine pipe fails.
    pub async fn close(&self) -> io::Result<()> {
        let parked = {
            let mut inner = self.inner.lock();
            inner.stdin = None;
            inner.stdout = OutputEndpoint::new();
            inner.stderr = OutputEndpoint::new();
            inner.parked_stdin.take()
        };
        if let Some(mut pipe) = parked {
            pipe.shutdown().await?;
        }
        Ok(())
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("open_stdin", &self.open_stdin)
            .field("in_flight", &self.copies.count())
            .finish_non_exhaustive()
    }
}
