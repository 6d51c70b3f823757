//! State-transition handling for execution-engine notifications.
//!
//! The execution engine reports lifecycle changes through
//! [`Daemon::state_changed`] and hands over raw stdio pipes through
//! [`Daemon::attach_streams`]. Transitions for one container serialize on
//! its exclusive lock; stream copies run outside that lock and are only
//! observed through the completion counter.

use std::collections::HashMap;
use std::fmt;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use krane_common::{KraneError, KraneResult};

use crate::container::stream::CopyGuard;
use crate::container::{Container, ContainerState, ExitStatus};
use crate::events::EventAction;
use crate::logger::Message;

use super::Daemon;

/// State kinds the execution engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// A process in the container was OOM-killed; carries no state change.
    Oom,
    /// The primary process exited.
    Exit,
    /// The primary process exited and the container will be restarted.
    Restart,
    /// An exec process exited.
    ExitProcess,
    /// The primary process started.
    Start,
    /// An already-running primary process was restored after a daemon
    /// restart.
    Restore,
    /// The container was paused.
    Pause,
    /// The container was resumed.
    Resume,
}

/// A lifecycle notification from the execution engine.
#[derive(Debug, Clone)]
pub struct StateNotification {
    /// Container ID, or the exec process ID for [`StateKind::ExitProcess`].
    pub id: String,
    /// What changed.
    pub kind: StateKind,
    /// Exit code, meaningful for exit-class kinds.
    pub exit_code: i32,
    /// Whether the process was OOM-killed.
    pub oom_killed: bool,
    /// PID of the primary process, meaningful for start-class kinds.
    pub pid: u32,
}

/// Raw stdio pipes delivered by the execution engine for one attach call.
#[derive(Default)]
pub struct IoPipes {
    /// Write half of the process's stdin.
    pub stdin: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Read half of the process's stdout.
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Read half of the process's stderr.
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl fmt::Debug for IoPipes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoPipes")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl Daemon {
    /// Apply a state notification from the execution engine.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown container, an OOM notification on a
    /// platform that cannot produce one, or a persistence failure.
    pub async fn state_changed(&self, notification: StateNotification) -> KraneResult<()> {
        if notification.kind == StateKind::ExitProcess {
            return self.handle_exec_exit(&notification).await;
        }

        let container =
            self.containers()
                .get(&notification.id)
                .ok_or_else(|| KraneError::ContainerNotFound {
                    id: notification.id.clone(),
                })?;

        match notification.kind {
            StateKind::Oom => self.handle_oom(&container),
            StateKind::Exit => self.handle_exit(&container, &notification).await,
            StateKind::Restart => self.handle_restart(&container, &notification).await,
            StateKind::Start | StateKind::Restore => {
                self.handle_start(&container, &notification).await
            }
            StateKind::Pause => {
                let mut state = container.lock_state().await;
                state.paused = true;
                self.events().emit(container.id(), EventAction::Pause);
                Ok(())
            }
            StateKind::Resume => {
                let mut state = container.lock_state().await;
                state.paused = false;
                self.events().emit(container.id(), EventAction::Unpause);
                Ok(())
            }
            StateKind::ExitProcess => Ok(()), // handled above
        }
    }

    fn handle_oom(&self, container: &Container) -> KraneResult<()> {
        if cfg!(not(target_os = "linux")) {
            // Only the Linux kernel signals OOM kills to the engine; getting
            // one elsewhere means the caller is broken.
            return Err(KraneError::Unsupported {
                feature: "OOM kill signaling".to_string(),
            });
        }
        self.events().emit(container.id(), EventAction::Oom);
        Ok(())
    }

    async fn handle_exit(
        &self,
        container: &Container,
        notification: &StateNotification,
    ) -> KraneResult<()> {
        let mut state = container.lock_state().await;

        // Block until the pump has finished copying engine pipes into the
        // stream endpoints.
        container.streams().wait().await;

        // Detach I/O. Reset blocks until the copiers have pushed everything
        // already streamed into the log driver, then hands that driver back;
        // only now can a stop message go out without overtaking trailing
        // output.
        let log_driver = container.streams().reset(false).await;

        if let Some(driver) = log_driver {
            let stop = serde_json::json!({
                "type": "stop",
                "exitCode": notification.exit_code,
                "oomKilled": notification.oom_killed,
            })
            .to_string();
            if let Err(err) = driver.log(&Message::event(stop)) {
                // At least the error shows up in the daemon log, without the
                // container's tags.
                tracing::error!(
                    container_id = %container.id(),
                    error = %err,
                    "Failed to send stop event to the logging driver"
                );
            }
        }

        state.set_stopped(ExitStatus::new(
            notification.exit_code,
            notification.oom_killed,
        ));
        let attributes = HashMap::from([(
            "exitCode".to_string(),
            notification.exit_code.to_string(),
        )]);
        self.events()
            .emit_with_attributes(container.id(), EventAction::Die, attributes);
        self.cleanup(container, &mut state).await;
        self.store().save(&container.snapshot(&state))
    }

    async fn handle_restart(
        &self,
        container: &Container,
        notification: &StateNotification,
    ) -> KraneResult<()> {
        let mut state = container.lock_state().await;

        // No stop message on the restart path; the driver detached here is
        // simply dropped and a fresh one attaches with the next start.
        drop(container.streams().reset(false).await);

        state.restart_count += 1;
        state.set_restarting(ExitStatus::new(
            notification.exit_code,
            notification.oom_killed,
        ));
        let attributes = HashMap::from([(
            "exitCode".to_string(),
            notification.exit_code.to_string(),
        )]);
        self.events()
            .emit_with_attributes(container.id(), EventAction::Die, attributes);
        self.store().save(&container.snapshot(&state))
    }

    async fn handle_start(
        &self,
        container: &Container,
        notification: &StateNotification,
    ) -> KraneResult<()> {
        let mut state = container.lock_state().await;
        state.set_running(notification.pid, notification.kind == StateKind::Start);
        state.manually_stopped = false;

        if let Err(err) = self.store().save(&container.snapshot(&state)) {
            // Undo the I/O wiring before surfacing the failure; the caller
            // will not treat this container as running.
            drop(container.streams().reset(false).await);
            return Err(err);
        }

        self.events().emit(container.id(), EventAction::Start);
        Ok(())
    }

    async fn handle_exec_exit(&self, notification: &StateNotification) -> KraneResult<()> {
        let Some(container) = self.container_for_exec(&notification.id) else {
            tracing::warn!(
                exec_id = %notification.id,
                "Ignoring exit for unknown exec process"
            );
            return Ok(());
        };

        let mut state = container.lock_state().await;
        let Some(exec) = state.execs.get_mut(&notification.id) else {
            tracing::warn!(
                container_id = %container.id(),
                exec_id = %notification.id,
                "Ignoring exit for exec process no longer tracked by its container"
            );
            return Ok(());
        };

        exec.exit_code = Some(notification.exit_code);
        exec.running = false;
        let streams = exec.streams().clone();
        streams.wait().await;
        if let Err(err) = streams.close().await {
            tracing::error!(
                container_id = %container.id(),
                exec_id = %notification.id,
                error = %err,
                "Failed to close exec streams"
            );
        }

        // Retire the entry from the container only; the daemon-level exec
        // index keeps the exit code inspectable.
        state.execs.remove(&notification.id);
        Ok(())
    }

    /// Release per-run resources after the primary process has exited.
    async fn cleanup(&self, container: &Container, state: &mut ContainerState) {
        for (id, exec) in state.execs.drain() {
            if let Err(err) = exec.streams().close().await {
                tracing::error!(
                    container_id = %container.id(),
                    exec_id = %id,
                    error = %err,
                    "Failed to close exec streams during cleanup"
                );
            }
        }
    }

    /// Wire the execution engine's stdio pipes to a container or exec
    /// process.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID matches neither a container nor a live
    /// exec process, or if the container's log driver cannot be started; the
    /// caller treats either as fatal to this attach attempt.
    pub async fn attach_streams(&self, id: &str, mut pipes: IoPipes) -> KraneResult<()> {
        let container = self.containers().get(id);
        let streams = if let Some(container) = &container {
            if let Err(err) = self.start_logging(container) {
                drop(container.streams().reset(false).await);
                return Err(err);
            }
            container.streams().clone()
        } else if let Some(streams) = self.exec_streams(id).await {
            streams
        } else {
            return Err(KraneError::ExecNotFound { id: id.to_string() });
        };

        if let Some(mut pipe) = pipes.stdin.take() {
            if let Some(mut rx) = streams.take_stdin_reader() {
                tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        if pipe.write_all(&chunk).await.is_err() {
                            break;
                        }
                    }
                    // The engine side observing EOF is signal enough; copy
                    // errors are not surfaced.
                    let _ = pipe.shutdown().await;
                });
            } else if container.as_ref().is_none_or(|c| c.config().tty) {
                // A tty container may be attached interactively later; keep
                // the engine's stdin open. Exec targets are treated the same.
                streams.park_stdin(pipe);
            } else {
                // Allocated but unused; close it so the engine sees EOF.
                drop(pipe);
            }
        }

        // An endpoint nobody claimed would hold every chunk until the
        // process exits; whatever is still unclaimed once the pipes arrive
        // is drained and discarded instead.
        if let Some(pipe) = pipes.stdout.take() {
            if let Some(rx) = streams.take_stdout_reader() {
                spawn_output_drain(rx);
            }
            spawn_stream_copy(
                id.to_string(),
                "stdout",
                pipe,
                streams.stdout_writer(),
                streams.copy_guard(),
            );
        }
        if let Some(pipe) = pipes.stderr.take() {
            if let Some(rx) = streams.take_stderr_reader() {
                spawn_output_drain(rx);
            }
            spawn_stream_copy(
                id.to_string(),
                "stderr",
                pipe,
                streams.stderr_writer(),
                streams.copy_guard(),
            );
        }

        Ok(())
    }
}

/// Discard everything sent into an output endpoint nobody consumes.
fn spawn_output_drain(mut rx: mpsc::UnboundedReceiver<bytes::Bytes>) {
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
}

/// Copy one engine pipe into a stream endpoint until EOF.
fn spawn_stream_copy(
    id: String,
    stream: &'static str,
    mut pipe: Box<dyn AsyncRead + Send + Unpin>,
    tx: mpsc::UnboundedSender<bytes::Bytes>,
    guard: CopyGuard,
) {
    tokio::spawn(async move {
        // Decrements the completion counter on exit, whatever the outcome.
        let _guard = guard;
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            match pipe.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(buf.split().freeze()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!(id = %id, stream, error = %err, "Stream copy error");
                    break;
                }
            }
        }
    });
}
