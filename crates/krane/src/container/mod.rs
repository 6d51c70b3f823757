//! Container type and the state mutated by lifecycle transitions.

mod state;
pub mod stream;

pub use state::StateStore;
pub use stream::{CopyGuard, StreamConfig, WaitGroup};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use krane_common::ContainerId;

use crate::logger::{LogContext, journald};

/// Static configuration the lifecycle core needs for a container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Human-readable name, possibly with a leading path separator.
    pub name: String,
    /// Whether a pseudo-terminal is allocated.
    pub tty: bool,
    /// Whether the container accepts stdin.
    pub open_stdin: bool,
    /// Container labels.
    pub labels: HashMap<String, String>,
    /// Container environment variables.
    pub env: HashMap<String, String>,
    /// Name of the log driver to instantiate.
    pub log_driver: String,
    /// Options passed to the log driver.
    pub log_options: HashMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tty: false,
            open_stdin: false,
            labels: HashMap::new(),
            env: HashMap::new(),
            log_driver: journald::DRIVER_NAME.to_string(),
            log_options: HashMap::new(),
        }
    }
}

/// Observed lifecycle phase of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    /// Created but not yet started.
    Created,
    /// The primary process is running.
    Running,
    /// Frozen by the execution engine.
    Paused,
    /// Between an exit and the next start.
    Restarting,
    /// The primary process has exited.
    Exited,
}

impl std::fmt::Display for ContainerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Exit status of a container's primary process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Process exit code.
    pub exit_code: i32,
    /// Whether the kernel killed the process for exceeding its memory limit.
    pub oom_killed: bool,
    /// When the process exited.
    pub finished_at: DateTime<Utc>,
}

impl ExitStatus {
    /// Record an exit observed now.
    #[must_use]
    pub fn new(exit_code: i32, oom_killed: bool) -> Self {
        Self {
            exit_code,
            oom_killed,
            finished_at: Utc::now(),
        }
    }
}

/// An additional process running inside an already-running container.
#[derive(Debug)]
pub struct ExecCommand {
    /// Exec process ID.
    pub id: String,
    /// Whether the process is still running.
    pub running: bool,
    /// Exit code; absent until the exit is processed.
    pub exit_code: Option<i32>,
    streams: Arc<StreamConfig>,
}

impl ExecCommand {
    /// Create an exec entry with its own stream endpoints.
    #[must_use]
    pub fn new(id: impl Into<String>, open_stdin: bool) -> Self {
        Self {
            id: id.into(),
            running: true,
            exit_code: None,
            streams: Arc::new(StreamConfig::new(open_stdin)),
        }
    }

    /// The exec process's stream endpoints.
    #[must_use]
    pub fn streams(&self) -> &Arc<StreamConfig> {
        &self.streams
    }
}

/// Mutable container state, guarded by the container's exclusive lock.
#[derive(Debug)]
pub struct ContainerState {
    /// Current lifecycle phase.
    pub phase: ContainerPhase,
    /// PID of the primary process while running.
    pub pid: Option<u32>,
    /// Number of times the container has been restarted.
    pub restart_count: u32,
    /// Whether the container is paused.
    pub paused: bool,
    /// Whether the last stop was requested rather than spontaneous.
    pub manually_stopped: bool,
    /// When the primary process last started.
    pub started_at: Option<DateTime<Utc>>,
    /// Exit status of the last run.
    pub exit: Option<ExitStatus>,
    /// In-flight exec processes keyed by process ID.
    pub execs: HashMap<String, ExecCommand>,
}

impl ContainerState {
    fn new() -> Self {
        Self {
            phase: ContainerPhase::Created,
            pid: None,
            restart_count: 0,
            paused: false,
            manually_stopped: false,
            started_at: None,
            exit: None,
            execs: HashMap::new(),
        }
    }

    /// Mark the primary process as running.
    ///
    /// `fresh` distinguishes a new start from a restore of an
    /// already-running process; only a fresh start clears the previous
    /// run's exit status and stamps a new start time.
    pub fn set_running(&mut self, pid: u32, fresh: bool) {
        self.phase = ContainerPhase::Running;
        self.pid = Some(pid);
        self.paused = false;
        if fresh {
            self.exit = None;
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the container as stopped with the given exit status.
    pub fn set_stopped(&mut self, exit: ExitStatus) {
        self.phase = ContainerPhase::Exited;
        self.pid = None;
        self.paused = false;
        self.exit = Some(exit);
    }

    /// Mark the container as restarting after an exit.
    pub fn set_restarting(&mut self, exit: ExitStatus) {
        self.phase = ContainerPhase::Restarting;
        self.pid = None;
        self.paused = false;
        self.exit = Some(exit);
    }
}

/// Durable view of a container, written through the [`StateStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    /// Container ID.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Lifecycle phase at the time of the snapshot.
    pub phase: ContainerPhase,
    /// PID of the primary process, if running.
    pub pid: Option<u32>,
    /// Restart count.
    pub restart_count: u32,
    /// Paused flag.
    pub paused: bool,
    /// Manual-stop flag.
    pub manually_stopped: bool,
    /// Last start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Exit status of the last run.
    pub exit: Option<ExitStatus>,
}

/// A container instance tracked by the daemon.
///
/// The stream endpoints hang off the container directly so the attach pump
/// can reach them without taking the state lock; everything else a
/// transition mutates lives behind [`lock_state`](Self::lock_state).
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    config: ContainerConfig,
    streams: Arc<StreamConfig>,
    state: Mutex<ContainerState>,
}

impl Container {
    /// Create a container in the `Created` phase.
    #[must_use]
    pub fn new(id: ContainerId, config: ContainerConfig) -> Arc<Self> {
        let streams = Arc::new(StreamConfig::new(config.open_stdin));
        Arc::new(Self {
            id,
            config,
            streams,
            state: Mutex::new(ContainerState::new()),
        })
    }

    /// Container ID.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Static configuration.
    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Stream endpoints; reachable without the state lock.
    #[must_use]
    pub fn streams(&self) -> &Arc<StreamConfig> {
        &self.streams
    }

    /// Acquire the container's exclusive lock.
    ///
    /// Every state transition holds this for its full duration, so
    /// transitions for one container never observe each other half-applied.
    pub async fn lock_state(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().await
    }

    /// Build the durable view of the current state.
    #[must_use]
    pub fn snapshot(&self, state: &ContainerState) -> ContainerSnapshot {
        ContainerSnapshot {
            id: self.id.clone(),
            name: self.config.name.clone(),
            phase: state.phase,
            pid: state.pid,
            restart_count: state.restart_count,
            paused: state.paused,
            manually_stopped: state.manually_stopped,
            started_at: state.started_at,
            exit: state.exit.clone(),
        }
    }

    /// Build the log-driver context for this container.
    #[must_use]
    pub fn log_context(&self) -> LogContext {
        LogContext::new(self.id.clone(), self.config.name.clone())
            .with_labels(self.config.labels.clone())
            .with_env(self.config.env.clone())
            .with_options(self.config.log_options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_start_clears_previous_exit() {
        let mut state = ContainerState::new();
        state.set_stopped(ExitStatus::new(137, true));
        assert_eq!(state.phase, ContainerPhase::Exited);

        state.set_running(42, true);
        assert_eq!(state.phase, ContainerPhase::Running);
        assert_eq!(state.pid, Some(42));
        assert!(state.exit.is_none());
        assert!(state.started_at.is_some());
    }

    #[test]
    fn restore_keeps_previous_exit_metadata() {
        let mut state = ContainerState::new();
        state.set_stopped(ExitStatus::new(1, false));
        state.set_running(42, false);
        assert_eq!(state.phase, ContainerPhase::Running);
        assert!(state.exit.is_some());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let container = Container::new(
            ContainerId::new("abc123").unwrap(),
            ContainerConfig {
                name: "/worker".to_string(),
                ..ContainerConfig::default()
            },
        );
        let mut state = ContainerState::new();
        state.set_stopped(ExitStatus::new(2, false));

        let snapshot = container.snapshot(&state);
        let json = serde_json::to_string(&snapshot).unwrap();
        let loaded: ContainerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.id.as_str(), "abc123");
        assert_eq!(loaded.phase, ContainerPhase::Exited);
        assert_eq!(loaded.exit.unwrap().exit_code, 2);
    }
}
