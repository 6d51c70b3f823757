//! # Krane Container Daemon Core
//!
//! Krane is the lifecycle core of a container daemon: it turns state
//! notifications from an execution engine into container state, wires the
//! engine's stdio pipes into buffered stream endpoints, and forwards
//! container output to pluggable log drivers.
//!
//! ## Features
//!
//! - **State machine**: Exit, restart, start, restore, pause, resume and
//!   exec-exit transitions, serialized per container
//! - **Attach pump**: Engine pipes copied into buffered endpoints with
//!   completion tracking, so exits can drain output before detaching
//! - **Log drivers**: A registry of named drivers with a built-in journald
//!   driver, per-message enrichment, and output rate limiting
//!
//! ## Usage
//!
//! ```no_run
//! use krane::container::{Container, ContainerConfig};
//! use krane::daemon::{Daemon, DaemonConfig, IoPipes, StateKind, StateNotification};
//! use krane_common::ContainerId;
//!
//! # async fn example() -> krane_common::KraneResult<()> {
//! let daemon = Daemon::new(&DaemonConfig::default());
//!
//! let container = Container::new(ContainerId::generate(), ContainerConfig::default());
//! let id = container.id().to_string();
//! daemon.containers().add(container);
//!
//! // The execution engine hands over pipes, then reports the start.
//! daemon.attach_streams(&id, IoPipes::default()).await?;
//! daemon
//!     .state_changed(StateNotification {
//!         id,
//!         kind: StateKind::Start,
//!         exit_code: 0,
//!         oom_killed: false,
//!         pid: 42,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod container;
pub mod daemon;
pub mod events;
pub mod logger;

pub use container::Container;
pub use daemon::Daemon;
