//! Daemon core: container registry and log-driver wiring.

mod monitor;

pub use monitor::{IoPipes, StateKind, StateNotification};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use krane_common::{ContainerId, KraneError, KraneResult, KranePaths};

use crate::container::{Container, ExecCommand, StateStore, stream::StreamConfig};
use crate::events::EventBus;
use crate::logger::DriverRegistry;

/// Daemon configuration options.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Paths for daemon data.
    pub paths: KranePaths,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            paths: KranePaths::new(),
        }
    }
}

impl DaemonConfig {
    /// Set the root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.paths = KranePaths::with_root(root);
        self
    }
}

/// In-memory index of live containers.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    inner: RwLock<HashMap<ContainerId, Arc<Container>>>,
}

impl ContainerRegistry {
    /// Add a container, replacing any previous entry with the same ID.
    pub fn add(&self, container: Arc<Container>) {
        self.inner
            .write()
            .insert(container.id().clone(), container);
    }

    /// Look up a container by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.inner.read().get(id).cloned()
    }

    /// Remove a container.
    pub fn remove(&self, id: &str) -> Option<Arc<Container>> {
        self.inner.write().remove(id)
    }

    /// IDs of all registered containers.
    #[must_use]
    pub fn list(&self) -> Vec<ContainerId> {
        self.inner.read().keys().cloned().collect()
    }
}

/// The lifecycle-event core of the daemon.
///
/// Receives state notifications and stdio-attach calls from the execution
/// engine, and owns the registry, persistence, events, and log-driver
/// wiring they touch.
#[derive(Debug)]
pub struct Daemon {
    containers: ContainerRegistry,
    /// Exec process ID to owning container. Entries survive exec exit so
    /// finished execs stay resolvable for inspection.
    execs: RwLock<HashMap<String, ContainerId>>,
    store: StateStore,
    events: EventBus,
    drivers: DriverRegistry,
}

impl Daemon {
    /// Create a daemon with the built-in log drivers.
    #[must_use]
    pub fn new(config: &DaemonConfig) -> Self {
        Self::with_driver_registry(config, DriverRegistry::with_defaults())
    }

    /// Create a daemon with an explicit driver registry.
    #[must_use]
    pub fn with_driver_registry(config: &DaemonConfig, drivers: DriverRegistry) -> Self {
        Self {
            containers: ContainerRegistry::default(),
            execs: RwLock::new(HashMap::new()),
            store: StateStore::new(config.paths.containers()),
            events: EventBus::new(),
            drivers,
        }
    }

    /// The container registry.
    #[must_use]
    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// The state store.
    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The log-driver registry.
    #[must_use]
    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Track a new exec process for a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown.
    pub async fn register_exec(&self, container_id: &str, exec: ExecCommand) -> KraneResult<()> {
        let container =
            self.containers
                .get(container_id)
                .ok_or_else(|| KraneError::ContainerNotFound {
                    id: container_id.to_string(),
                })?;
        self.execs
            .write()
            .insert(exec.id.clone(), container.id().clone());
        container
            .lock_state()
            .await
            .execs
            .insert(exec.id.clone(), exec);
        Ok(())
    }

    /// The container owning an exec process, if the exec is known.
    #[must_use]
    pub fn container_for_exec(&self, exec_id: &str) -> Option<Arc<Container>> {
        let container_id = self.execs.read().get(exec_id).cloned()?;
        self.containers.get(container_id.as_str())
    }

    /// Stream endpoints of a live exec process.
    pub(crate) async fn exec_streams(&self, exec_id: &str) -> Option<Arc<StreamConfig>> {
        let container = self.container_for_exec(exec_id)?;
        let state = container.lock_state().await;
        state.execs.get(exec_id).map(|e| e.streams().clone())
    }

    /// Instantiate and attach the container's configured log driver.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown driver, rejected options, failed
    /// driver construction, or an already-attached driver.
    pub(crate) fn start_logging(&self, container: &Container) -> KraneResult<()> {
        let ctx = container.log_context();
        let driver = self.drivers.create(&container.config().log_driver, &ctx)?;
        container
            .streams()
            .attach_log_driver(container.id().as_str(), driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerConfig;

    fn daemon(temp: &tempfile::TempDir) -> Daemon {
        Daemon::new(&DaemonConfig::default().with_root(temp.path()))
    }

    #[test]
    fn registry_add_get_remove() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(&temp);

        let container = Container::new(
            ContainerId::new("abc123").unwrap(),
            ContainerConfig::default(),
        );
        daemon.containers().add(container);

        assert!(daemon.containers().get("abc123").is_some());
        assert_eq!(daemon.containers().list().len(), 1);
        assert!(daemon.containers().remove("abc123").is_some());
        assert!(daemon.containers().get("abc123").is_none());
    }

    #[tokio::test]
    async fn exec_registration_resolves_owner() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(&temp);

        let container = Container::new(
            ContainerId::new("abc123").unwrap(),
            ContainerConfig::default(),
        );
        daemon.containers().add(container);

        daemon
            .register_exec("abc123", ExecCommand::new("exec-1", false))
            .await
            .unwrap();

        let owner = daemon.container_for_exec("exec-1").unwrap();
        assert_eq!(owner.id().as_str(), "abc123");
        assert!(daemon.exec_streams("exec-1").await.is_some());
        assert!(daemon.container_for_exec("ghost").is_none());
    }

    #[tokio::test]
    async fn register_exec_for_unknown_container_fails() {
        let temp = tempfile::tempdir().unwrap();
        let daemon = daemon(&temp);
        let err = daemon
            .register_exec("ghost", ExecCommand::new("exec-1", false))
            .await
            .unwrap_err();
        assert!(matches!(err, KraneError::ContainerNotFound { .. }));
    }
}
