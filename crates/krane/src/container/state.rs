//! Container state persistence.

use krane_common::{KraneError, KraneResult};

use super::ContainerSnapshot;

/// Writes container snapshots to durable storage.
#[derive(Debug)]
pub struct StateStore {
    /// Base path for state files.
    state_dir: std::path::PathBuf,
}

impl StateStore {
    /// Create a store rooted at `state_dir`.
    pub fn new(state_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// Get the path to a container's state file.
    #[must_use]
    pub fn state_path(&self, container_id: &str) -> std::path::PathBuf {
        self.state_dir.join(container_id).join("state.json")
    }

    /// Save a container snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized or written.
    pub fn save(&self, snapshot: &ContainerSnapshot) -> KraneResult<()> {
        let path = self.state_path(snapshot.id.as_str());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)?;

        tracing::debug!(
            container_id = %snapshot.id,
            path = %path.display(),
            "Saved container state"
        );

        Ok(())
    }

    /// Load a container snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or the file is invalid.
    pub fn load(&self, container_id: &str) -> KraneResult<ContainerSnapshot> {
        let path = self.state_path(container_id);

        if !path.exists() {
            return Err(KraneError::ContainerNotFound {
                id: container_id.to_string(),
            });
        }

        let json = std::fs::read_to_string(&path)?;
        let snapshot: ContainerSnapshot = serde_json::from_str(&json)?;

        tracing::debug!(
            container_id = %container_id,
            path = %path.display(),
            "Loaded container state"
        );

        Ok(snapshot)
    }

    /// Delete a container's persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be removed.
    pub fn delete(&self, container_id: &str) -> KraneResult<()> {
        let container_dir = self.state_dir.join(container_id);

        if container_dir.exists() {
            std::fs::remove_dir_all(&container_dir)?;
            tracing::debug!(
                container_id = %container_id,
                path = %container_dir.display(),
                "Deleted container state"
            );
        }

        Ok(())
    }

    /// List all containers with persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be read.
    pub fn list(&self) -> KraneResult<Vec<String>> {
        let mut containers = Vec::new();

        if !self.state_dir.exists() {
            return Ok(containers);
        }

        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if entry.path().join("state.json").exists() {
                        containers.push(name.to_string());
                    }
                }
            }
        }

        Ok(containers)
    }

    /// Check if a container has persisted state.
    #[must_use]
    pub fn exists(&self, container_id: &str) -> bool {
        self.state_path(container_id).exists()
    }
}
