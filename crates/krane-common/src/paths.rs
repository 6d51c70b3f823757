//! Standard filesystem paths for Krane.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for Krane data.
pub static KRANE_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KRANE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/krane"))
});

/// Standard paths used by the Krane daemon.
#[derive(Debug, Clone)]
pub struct KranePaths {
    /// Root data directory (default: /var/lib/krane).
    pub root: PathBuf,
}

impl KranePaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for container data.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Directory for a specific container.
    #[must_use]
    pub fn container(&self, id: &str) -> PathBuf {
        self.containers().join(id)
    }

    /// Container state file.
    #[must_use]
    pub fn container_state(&self, id: &str) -> PathBuf {
        self.container(id).join("state.json")
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.containers())?;
        Ok(())
    }
}

impl Default for KranePaths {
    fn default() -> Self {
        Self {
            root: KRANE_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_root() {
        let paths = KranePaths::with_root("/tmp/krane-test");
        assert_eq!(
            paths.containers(),
            PathBuf::from("/tmp/krane-test/containers")
        );
        assert_eq!(
            paths.container_state("abc123"),
            PathBuf::from("/tmp/krane-test/containers/abc123/state.json")
        );
    }
}
