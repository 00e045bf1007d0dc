//! Package lookups against install prefixes
//!
//! An install prefix follows the usual colcon/ament layout:
//!
//! ```text
//! <prefix>/share/<package>/...        data (launch files, urdf, worlds)
//! <prefix>/lib/<package>/<executable> node executables
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::Environment;

/// Environment variable listing install prefixes
pub const PREFIX_PATH_VAR: &str = "AMENT_PREFIX_PATH";

/// Resolves package share directories and executables
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    /// Install prefixes, searched in order
    prefixes: Vec<PathBuf>,
    /// Explicit share directories that bypass prefix search
    shares: HashMap<String, PathBuf>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from `AMENT_PREFIX_PATH` in the given environment
    pub fn from_environment(env: &Environment) -> Self {
        let prefixes = env
            .get(PREFIX_PATH_VAR)
            .map(|value| {
                std::env::split_paths(value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            prefixes,
            shares: HashMap::new(),
        }
    }

    /// Append an install prefix
    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Register a package share directory directly
    pub fn with_package(mut self, name: impl Into<String>, share_dir: impl Into<PathBuf>) -> Self {
        self.shares.insert(name.into(), share_dir.into());
        self
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Locate `<prefix>/share/<package>`
    pub fn share_directory(&self, package: &str) -> Result<PathBuf, PackageError> {
        if let Some(dir) = self.shares.get(package) {
            return Ok(dir.clone());
        }

        self.prefixes
            .iter()
            .map(|prefix| prefix.join("share").join(package))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| PackageError::PackageNotFound(package.to_string()))
    }

    /// Locate `<prefix>/lib/<package>/<executable>`
    pub fn executable(&self, package: &str, executable: &str) -> Result<PathBuf, PackageError> {
        let mut candidates: Vec<PathBuf> = Vec::new();

        // Registered share dirs live at <prefix>/share/<package>
        if let Some(prefix) = self
            .shares
            .get(package)
            .and_then(|share| share.parent())
            .and_then(Path::parent)
        {
            candidates.push(prefix.to_path_buf());
        }
        candidates.extend(self.prefixes.iter().cloned());

        candidates
            .iter()
            .map(|prefix| prefix.join("lib").join(package).join(executable))
            .find(|path| path.is_file())
            .ok_or_else(|| PackageError::ExecutableNotFound {
                package: package.to_string(),
                executable: executable.to_string(),
            })
    }
}

/// Errors from package lookups
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Package '{0}' not found in any install prefix")]
    PackageNotFound(String),

    #[error("Executable '{executable}' not found in package '{package}'")]
    ExecutableNotFound { package: String, executable: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvPolicy;

    fn make_prefix() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("share/gazebo_ros/launch")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib/gazebo_ros")).unwrap();
        std::fs::write(dir.path().join("lib/gazebo_ros/spawn_entity.py"), "#!/bin/sh\n").unwrap();
        dir
    }

    #[test]
    fn test_share_directory_from_prefix() {
        let prefix = make_prefix();
        let index = PackageIndex::new().with_prefix(prefix.path());

        let share = index.share_directory("gazebo_ros").unwrap();
        assert_eq!(share, prefix.path().join("share/gazebo_ros"));
    }

    #[test]
    fn test_unknown_package() {
        let prefix = make_prefix();
        let index = PackageIndex::new().with_prefix(prefix.path());

        let err = index.share_directory("nav2_bringup").unwrap_err();
        assert!(matches!(err, PackageError::PackageNotFound(name) if name == "nav2_bringup"));
    }

    #[test]
    fn test_executable_lookup() {
        let prefix = make_prefix();
        let index = PackageIndex::new().with_prefix(prefix.path());

        let exe = index.executable("gazebo_ros", "spawn_entity.py").unwrap();
        assert!(exe.ends_with("lib/gazebo_ros/spawn_entity.py"));
        assert!(index.executable("gazebo_ros", "missing").is_err());
    }

    #[test]
    fn test_from_environment() {
        let prefix = make_prefix();
        let joined = std::env::join_paths([prefix.path(), Path::new("/nonexistent")]).unwrap();
        let env = Environment::from_vars(
            [(PREFIX_PATH_VAR.to_string(), joined.to_string_lossy().into_owned())],
            EnvPolicy::Strict,
        );

        let index = PackageIndex::from_environment(&env);
        assert_eq!(index.prefixes().len(), 2);
        assert!(index.share_directory("gazebo_ros").is_ok());
    }

    #[test]
    fn test_registered_package_overrides_prefixes() {
        let prefix = make_prefix();
        let index =
            PackageIndex::new().with_package("gazebo_ros", prefix.path().join("share/gazebo_ros"));

        assert!(index.share_directory("gazebo_ros").is_ok());
        assert!(index.executable("gazebo_ros", "spawn_entity.py").is_ok());
    }
}
