//! Loading sub-descriptions by path or by built-in name

use std::collections::HashMap;
use std::path::Path;

use crate::config::{DescriptionError, LaunchDescription, LaunchFile, LaunchFileError};

/// Constructor of an in-memory description
pub type BuiltinFn = fn() -> Result<LaunchDescription, DescriptionError>;

/// Turns an include source into a description
pub trait DescriptionLoader {
    /// Load the description behind `source`
    fn load(&self, source: &str) -> Result<LaunchDescription, LoadError>;

    /// Stable identity of `source`, used for include cycle detection
    fn identity(&self, source: &str) -> String {
        source.to_string()
    }
}

/// Loads YAML launch files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl DescriptionLoader for FileLoader {
    fn load(&self, source: &str) -> Result<LaunchDescription, LoadError> {
        let path = Path::new(source);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {}
            _ => return Err(LoadError::UnsupportedFormat(source.to_string())),
        }

        log::debug!("Loading launch file: {}", source);
        let launch_file = LaunchFile::from_file(source).map_err(|e| match e {
            LaunchFileError::Io { path, source: err } => LoadError::Io { path, source: err },
            other => LoadError::Invalid {
                source_name: source.to_string(),
                error: other,
            },
        })?;
        let description = launch_file.into_description().map_err(|e| LoadError::Invalid {
            source_name: source.to_string(),
            error: e,
        })?;
        Ok(description.with_source(self.identity(source)))
    }

    fn identity(&self, source: &str) -> String {
        std::fs::canonicalize(source)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| source.to_string())
    }
}

/// Descriptions constructed in code and registered by name
#[derive(Debug, Clone, Default)]
pub struct BuiltinLoader {
    builtins: HashMap<String, BuiltinFn>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, build: BuiltinFn) -> Self {
        self.builtins.insert(name.into(), build);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builtins.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl DescriptionLoader for BuiltinLoader {
    fn load(&self, source: &str) -> Result<LaunchDescription, LoadError> {
        let build = self
            .builtins
            .get(source)
            .ok_or_else(|| LoadError::UnknownBuiltin(source.to_string()))?;
        let description = build().map_err(|e| LoadError::Invalid {
            source_name: source.to_string(),
            error: e.into(),
        })?;
        Ok(description.with_source(self.identity(source)))
    }

    fn identity(&self, source: &str) -> String {
        format!("builtin:{}", source)
    }
}

/// Built-ins first, launch files otherwise
#[derive(Debug, Clone, Default)]
pub struct CompositeLoader {
    pub builtins: BuiltinLoader,
    pub files: FileLoader,
}

impl CompositeLoader {
    pub fn new(builtins: BuiltinLoader) -> Self {
        Self {
            builtins,
            files: FileLoader,
        }
    }
}

impl DescriptionLoader for CompositeLoader {
    fn load(&self, source: &str) -> Result<LaunchDescription, LoadError> {
        if self.builtins.contains(source) {
            self.builtins.load(source)
        } else {
            self.files.load(source)
        }
    }

    fn identity(&self, source: &str) -> String {
        if self.builtins.contains(source) {
            self.builtins.identity(source)
        } else {
            self.files.identity(source)
        }
    }
}

/// Errors raised while loading a sub-description
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid launch description '{source_name}': {error}")]
    Invalid {
        source_name: String,
        #[source]
        error: LaunchFileError,
    },

    #[error("Unsupported launch file format: {0} (expected .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error("Unknown built-in launch description: {0}")]
    UnknownBuiltin(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeclareArgument, StartProcess};

    fn gzclient() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new().with(StartProcess::new("gzclient"))
    }

    fn broken() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new()
            .with(DeclareArgument::new("world", "", ""))?
            .with(DeclareArgument::new("world", "", ""))
    }

    #[test]
    fn test_builtin_loader() {
        let loader = BuiltinLoader::new().with("gzclient", gzclient);

        let desc = loader.load("gzclient").unwrap();
        assert_eq!(desc.len(), 1);
        assert_eq!(desc.source(), Some("builtin:gzclient"));
        assert!(matches!(loader.load("gzserver"), Err(LoadError::UnknownBuiltin(_))));
    }

    #[test]
    fn test_builtin_construction_error() {
        let loader = BuiltinLoader::new().with("broken", broken);
        assert!(matches!(loader.load("broken"), Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn test_file_loader_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawn.launch.yaml");
        std::fs::write(
            &path,
            r#"
launch:
  - arg: {name: x_pose, default: "0.0"}
  - node: {executable: spawn_entity.py}
"#,
        )
        .unwrap();

        let desc = FileLoader.load(path.to_str().unwrap()).unwrap();
        assert_eq!(desc.len(), 2);
        let declared: Vec<&DeclareArgument> = desc.declared_arguments().collect();
        assert_eq!(declared[0].name, "x_pose");
        assert!(desc.source().is_some());
    }

    #[test]
    fn test_file_identity_is_canonical() {
        // Relative to the package root, where cargo runs tests
        let dir = tempfile::tempdir_in(".").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let path = dir.path().join("gzserver.launch.yaml");
        std::fs::write(&path, "launch: []\n").unwrap();

        let absolute = std::fs::canonicalize(&path).unwrap();
        let expected = absolute.to_string_lossy().into_owned();
        let detour = dir.path().join("sub").join("..").join("gzserver.launch.yaml");

        assert!(path.is_relative());
        assert_eq!(FileLoader.identity(path.to_str().unwrap()), expected);
        assert_eq!(FileLoader.identity(absolute.to_str().unwrap()), expected);
        assert_eq!(FileLoader.identity(detour.to_str().unwrap()), expected);
        assert_eq!(
            FileLoader.load(path.to_str().unwrap()).unwrap().source(),
            Some(expected.as_str())
        );
    }

    #[test]
    fn test_file_loader_missing_file() {
        let err = FileLoader.load("/nonexistent/gzserver.launch.yaml").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_file_loader_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.launch.yaml");
        std::fs::write(&path, "launch: [ {node: {}} ]").unwrap();

        let err = FileLoader.load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }

    #[test]
    fn test_file_loader_rejects_python_launch_files() {
        let err = FileLoader.load("gzserver.launch.py").unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_composite_prefers_builtins() {
        let loader = CompositeLoader::new(BuiltinLoader::new().with("gzclient", gzclient));
        assert_eq!(loader.identity("gzclient"), "builtin:gzclient");
        assert!(loader.load("gzclient").is_ok());
        assert!(loader.load("missing.yaml").is_err());
    }
}
