//! Launch file YAML schema definitions
//!
//! ```yaml
//! version: "1.0"
//! launch:
//!   - arg:
//!       name: world
//!       default: "$(find-pkg-share custom_worlds)/worlds/turtlebot3_world.world"
//!       description: Full path to the world model file to load
//!   - include:
//!       file: "$(find-pkg-share gazebo_ros)/launch/gzserver.launch.yaml"
//!       args:
//!         world: "$(arg world)"
//!   - node:
//!       package: gazebo_ros
//!       executable: spawn_entity.py
//!       args: ["-entity", "burger", "-x", "$(arg x_pose)"]
//!       output: screen
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{
    Condition, DeclareArgument, DescriptionError, IncludeDescription, LaunchAction,
    LaunchDescription, OutputPolicy, StartProcess, Substitution, SubstitutionError,
};

/// Root launch file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Actions in launch order
    #[serde(default)]
    pub launch: Vec<ActionEntry>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// One entry of the `launch` list, written as a single-key map
/// (`- arg: {..}`, `- include: {..}`, `- node: {..}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EntryMap", into = "EntryMap")]
pub enum ActionEntry {
    Arg(ArgEntry),
    Include(IncludeEntry),
    Node(NodeEntry),
}

/// Wire shape of [`ActionEntry`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arg: Option<ArgEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    include: Option<IncludeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node: Option<NodeEntry>,
}

impl TryFrom<EntryMap> for ActionEntry {
    type Error = String;

    fn try_from(entry: EntryMap) -> Result<Self, Self::Error> {
        match entry {
            EntryMap {
                arg: Some(arg),
                include: None,
                node: None,
            } => Ok(ActionEntry::Arg(arg)),
            EntryMap {
                arg: None,
                include: Some(include),
                node: None,
            } => Ok(ActionEntry::Include(include)),
            EntryMap {
                arg: None,
                include: None,
                node: Some(node),
            } => Ok(ActionEntry::Node(node)),
            EntryMap {
                arg: None,
                include: None,
                node: None,
            } => Err("entry must be one of 'arg', 'include' or 'node'".to_string()),
            _ => Err("entry must have exactly one of 'arg', 'include' or 'node'".to_string()),
        }
    }
}

impl From<ActionEntry> for EntryMap {
    fn from(entry: ActionEntry) -> Self {
        match entry {
            ActionEntry::Arg(arg) => EntryMap {
                arg: Some(arg),
                ..Default::default()
            },
            ActionEntry::Include(include) => EntryMap {
                include: Some(include),
                ..Default::default()
            },
            ActionEntry::Node(node) => EntryMap {
                node: Some(node),
                ..Default::default()
            },
        }
    }
}

/// Argument declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgEntry {
    pub name: String,
    /// Default value for the argument
    #[serde(default = "default_arg_value")]
    pub default: ArgValue,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_arg_value() -> ArgValue {
    ArgValue::String(String::new())
}

/// Argument and parameter values can be strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            // Keep "0.0" as written instead of Rust's "0"
            ArgValue::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.1}", f),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }

    /// Infer a typed value from a resolved string
    pub fn from_str(s: &str) -> Self {
        // Try parsing as bool first
        if s.eq_ignore_ascii_case("true") {
            return ArgValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ArgValue::Bool(false);
        }
        // Try parsing as integer
        if let Ok(i) = s.parse::<i64>() {
            return ArgValue::Int(i);
        }
        // Only plain decimals, so "inf", "nan" or "1e5" stay strings
        if is_decimal(s) {
            if let Ok(f) = s.parse::<f64>() {
                return ArgValue::Float(f);
            }
        }
        // Default to string
        ArgValue::String(s.to_string())
    }
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (whole, fraction) = match digits.split_once('.') {
        Some(parts) => parts,
        None => return false,
    };
    !(whole.is_empty() && fraction.is_empty())
        && whole.chars().all(|c| c.is_ascii_digit())
        && fraction.chars().all(|c| c.is_ascii_digit())
}

/// Include of another launch file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeEntry {
    /// Path or built-in name
    pub file: String,
    /// Arguments forwarded to the included description
    #[serde(default)]
    pub args: IndexMap<String, ArgValue>,
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,
    #[serde(default, rename = "unless")]
    pub unless_condition: Option<String>,
}

/// Process or node entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Package whose `lib/` holds the executable
    #[serde(default)]
    pub package: Option<String>,

    pub executable: String,

    /// Entity name
    #[serde(default)]
    pub name: Option<String>,

    /// Raw arguments passed directly to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Named parameters, written to a params file at start
    #[serde(default)]
    pub parameters: IndexMap<String, ArgValue>,

    /// Environment variables specific to this process
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub output: OutputPolicy,

    /// Stop the whole session when this process exits
    #[serde(default)]
    pub required: bool,

    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    #[serde(default, rename = "unless")]
    pub unless_condition: Option<String>,
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: &str) -> Result<Self, LaunchFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file configuration
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        for (index, entry) in self.launch.iter().enumerate() {
            match entry {
                ActionEntry::Arg(arg) => {
                    if arg.name.trim().is_empty() {
                        return Err(LaunchFileError::Validation(format!(
                            "Action {}: argument name must not be empty",
                            index
                        )));
                    }
                }
                ActionEntry::Include(include) => {
                    if include.file.trim().is_empty() {
                        return Err(LaunchFileError::Validation(format!(
                            "Action {}: include must specify 'file'",
                            index
                        )));
                    }
                    if include.if_condition.is_some() && include.unless_condition.is_some() {
                        return Err(LaunchFileError::Validation(format!(
                            "Include '{}': cannot specify both 'if' and 'unless'",
                            include.file
                        )));
                    }
                }
                ActionEntry::Node(node) => {
                    let label = node.name.as_deref().unwrap_or(&node.executable);
                    if node.executable.trim().is_empty() {
                        return Err(LaunchFileError::Validation(format!(
                            "Action {}: node must specify 'executable'",
                            index
                        )));
                    }
                    if node.package.as_deref().is_some_and(|p| p.trim().is_empty()) {
                        return Err(LaunchFileError::Validation(format!(
                            "Node '{}': 'package' must not be empty",
                            label
                        )));
                    }
                    if node.if_condition.is_some() && node.unless_condition.is_some() {
                        return Err(LaunchFileError::Validation(format!(
                            "Node '{}': cannot specify both 'if' and 'unless'",
                            label
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert into a launch description. Strings are parsed into
    /// substitutions but nothing is resolved.
    pub fn into_description(self) -> Result<LaunchDescription, LaunchFileError> {
        let mut description = LaunchDescription::new();
        for entry in self.launch {
            description.add(entry.into_action()?)?;
        }
        Ok(description)
    }

    /// Count of entries per kind: (args, includes, nodes)
    pub fn summary(&self) -> (usize, usize, usize) {
        self.launch.iter().fold((0, 0, 0), |(a, i, n), entry| match entry {
            ActionEntry::Arg(_) => (a + 1, i, n),
            ActionEntry::Include(_) => (a, i + 1, n),
            ActionEntry::Node(_) => (a, i, n + 1),
        })
    }
}

impl ActionEntry {
    fn into_action(self) -> Result<LaunchAction, LaunchFileError> {
        let action = match self {
            ActionEntry::Arg(arg) => LaunchAction::DeclareArgument(DeclareArgument::new(
                arg.name,
                parse(&arg.default.as_str())?,
                arg.description.unwrap_or_default(),
            )),
            ActionEntry::Include(include) => {
                let mut action = IncludeDescription::new(parse(&include.file)?);
                for (name, value) in include.args {
                    action = action.with_argument(name, parse(&value.as_str())?);
                }
                action.condition = condition(include.if_condition, include.unless_condition)?;
                LaunchAction::Include(action)
            }
            ActionEntry::Node(node) => {
                let executable = parse(&node.executable)?;
                let mut action = match node.package {
                    Some(package) => StartProcess::node(parse(&package)?, executable),
                    None => StartProcess::new(executable),
                };
                if let Some(name) = node.name {
                    action = action.with_name(parse(&name)?);
                }
                for arg in &node.args {
                    action = action.with_arg(parse(arg)?);
                }
                for (key, value) in node.parameters {
                    action = action.with_parameter(key, parse(&value.as_str())?);
                }
                for (key, value) in node.env {
                    action = action.with_env(key, parse(&value)?);
                }
                if let Some(dir) = node.working_dir {
                    action = action.with_working_dir(parse(&dir)?);
                }
                action = action.with_output(node.output);
                action.required = node.required;
                action.condition = condition(node.if_condition, node.unless_condition)?;
                LaunchAction::StartProcess(action)
            }
        };
        Ok(action)
    }
}

fn parse(value: &str) -> Result<Substitution, LaunchFileError> {
    Substitution::parse(value).map_err(|e| LaunchFileError::Substitution {
        value: value.to_string(),
        source: e,
    })
}

fn condition(
    if_condition: Option<String>,
    unless_condition: Option<String>,
) -> Result<Option<Condition>, LaunchFileError> {
    Ok(match (if_condition, unless_condition) {
        (Some(value), _) => Some(Condition::If(parse(&value)?)),
        (None, Some(value)) => Some(Condition::Unless(parse(&value)?)),
        (None, None) => None,
    })
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid substitution in '{value}': {source}")]
    Substitution {
        value: String,
        #[source]
        source: SubstitutionError,
    },

    #[error(transparent)]
    Description(#[from] DescriptionError),
}
