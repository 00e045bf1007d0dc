//! Launch descriptions: the static, unresolved plan of a session
//!
//! A description is pure data. Building one never evaluates a substitution
//! and never touches the filesystem; everything is resolved later by the
//! session.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{ArgumentError, Substitution};

/// Gate attached to an include or process action
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Run the action when the value is true
    If(Substitution),
    /// Run the action when the value is false
    Unless(Substitution),
}

/// What happens to a process's stdout/stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPolicy {
    /// Child writes straight to our terminal
    Inherit,
    /// Lines are read and logged with the entity name as prefix
    #[default]
    #[serde(alias = "screen")]
    Capture,
    /// Output is thrown away
    #[serde(alias = "log")]
    Discard,
}

/// `DeclareArgument`
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareArgument {
    pub name: String,
    pub default: Substitution,
    pub description: String,
}

impl DeclareArgument {
    pub fn new(
        name: impl Into<String>,
        default: impl Into<Substitution>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            description: description.into(),
        }
    }
}

/// Include another description, forwarding selected arguments
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDescription {
    /// Path or built-in name of the description to load
    pub source: Substitution,
    /// The only arguments the child scope will see
    pub launch_arguments: IndexMap<String, Substitution>,
    pub condition: Option<Condition>,
}

impl IncludeDescription {
    pub fn new(source: impl Into<Substitution>) -> Self {
        Self {
            source: source.into(),
            launch_arguments: IndexMap::new(),
            condition: None,
        }
    }

    pub fn with_argument(
        mut self,
        name: impl Into<String>,
        value: impl Into<Substitution>,
    ) -> Self {
        self.launch_arguments.insert(name.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Start one process (a ROS node when `package` is set)
#[derive(Debug, Clone, PartialEq)]
pub struct StartProcess {
    pub package: Option<Substitution>,
    pub executable: Substitution,
    /// Entity name; defaults to the executable's file name
    pub name: Option<Substitution>,
    pub arguments: Vec<Substitution>,
    pub parameters: IndexMap<String, Substitution>,
    pub env: IndexMap<String, Substitution>,
    pub working_dir: Option<Substitution>,
    pub output: OutputPolicy,
    /// Session stops when this process exits or fails to start
    pub required: bool,
    pub condition: Option<Condition>,
}

impl StartProcess {
    /// Plain executable, looked up through `PATH` if not a path
    pub fn new(executable: impl Into<Substitution>) -> Self {
        Self {
            package: None,
            executable: executable.into(),
            name: None,
            arguments: Vec::new(),
            parameters: IndexMap::new(),
            env: IndexMap::new(),
            working_dir: None,
            output: OutputPolicy::default(),
            required: false,
            condition: None,
        }
    }

    /// Executable installed under `lib/<package>/`
    pub fn node(package: impl Into<Substitution>, executable: impl Into<Substitution>) -> Self {
        Self {
            package: Some(package.into()),
            ..Self::new(executable)
        }
    }

    pub fn with_name(mut self, name: impl Into<Substitution>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<Substitution>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Substitution>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<Substitution>,
    ) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<Substitution>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<Substitution>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.output = output;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// One step of a launch description
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchAction {
    DeclareArgument(DeclareArgument),
    Include(IncludeDescription),
    StartProcess(StartProcess),
}

impl From<DeclareArgument> for LaunchAction {
    fn from(action: DeclareArgument) -> Self {
        LaunchAction::DeclareArgument(action)
    }
}

impl From<IncludeDescription> for LaunchAction {
    fn from(action: IncludeDescription) -> Self {
        LaunchAction::Include(action)
    }
}

impl From<StartProcess> for LaunchAction {
    fn from(action: StartProcess) -> Self {
        LaunchAction::StartProcess(action)
    }
}

/// Ordered, append-only list of launch actions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchDescription {
    actions: Vec<LaunchAction>,
    declared: HashSet<String>,
    /// Identity of the file or built-in this description came from
    source: Option<String>,
}

impl LaunchDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action.
    ///
    /// A second declaration of the same argument is rejected here, before any
    /// resolution happens.
    pub fn add(&mut self, action: impl Into<LaunchAction>) -> Result<(), DescriptionError> {
        let action = action.into();
        if let LaunchAction::DeclareArgument(declare) = &action {
            if declare.name.is_empty() {
                return Err(DescriptionError::Malformed(
                    "argument declaration with an empty name".to_string(),
                ));
            }
            if !self.declared.insert(declare.name.clone()) {
                return Err(ArgumentError::DuplicateArgument(declare.name.clone()).into());
            }
        }
        self.actions.push(action);
        Ok(())
    }

    /// Builder form of [`LaunchDescription::add`]
    pub fn with(mut self, action: impl Into<LaunchAction>) -> Result<Self, DescriptionError> {
        self.add(action)?;
        Ok(self)
    }

    /// Tag the description with its source identity
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn actions(&self) -> &[LaunchAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Declared argument names in declaration order
    pub fn declared_arguments(&self) -> impl Iterator<Item = &DeclareArgument> {
        self.actions.iter().filter_map(|action| match action {
            LaunchAction::DeclareArgument(declare) => Some(declare),
            _ => None,
        })
    }
}

/// Errors raised while building a description
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Malformed launch description: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_keep_insertion_order() {
        let desc = LaunchDescription::new()
            .with(DeclareArgument::new("x_pose", "0.0", ""))
            .unwrap()
            .with(StartProcess::new("gzclient"))
            .unwrap()
            .with(DeclareArgument::new("y_pose", "0.0", ""))
            .unwrap();

        assert_eq!(desc.len(), 3);
        assert!(matches!(desc.actions()[1], LaunchAction::StartProcess(_)));
        let names: Vec<&str> = desc.declared_arguments().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["x_pose", "y_pose"]);
    }

    #[test]
    fn test_duplicate_declaration_rejected_at_build() {
        let mut desc = LaunchDescription::new();
        desc.add(DeclareArgument::new("world", "", "")).unwrap();

        let err = desc.add(DeclareArgument::new("world", "other", "")).unwrap_err();
        assert!(matches!(
            err,
            DescriptionError::Argument(ArgumentError::DuplicateArgument(name)) if name == "world"
        ));
        assert_eq!(desc.len(), 1);
    }

    #[test]
    fn test_building_does_not_resolve() {
        // References to arguments nobody declared are fine until resolution
        let desc = LaunchDescription::new()
            .with(StartProcess::new("spawn_entity.py").with_args([
                Substitution::text("-x"),
                Substitution::arg("never_declared"),
            ]))
            .unwrap()
            .with(IncludeDescription::new("/does/not/exist.launch.yaml"))
            .unwrap();

        assert_eq!(desc.len(), 2);
    }

    #[test]
    fn test_empty_argument_name_is_malformed() {
        let mut desc = LaunchDescription::new();
        assert!(matches!(
            desc.add(DeclareArgument::new("", "", "")),
            Err(DescriptionError::Malformed(_))
        ));
    }

    #[test]
    fn test_output_policy_aliases() {
        let screen: OutputPolicy = serde_yaml::from_str("screen").unwrap();
        let log: OutputPolicy = serde_yaml::from_str("log").unwrap();
        let inherit: OutputPolicy = serde_yaml::from_str("inherit").unwrap();
        assert_eq!(screen, OutputPolicy::Capture);
        assert_eq!(log, OutputPolicy::Discard);
        assert_eq!(inherit, OutputPolicy::Inherit);
    }
}
