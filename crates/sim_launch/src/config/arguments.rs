//! Launch argument registry
//!
//! Arguments may be overridden by the invoking context until their value is
//! first read. From then on the value is frozen for the rest of the session.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Substitution;

/// Where an argument entered the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentOrigin {
    /// Declared by a `DeclareArgument` action in this scope
    Declared,
    /// Forwarded by the parent description's include action
    Forwarded,
}

/// A launch argument
#[derive(Debug)]
pub struct Argument {
    pub name: String,
    pub default: Substitution,
    pub description: String,
    pub origin: ArgumentOrigin,
    value: Option<String>,
    frozen: AtomicBool,
}

impl Argument {
    fn new(
        name: String,
        default: Substitution,
        description: String,
        origin: ArgumentOrigin,
    ) -> Self {
        Self {
            name,
            default,
            description,
            origin,
            value: None,
            frozen: AtomicBool::new(false),
        }
    }

    /// Override value, if one was applied
    pub fn override_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The value resolution will see: override if present, default otherwise
    pub fn effective(&self) -> Substitution {
        match &self.value {
            Some(value) => Substitution::text(value.clone()),
            None => self.default.clone(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

/// Named launch arguments of one description scope
#[derive(Debug, Default)]
pub struct ArgumentRegistry {
    arguments: IndexMap<String, Argument>,
    /// Overrides supplied before the matching declaration was seen
    pending: HashMap<String, String>,
}

impl ArgumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with overrides from the invoking context (e.g. `-a x_pose:=1.5`)
    pub fn with_overrides(overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            arguments: IndexMap::new(),
            pending: overrides.into_iter().collect(),
        }
    }

    /// Child registry seeded only with arguments forwarded by an include
    pub fn forwarded(values: IndexMap<String, String>) -> Self {
        let arguments = values
            .into_iter()
            .map(|(name, value)| {
                let mut arg = Argument::new(
                    name.clone(),
                    Substitution::text(value.clone()),
                    String::new(),
                    ArgumentOrigin::Forwarded,
                );
                arg.value = Some(value);
                (name, arg)
            })
            .collect();
        Self {
            arguments,
            pending: HashMap::new(),
        }
    }

    /// Declare an argument.
    ///
    /// Declaring a forwarded argument adopts it: the forwarded value stays in
    /// effect and the declaration contributes its description.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        default: Substitution,
        description: impl Into<String>,
    ) -> Result<&Argument, ArgumentError> {
        let name = name.into();
        let description = description.into();

        if let Some(existing) = self.arguments.get_mut(&name) {
            if existing.origin == ArgumentOrigin::Declared {
                return Err(ArgumentError::DuplicateArgument(name));
            }
            existing.default = default;
            existing.description = description;
            existing.origin = ArgumentOrigin::Declared;
            log::debug!("Argument '{}' declared with forwarded value", name);
            return Ok(&self.arguments[&name]);
        }

        let mut argument =
            Argument::new(name.clone(), default, description, ArgumentOrigin::Declared);
        if let Some(value) = self.pending.remove(&name) {
            log::debug!("Argument '{}' overridden with '{}'", name, value);
            argument.value = Some(value);
        }
        let (index, _) = self.arguments.insert_full(name, argument);
        Ok(&self.arguments[index])
    }

    /// Override an argument value. Fails once the value has been read.
    pub fn override_value(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), ArgumentError> {
        let argument = self
            .arguments
            .get_mut(name)
            .ok_or_else(|| ArgumentError::UndeclaredArgument(name.to_string()))?;
        if argument.is_frozen() {
            return Err(ArgumentError::FrozenArgument(name.to_string()));
        }
        argument.value = Some(value.into());
        Ok(())
    }

    /// Read an argument's effective value, freezing it
    pub fn get(&self, name: &str) -> Result<Substitution, ArgumentError> {
        let argument = self
            .arguments
            .get(name)
            .ok_or_else(|| ArgumentError::UndeclaredArgument(name.to_string()))?;
        argument.frozen.store(true, Ordering::Release);
        Ok(argument.effective())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arguments.contains_key(name)
    }

    /// Inspect an argument without freezing it
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.get(name)
    }

    /// Arguments in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.values()
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Overrides that never matched a declaration, sorted by name
    pub fn unclaimed_overrides(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Errors raised by the argument registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("Argument '{0}' is already declared")]
    DuplicateArgument(String),

    #[error("Undeclared argument: {0}")]
    UndeclaredArgument(String),

    #[error("Argument '{0}' is already in use and can no longer be overridden")]
    FrozenArgument(String),
}
