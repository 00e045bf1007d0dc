//! Environment snapshot used by `$(env ...)` substitutions

use std::collections::HashMap;
use std::str::FromStr;

/// What to do when an environment variable is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvPolicy {
    /// Fail resolution with an unresolved reference (default)
    #[default]
    Strict,
    /// Resolve missing variables to an empty string
    EmptyFallback,
}

impl FromStr for EnvPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(EnvPolicy::Strict),
            "empty" | "empty-fallback" => Ok(EnvPolicy::EmptyFallback),
            other => Err(format!(
                "Invalid env policy '{}'. Expected 'strict' or 'empty'",
                other
            )),
        }
    }
}

/// Frozen view of environment variables for one session
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    policy: EnvPolicy,
}

impl Environment {
    /// Snapshot the current process environment
    pub fn capture(policy: EnvPolicy) -> Self {
        Self {
            vars: std::env::vars().collect(),
            policy,
        }
    }

    /// Build an environment from explicit variables
    pub fn from_vars<I, K, V>(vars: I, policy: EnvPolicy) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            policy,
        }
    }

    /// Add a variable
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn policy(&self) -> EnvPolicy {
        self.policy
    }

    /// Raw lookup, ignoring the policy
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Lookup honoring the missing-variable policy.
    ///
    /// Returns `None` only under [`EnvPolicy::Strict`] when the variable is unset.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match (self.vars.get(name), self.policy) {
            (Some(value), _) => Some(value.clone()),
            (None, EnvPolicy::EmptyFallback) => Some(String::new()),
            (None, EnvPolicy::Strict) => None,
        }
    }
}
