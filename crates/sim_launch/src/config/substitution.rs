//! Deferred substitutions and their resolution
//!
//! A [`Substitution`] is built when the launch description is built and only
//! evaluated when the session resolves it. The `$(kind value)` syntax used by
//! launch files is parsed into the same tree by [`Substitution::parse`].

use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::config::{ArgumentError, ArgumentRegistry, Environment, PackageError, PackageIndex};

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([\w-]+)\s+([^)]+)\)|\$\(([\w-]+)\)").unwrap());

/// Maximum nesting of argument defaults referencing other arguments
const MAX_ARG_DEPTH: usize = 32;

/// A lazily evaluated string expression
#[derive(Debug, Clone, PartialEq)]
pub enum Substitution {
    /// Literal text
    Text(String),
    /// Launch argument reference, with an optional fallback used when the
    /// argument is not declared in scope
    Arg {
        name: String,
        default: Option<Box<Substitution>>,
    },
    /// Environment variable, with an optional fallback for unset variables
    Env {
        name: String,
        default: Option<Box<Substitution>>,
    },
    /// Left-to-right concatenation
    Concat(Vec<Substitution>),
    /// Select one branch from a boolean-valued condition
    If {
        condition: Box<Substitution>,
        then: Box<Substitution>,
        otherwise: Box<Substitution>,
    },
    /// Share directory of an installed package
    PackageShare(Box<Substitution>),
    /// Path components joined with the platform separator
    PathJoin(Vec<Substitution>),
    /// Contents of a text file
    FileContents(Box<Substitution>),
}

impl Substitution {
    pub fn text(value: impl Into<String>) -> Self {
        Substitution::Text(value.into())
    }

    /// Reference to a declared argument
    pub fn arg(name: impl Into<String>) -> Self {
        Substitution::Arg {
            name: name.into(),
            default: None,
        }
    }

    /// Reference to an argument that falls back to `default` when undeclared
    pub fn arg_or(name: impl Into<String>, default: impl Into<Substitution>) -> Self {
        Substitution::Arg {
            name: name.into(),
            default: Some(Box::new(default.into())),
        }
    }

    pub fn env(name: impl Into<String>) -> Self {
        Substitution::Env {
            name: name.into(),
            default: None,
        }
    }

    pub fn env_or(name: impl Into<String>, default: impl Into<Substitution>) -> Self {
        Substitution::Env {
            name: name.into(),
            default: Some(Box::new(default.into())),
        }
    }

    pub fn concat<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Substitution>,
    {
        Substitution::Concat(parts.into_iter().map(Into::into).collect())
    }

    pub fn if_else(
        condition: impl Into<Substitution>,
        then: impl Into<Substitution>,
        otherwise: impl Into<Substitution>,
    ) -> Self {
        Substitution::If {
            condition: Box::new(condition.into()),
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }

    pub fn package_share(package: impl Into<Substitution>) -> Self {
        Substitution::PackageShare(Box::new(package.into()))
    }

    pub fn path_join<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Substitution>,
    {
        Substitution::PathJoin(parts.into_iter().map(Into::into).collect())
    }

    pub fn file_contents(path: impl Into<Substitution>) -> Self {
        Substitution::FileContents(Box::new(path.into()))
    }

    /// Evaluate to a string
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, SubstitutionError> {
        resolve(self, ctx)
    }

    /// Parse the launch-file string syntax.
    ///
    /// Supported kinds: `arg`/`var`, `env` (with optional default),
    /// `find-pkg-share` and `file-content`. Text outside patterns is literal.
    pub fn parse(input: &str) -> Result<Self, SubstitutionError> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
            let whole = caps
                .get(0)
                .ok_or_else(|| SubstitutionError::InvalidPattern(input.to_string()))?;
            if whole.start() > last {
                parts.push(Substitution::text(&input[last..whole.start()]));
            }
            last = whole.end();

            let part = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(kind), Some(value), _) => {
                    Self::parse_typed(kind.as_str(), value.as_str().trim())?
                }
                (_, _, Some(kind)) => Self::parse_typed(kind.as_str(), "")?,
                _ => return Err(SubstitutionError::InvalidPattern(whole.as_str().to_string())),
            };
            parts.push(part);
        }

        if last < input.len() {
            parts.push(Substitution::text(&input[last..]));
        }

        Ok(match parts.len() {
            0 => Substitution::text(""),
            1 => parts.remove(0),
            _ => Substitution::Concat(parts),
        })
    }

    fn parse_typed(kind: &str, value: &str) -> Result<Self, SubstitutionError> {
        let missing_operand = || SubstitutionError::InvalidPattern(format!("$({})", kind));
        match kind {
            "arg" | "var" => {
                if value.is_empty() {
                    return Err(missing_operand());
                }
                Ok(Substitution::arg(value))
            }
            "env" => {
                let mut tokens = value.splitn(2, char::is_whitespace);
                match (tokens.next(), tokens.next()) {
                    (Some(name), Some(default)) if !name.is_empty() => {
                        Ok(Substitution::env_or(name, default.trim()))
                    }
                    (Some(name), None) if !name.is_empty() => Ok(Substitution::env(name)),
                    _ => Err(missing_operand()),
                }
            }
            "find-pkg-share" => {
                if value.is_empty() {
                    return Err(missing_operand());
                }
                Ok(Substitution::package_share(value))
            }
            "file-content" => {
                if value.is_empty() {
                    return Err(missing_operand());
                }
                Ok(Substitution::file_contents(value))
            }
            _ => Err(SubstitutionError::UnknownType(kind.to_string())),
        }
    }
}

impl From<&str> for Substitution {
    fn from(value: &str) -> Self {
        Substitution::text(value)
    }
}

impl From<String> for Substitution {
    fn from(value: String) -> Self {
        Substitution::Text(value)
    }
}

/// Renders the launch-file syntax (used by dry runs and error messages)
impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substitution::Text(text) => write!(f, "{}", text),
            Substitution::Arg { name, default: None } => write!(f, "$(arg {})", name),
            Substitution::Arg { name, default: Some(d) } => write!(f, "$(arg {} | {})", name, d),
            Substitution::Env { name, default: None } => write!(f, "$(env {})", name),
            Substitution::Env { name, default: Some(d) } => write!(f, "$(env {} {})", name, d),
            Substitution::Concat(parts) => parts.iter().try_for_each(|p| write!(f, "{}", p)),
            Substitution::If { condition, then, otherwise } => {
                write!(f, "$(if {} ? {} : {})", condition, then, otherwise)
            }
            Substitution::PackageShare(package) => write!(f, "$(find-pkg-share {})", package),
            Substitution::PathJoin(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "/")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Substitution::FileContents(path) => write!(f, "$(file-content {})", path),
        }
    }
}

/// Everything a substitution may read while resolving
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub args: &'a ArgumentRegistry,
    pub env: &'a Environment,
    pub packages: &'a PackageIndex,
}

impl<'a> ResolveContext<'a> {
    pub fn new(
        args: &'a ArgumentRegistry,
        env: &'a Environment,
        packages: &'a PackageIndex,
    ) -> Self {
        Self { args, env, packages }
    }
}

/// Resolve a substitution against a context
pub fn resolve(
    substitution: &Substitution,
    ctx: &ResolveContext<'_>,
) -> Result<String, SubstitutionError> {
    resolve_at(substitution, ctx, 0)
}

/// Parse a wire-format boolean (`true`/`false`/`1`/`0`, any case)
pub fn parse_condition(value: &str) -> Result<bool, SubstitutionError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value == "0" {
        Ok(false)
    } else {
        Err(SubstitutionError::InvalidCondition(value.to_string()))
    }
}

fn resolve_at(
    substitution: &Substitution,
    ctx: &ResolveContext<'_>,
    depth: usize,
) -> Result<String, SubstitutionError> {
    match substitution {
        Substitution::Text(text) => Ok(text.clone()),
        Substitution::Arg { name, default } => resolve_arg(name, default.as_deref(), ctx, depth),
        Substitution::Env { name, default } => match ctx.env.get(name) {
            Some(value) => Ok(value.to_string()),
            None => match default {
                Some(default) => resolve_at(default, ctx, depth),
                None => ctx.env.lookup(name).ok_or_else(|| SubstitutionError::UnresolvedReference {
                    kind: "environment variable",
                    name: name.clone(),
                }),
            },
        },
        Substitution::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&resolve_at(part, ctx, depth)?);
            }
            Ok(out)
        }
        Substitution::If {
            condition,
            then,
            otherwise,
        } => {
            let condition = resolve_at(condition, ctx, depth)?;
            if parse_condition(&condition)? {
                resolve_at(then, ctx, depth)
            } else {
                resolve_at(otherwise, ctx, depth)
            }
        }
        Substitution::PackageShare(package) => {
            let package = resolve_at(package, ctx, depth)?;
            ctx.packages
                .share_directory(&package)
                .map(|dir| dir.to_string_lossy().into_owned())
                .map_err(|e| match e {
                    PackageError::PackageNotFound(name) => SubstitutionError::UnresolvedReference {
                        kind: "package",
                        name,
                    },
                    other => SubstitutionError::Package(other),
                })
        }
        Substitution::PathJoin(parts) => {
            let mut path = PathBuf::new();
            for part in parts {
                path.push(resolve_at(part, ctx, depth)?);
            }
            Ok(path.to_string_lossy().into_owned())
        }
        Substitution::FileContents(path) => {
            let path = resolve_at(path, ctx, depth)?;
            std::fs::read_to_string(&path)
                .map_err(|source| SubstitutionError::FileRead { path, source })
        }
    }
}

fn resolve_arg(
    name: &str,
    fallback: Option<&Substitution>,
    ctx: &ResolveContext<'_>,
    depth: usize,
) -> Result<String, SubstitutionError> {
    if depth >= MAX_ARG_DEPTH {
        return Err(SubstitutionError::RecursionLimit(name.to_string()));
    }

    match (ctx.args.get(name), fallback) {
        (Ok(value), _) => resolve_at(&value, ctx, depth + 1),
        (Err(ArgumentError::UndeclaredArgument(_)), Some(fallback)) => {
            resolve_at(fallback, ctx, depth + 1)
        }
        (Err(e), _) => Err(e.into()),
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Unresolved {kind}: {name}")]
    UnresolvedReference { kind: &'static str, name: String },

    #[error("Invalid condition value '{0}' (expected true/false)")]
    InvalidCondition(String),

    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Argument nesting too deep while resolving '{0}'")]
    RecursionLimit(String),
}

impl SubstitutionError {
    /// The undeclared argument name, if that is what failed
    pub fn undeclared_argument(&self) -> Option<&str> {
        match self {
            SubstitutionError::Argument(ArgumentError::UndeclaredArgument(name)) => Some(name),
            _ => None,
        }
    }
}
