//! Launch resolver - expands a description into a flat process plan
//!
//! Arguments are declared in action order, includes are loaded and expanded
//! in place with their own argument scope, and every substitution that ends
//! up in a process command line is evaluated here. Nothing is started.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::{
    parse_condition, resolve, ArgumentError, ArgumentRegistry, Condition, DescriptionLoader,
    Environment, IncludeDescription, LaunchAction, LaunchDescription, LoadError, PackageIndex,
    ResolveContext, StartProcess, Substitution, SubstitutionError,
};
use crate::runtime::process::ProcessSpec;

/// Identity used for a description without a source
const ROOT_IDENTITY: &str = "<root>";

/// Fully resolved launch plan
#[derive(Debug, Clone, Default, Serialize)]
pub struct LaunchPlan {
    /// Processes in start order
    pub processes: Vec<ProcessSpec>,
    /// Resolved values of the root arguments
    pub arguments: IndexMap<String, String>,
    /// Expanded include sources, in expansion order
    pub includes: Vec<String>,
}

impl LaunchPlan {
    pub fn process(&self, name: &str) -> Option<&ProcessSpec> {
        self.processes.iter().find(|p| p.name == name)
    }

    /// Rename repeated process names to `name-2`, `name-3`, ...
    fn disambiguate_names(&mut self) {
        let mut used = HashSet::new();
        for spec in &mut self.processes {
            if used.insert(spec.name.clone()) {
                continue;
            }
            let mut suffix = 2;
            let renamed = loop {
                let candidate = format!("{}-{}", spec.name, suffix);
                if !used.contains(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };
            log::warn!(
                "Process name '{}' is used more than once, renaming to '{}'",
                spec.name,
                renamed
            );
            used.insert(renamed.clone());
            spec.name = renamed;
        }
    }
}

/// Expands launch descriptions against an environment and package index
pub struct Resolver<'a> {
    loader: &'a dyn DescriptionLoader,
    env: &'a Environment,
    packages: &'a PackageIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(
        loader: &'a dyn DescriptionLoader,
        env: &'a Environment,
        packages: &'a PackageIndex,
    ) -> Self {
        Self {
            loader,
            env,
            packages,
        }
    }

    /// Resolve `description` with `registry` as the root argument scope.
    ///
    /// Overrides held by `registry` that no declaration claimed are rejected.
    pub fn resolve(
        &self,
        description: &LaunchDescription,
        registry: &mut ArgumentRegistry,
    ) -> Result<LaunchPlan, ResolveError> {
        let mut plan = LaunchPlan::default();
        let mut chain = vec![description.source().unwrap_or(ROOT_IDENTITY).to_string()];

        self.expand(description, registry, &mut chain, &mut plan)?;

        if let Some(name) = registry.unclaimed_overrides().into_iter().next() {
            return Err(ArgumentError::UndeclaredArgument(name).into());
        }

        let ctx = ResolveContext::new(registry, self.env, self.packages);
        for argument in registry.iter() {
            // Unreferenced arguments are never needed, so a failing default
            // is left out of the plan instead of aborting it
            match argument.effective().resolve(&ctx) {
                Ok(value) => {
                    plan.arguments.insert(argument.name.clone(), value);
                }
                Err(e) => log::warn!(
                    "Argument '{}' is unused and does not resolve: {}",
                    argument.name,
                    e
                ),
            }
        }

        plan.disambiguate_names();
        log::debug!(
            "Resolved {} processes from {} includes",
            plan.processes.len(),
            plan.includes.len()
        );
        Ok(plan)
    }

    fn expand(
        &self,
        description: &LaunchDescription,
        registry: &mut ArgumentRegistry,
        chain: &mut Vec<String>,
        plan: &mut LaunchPlan,
    ) -> Result<(), ResolveError> {
        for action in description.actions() {
            match action {
                LaunchAction::DeclareArgument(declare) => {
                    registry.declare(
                        declare.name.clone(),
                        declare.default.clone(),
                        declare.description.clone(),
                    )?;
                }
                LaunchAction::StartProcess(process) => {
                    let ctx = ResolveContext::new(registry, self.env, self.packages);
                    if !is_enabled(process.condition.as_ref(), &ctx, "process condition")? {
                        log::debug!(
                            "Skipping process '{}': condition is false",
                            process.executable
                        );
                        continue;
                    }
                    plan.processes.push(process_spec(process, &ctx)?);
                }
                LaunchAction::Include(include) => {
                    self.include(include, registry, chain, plan)?;
                }
            }
        }
        Ok(())
    }

    fn include(
        &self,
        include: &IncludeDescription,
        registry: &ArgumentRegistry,
        chain: &mut Vec<String>,
        plan: &mut LaunchPlan,
    ) -> Result<(), ResolveError> {
        let ctx = ResolveContext::new(registry, self.env, self.packages);
        if !is_enabled(include.condition.as_ref(), &ctx, "include condition")? {
            log::debug!("Skipping include '{}': condition is false", include.source);
            return Ok(());
        }

        let source = resolve_in(&include.source, &ctx, || "include source".to_string())?;

        let mut forwarded = IndexMap::new();
        for (name, value) in &include.launch_arguments {
            let value = resolve_in(value, &ctx, || {
                format!("argument '{}' forwarded to '{}'", name, source)
            })?;
            forwarded.insert(name.clone(), value);
        }

        let identity = self.loader.identity(&source);
        if chain.contains(&identity) {
            let mut cycle = chain.clone();
            cycle.push(identity);
            return Err(ResolveError::CyclicInclude { chain: cycle });
        }

        let child = self
            .loader
            .load(&source)
            .map_err(|error| ResolveError::SubDescriptionLoad {
                source_name: source.clone(),
                error,
            })?;
        log::debug!("Including '{}' with {} arguments", source, forwarded.len());
        plan.includes.push(source);

        let mut child_registry = ArgumentRegistry::forwarded(forwarded);
        chain.push(identity);
        let result = self.expand(&child, &mut child_registry, chain, plan);
        chain.pop();
        result
    }
}

fn resolve_in(
    substitution: &Substitution,
    ctx: &ResolveContext<'_>,
    context: impl FnOnce() -> String,
) -> Result<String, ResolveError> {
    resolve(substitution, ctx).map_err(|source| ResolveError::Substitution {
        context: context(),
        source,
    })
}

fn is_enabled(
    condition: Option<&Condition>,
    ctx: &ResolveContext<'_>,
    what: &str,
) -> Result<bool, ResolveError> {
    let (value, expected) = match condition {
        None => return Ok(true),
        Some(Condition::If(value)) => (value, true),
        Some(Condition::Unless(value)) => (value, false),
    };
    let resolved = resolve_in(value, ctx, || what.to_string())?;
    let flag = parse_condition(&resolved).map_err(|source| ResolveError::Substitution {
        context: what.to_string(),
        source,
    })?;
    Ok(flag == expected)
}

fn process_spec(
    process: &StartProcess,
    ctx: &ResolveContext<'_>,
) -> Result<ProcessSpec, ResolveError> {
    let executable = resolve_in(&process.executable, ctx, || "process executable".to_string())?;
    let label = |field: &str| format!("process '{}' {}", executable, field);

    let package = match &process.package {
        Some(package) => Some(resolve_in(package, ctx, || label("package"))?),
        None => None,
    };
    let node_name = match &process.name {
        Some(name) => Some(resolve_in(name, ctx, || label("name"))?),
        None => None,
    };
    let name = node_name.clone().unwrap_or_else(|| {
        Path::new(&executable)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.clone())
    });

    let mut spec = ProcessSpec::new(name, executable.clone());
    spec.node_name = node_name;
    spec.package = package;
    spec.output = process.output;
    spec.required = process.required;

    for (i, arg) in process.arguments.iter().enumerate() {
        spec.arguments
            .push(resolve_in(arg, ctx, || label(&format!("argument #{}", i + 1)))?);
    }
    for (key, value) in &process.parameters {
        let value = resolve_in(value, ctx, || label(&format!("parameter '{}'", key)))?;
        spec.parameters.insert(key.clone(), value);
    }
    for (key, value) in &process.env {
        let value = resolve_in(value, ctx, || label(&format!("env '{}'", key)))?;
        spec.env.insert(key.clone(), value);
    }
    if let Some(dir) = &process.working_dir {
        spec.working_dir = Some(PathBuf::from(resolve_in(dir, ctx, || label("working_dir"))?));
    }

    Ok(spec)
}

/// Errors that can occur while resolving a launch description
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Failed to load included description '{source_name}': {error}")]
    SubDescriptionLoad {
        source_name: String,
        #[source]
        error: LoadError,
    },

    #[error("Include cycle: {}", chain.join(" -> "))]
    CyclicInclude { chain: Vec<String> },
}

impl ResolveError {
    /// The undeclared argument name, if that is what failed
    pub fn undeclared_argument(&self) -> Option<&str> {
        match self {
            ResolveError::Argument(ArgumentError::UndeclaredArgument(name)) => Some(name),
            ResolveError::Substitution { source, .. } => source.undeclared_argument(),
            _ => None,
        }
    }
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.arguments.is_empty() {
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.arguments {
                writeln!(f, "  {}: {}", key, value)?;
            }
            writeln!(f)?;
        }

        if !self.includes.is_empty() {
            writeln!(f, "Includes:")?;
            for source in &self.includes {
                writeln!(f, "  {}", source)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Processes (in launch order):")?;
        for (i, spec) in self.processes.iter().enumerate() {
            writeln!(f)?;
            writeln!(
                f,
                "  {}. {} {}",
                i + 1,
                spec.name,
                spec.package
                    .as_ref()
                    .map(|p| format!("[{}]", p))
                    .unwrap_or_default()
            )?;
            writeln!(f, "     Command: {} {}", spec.executable, spec.arguments.join(" "))?;

            if spec.required {
                writeln!(f, "     Required: yes")?;
            }

            if !spec.parameters.is_empty() {
                writeln!(f, "     Parameters:")?;
                for (key, value) in &spec.parameters {
                    // Multi-line values (robot descriptions) are summarised
                    match value.lines().count() {
                        0 | 1 => writeln!(f, "       {}: {}", key, value)?,
                        n => writeln!(f, "       {}: <{} lines>", key, n)?,
                    }
                }
            }

            if !spec.env.is_empty() {
                writeln!(f, "     Environment:")?;
                for (key, value) in &spec.env {
                    writeln!(f, "       {}={}", key, value)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuiltinLoader, DeclareArgument, DescriptionError};

    struct Fixture {
        loader: BuiltinLoader,
        env: Environment,
        packages: PackageIndex,
    }

    impl Fixture {
        fn new(loader: BuiltinLoader) -> Self {
            Self {
                loader,
                env: Environment::default(),
                packages: PackageIndex::new(),
            }
        }

        fn resolve(
            &self,
            description: &LaunchDescription,
            registry: &mut ArgumentRegistry,
        ) -> Result<LaunchPlan, ResolveError> {
            Resolver::new(&self.loader, &self.env, &self.packages).resolve(description, registry)
        }
    }

    fn spawner() -> LaunchDescription {
        LaunchDescription::new()
            .with(DeclareArgument::new("x_pose", "0.0", "initial x"))
            .unwrap()
            .with(DeclareArgument::new("y_pose", "0.0", "initial y"))
            .unwrap()
            .with(
                StartProcess::node("gazebo_ros", "spawn_entity.py").with_args([
                    Substitution::text("-x"),
                    Substitution::arg("x_pose"),
                    Substitution::text("-y"),
                    Substitution::arg("y_pose"),
                ]),
            )
            .unwrap()
    }

    fn gzserver() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new()
            .with(DeclareArgument::new("world", "", ""))?
            .with(StartProcess::new("gzserver").with_arg(Substitution::arg("world")))
    }

    fn peeks_at_parent() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new()
            .with(StartProcess::new("gzclient").with_arg(Substitution::arg("x_pose")))
    }

    fn cycle_a() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new().with(IncludeDescription::new("b"))
    }

    fn cycle_b() -> Result<LaunchDescription, DescriptionError> {
        LaunchDescription::new().with(IncludeDescription::new("a"))
    }

    #[test]
    fn test_default_pose_arguments() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let mut registry = ArgumentRegistry::new();

        let plan = fixture.resolve(&spawner(), &mut registry).unwrap();
        let spec = plan.process("spawn_entity.py").unwrap();
        assert_eq!(spec.arguments, vec!["-x", "0.0", "-y", "0.0"]);
        assert_eq!(spec.package.as_deref(), Some("gazebo_ros"));
        assert_eq!(plan.arguments["x_pose"], "0.0");
    }

    #[test]
    fn test_overrides_apply_and_freeze() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let mut registry =
            ArgumentRegistry::with_overrides([("x_pose".to_string(), "1.5".to_string())]);

        let plan = fixture.resolve(&spawner(), &mut registry).unwrap();
        assert_eq!(
            plan.process("spawn_entity.py").unwrap().arguments,
            vec!["-x", "1.5", "-y", "0.0"]
        );
        assert_eq!(
            registry.override_value("x_pose", "9.0"),
            Err(ArgumentError::FrozenArgument("x_pose".to_string()))
        );
    }

    #[test]
    fn test_unknown_override_rejected() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let mut registry =
            ArgumentRegistry::with_overrides([("x_pos".to_string(), "1.5".to_string())]);

        let err = fixture.resolve(&spawner(), &mut registry).unwrap_err();
        assert_eq!(err.undeclared_argument(), Some("x_pos"));
    }

    #[test]
    fn test_include_forwards_only_named_arguments() {
        let fixture = Fixture::new(BuiltinLoader::new().with("gzserver", gzserver));
        let root = LaunchDescription::new()
            .with(DeclareArgument::new("world", "empty.world", ""))
            .unwrap()
            .with(
                IncludeDescription::new("gzserver")
                    .with_argument("world", Substitution::arg("world")),
            )
            .unwrap();

        let mut registry = ArgumentRegistry::new();
        let plan = fixture.resolve(&root, &mut registry).unwrap();
        assert_eq!(plan.process("gzserver").unwrap().arguments, vec!["empty.world"]);
        assert_eq!(plan.includes, vec!["gzserver"]);
        // Child declarations stay in the child scope
        assert_eq!(plan.arguments.len(), 1);
    }

    #[test]
    fn test_include_cannot_see_parent_arguments() {
        let fixture = Fixture::new(BuiltinLoader::new().with("gzclient", peeks_at_parent));
        let root = spawner().with(IncludeDescription::new("gzclient")).unwrap();

        let err = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap_err();
        assert_eq!(err.undeclared_argument(), Some("x_pose"));
    }

    #[test]
    fn test_include_cycle_detected() {
        let fixture = Fixture::new(BuiltinLoader::new().with("a", cycle_a).with("b", cycle_b));
        let root = LaunchDescription::new().with(IncludeDescription::new("a")).unwrap();

        match fixture.resolve(&root, &mut ArgumentRegistry::new()) {
            Err(ResolveError::CyclicInclude { chain }) => {
                assert_eq!(chain, vec!["<root>", "builtin:a", "builtin:b", "builtin:a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_include() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(IncludeDescription::new("gzserver"))
            .unwrap();

        let err = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::SubDescriptionLoad { source_name, error: LoadError::UnknownBuiltin(_) }
                if source_name == "gzserver"
        ));
    }

    #[test]
    fn test_conditions() {
        let fixture = Fixture::new(BuiltinLoader::new().with("gzserver", gzserver));
        let root = LaunchDescription::new()
            .with(DeclareArgument::new("gui", "false", ""))
            .unwrap()
            .with(
                StartProcess::new("gzclient")
                    .with_condition(Condition::If(Substitution::arg("gui"))),
            )
            .unwrap()
            .with(
                StartProcess::new("headless_marker")
                    .with_condition(Condition::Unless(Substitution::arg("gui"))),
            )
            .unwrap()
            .with(
                IncludeDescription::new("gzserver")
                    .with_condition(Condition::If(Substitution::arg("gui"))),
            )
            .unwrap();

        let plan = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap();
        let names: Vec<&str> = plan.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["headless_marker"]);
        assert!(plan.includes.is_empty());
    }

    #[test]
    fn test_invalid_condition() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(
                StartProcess::new("gzclient")
                    .with_condition(Condition::If(Substitution::text("maybe"))),
            )
            .unwrap();

        let err = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Substitution { source: SubstitutionError::InvalidCondition(_), .. }
        ));
    }

    #[test]
    fn test_duplicate_names_are_disambiguated() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(StartProcess::node("gazebo_ros", "spawn_entity.py"))
            .unwrap()
            .with(StartProcess::node("gazebo_ros", "spawn_entity.py"))
            .unwrap()
            .with(StartProcess::new("/opt/ros/bin/spawn_entity.py"))
            .unwrap();

        let plan = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap();
        let names: Vec<&str> = plan.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["spawn_entity.py", "spawn_entity.py-2", "spawn_entity.py-3"]);
    }

    #[test]
    fn test_explicit_name_sets_node_name() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(
                StartProcess::node("robot_state_publisher", "robot_state_publisher")
                    .with_name("state_publisher")
                    .with_parameter("use_sim_time", "false")
                    .with_output(crate::config::OutputPolicy::Inherit),
            )
            .unwrap();

        let plan = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap();
        let spec = &plan.processes[0];
        assert_eq!(spec.name, "state_publisher");
        assert_eq!(spec.node_name.as_deref(), Some("state_publisher"));
        assert_eq!(spec.parameters["use_sim_time"], "false");
        assert_eq!(spec.output, crate::config::OutputPolicy::Inherit);
    }

    #[test]
    fn test_unused_argument_that_fails_is_left_out() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(DeclareArgument::new(
                "map",
                Substitution::package_share("no_such_pkg"),
                "",
            ))
            .unwrap()
            .with(DeclareArgument::new("gui", "true", ""))
            .unwrap()
            .with(StartProcess::new("true"))
            .unwrap();

        let plan = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap();
        assert!(!plan.arguments.contains_key("map"));
        assert_eq!(plan.arguments["gui"], "true");
        assert!(plan.arguments.values().all(|v| !v.contains("no_such_pkg")));
    }

    #[test]
    fn test_used_argument_that_fails_aborts() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let root = LaunchDescription::new()
            .with(DeclareArgument::new(
                "map",
                Substitution::package_share("no_such_pkg"),
                "",
            ))
            .unwrap()
            .with(StartProcess::new("map_server").with_arg(Substitution::arg("map")))
            .unwrap();

        let err = fixture.resolve(&root, &mut ArgumentRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Substitution {
                source: SubstitutionError::UnresolvedReference { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_plan_display_lists_processes() {
        let fixture = Fixture::new(BuiltinLoader::new());
        let plan = fixture.resolve(&spawner(), &mut ArgumentRegistry::new()).unwrap();

        let text = plan.to_string();
        assert!(text.contains("x_pose: 0.0"));
        assert!(text.contains("1. spawn_entity.py [gazebo_ros]"));
        assert!(text.contains("Command: spawn_entity.py -x 0.0 -y 0.0"));
    }
}
