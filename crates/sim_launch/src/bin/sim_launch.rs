//! sim_launch CLI
//!
//! Usage:
//!   sim_launch --builtin turtlebot3_world
//!   sim_launch --builtin turtlebot3_world -a x_pose:=-2.0 -a y_pose:=0.5
//!   sim_launch launch/world.launch.yaml --dry-run --json

use sim_launch::config::{
    CompositeLoader, DescriptionLoader, Environment, LaunchDescription, LaunchFile,
};
use sim_launch::world::{self, WorldConfig};
use sim_launch::{LaunchArgs, Session, SessionConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let environment = Environment::capture(args.env_policy);

    // Validate only mode
    if args.validate {
        let Some(path) = args.launch_file.as_deref() else {
            log::error!("--validate needs a launch file");
            std::process::exit(1);
        };
        match LaunchFile::from_file(path) {
            Ok(launch_file) => {
                let (arg_count, include_count, node_count) = launch_file.summary();
                println!("Launch file '{}' is valid", path);
                println!("  Version: {}", launch_file.version);
                println!("  Args: {}", arg_count);
                println!("  Includes: {}", include_count);
                println!("  Nodes: {}", node_count);
            }
            Err(e) => {
                log::error!("Invalid launch file: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let description = match load_description(&args, &environment) {
        Ok(description) => description,
        Err(e) => {
            log::error!("Failed to load launch description: {}", e);
            std::process::exit(1);
        }
    };

    let config = SessionConfig {
        grace_period: args.grace_period(),
        ..Default::default()
    };
    let mut session = Session::new(description, config)
        .with_environment(environment)
        .with_overrides(args.arg_overrides());

    // Dry run mode
    if args.dry_run {
        match session.resolve() {
            Ok(plan) if args.json => match serde_json::to_string_pretty(plan) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    log::error!("Failed to encode launch plan: {}", e);
                    std::process::exit(1);
                }
            },
            Ok(plan) => println!("{}", plan),
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    let code = match session.run(shutdown_rx).await {
        Ok(outcome) => {
            if !outcome.forced.is_empty() {
                log::warn!("Killed after grace period: {}", outcome.forced.join(", "));
            }
            if !outcome.failed_starts.is_empty() {
                log::warn!("Failed to start: {}", outcome.failed_starts.join(", "));
            }
            log::info!("Session {}: {}", outcome.state, outcome.reason);
            outcome.exit_code()
        }
        Err(e) => {
            log::error!("Launch failed: {}", e);
            1
        }
    };

    log::info!("sim_launch exiting");
    std::process::exit(code);
}

fn load_description(
    args: &LaunchArgs,
    environment: &Environment,
) -> Result<LaunchDescription, Box<dyn std::error::Error>> {
    match (args.builtin.as_deref(), args.launch_file.as_deref()) {
        (Some(_), Some(_)) => Err("use either a launch file or --builtin, not both".into()),
        (Some(world::BUILTIN_NAME), None) => {
            let config = WorldConfig::from_environment(environment)?;
            log::info!("Launching built-in world for model '{}'", config.robot_model);
            Ok(world::build(&config)?)
        }
        (Some(other), None) => Err(format!(
            "unknown built-in description '{}' (available: {})",
            other,
            world::BUILTIN_NAME
        )
        .into()),
        (None, Some(path)) => {
            log::info!("Loading launch file: {}", path);
            Ok(CompositeLoader::default().load(path)?)
        }
        (None, None) => Err("no launch file given (or use --builtin turtlebot3_world)".into()),
    }
}
