//! Command-line interface for sim_launch

use argh::FromArgs;
use std::time::Duration;

use crate::config::EnvPolicy;

/// Declarative launcher for robot simulation sessions
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to a YAML launch file
    #[argh(positional)]
    pub launch_file: Option<String>,

    /// override launch arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// launch a built-in description instead of a file (turtlebot3_world)
    #[argh(option)]
    pub builtin: Option<String>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// print the launch plan as JSON (with --dry-run)
    #[argh(switch)]
    pub json: bool,

    /// validate the launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// seconds to wait after SIGTERM before killing processes
    #[argh(option, default = "5")]
    pub grace_period_secs: u64,

    /// missing environment variables: strict (fail) or empty
    #[argh(option, default = "EnvPolicy::Strict", from_str_fn(parse_env_policy))]
    pub env_policy: EnvPolicy,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, ":=").collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

fn parse_env_policy(s: &str) -> Result<EnvPolicy, String> {
    s.parse()
}

impl LaunchArgs {
    /// Argument overrides in command line order
    pub fn arg_overrides(&self) -> Vec<(String, String)> {
        self.arg.clone()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Log filter, falling back to `info` for unknown levels
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_override() {
        let result = parse_arg_override("x_pose:=1.5");
        assert_eq!(result, Ok(("x_pose".to_string(), "1.5".to_string())));
    }

    #[test]
    fn test_parse_arg_override_keeps_later_separators() {
        let result = parse_arg_override("world:=/tmp/a:=b.world");
        assert_eq!(result, Ok(("world".to_string(), "/tmp/a:=b.world".to_string())));
    }

    #[test]
    fn test_parse_arg_override_invalid() {
        assert!(parse_arg_override("invalid").is_err());
        assert!(parse_arg_override(":=value").is_err());
    }

    #[test]
    fn test_parse_env_policy() {
        assert_eq!(parse_env_policy("empty"), Ok(EnvPolicy::EmptyFallback));
        assert!(parse_env_policy("lenient").is_err());
    }

    #[test]
    fn test_from_args() {
        let args = LaunchArgs::from_args(
            &["sim_launch"],
            &[
                "--builtin",
                "turtlebot3_world",
                "-a",
                "x_pose:=1.0",
                "-a",
                "y_pose:=-2.0",
                "--dry-run",
                "--grace-period-secs",
                "2",
            ],
        )
        .unwrap();

        assert_eq!(args.launch_file, None);
        assert_eq!(args.builtin.as_deref(), Some("turtlebot3_world"));
        assert_eq!(
            args.arg_overrides(),
            vec![
                ("x_pose".to_string(), "1.0".to_string()),
                ("y_pose".to_string(), "-2.0".to_string()),
            ]
        );
        assert!(args.dry_run);
        assert_eq!(args.grace_period(), Duration::from_secs(2));
        assert_eq!(args.env_policy, EnvPolicy::Strict);
        assert_eq!(args.log_filter(), "info");
    }
}
