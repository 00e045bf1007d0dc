//! TurtleBot3 world in Gazebo
//!
//! Starts the Gazebo server and client, publishes the robot state and spawns
//! the robot model at `(x_pose, y_pose)`. The robot model comes from
//! [`WorldConfig`], usually read from `TURTLEBOT3_MODEL`.

use crate::config::{
    DeclareArgument, DescriptionError, Environment, IncludeDescription,
    LaunchDescription, OutputPolicy, StartProcess, Substitution,
};

/// Name of the world description for `--builtin`
pub const BUILTIN_NAME: &str = "turtlebot3_world";

/// Environment variable selecting the robot model
pub const MODEL_VAR: &str = "TURTLEBOT3_MODEL";

/// Configuration of the world description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    /// Robot model, e.g. `burger` or `waffle`
    pub robot_model: String,
}

impl WorldConfig {
    pub fn new(robot_model: impl Into<String>) -> Self {
        Self {
            robot_model: robot_model.into(),
        }
    }

    /// Read the robot model from `TURTLEBOT3_MODEL`
    pub fn from_environment(env: &Environment) -> Result<Self, WorldError> {
        match env.lookup(MODEL_VAR) {
            Some(model) if !model.trim().is_empty() => Ok(Self::new(model.trim())),
            _ => Err(WorldError::MissingModel),
        }
    }

    /// `turtlebot3_<model>`
    pub fn model_folder(&self) -> String {
        format!("turtlebot3_{}", self.robot_model)
    }
}

fn share(package: &str) -> Substitution {
    Substitution::package_share(package)
}

/// Build the world launch description. Nothing is resolved or read here.
pub fn build(config: &WorldConfig) -> Result<LaunchDescription, DescriptionError> {
    let model_folder = config.model_folder();
    let urdf_path = Substitution::path_join([
        share("turtlebot3_gazebo"),
        "urdf".into(),
        format!("{}.urdf", model_folder).into(),
    ]);
    let sdf_path = Substitution::path_join([
        share("turtlebot3_gazebo"),
        "models".into(),
        model_folder.into(),
        "model.sdf".into(),
    ]);

    // Inline defaults only apply when the argument is not declared
    let use_sim_time = Substitution::arg_or("use_sim_time", "true");
    let frame_prefix = Substitution::concat([Substitution::arg_or("frame_prefix", ""), "/".into()]);

    let gzserver = IncludeDescription::new(Substitution::path_join([
        share("gazebo_ros"),
        "launch".into(),
        "gzserver.launch.yaml".into(),
    ]))
    .with_argument("world", Substitution::arg("world"));

    let gzclient = IncludeDescription::new(Substitution::path_join([
        share("gazebo_ros"),
        "launch".into(),
        "gzclient.launch.yaml".into(),
    ]));

    let robot_state_publisher = StartProcess::node("robot_state_publisher", "robot_state_publisher")
        .with_name("robot_state_publisher")
        .with_output(OutputPolicy::Capture)
        .with_parameter("use_sim_time", use_sim_time)
        .with_parameter("robot_description", Substitution::file_contents(urdf_path))
        .with_parameter("frame_prefix", frame_prefix);

    let spawn_entity = StartProcess::node("gazebo_ros", "spawn_entity.py")
        .with_output(OutputPolicy::Capture)
        .with_args([
            Substitution::text("-entity"),
            config.robot_model.as_str().into(),
            "-file".into(),
            sdf_path,
            "-x".into(),
            Substitution::arg("x_pose"),
            "-y".into(),
            Substitution::arg("y_pose"),
            "-z".into(),
            "0.0".into(),
        ]);

    LaunchDescription::new()
        .with(DeclareArgument::new(
            "use_sim_time",
            "false",
            "Use simulation (Gazebo) clock if true",
        ))?
        .with(DeclareArgument::new(
            "world",
            Substitution::path_join([
                share("custom_worlds"),
                "worlds".into(),
                "turtlebot3_world.world".into(),
            ]),
            "Full path to the world model file to load",
        ))?
        .with(DeclareArgument::new("x_pose", "0.0", "Initial x position of the robot"))?
        .with(DeclareArgument::new("y_pose", "0.0", "Initial y position of the robot"))?
        .with(gzserver)?
        .with(gzclient)?
        .with(robot_state_publisher)?
        .with(spawn_entity)
}

/// Errors raised while configuring the world
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("{} is not set (expected a robot model such as 'burger' or 'waffle')", MODEL_VAR)]
    MissingModel,
}
