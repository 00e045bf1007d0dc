//! sim_launch - declarative launch composition for robot simulation sessions
//!
//! A launch description is an ordered list of actions: argument
//! declarations, includes of other descriptions and processes to start.
//! Values are deferred [`Substitution`]s that are only evaluated when a
//! [`Session`] resolves the description into a [`LaunchPlan`]. The session
//! then starts the plan, supervises the processes and shuts everything down
//! with a shared grace period.
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//!
//! launch:
//!   - arg:
//!       name: x_pose
//!       default: "0.0"
//!
//!   - include:
//!       file: "$(find-pkg-share gazebo_ros)/launch/gzserver.launch.yaml"
//!       args:
//!         world: "$(find-pkg-share custom_worlds)/worlds/turtlebot3_world.world"
//!
//!   - node:
//!       package: gazebo_ros
//!       executable: spawn_entity.py
//!       args: ["-entity", "burger", "-x", "$(arg x_pose)"]
//!       output: screen
//! ```
//!
//! The same session can be built in code, see [`world::build`].

pub mod cli;
pub mod config;
pub mod runtime;
pub mod world;

pub use cli::LaunchArgs;
pub use config::{
    ArgumentError, ArgumentRegistry, DescriptionError, Environment, LaunchDescription,
    LaunchFile, LaunchFileError, LoadError, PackageIndex, Substitution, SubstitutionError,
};
pub use runtime::{
    LaunchPlan, ManagedProcess, ProcessError, ProcessEvent, ProcessSpec, ProcessStatus,
    ResolveError, Resolver, Session, SessionConfig, SessionError, SessionOutcome, SessionState,
    StopReason, Supervisor, SupervisorConfig,
};
pub use world::{WorldConfig, WorldError};
