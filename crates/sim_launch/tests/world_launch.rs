//! Resolution of the TurtleBot3 world against a fake install prefix.
//!
//! The prefix holds the shipped gazebo launch files, a URDF and a world file,
//! so everything up to process start is exercised without Gazebo installed.

use std::fs;
use std::path::{Path, PathBuf};

use sim_launch::config::{PackageIndex, SubstitutionError};
use sim_launch::runtime::{ResolveError, SessionError};
use sim_launch::world::{self, WorldConfig};
use sim_launch::{Session, SessionConfig};

const URDF: &str = "<?xml version=\"1.0\"?>\n<robot name=\"turtlebot3_burger\">\n</robot>\n";

struct Prefix {
    dir: tempfile::TempDir,
}

impl Prefix {
    fn new() -> Self {
        let prefix = Self {
            dir: tempfile::tempdir().unwrap(),
        };

        let launch_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("launch");
        let gazebo_launch = prefix.share("gazebo_ros").join("launch");
        fs::create_dir_all(&gazebo_launch).unwrap();
        for file in ["gzserver.launch.yaml", "gzclient.launch.yaml"] {
            fs::copy(launch_dir.join(file), gazebo_launch.join(file)).unwrap();
        }

        let urdf_dir = prefix.share("turtlebot3_gazebo").join("urdf");
        fs::create_dir_all(&urdf_dir).unwrap();
        fs::write(urdf_dir.join("turtlebot3_burger.urdf"), URDF).unwrap();

        prefix
    }

    fn with_worlds(self) -> Self {
        let worlds = self.share("custom_worlds").join("worlds");
        fs::create_dir_all(&worlds).unwrap();
        fs::write(worlds.join("turtlebot3_world.world"), "<sdf/>").unwrap();
        self
    }

    fn share(&self, package: &str) -> PathBuf {
        self.dir.path().join("share").join(package)
    }

    fn session(&self, overrides: &[(&str, &str)]) -> Session {
        let description = world::build(&WorldConfig::new("burger")).unwrap();
        Session::new(description, SessionConfig::default())
            .with_packages(PackageIndex::new().with_prefix(self.dir.path()))
            .with_overrides(
                overrides
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            )
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_default_plan() {
    let prefix = Prefix::new().with_worlds();
    let mut session = prefix.session(&[]);
    let plan = session.resolve().unwrap();

    let names: Vec<&str> = plan.processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["gzserver", "gzclient", "robot_state_publisher", "spawn_entity.py"]
    );
    assert_eq!(plan.includes.len(), 2);

    let world_file =
        path_string(prefix.share("custom_worlds").join("worlds/turtlebot3_world.world"));
    let gzserver = plan.process("gzserver").unwrap();
    assert_eq!(gzserver.arguments[0], world_file);
    assert!(!gzserver.arguments.contains(&"--verbose".to_string()));
    assert_eq!(plan.arguments["world"], world_file);

    let publisher = plan.process("robot_state_publisher").unwrap();
    assert_eq!(publisher.node_name.as_deref(), Some("robot_state_publisher"));
    assert_eq!(publisher.parameters["use_sim_time"], "false");
    assert_eq!(publisher.parameters["robot_description"], URDF);
    assert_eq!(publisher.parameters["frame_prefix"], "/");

    let sdf =
        path_string(prefix.share("turtlebot3_gazebo").join("models/turtlebot3_burger/model.sdf"));
    let spawner = plan.process("spawn_entity.py").unwrap();
    assert_eq!(spawner.package.as_deref(), Some("gazebo_ros"));
    assert_eq!(
        spawner.arguments,
        vec!["-entity", "burger", "-file", sdf.as_str(), "-x", "0.0", "-y", "0.0", "-z", "0.0"]
    );
}

#[test]
fn test_pose_and_world_overrides() {
    let prefix = Prefix::new().with_worlds();
    let mut session = prefix.session(&[
        ("x_pose", "-2.0"),
        ("y_pose", "0.5"),
        ("world", "/worlds/empty.world"),
        ("use_sim_time", "true"),
    ]);
    let plan = session.resolve().unwrap();

    assert_eq!(plan.process("gzserver").unwrap().arguments[0], "/worlds/empty.world");
    let spawner = plan.process("spawn_entity.py").unwrap();
    assert_eq!(&spawner.arguments[4..8], &["-x", "-2.0", "-y", "0.5"]);
    assert_eq!(
        plan.process("robot_state_publisher").unwrap().parameters["use_sim_time"],
        "true"
    );
}

#[test]
fn test_world_default_is_only_needed_when_used() {
    // No custom_worlds package installed
    let prefix = Prefix::new();

    let mut session = prefix.session(&[]);
    match session.resolve() {
        Err(SessionError::Resolve(ResolveError::Substitution {
            source: SubstitutionError::UnresolvedReference { kind, name },
            ..
        })) => {
            assert_eq!(kind, "package");
            assert_eq!(name, "custom_worlds");
        }
        other => panic!("expected unresolved package, got {:?}", other.map(|_| ())),
    }

    let mut session = prefix.session(&[("world", "/worlds/empty.world")]);
    assert!(session.resolve().is_ok());
}

#[test]
fn test_misspelled_override_rejected() {
    let prefix = Prefix::new().with_worlds();
    let mut session = prefix.session(&[("x_pos", "1.0")]);

    match session.resolve() {
        Err(SessionError::Resolve(e)) => assert_eq!(e.undeclared_argument(), Some("x_pos")),
        other => panic!("expected undeclared argument, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_urdf() {
    let prefix = Prefix::new().with_worlds();
    let description = world::build(&WorldConfig::new("waffle")).unwrap();
    let mut session = Session::new(description, SessionConfig::default())
        .with_packages(PackageIndex::new().with_prefix(prefix.dir.path()));

    assert!(matches!(
        session.resolve(),
        Err(SessionError::Resolve(ResolveError::Substitution {
            source: SubstitutionError::FileRead { .. },
            ..
        }))
    ));
}

#[test]
fn test_plan_serializes_to_json() {
    let prefix = Prefix::new().with_worlds();
    let mut session = prefix.session(&[]);
    let plan = session.resolve().unwrap();

    let json = serde_json::to_value(plan).unwrap();
    assert_eq!(json["processes"][3]["name"], "spawn_entity.py");
    assert_eq!(json["processes"][3]["output"], "capture");
    assert_eq!(json["arguments"]["x_pose"], "0.0");
}
