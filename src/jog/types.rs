// Licensed under the EUPL-1.2-or-later

//! Contains the message types exchanged with the host middleware.
//!
//! The core performs no transport itself; these types are what command
//! producers write into the shared state block and what the trajectory
//! publisher reads back out. They all derive serde traits so a host can move
//! them on and off the wire.
use std::time::{Duration, SystemTime};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Named joint state as produced by a joint feedback source.
///
/// All four vectors have one entry per joint and share the same ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

impl JointState {
    /// A joint state for `names` with all positions, velocities and efforts zeroed.
    pub fn zeroed(names: Vec<String>) -> Self {
        let num_joints = names.len();
        JointState {
            name: names,
            position: vec![0.0; num_joints],
            velocity: vec![0.0; num_joints],
            effort: vec![0.0; num_joints],
        }
    }
}

/// A stamped Cartesian twist command.
///
/// A zero `stamp` means "never received"; producers stamp commands with any
/// monotonically growing clock, the core only compares against zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistCommand {
    pub frame_id: String,
    pub stamp: Duration,
    pub linear: Vector3<f64>,
    pub angular: Vector3<f64>,
}

impl Default for TwistCommand {
    fn default() -> Self {
        TwistCommand {
            frame_id: String::new(),
            stamp: Duration::ZERO,
            linear: Vector3::zeros(),
            angular: Vector3::zeros(),
        }
    }
}

impl TwistCommand {
    pub fn has_stamp(&self) -> bool {
        self.stamp != Duration::ZERO
    }

    /// The six components in `[vx vy vz wx wy wz]` order.
    pub fn components(&self) -> [f64; 6] {
        [
            self.linear.x,
            self.linear.y,
            self.linear.z,
            self.angular.x,
            self.angular.y,
            self.angular.z,
        ]
    }
}

/// A stamped per-joint velocity command, addressed by joint name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointJogCommand {
    pub stamp: Duration,
    pub joint_names: Vec<String>,
    pub velocities: Vec<f64>,
}

impl JointJogCommand {
    pub fn has_stamp(&self) -> bool {
        self.stamp != Duration::ZERO
    }
}

/// One setpoint of an outgoing trajectory.
///
/// Which of the three vectors are populated depends on the publish-mode flags
/// in the parameters; empty vectors mean "not published".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub time_from_start: Duration,
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub accelerations: Vec<f64>,
}

/// The joint trajectory handed to the underlying joint-level controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointTrajectory {
    pub frame_id: String,
    pub stamp: SystemTime,
    pub joint_names: Vec<String>,
    pub points: Vec<TrajectoryPoint>,
}

impl Default for JointTrajectory {
    fn default() -> Self {
        JointTrajectory {
            frame_id: String::new(),
            stamp: SystemTime::UNIX_EPOCH,
            joint_names: Vec::new(),
            points: Vec::new(),
        }
    }
}
