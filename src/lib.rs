// Licensed under the EUPL-1.2-or-later

//! # jog-arm
//! jog-arm is a real-time jogging controller for serial-chain robot
//! manipulators: it turns a stream of Cartesian twist or per-joint velocity
//! commands into a safe stream of joint-trajectory setpoints for an
//! underlying joint-level controller.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT
//! HAND WHILE JOGGING THE ROBOT!**
//!
//! ## Design
//! The library is divided into two main modules:
//! * [jog](`crate::jog`) - the periodic control loop, its parameters, the
//!   command/safety scalers and the shared state block.
//! * [model](`crate::model`) - the kinematic model seam and a serial-chain
//!   implementation of it.
//!
//! The control loop runs on a thread of your choosing and exchanges data with
//! command producers, the joint feedback source, a collision monitor and your
//! trajectory publisher through a single mutex-protected [`SharedState`]
//! block. Inverse differential kinematics goes through the Jacobian
//! pseudo-inverse, velocity is continuously scaled down near singularities,
//! joint limits and collisions, and outgoing positions run through a low-pass
//! filter bank so sparse command samples still yield smooth setpoints.
//!
//! # Example:
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use nalgebra::{Isometry3, Unit, Vector3};
//! use jog_arm::{
//!     JogLoop, JogParameters, JointBounds, JointKind, JogResult, SerialChainModel,
//!     SerialJoint, SharedState, TwistCommand,
//! };
//!
//! fn main() -> JogResult<()> {
//!     let model = Arc::new(SerialChainModel::new(
//!         "base_link",
//!         vec![SerialJoint {
//!             name: "joint_1".to_string(),
//!             child_link: "link_1".to_string(),
//!             kind: JointKind::Revolute,
//!             origin: Isometry3::identity(),
//!             axis: Unit::new_normalize(Vector3::z()),
//!             bounds: JointBounds::unlimited()
//!                 .with_position(-2.9, 2.9)
//!                 .with_max_velocity(2.0),
//!         }],
//!         "tool0",
//!         Isometry3::translation(0.5, 0.0, 0.0),
//!     )?);
//!
//!     let parameters = JogParameters::from_file("jog_parameters.toml")?;
//!     let mut jog = JogLoop::new(
//!         parameters,
//!         model,
//!         Box::new(|warning: bool| {
//!             if warning {
//!                 eprintln!("jogging warning");
//!             }
//!         }),
//!     )?;
//!     let handle = jog.handle();
//!
//!     let shared = Arc::new(Mutex::new(SharedState::default()));
//!     let loop_shared = shared.clone();
//!     let jog_thread = std::thread::spawn(move || jog.start_main_loop(&loop_shared));
//!
//!     // Producers write into the shared block from their own threads; here we
//!     // stream one twist command by hand.
//!     {
//!         let mut guard = shared.lock().unwrap();
//!         guard.command_deltas = TwistCommand {
//!             frame_id: "base_link".to_string(),
//!             stamp: Duration::from_millis(1),
//!             linear: Vector3::new(0.5, 0.0, 0.0),
//!             angular: Vector3::zeros(),
//!         };
//!         guard.zero_cartesian_cmd_flag = false;
//!     }
//!
//!     // ... publish `shared.outgoing_command` while `shared.ok_to_publish` ...
//!
//!     handle.stop_main_loop();
//!     jog_thread.join().unwrap()
//! }
//! ```
//!
//! The joint feedback source must keep `SharedState::joints` fresh, a watchdog
//! should raise `SharedState::command_is_stale` when commands stop arriving,
//! and a collision monitor may lower `SharedState::collision_velocity_scale`.
//! The loop halts the arm on its own whenever any of those demand it.
pub mod exception;
pub mod jog;
pub mod model;
pub mod utils;

pub use exception::{JogError, JogResult};
pub use jog::low_pass_filter::LowPassFilter;
pub use jog::parameters::{CommandInType, JogParameters};
pub use jog::shared_state::{SharedState, WarningSink};
pub use jog::types::{
    JointJogCommand, JointState, JointTrajectory, TrajectoryPoint, TwistCommand,
};
pub use jog::{JogHandle, JogLoop};
pub use model::serial_chain::{JointKind, SerialChainModel, SerialJoint};
pub use model::{JointBounds, KinematicModel, KinematicState, PositionLimits};
