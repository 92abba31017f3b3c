// Licensed under the EUPL-1.2-or-later

//! Contains the periodic jogging control loop.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use log::info;
use nalgebra::{DMatrix, DVector, Isometry3, SVD};

use crate::exception::JogResult;
use crate::jog::bounds::{apply_velocity_scaling, enforce_bounds, sudden_halt};
use crate::jog::low_pass_filter::LowPassFilter;
use crate::jog::parameters::{CommandInType, JogParameters};
use crate::jog::scaling::{scale_cartesian_command, scale_joint_command};
use crate::jog::shared_state::{lock, SharedState, WarningSink};
use crate::jog::singularity::{apply_drift_dimensions, velocity_scale_for_singularity};
use crate::jog::types::{
    JointJogCommand, JointState, JointTrajectory, TrajectoryPoint, TwistCommand,
};
use crate::model::{KinematicModel, KinematicState};
use crate::utils::{LogThrottle, WARN_THROTTLE_PERIOD};

/// Poll interval while waiting for the first joint state or command.
static DEFAULT_SLEEP: Duration = Duration::from_millis(1);

/// Cloneable control surface of a running [`JogLoop`].
///
/// The loop blocks its thread, so pausing, resuming and stopping go through
/// these flags from other threads. Stopping is cooperative: the loop exits at
/// the next iteration boundary.
#[derive(Clone)]
pub struct JogHandle {
    stop_requested: Arc<AtomicBool>,
    halt_outgoing: Arc<AtomicBool>,
    initialized: Arc<AtomicBool>,
}

impl JogHandle {
    /// Makes the loop exit at the next iteration boundary.
    pub fn stop_main_loop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    /// Pauses jogging. The loop keeps running and only reseeds its filters so
    /// that resuming causes no position step.
    pub fn halt_outgoing_commands(&self) {
        self.halt_outgoing.store(true, Ordering::Relaxed);
    }

    /// Resumes jogging after [`halt_outgoing_commands`](Self::halt_outgoing_commands).
    pub fn resume_outgoing_commands(&self) {
        self.halt_outgoing.store(false, Ordering::Relaxed);
    }

    /// Whether the loop has received its first joint state and seeded the
    /// filter bank.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }
}

/// The jogging calculation loop.
///
/// Owns the kinematic state exclusively; everything it exchanges with other
/// threads goes through the [`SharedState`] block. Construct it, grab a
/// [`JogHandle`], then run [`start_main_loop`](Self::start_main_loop) on a
/// dedicated thread.
pub struct JogLoop {
    parameters: JogParameters,
    kinematic_state: KinematicState,
    joint_state: JointState,
    /// Pre-command baseline of the current cycle, the state a sudden halt
    /// reverts to.
    original_joint_state: JointState,
    incoming_joints: JointState,
    delta_theta: DVector<f64>,
    position_filters: Vec<LowPassFilter>,
    joint_name_map: HashMap<String, usize>,
    outgoing_command: JointTrajectory,
    tf_planning_to_cmd_frame: Isometry3<f64>,
    num_joints: usize,
    has_warning: bool,
    warning_sink: Box<dyn WarningSink>,
    throttle: LogThrottle,
    stop_requested: Arc<AtomicBool>,
    halt_outgoing: Arc<AtomicBool>,
    initialized: Arc<AtomicBool>,
}

impl JogLoop {
    /// Creates the loop for a move group described by `model`.
    ///
    /// Validates the parameters and checks that both configured frames exist
    /// in the model, so a bad configuration fails here rather than on the
    /// control thread.
    pub fn new(
        parameters: JogParameters,
        model: Arc<dyn KinematicModel>,
        warning_sink: Box<dyn WarningSink>,
    ) -> JogResult<Self> {
        parameters.validate()?;
        let kinematic_state = KinematicState::new(model);
        kinematic_state.global_link_transform(&parameters.planning_frame)?;
        kinematic_state.global_link_transform(&parameters.robot_link_command_frame)?;

        let joint_names = kinematic_state.joint_names().to_vec();
        let num_joints = joint_names.len();
        let joint_name_map = joint_names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();
        let joint_state = JointState::zeroed(joint_names);
        let position_filters =
            vec![LowPassFilter::new(parameters.low_pass_filter_coeff); num_joints];

        Ok(JogLoop {
            original_joint_state: joint_state.clone(),
            incoming_joints: JointState::default(),
            delta_theta: DVector::zeros(num_joints),
            position_filters,
            joint_name_map,
            outgoing_command: JointTrajectory::default(),
            tf_planning_to_cmd_frame: Isometry3::identity(),
            num_joints,
            has_warning: false,
            warning_sink,
            throttle: LogThrottle::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            halt_outgoing: Arc::new(AtomicBool::new(false)),
            initialized: Arc::new(AtomicBool::new(false)),
            parameters,
            kinematic_state,
            joint_state,
        })
    }

    /// Control surface shared with other threads.
    pub fn handle(&self) -> JogHandle {
        JogHandle {
            stop_requested: self.stop_requested.clone(),
            halt_outgoing: self.halt_outgoing.clone(),
            initialized: self.initialized.clone(),
        }
    }

    /// Runs the jogging loop until [`JogHandle::stop_main_loop`] is called.
    ///
    /// Blocks, so call it from a dedicated thread. Waits for a first joint
    /// state and a first command before producing trajectories.
    pub fn start_main_loop(&mut self, shared: &Mutex<SharedState>) -> JogResult<()> {
        self.stop_requested.store(false, Ordering::Relaxed);
        self.halt_outgoing.store(false, Ordering::Relaxed);
        self.initialized.store(false, Ordering::Relaxed);

        info!("jog loop: waiting for the first joint state");
        while !self.update_joints(shared) {
            if self.stop_requested.load(Ordering::Relaxed) {
                return Ok(());
            }
            thread::sleep(DEFAULT_SLEEP);
        }
        info!("jog loop: received the first joint state");
        self.reset_position_filters();
        self.initialized.store(true, Ordering::Relaxed);

        // Wait for the first command, keeping the filters seeded and the
        // command-frame transform fresh for anyone querying it.
        loop {
            if self.stop_requested.load(Ordering::Relaxed) {
                return Ok(());
            }
            let (cartesian_received, joint_received) = {
                let guard = lock(shared);
                (
                    guard.command_deltas.has_stamp(),
                    guard.joint_command_deltas.has_stamp(),
                )
            };
            if cartesian_received || joint_received {
                break;
            }
            if self.update_joints(shared) {
                self.reset_position_filters();
                self.kinematic_state.set_variables(&self.joint_state);
                self.refresh_command_frame_transform(shared)?;
            }
            thread::sleep(DEFAULT_SLEEP);
        }
        info!("jog loop: received the first command");

        // Number of cycles during which no motion has occurred, so halt
        // messages are not republished endlessly.
        let mut zero_velocity_count: u32 = 0;
        let publish_period = Duration::from_secs_f64(self.parameters.publish_period);

        while !self.stop_requested.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            while !self.update_joints(shared) {
                if self.stop_requested.load(Ordering::Relaxed) {
                    return Ok(());
                }
                thread::sleep(DEFAULT_SLEEP);
            }
            self.kinematic_state.set_variables(&self.joint_state);
            self.refresh_command_frame_transform(shared)?;

            if self.halt_outgoing.load(Ordering::Relaxed) {
                // Paused: keep the filters seeded with the measured positions
                // so resuming causes no position step.
                self.reset_position_filters();
            } else {
                let (mut zero_cartesian_cmd, mut zero_joint_cmd) = {
                    let guard = lock(shared);
                    (guard.zero_cartesian_cmd_flag, guard.zero_joint_cmd_flag)
                };

                // Cartesian jogging has priority over joint jogging.
                let processed = if !zero_cartesian_cmd {
                    let command = lock(shared).command_deltas.clone();
                    self.cartesian_jog_calcs(command, shared)
                } else if !zero_joint_cmd {
                    let command = lock(shared).joint_command_deltas.clone();
                    self.joint_jog_calcs(&command)
                } else {
                    self.outgoing_command = self.compose_joint_trajectory();
                    true
                };

                if processed {
                    let stale_command = lock(shared).command_is_stale;
                    if stale_command || (zero_cartesian_cmd && zero_joint_cmd) {
                        sudden_halt(
                            &mut self.outgoing_command,
                            &self.original_joint_state,
                            &self.parameters,
                        );
                        zero_cartesian_cmd = true;
                        zero_joint_cmd = true;
                    }
                    let valid_nonzero_command = !zero_cartesian_cmd || !zero_joint_cmd;

                    {
                        let mut guard = lock(shared);
                        if valid_nonzero_command {
                            guard.outgoing_command = self.outgoing_command.clone();
                            guard.ok_to_publish = true;
                        } else if self.parameters.num_outgoing_halt_msgs_to_publish != 0
                            && zero_velocity_count
                                > self.parameters.num_outgoing_halt_msgs_to_publish
                        {
                            // All inputs have been zero for several cycles in a
                            // row; stop republishing the halt message.
                            guard.ok_to_publish = false;
                        } else {
                            guard.outgoing_command = self.outgoing_command.clone();
                            guard.ok_to_publish = true;
                        }
                    }

                    if zero_cartesian_cmd && zero_joint_cmd {
                        zero_velocity_count = zero_velocity_count.saturating_add(1);
                    } else {
                        zero_velocity_count = 0;
                    }
                }
            }

            thread::sleep(publish_period.saturating_sub(cycle_start.elapsed()));
        }
        Ok(())
    }

    /// One Cartesian jogging cycle: validate, rotate into the planning frame,
    /// scale, invert the Jacobian and convert to an outgoing trajectory.
    fn cartesian_jog_calcs(&mut self, mut command: TwistCommand, shared: &Mutex<SharedState>) -> bool {
        let components = command.components();
        if components.iter().any(|c| c.is_nan()) {
            self.throttle.warn(
                "nan_twist",
                WARN_THROTTLE_PERIOD,
                format_args!("NaN in incoming command. Skipping this datapoint."),
            );
            return false;
        }
        if self.parameters.command_in_type == CommandInType::Unitless
            && components.iter().any(|c| c.abs() > 1.0)
        {
            self.throttle.warn(
                "twist_over_range",
                WARN_THROTTLE_PERIOD,
                format_args!("Component of incoming command is >1. Skipping this datapoint."),
            );
            return false;
        }

        // Rotate the command into the planning frame. A twist has no point of
        // application, so only the rotation part of the transform applies.
        if command.frame_id != self.parameters.planning_frame {
            command.linear = self.tf_planning_to_cmd_frame.rotation * command.linear;
            command.angular = self.tf_planning_to_cmd_frame.rotation * command.angular;
            command.frame_id = self.parameters.planning_frame.clone();
        }

        let delta_x = scale_cartesian_command(&command, &self.parameters);
        let jacobian = self.kinematic_state.jacobian();

        // Drop the rows of the axes the user lets drift, taking advantage of
        // task redundancy.
        let drift_dimensions = lock(shared).drift_dimensions;
        let (jacobian, delta_x) = apply_drift_dimensions(jacobian, delta_x, &drift_dimensions);

        let svd = SVD::new(jacobian, true, true);
        let singular_value_inverse =
            DMatrix::from_diagonal(&svd.singular_values.map(|s| 1.0 / s));
        let pseudo_inverse = svd.v_t.as_ref().unwrap().transpose()
            * singular_value_inverse
            * svd.u.as_ref().unwrap().transpose();

        self.delta_theta = &pseudo_inverse * &delta_x;

        let singularity_scale = velocity_scale_for_singularity(
            &self.kinematic_state,
            &delta_x,
            &svd,
            &pseudo_inverse,
            &drift_dimensions,
            &self.parameters,
            &mut self.throttle,
        );
        // Close to a collision or a singularity: decelerate, or halt when the
        // combined scale drops below the floor.
        if !apply_velocity_scaling(shared, &mut self.delta_theta, singularity_scale) {
            self.has_warning = true;
            sudden_halt(
                &mut self.outgoing_command,
                &self.original_joint_state,
                &self.parameters,
            );
        }

        self.convert_deltas_to_outgoing_cmd()
    }

    /// One joint jogging cycle.
    fn joint_jog_calcs(&mut self, command: &JointJogCommand) -> bool {
        if command
            .velocities
            .iter()
            .any(|velocity| velocity.is_nan() || velocity.abs() > 1.0)
        {
            self.throttle.warn(
                "bad_joint_jog",
                WARN_THROTTLE_PERIOD,
                format_args!("NaN or out-of-range velocity in incoming command. Skipping this datapoint."),
            );
            return false;
        }

        self.delta_theta = scale_joint_command(
            command,
            &self.parameters,
            &self.joint_name_map,
            self.num_joints,
            &mut self.throttle,
        );
        self.kinematic_state.set_variables(&self.joint_state);

        self.convert_deltas_to_outgoing_cmd()
    }

    /// Applies the joint deltas to the joint state, filters, derives
    /// velocities, composes the outgoing trajectory and enforces bounds on it.
    fn convert_deltas_to_outgoing_cmd(&mut self) -> bool {
        if !self.add_joint_increments() {
            return false;
        }
        self.low_pass_filter_positions();
        // Velocities are derived from the raw deltas so the bound checks see
        // what the robot is actually asked to do.
        self.calculate_joint_velocities();
        self.kinematic_state.set_variables(&self.joint_state);

        self.outgoing_command = self.compose_joint_trajectory();

        if !enforce_bounds(
            &mut self.outgoing_command,
            &self.original_joint_state,
            &mut self.kinematic_state,
            &self.parameters,
            &mut self.throttle,
        ) {
            sudden_halt(
                &mut self.outgoing_command,
                &self.original_joint_state,
                &self.parameters,
            );
            self.has_warning = true;
        }

        self.warning_sink.publish(self.has_warning);
        self.has_warning = false;

        if self.parameters.use_gazebo {
            self.insert_redundant_points_into_trajectory();
        }

        true
    }

    /// Overwrites the working joint state from the shared feedback and caches
    /// it as the pre-command baseline. Reports not-ready while the feedback
    /// does not cover the whole move group.
    fn update_joints(&mut self, shared: &Mutex<SharedState>) -> bool {
        self.incoming_joints = lock(shared).joints.clone();

        if self.incoming_joints.name.len() < self.num_joints {
            return false;
        }

        for (m, name) in self.incoming_joints.name.iter().enumerate() {
            let index = match self.joint_name_map.get(name) {
                Some(&index) => index,
                None => {
                    self.throttle.warn(
                        "ignored_joint",
                        crate::utils::IGNORED_INPUT_THROTTLE_PERIOD,
                        format_args!("Ignoring joint {:?}", name),
                    );
                    continue;
                }
            };
            if m < self.incoming_joints.position.len() {
                self.joint_state.position[index] = self.incoming_joints.position[m];
            }
        }

        self.original_joint_state = self.joint_state.clone();
        true
    }

    /// Solves `(base → planning)⁻¹ · (base → command frame)` and publishes it
    /// to the shared state.
    fn refresh_command_frame_transform(&mut self, shared: &Mutex<SharedState>) -> JogResult<()> {
        let planning = self
            .kinematic_state
            .global_link_transform(&self.parameters.planning_frame)?;
        let command_frame = self
            .kinematic_state
            .global_link_transform(&self.parameters.robot_link_command_frame)?;
        self.tf_planning_to_cmd_frame = planning.inverse() * command_frame;
        lock(shared).tf_planning_to_cmd_frame = self.tf_planning_to_cmd_frame;
        Ok(())
    }

    fn reset_position_filters(&mut self) {
        for (filter, &position) in self
            .position_filters
            .iter_mut()
            .zip(self.joint_state.position.iter())
        {
            filter.reset(position);
        }
    }

    fn low_pass_filter_positions(&mut self) {
        for (filter, position) in self
            .position_filters
            .iter_mut()
            .zip(self.joint_state.position.iter_mut())
        {
            *position = filter.filter(*position);
        }
    }

    fn add_joint_increments(&mut self) -> bool {
        if self.delta_theta.len() != self.joint_state.position.len() {
            log::error!(
                "Lengths of joint state and increments do not match: {} vs {}",
                self.joint_state.position.len(),
                self.delta_theta.len()
            );
            return false;
        }
        for (position, delta) in self
            .joint_state
            .position
            .iter_mut()
            .zip(self.delta_theta.iter())
        {
            *position += delta;
        }
        true
    }

    fn calculate_joint_velocities(&mut self) {
        for (velocity, delta) in self
            .joint_state
            .velocity
            .iter_mut()
            .zip(self.delta_theta.iter())
        {
            *velocity = delta / self.parameters.publish_period;
        }
    }

    /// Single-point trajectory from the current joint state, populated
    /// according to the publish-mode flags.
    fn compose_joint_trajectory(&self) -> JointTrajectory {
        let mut point = TrajectoryPoint {
            time_from_start: Duration::from_secs_f64(self.parameters.publish_period),
            ..TrajectoryPoint::default()
        };
        if self.parameters.publish_joint_positions {
            point.positions = self.joint_state.position.clone();
        }
        if self.parameters.publish_joint_velocities {
            point.velocities = self.joint_state.velocity.clone();
        }
        if self.parameters.publish_joint_accelerations {
            // No known robot takes acceleration commands, but some controllers
            // check that the field is non-empty.
            point.accelerations = vec![0.0; self.num_joints];
        }
        JointTrajectory {
            frame_id: self.parameters.planning_frame.clone(),
            stamp: SystemTime::now(),
            joint_names: self.joint_state.name.clone(),
            points: vec![point],
        }
    }

    /// Spams redundant copies of the setpoint into the trajectory. Gazebo
    /// drops points whose timestamps have already passed by the time the
    /// message arrives, so the first few may be skipped.
    fn insert_redundant_points_into_trajectory(&mut self) {
        let point = match self.outgoing_command.points.first() {
            Some(point) => point.clone(),
            None => return,
        };
        // Start from 2 because the first point already sits at one period.
        for i in 2..=self.parameters.gazebo_redundant_message_count {
            let mut point = point.clone();
            point.time_from_start =
                Duration::from_secs_f64(f64::from(i) * self.parameters.publish_period);
            self.outgoing_command.points.push(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jog::shared_state::SharedState;
    use crate::model::serial_chain::{JointKind, SerialChainModel, SerialJoint};
    use crate::model::JointBounds;
    use nalgebra::{Translation3, Unit, UnitQuaternion, Vector3};
    use std::f64::consts::FRAC_PI_2;
    use std::sync::mpsc;

    fn slice_compare(a: &[f64], b: &[f64], thresh: f64) {
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            assert!((a[i] - b[i]).abs() < thresh, "a[{}] = {} != {}", i, a[i], b[i]);
        }
    }

    /// Three prismatic axes followed by three revolute wrist axes, everything
    /// at the origin: the Jacobian at the zero configuration is the 6×6
    /// identity, which makes expected joint deltas exact.
    fn gantry_wrist_model() -> Arc<SerialChainModel> {
        let prismatic = |name: &str, child: &str, axis: Vector3<f64>| SerialJoint {
            name: name.to_string(),
            child_link: child.to_string(),
            kind: JointKind::Prismatic,
            origin: Isometry3::identity(),
            axis: Unit::new_normalize(axis),
            bounds: JointBounds::unlimited()
                .with_position(-2.0, 2.0)
                .with_max_velocity(5.0),
        };
        let revolute = |name: &str, child: &str, axis: Vector3<f64>| SerialJoint {
            name: name.to_string(),
            child_link: child.to_string(),
            kind: JointKind::Revolute,
            origin: Isometry3::identity(),
            axis: Unit::new_normalize(axis),
            bounds: JointBounds::unlimited()
                .with_position(-3.0, 3.0)
                .with_max_velocity(5.0),
        };
        Arc::new(
            SerialChainModel::new(
                "base_link",
                vec![
                    prismatic("track_x", "carriage_x", Vector3::x()),
                    prismatic("track_y", "carriage_y", Vector3::y()),
                    prismatic("track_z", "carriage_z", Vector3::z()),
                    revolute("wrist_x", "wrist_link_x", Vector3::x()),
                    revolute("wrist_y", "wrist_link_y", Vector3::y()),
                    revolute("wrist_z", "wrist_link_z", Vector3::z()),
                ],
                "tool0",
                Isometry3::identity(),
            )
            .unwrap(),
        )
    }

    fn test_parameters() -> JogParameters {
        JogParameters {
            planning_frame: "base_link".to_string(),
            robot_link_command_frame: "base_link".to_string(),
            publish_period: 0.01,
            linear_scale: 0.4,
            rotational_scale: 0.4,
            joint_scale: 0.5,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: true,
            ..JogParameters::default()
        }
    }

    fn feedback(positions: [f64; 6]) -> JointState {
        JointState {
            name: [
                "track_x", "track_y", "track_z", "wrist_x", "wrist_y", "wrist_z",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            position: positions.to_vec(),
            velocity: vec![0.0; 6],
            effort: vec![0.0; 6],
        }
    }

    /// A loop that already passed the init phase: joints received, filters
    /// seeded, transform refreshed.
    fn primed_loop(
        parameters: JogParameters,
        shared: &Mutex<SharedState>,
    ) -> (JogLoop, mpsc::Receiver<bool>) {
        let (sender, receiver) = mpsc::channel();
        let mut jog = JogLoop::new(
            parameters,
            gantry_wrist_model(),
            Box::new(move |active: bool| {
                sender.send(active).ok();
            }),
        )
        .unwrap();
        assert!(jog.update_joints(shared));
        jog.reset_position_filters();
        jog.kinematic_state.set_variables(&jog.joint_state);
        jog.refresh_command_frame_transform(shared).unwrap();
        (jog, receiver)
    }

    fn twist_x() -> TwistCommand {
        TwistCommand {
            frame_id: "base_link".to_string(),
            stamp: Duration::from_millis(1),
            linear: Vector3::new(1.0, 0.0, 0.0),
            angular: Vector3::zeros(),
        }
    }

    #[test]
    fn pure_x_twist_drives_the_x_track() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        assert!(jog.cartesian_jog_calcs(twist_x(), &shared));

        let point = &jog.outgoing_command.points[0];
        assert_eq!(point.time_from_start, Duration::from_secs_f64(0.01));
        slice_compare(&point.velocities, &[0.4, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-9);
        // delta of 0.004 through a coefficient-2 filter moves half way.
        slice_compare(&point.positions, &[0.002, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-9);
        slice_compare(&point.accelerations, &[0.0; 6], 1e-12);
        assert_eq!(jog.outgoing_command.joint_names, jog.joint_state.name);
        assert_eq!(jog.outgoing_command.frame_id, "base_link");
    }

    #[test]
    fn nan_twist_is_rejected_without_state_change() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        let mut command = twist_x();
        command.linear.x = f64::NAN;
        let positions_before = jog.joint_state.position.clone();
        assert!(!jog.cartesian_jog_calcs(command, &shared));
        assert_eq!(jog.joint_state.position, positions_before);
        assert!(jog.outgoing_command.points.is_empty());
    }

    #[test]
    fn over_range_unitless_twist_is_rejected() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        let mut command = twist_x();
        command.linear.x = 1.2;
        assert!(!jog.cartesian_jog_calcs(command, &shared));
        assert!(jog.outgoing_command.points.is_empty());
    }

    #[test]
    fn twist_in_another_frame_is_rotated_not_translated() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        // A command frame rotated 90° about x with an arbitrary offset: the
        // offset must not leak into the twist.
        jog.tf_planning_to_cmd_frame = Isometry3::from_parts(
            Translation3::new(5.0, -3.0, 2.0),
            UnitQuaternion::from_axis_angle(&Unit::new_normalize(Vector3::x()), FRAC_PI_2),
        );
        let command = TwistCommand {
            frame_id: "tool0".to_string(),
            stamp: Duration::from_millis(1),
            linear: Vector3::new(0.0, 1.0, 0.0),
            angular: Vector3::zeros(),
        };
        assert!(jog.cartesian_jog_calcs(command, &shared));
        let point = &jog.outgoing_command.points[0];
        // y in the command frame is z in the planning frame.
        slice_compare(&point.velocities, &[0.0, 0.0, 0.4, 0.0, 0.0, 0.0], 1e-9);
    }

    #[test]
    fn drift_dimensions_shrink_the_jacobian_but_keep_the_motion() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            drift_dimensions: [false, true, false, true, true, false],
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        assert!(jog.cartesian_jog_calcs(twist_x(), &shared));
        let point = &jog.outgoing_command.points[0];
        slice_compare(&point.velocities, &[0.4, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-9);
    }

    #[test]
    fn collision_scale_below_the_floor_raises_the_warning() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            collision_velocity_scale: 0.05,
            ..SharedState::default()
        });
        let (mut jog, warnings) = primed_loop(test_parameters(), &shared);

        assert!(jog.cartesian_jog_calcs(twist_x(), &shared));
        assert_eq!(warnings.try_recv(), Ok(true));
        // The deltas were scaled down to a twentieth.
        let point = &jog.outgoing_command.points[0];
        slice_compare(&point.velocities, &[0.02, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-9);
    }

    #[test]
    fn collision_scale_shrinks_the_motion() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            collision_velocity_scale: 0.5,
            ..SharedState::default()
        });
        let (mut jog, warnings) = primed_loop(test_parameters(), &shared);

        assert!(jog.cartesian_jog_calcs(twist_x(), &shared));
        assert_eq!(warnings.try_recv(), Ok(false));
        let point = &jog.outgoing_command.points[0];
        slice_compare(&point.velocities, &[0.2, 0.0, 0.0, 0.0, 0.0, 0.0], 1e-9);
    }

    #[test]
    fn joint_jog_scatters_by_name_and_ignores_unknown_joints() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        let command = JointJogCommand {
            stamp: Duration::from_millis(1),
            joint_names: vec!["bogus".to_string(), "wrist_z".to_string()],
            velocities: vec![0.5, 1.0],
        };
        assert!(jog.joint_jog_calcs(&command));
        let point = &jog.outgoing_command.points[0];
        // joint_scale 0.5: a full-speed unitless command moves 0.5 rad/s.
        slice_compare(&point.velocities, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.5], 1e-9);
    }

    #[test]
    fn joint_jog_with_nan_or_over_range_velocity_is_rejected() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(test_parameters(), &shared);

        for bad in [f64::NAN, 1.5] {
            let command = JointJogCommand {
                stamp: Duration::from_millis(1),
                joint_names: vec!["track_x".to_string()],
                velocities: vec![bad],
            };
            assert!(!jog.joint_jog_calcs(&command));
            assert!(jog.outgoing_command.points.is_empty());
        }
    }

    #[test]
    fn limit_approach_halts_and_resets_to_the_baseline() {
        let mut parameters = test_parameters();
        parameters.joint_limit_margin = 0.2;
        // wrist_z sits half a margin under its +3.0 limit.
        let start = 3.0 - 0.1;
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0, 0.0, 0.0, 0.0, 0.0, start]),
            ..SharedState::default()
        });
        let (mut jog, warnings) = primed_loop(parameters, &shared);

        let command = JointJogCommand {
            stamp: Duration::from_millis(1),
            joint_names: vec!["wrist_z".to_string()],
            velocities: vec![1.0],
        };
        assert!(jog.joint_jog_calcs(&command));
        assert_eq!(warnings.try_recv(), Ok(true));
        let point = &jog.outgoing_command.points[0];
        slice_compare(&point.velocities, &[0.0; 6], 1e-12);
        slice_compare(
            &point.positions,
            &[0.0, 0.0, 0.0, 0.0, 0.0, start],
            1e-12,
        );
    }

    #[test]
    fn update_joints_requires_the_whole_move_group() {
        let shared = Mutex::new(SharedState::default());
        let (sender, _receiver) = mpsc::channel();
        let mut jog = JogLoop::new(
            test_parameters(),
            gantry_wrist_model(),
            Box::new(move |active: bool| {
                sender.send(active).ok();
            }),
        )
        .unwrap();
        // Empty feedback: not ready.
        assert!(!jog.update_joints(&shared));
        lock(&shared).joints = feedback([0.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(jog.update_joints(&shared));
        assert_eq!(jog.joint_state.position[0], 0.5);
        assert_eq!(jog.original_joint_state.position[0], 0.5);
    }

    #[test]
    fn unknown_frame_fails_at_construction() {
        let parameters = JogParameters {
            planning_frame: "no_such_link".to_string(),
            ..test_parameters()
        };
        assert!(JogLoop::new(
            parameters,
            gantry_wrist_model(),
            Box::new(|_: bool| {})
        )
        .is_err());
    }

    #[test]
    fn gazebo_mode_spams_redundant_points() {
        let mut parameters = test_parameters();
        parameters.use_gazebo = true;
        parameters.gazebo_redundant_message_count = 4;
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        });
        let (mut jog, _warnings) = primed_loop(parameters, &shared);

        assert!(jog.cartesian_jog_calcs(twist_x(), &shared));
        assert_eq!(jog.outgoing_command.points.len(), 4);
        for (i, point) in jog.outgoing_command.points.iter().enumerate() {
            assert_eq!(
                point.time_from_start,
                Duration::from_secs_f64((i + 1) as f64 * 0.01)
            );
            assert_eq!(point.velocities, jog.outgoing_command.points[0].velocities);
        }
    }

    #[test]
    fn main_loop_runs_halts_and_limits_republication() {
        let mut parameters = test_parameters();
        parameters.publish_period = 0.005;
        parameters.num_outgoing_halt_msgs_to_publish = 2;
        let shared = Arc::new(Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            ..SharedState::default()
        }));
        let (sender, _receiver) = mpsc::channel();
        let mut jog = JogLoop::new(
            parameters,
            gantry_wrist_model(),
            Box::new(move |active: bool| {
                sender.send(active).ok();
            }),
        )
        .unwrap();
        let handle = jog.handle();

        let loop_shared = shared.clone();
        let loop_thread = thread::spawn(move || jog.start_main_loop(&loop_shared).unwrap());

        let wait_until = |what: &str, condition: &mut dyn FnMut() -> bool| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !condition() {
                assert!(Instant::now() < deadline, "timed out waiting for {}", what);
                thread::sleep(Duration::from_millis(1));
            }
        };

        wait_until("initialization", &mut || handle.is_initialized());

        // Stream a Cartesian command and wait for a published trajectory.
        {
            let mut guard = lock(&shared);
            guard.command_deltas = twist_x();
            guard.zero_cartesian_cmd_flag = false;
        }
        wait_until("first published trajectory", &mut || {
            let guard = lock(&shared);
            guard.ok_to_publish && !guard.outgoing_command.points.is_empty()
        });
        {
            let guard = lock(&shared);
            let point = &guard.outgoing_command.points[0];
            assert!((point.velocities[0] - 0.4).abs() < 1e-9);
            assert_eq!(point.time_from_start, Duration::from_secs_f64(0.005));
        }

        // Command goes quiet: halt frames are published for a bounded number
        // of cycles, then the publication gate closes.
        lock(&shared).zero_cartesian_cmd_flag = true;
        wait_until("publication gate to close", &mut || !lock(&shared).ok_to_publish);
        {
            let guard = lock(&shared);
            let point = &guard.outgoing_command.points[0];
            assert!(point.velocities.iter().all(|v| *v == 0.0));
        }

        // A fresh command reopens the gate.
        lock(&shared).zero_cartesian_cmd_flag = false;
        wait_until("publication gate to reopen", &mut || lock(&shared).ok_to_publish);

        handle.stop_main_loop();
        loop_thread.join().unwrap();
    }

    #[test]
    fn stale_command_halts_the_output() {
        let shared = Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            command_is_stale: true,
            command_deltas: twist_x(),
            zero_cartesian_cmd_flag: false,
            ..SharedState::default()
        });
        let mut parameters = test_parameters();
        // Republish halt frames forever so the gate stays open for the check.
        parameters.num_outgoing_halt_msgs_to_publish = 0;
        let (sender, _receiver) = mpsc::channel();
        let mut jog = JogLoop::new(
            parameters,
            gantry_wrist_model(),
            Box::new(move |active: bool| {
                sender.send(active).ok();
            }),
        )
        .unwrap();
        let handle = jog.handle();

        // Run the loop inline for a few cycles, then stop it from the handle.
        let stopper = thread::spawn({
            let handle = handle.clone();
            move || {
                thread::sleep(Duration::from_millis(100));
                handle.stop_main_loop();
            }
        });
        jog.start_main_loop(&shared).unwrap();
        stopper.join().unwrap();

        let guard = lock(&shared);
        assert!(guard.ok_to_publish);
        let point = &guard.outgoing_command.points[0];
        // Stale: velocities zeroed and positions back at the baseline.
        assert!(point.velocities.iter().all(|v| *v == 0.0));
        slice_compare(&point.positions, &[0.0; 6], 1e-12);
    }

    #[test]
    fn paused_loop_stops_touching_the_publication_gate() {
        let shared = Arc::new(Mutex::new(SharedState {
            joints: feedback([0.0; 6]),
            command_deltas: twist_x(),
            zero_cartesian_cmd_flag: false,
            ..SharedState::default()
        }));
        let mut parameters = test_parameters();
        parameters.publish_period = 0.005;
        let (sender, _receiver) = mpsc::channel();
        let mut jog = JogLoop::new(
            parameters,
            gantry_wrist_model(),
            Box::new(move |active: bool| {
                sender.send(active).ok();
            }),
        )
        .unwrap();
        let handle = jog.handle();

        let loop_shared = shared.clone();
        let loop_thread = thread::spawn(move || jog.start_main_loop(&loop_shared).unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !lock(&shared).ok_to_publish {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(lock(&shared).ok_to_publish);

        // Pause. A cycle that was already in flight may reopen the gate once;
        // once the pause has taken effect the loop leaves it closed.
        handle.halt_outgoing_commands();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            lock(&shared).ok_to_publish = false;
            thread::sleep(Duration::from_millis(30));
            if !lock(&shared).ok_to_publish {
                break;
            }
            assert!(Instant::now() < deadline, "pause never took effect");
        }
        thread::sleep(Duration::from_millis(30));
        assert!(!lock(&shared).ok_to_publish);

        // Resuming picks the still-streaming command back up.
        handle.resume_outgoing_commands();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !lock(&shared).ok_to_publish {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(lock(&shared).ok_to_publish);

        handle.stop_main_loop();
        loop_thread.join().unwrap();
    }
}
