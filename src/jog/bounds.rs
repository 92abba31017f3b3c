// Licensed under the EUPL-1.2-or-later

//! Contains the safety scaler: combination of the collision and singularity
//! velocity scales, enforcement of joint position and velocity bounds, and
//! the sudden halt.
use std::sync::Mutex;

use nalgebra::DVector;

use crate::jog::parameters::JogParameters;
use crate::jog::shared_state::{lock, SharedState};
use crate::jog::types::{JointState, JointTrajectory};
use crate::model::KinematicState;
use crate::utils::{LogThrottle, WARN_THROTTLE_PERIOD};

/// Below this combined velocity scale the arm is considered stuck and the
/// cycle halts instead of creeping.
static MIN_COMBINED_VELOCITY_SCALE: f64 = 0.1;

/// Scales the joint deltas by the collision and singularity factors.
///
/// The collision scale is read from the shared state under the lock. Returns
/// `false` when the combined scale falls below the floor, in which case the
/// caller must perform a sudden halt.
pub fn apply_velocity_scaling(
    shared: &Mutex<SharedState>,
    delta_theta: &mut DVector<f64>,
    singularity_scale: f64,
) -> bool {
    let collision_scale = lock(shared).collision_velocity_scale;
    *delta_theta *= collision_scale * singularity_scale;
    collision_scale * singularity_scale >= MIN_COMBINED_VELOCITY_SCALE
}

/// Enforces joint velocity and position bounds on the outgoing trajectory.
///
/// A violated velocity bound is clamped in the kinematic state and the clamped
/// value is copied into the trajectory at the joint's index, when the velocity
/// vector carries that index.
/// TODO: the trajectory positions are not recomputed from the clamped
/// velocity, so position and velocity disagree for the clamped cycle.
///
/// A joint that sits within `joint_limit_margin` of a declared hard limit in
/// the pre-increment baseline, with its emitted velocity carrying it further
/// in, makes the whole cycle halt: the return value is `false` and the caller
/// must perform a sudden halt.
pub fn enforce_bounds(
    trajectory: &mut JointTrajectory,
    original_state: &JointState,
    kinematic_state: &mut KinematicState,
    parameters: &JogParameters,
    throttle: &mut LogThrottle,
) -> bool {
    let mut halting = false;

    if trajectory.points.is_empty() {
        throttle.warn(
            "empty_trajectory",
            WARN_THROTTLE_PERIOD,
            format_args!("Empty trajectory passed to the bound check"),
        );
        return true;
    }

    for joint in 0..kinematic_state.num_joints() {
        let joint_name = kinematic_state.joint_names()[joint].clone();

        if !kinematic_state.satisfies_velocity_bounds(joint) {
            throttle.warn(
                "velocity_limit",
                WARN_THROTTLE_PERIOD,
                format_args!("{} close to a velocity limit. Enforcing limit.", joint_name),
            );
            kinematic_state.enforce_velocity_bounds(joint);
            if let Some(index) = trajectory
                .joint_names
                .iter()
                .position(|name| *name == joint_name)
            {
                if index < trajectory.points[0].velocities.len() {
                    trajectory.points[0].velocities[index] = kinematic_state.joint_velocity(joint);
                }
            }
        }

        // Halt if the joint is past the margin and its velocity moves it even
        // farther past.
        let joint_angle = original_state
            .name
            .iter()
            .position(|name| *name == joint_name)
            .map(|index| original_state.position[index])
            .unwrap_or(0.0);
        if !kinematic_state.satisfies_position_bounds(joint, -parameters.joint_limit_margin) {
            if let Some(limits) = kinematic_state.bounds(joint).position {
                let velocity = kinematic_state.joint_velocity(joint);
                if (velocity < 0.0
                    && joint_angle < limits.min_position + parameters.joint_limit_margin)
                    || (velocity > 0.0
                        && joint_angle > limits.max_position - parameters.joint_limit_margin)
                {
                    throttle.warn(
                        "position_limit",
                        WARN_THROTTLE_PERIOD,
                        format_args!("{} close to a position limit. Halting.", joint_name),
                    );
                    halting = true;
                }
            }
        }
    }
    !halting
}

/// Brings the outgoing trajectory to an immediate stop.
///
/// Position-controlled robots are reset to the pre-command baseline,
/// velocity-controlled robots to zero velocity. Idempotent, and a no-op on a
/// trajectory without points.
pub fn sudden_halt(
    trajectory: &mut JointTrajectory,
    original_state: &JointState,
    parameters: &JogParameters,
) {
    let point = match trajectory.points.first_mut() {
        Some(point) => point,
        None => return,
    };
    for i in 0..original_state.position.len() {
        if parameters.publish_joint_positions && i < point.positions.len() {
            point.positions[i] = original_state.position[i];
        }
        if parameters.publish_joint_velocities && i < point.velocities.len() {
            point.velocities[i] = 0.0;
        }
    }
}
