// Licensed under the EUPL-1.2-or-later

//! Contains the state block shared between the jog loop and the external
//! producers, and the warning-signal seam.
use std::sync::{Mutex, MutexGuard, PoisonError};

use nalgebra::Isometry3;

use crate::jog::types::{JointJogCommand, JointState, JointTrajectory, TwistCommand};

/// Everything the jog loop exchanges with the outside world, behind one mutex.
///
/// Command, joint-state, collision and staleness producers each write their
/// own fields from their own threads; the jog loop snapshots fields in and out
/// once per cycle and is the sole writer of `outgoing_command`,
/// `ok_to_publish` and `tf_planning_to_cmd_frame`. The lock is only ever held
/// for the duration of a field copy.
#[derive(Debug)]
pub struct SharedState {
    /// Latest joint state from the feedback source.
    pub joints: JointState,
    /// Latest Cartesian twist command.
    pub command_deltas: TwistCommand,
    /// Latest per-joint velocity command.
    pub joint_command_deltas: JointJogCommand,
    /// Set by the Cartesian command producer when all six components are zero.
    pub zero_cartesian_cmd_flag: bool,
    /// Set by the joint command producer when all velocities are zero.
    pub zero_joint_cmd_flag: bool,
    /// Set by an external watchdog when no command arrived within its window.
    pub command_is_stale: bool,
    /// One flag per Cartesian axis `[x y z rx ry rz]`; a `true` axis is
    /// dropped from the Jacobian so the end effector may drift along it.
    pub drift_dimensions: [bool; 6],
    /// Velocity multiplier in `[0, 1]` from the external collision monitor.
    pub collision_velocity_scale: f64,
    /// Most recent planning-frame → command-frame transform.
    pub tf_planning_to_cmd_frame: Isometry3<f64>,
    /// Trajectory produced by the last cycle.
    pub outgoing_command: JointTrajectory,
    /// Gate for the trajectory publisher.
    pub ok_to_publish: bool,
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState {
            joints: JointState::default(),
            command_deltas: TwistCommand::default(),
            joint_command_deltas: JointJogCommand::default(),
            // No command received yet reads as "commanded zero motion".
            zero_cartesian_cmd_flag: true,
            zero_joint_cmd_flag: true,
            command_is_stale: false,
            drift_dimensions: [false; 6],
            collision_velocity_scale: 1.0,
            tf_planning_to_cmd_frame: Isometry3::identity(),
            outgoing_command: JointTrajectory::default(),
            ok_to_publish: false,
        }
    }
}

/// Locks the shared state, recovering the guard if a producer thread panicked
/// while holding the lock.
pub(crate) fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sink for the per-cycle boolean warning signal.
///
/// The jog loop emits `true` whenever the cycle hit a safety condition
/// (singularity hard stop, scale floor, joint-limit halt) and `false`
/// otherwise. Implemented for any `FnMut(bool)`, so a middleware publisher, a
/// channel sender or a test probe all fit.
pub trait WarningSink: Send {
    fn publish(&mut self, active: bool);
}

impl<F: FnMut(bool) + Send> WarningSink for F {
    fn publish(&mut self, active: bool) {
        self(active)
    }
}
