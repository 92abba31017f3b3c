// Licensed under the EUPL-1.2-or-later

//! Contains the kinematic model seam used by the jogging core.
//!
//! The jogging calculations only need a handful of queries: joint names and
//! bounds, link frames and the 6×N Jacobian of the tip link. Those live behind
//! the [`KinematicModel`] trait so the core can run against any robot
//! description. [`KinematicState`] wraps a model with the current joint
//! positions and velocities and is owned exclusively by the jog loop.
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Isometry3};

use crate::exception::{JogError, JogResult};
use crate::jog::types::JointState;

pub mod serial_chain;

/// Position interval of a single joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionLimits {
    pub min_position: f64,
    pub max_position: f64,
}

/// Motion limits of a single joint.
///
/// Continuous joints have no position interval and some robot descriptions do
/// not declare velocity limits, so both fields are optional.
#[derive(Debug, Clone, Default)]
pub struct JointBounds {
    pub position: Option<PositionLimits>,
    pub max_velocity: Option<f64>,
}

impl JointBounds {
    /// Bounds of a joint without declared limits.
    pub fn unlimited() -> Self {
        JointBounds::default()
    }

    pub fn with_position(mut self, min_position: f64, max_position: f64) -> Self {
        self.position = Some(PositionLimits {
            min_position,
            max_position,
        });
        self
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = Some(max_velocity);
        self
    }
}

/// A robot description as pure functions of a joint position vector.
///
/// Implementations must be free of I/O and interior mutability; the jog loop
/// calls them from its control thread only.
pub trait KinematicModel: Send + Sync {
    /// Canonical joint ordering of the move group. All joint-space vectors the
    /// core exchanges with the model use this order.
    fn joint_names(&self) -> &[String];

    /// Per-joint bounds, in the same order as [`joint_names`](Self::joint_names).
    fn bounds(&self) -> &[JointBounds];

    /// Pose of `link` in the base frame at `positions`, or `None` if the model
    /// has no link of that name.
    fn link_transform(&self, link: &str, positions: &DVector<f64>) -> Option<Isometry3<f64>>;

    /// 6×N Jacobian of the tip link at `positions`, rows ordered as
    /// `[vx vy vz wx wy wz]` in the base frame.
    fn jacobian(&self, positions: &DVector<f64>) -> DMatrix<f64>;
}

/// Current kinematic state of the move group.
///
/// Thin stateful adapter over a [`KinematicModel`]: it caches the latest joint
/// positions and velocities and answers the bound queries the safety scaler
/// needs. No other thread may hold a reference to it while the jog loop runs.
pub struct KinematicState {
    model: Arc<dyn KinematicModel>,
    positions: DVector<f64>,
    velocities: DVector<f64>,
}

impl KinematicState {
    pub fn new(model: Arc<dyn KinematicModel>) -> Self {
        let num_joints = model.joint_names().len();
        KinematicState {
            model,
            positions: DVector::zeros(num_joints),
            velocities: DVector::zeros(num_joints),
        }
    }

    pub fn num_joints(&self) -> usize {
        self.positions.len()
    }

    pub fn joint_names(&self) -> &[String] {
        self.model.joint_names()
    }

    pub fn bounds(&self, joint: usize) -> &JointBounds {
        &self.model.bounds()[joint]
    }

    /// Overwrites positions and velocities from a joint state in canonical order.
    pub fn set_variables(&mut self, joint_state: &JointState) {
        assert_eq!(joint_state.position.len(), self.positions.len());
        assert_eq!(joint_state.velocity.len(), self.velocities.len());
        for i in 0..self.positions.len() {
            self.positions[i] = joint_state.position[i];
            self.velocities[i] = joint_state.velocity[i];
        }
    }

    /// Jacobian at the current positions.
    pub fn jacobian(&self) -> DMatrix<f64> {
        self.model.jacobian(&self.positions)
    }

    /// Jacobian at an arbitrary position vector, leaving the state untouched.
    /// Used by the singularity look-ahead probe.
    pub fn jacobian_at(&self, positions: &DVector<f64>) -> DMatrix<f64> {
        self.model.jacobian(positions)
    }

    /// Pose of `frame` in the base frame at the current positions.
    pub fn global_link_transform(&self, frame: &str) -> JogResult<Isometry3<f64>> {
        self.model
            .link_transform(frame, &self.positions)
            .ok_or_else(|| JogError::UnknownFrame {
                frame: frame.to_string(),
            })
    }

    pub fn copy_joint_group_positions(&self) -> DVector<f64> {
        self.positions.clone()
    }

    pub fn set_joint_group_positions(&mut self, positions: &DVector<f64>) {
        assert_eq!(positions.len(), self.positions.len());
        self.positions.copy_from(positions);
    }

    pub fn joint_velocity(&self, joint: usize) -> f64 {
        self.velocities[joint]
    }

    pub fn satisfies_velocity_bounds(&self, joint: usize) -> bool {
        match self.bounds(joint).max_velocity {
            Some(max_velocity) => self.velocities[joint].abs() <= max_velocity,
            None => true,
        }
    }

    /// Clamps the velocity of `joint` into its declared bound.
    pub fn enforce_velocity_bounds(&mut self, joint: usize) {
        if let Some(max_velocity) = self.bounds(joint).max_velocity {
            self.velocities[joint] = self.velocities[joint].clamp(-max_velocity, max_velocity);
        }
    }

    /// Checks the position of `joint` against its interval widened by `margin`
    /// on both sides. A negative margin shrinks the interval, which is how the
    /// safety scaler asks "is this joint within the limit margin?".
    pub fn satisfies_position_bounds(&self, joint: usize, margin: f64) -> bool {
        match self.bounds(joint).position {
            Some(limits) => {
                self.positions[joint] >= limits.min_position - margin
                    && self.positions[joint] <= limits.max_position + margin
            }
            None => true,
        }
    }
}
