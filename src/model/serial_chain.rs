// Licensed under the EUPL-1.2-or-later

//! Contains a serial-chain robot model with forward kinematics and a
//! geometric Jacobian.
use nalgebra::{DMatrix, DVector, Isometry3, Translation3, Unit, UnitQuaternion, Vector3};

use crate::exception::{create_config_error, JogResult};
use crate::model::{JointBounds, KinematicModel};

/// How a joint moves its child link along or about its axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    Revolute,
    Prismatic,
}

/// One joint of a serial chain.
#[derive(Debug, Clone)]
pub struct SerialJoint {
    /// Joint name, the key under which commands address this joint.
    pub name: String,
    /// Name of the link frame attached after this joint.
    pub child_link: String,
    pub kind: JointKind,
    /// Fixed transform from the parent link frame to this joint's frame.
    pub origin: Isometry3<f64>,
    /// Motion axis, expressed in the joint frame.
    pub axis: Unit<Vector3<f64>>,
    pub bounds: JointBounds,
}

impl SerialJoint {
    fn motion(&self, q: f64) -> Isometry3<f64> {
        match self.kind {
            JointKind::Revolute => {
                Isometry3::from_parts(Translation3::identity(), UnitQuaternion::from_axis_angle(&self.axis, q))
            }
            JointKind::Prismatic => Isometry3::translation(
                self.axis.x * q,
                self.axis.y * q,
                self.axis.z * q,
            ),
        }
    }
}

/// A fixed-base serial chain of revolute and prismatic joints.
///
/// The tip link hangs off the last joint through a fixed transform and is the
/// frame the Jacobian is expressed about.
pub struct SerialChainModel {
    base_link: String,
    joints: Vec<SerialJoint>,
    tip_link: String,
    tip_origin: Isometry3<f64>,
    joint_names: Vec<String>,
    bounds: Vec<JointBounds>,
}

impl SerialChainModel {
    /// Builds a model from base to tip. Joint and link names must be unique.
    pub fn new<S: Into<String>>(
        base_link: S,
        joints: Vec<SerialJoint>,
        tip_link: S,
        tip_origin: Isometry3<f64>,
    ) -> JogResult<Self> {
        let base_link = base_link.into();
        let tip_link = tip_link.into();
        if joints.is_empty() {
            return Err(create_config_error("a serial chain needs at least one joint"));
        }
        let mut seen_links = vec![base_link.clone(), tip_link.clone()];
        let mut joint_names = Vec::with_capacity(joints.len());
        for joint in &joints {
            if joint_names.contains(&joint.name) {
                return Err(create_config_error(format!(
                    "duplicate joint name {:?}",
                    joint.name
                )));
            }
            if seen_links.contains(&joint.child_link) {
                return Err(create_config_error(format!(
                    "duplicate link name {:?}",
                    joint.child_link
                )));
            }
            joint_names.push(joint.name.clone());
            seen_links.push(joint.child_link.clone());
        }
        let bounds = joints.iter().map(|j| j.bounds.clone()).collect();
        Ok(SerialChainModel {
            base_link,
            joints,
            tip_link,
            tip_origin,
            joint_names,
            bounds,
        })
    }

    /// Poses of every joint frame plus the tip, at `positions`.
    ///
    /// Element `i` is the pose of joint `i`'s frame before its own motion is
    /// applied; the last element is the tip link pose.
    fn frames(&self, positions: &DVector<f64>) -> Vec<Isometry3<f64>> {
        let mut frames = Vec::with_capacity(self.joints.len() + 1);
        let mut pose = Isometry3::identity();
        for (i, joint) in self.joints.iter().enumerate() {
            let joint_frame = pose * joint.origin;
            frames.push(joint_frame);
            pose = joint_frame * joint.motion(positions[i]);
        }
        frames.push(pose * self.tip_origin);
        frames
    }
}

impl KinematicModel for SerialChainModel {
    fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    fn bounds(&self) -> &[JointBounds] {
        &self.bounds
    }

    fn link_transform(&self, link: &str, positions: &DVector<f64>) -> Option<Isometry3<f64>> {
        if link == self.base_link {
            return Some(Isometry3::identity());
        }
        let mut pose = Isometry3::identity();
        for (i, joint) in self.joints.iter().enumerate() {
            pose = pose * joint.origin * joint.motion(positions[i]);
            if joint.child_link == link {
                return Some(pose);
            }
        }
        if link == self.tip_link {
            return Some(pose * self.tip_origin);
        }
        None
    }

    fn jacobian(&self, positions: &DVector<f64>) -> DMatrix<f64> {
        let frames = self.frames(positions);
        let tip_position = frames[self.joints.len()].translation.vector;
        let mut jacobian = DMatrix::zeros(6, self.joints.len());
        for (i, joint) in self.joints.iter().enumerate() {
            let axis_world = frames[i].rotation * joint.axis.into_inner();
            let (linear, angular) = match joint.kind {
                JointKind::Revolute => {
                    let arm = tip_position - frames[i].translation.vector;
                    (axis_world.cross(&arm), axis_world)
                }
                JointKind::Prismatic => (axis_world, Vector3::zeros()),
            };
            for row in 0..3 {
                jacobian[(row, i)] = linear[row];
                jacobian[(row + 3, i)] = angular[row];
            }
        }
        jacobian
    }
}
