// Licensed under the EUPL-1.2-or-later

//! Contains the command scaler turning twist and joint commands into
//! per-cycle deltas.
use std::collections::HashMap;

use nalgebra::DVector;

use crate::jog::parameters::{CommandInType, JogParameters};
use crate::jog::types::{JointJogCommand, TwistCommand};
use crate::utils::{LogThrottle, IGNORED_INPUT_THROTTLE_PERIOD};

/// Scales an incoming twist into a Cartesian displacement for one cycle.
///
/// Unitless commands in `[-1, 1]` are stretched by the configured maximum
/// speeds; speed-unit commands are already m/s and rad/s and only get
/// multiplied by the period.
pub fn scale_cartesian_command(command: &TwistCommand, parameters: &JogParameters) -> DVector<f64> {
    let mut result = DVector::zeros(6);
    match parameters.command_in_type {
        CommandInType::Unitless => {
            let linear = parameters.linear_scale * parameters.publish_period;
            let rotational = parameters.rotational_scale * parameters.publish_period;
            result[0] = linear * command.linear.x;
            result[1] = linear * command.linear.y;
            result[2] = linear * command.linear.z;
            result[3] = rotational * command.angular.x;
            result[4] = rotational * command.angular.y;
            result[5] = rotational * command.angular.z;
        }
        CommandInType::SpeedUnits => {
            for (i, component) in command.components().iter().enumerate() {
                result[i] = component * parameters.publish_period;
            }
        }
    }
    result
}

/// Scales an incoming joint jog into per-joint position deltas for one cycle.
///
/// The result has one entry per joint of the move group; joints the command
/// does not mention stay zero. Joint names that are not part of the group are
/// skipped with a throttled warning.
pub fn scale_joint_command(
    command: &JointJogCommand,
    parameters: &JogParameters,
    joint_name_map: &HashMap<String, usize>,
    num_joints: usize,
    throttle: &mut LogThrottle,
) -> DVector<f64> {
    let mut result = DVector::zeros(num_joints);
    for (name, &velocity) in command.joint_names.iter().zip(command.velocities.iter()) {
        let index = match joint_name_map.get(name) {
            Some(&index) => index,
            None => {
                throttle.warn(
                    "ignored_joint",
                    IGNORED_INPUT_THROTTLE_PERIOD,
                    format_args!("Ignoring joint {:?}: not part of the move group", name),
                );
                continue;
            }
        };
        let scale = match parameters.command_in_type {
            CommandInType::Unitless => parameters.joint_scale,
            CommandInType::SpeedUnits => 1.0,
        };
        result[index] = velocity * scale * parameters.publish_period;
    }
    result
}
