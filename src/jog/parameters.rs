// Licensed under the EUPL-1.2-or-later

//! Contains the jogging parameter set and its validation.
use std::fs::read_to_string;
use std::path::Path;

use serde::Deserialize;

use crate::exception::{create_config_error, JogResult};

/// Unit convention of incoming commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandInType {
    /// Components are dimensionless values in `[-1, 1]` and are scaled by
    /// `linear_scale` / `rotational_scale` / `joint_scale`.
    Unitless,
    /// Components are already in m/s and rad/s.
    SpeedUnits,
}

/// Parameters of the jogging core, immutable after construction.
///
/// Can be deserialized from a TOML file; [`validate`](Self::validate) is run
/// by the jog loop constructor so an inconsistent file is rejected before any
/// thread starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JogParameters {
    /// Name of the joint group being jogged. Informational, used in logs.
    pub move_group_name: String,
    /// Frame all jogging calculations are carried out in.
    pub planning_frame: String,
    /// Link frame incoming Cartesian commands may be expressed in.
    pub robot_link_command_frame: String,
    /// Control period in seconds.
    pub publish_period: f64,
    /// Coefficient of the per-joint position low-pass filters. Larger is smoother.
    pub low_pass_filter_coeff: f64,
    pub command_in_type: CommandInType,
    /// Max linear speed in m/s for unitless commands.
    pub linear_scale: f64,
    /// Max rotational speed in rad/s for unitless commands.
    pub rotational_scale: f64,
    /// Max joint speed in rad/s for unitless joint commands.
    pub joint_scale: f64,
    /// Condition number of the Jacobian above which velocity starts ramping down.
    pub lower_singularity_threshold: f64,
    /// Condition number at which motion toward the singularity stops entirely.
    pub hard_stop_singularity_threshold: f64,
    /// Distance to a position limit, in joint-native units, at which motion
    /// further toward the limit halts.
    pub joint_limit_margin: f64,
    /// How many consecutive halt messages to publish once commands go quiet.
    /// Zero means republish forever.
    pub num_outgoing_halt_msgs_to_publish: u32,
    pub publish_joint_positions: bool,
    pub publish_joint_velocities: bool,
    pub publish_joint_accelerations: bool,
    /// Gazebo drops trajectory points whose timestamps are in the past, so the
    /// outgoing point is spammed redundantly when targeting it.
    pub use_gazebo: bool,
    pub gazebo_redundant_message_count: u32,
}

impl Default for JogParameters {
    fn default() -> Self {
        JogParameters {
            move_group_name: "manipulator".to_string(),
            planning_frame: "base_link".to_string(),
            robot_link_command_frame: "base_link".to_string(),
            publish_period: 0.008,
            low_pass_filter_coeff: 2.0,
            command_in_type: CommandInType::Unitless,
            linear_scale: 0.6,
            rotational_scale: 0.3,
            joint_scale: 0.5,
            lower_singularity_threshold: 17.0,
            hard_stop_singularity_threshold: 30.0,
            joint_limit_margin: 0.1,
            num_outgoing_halt_msgs_to_publish: 4,
            publish_joint_positions: true,
            publish_joint_velocities: true,
            publish_joint_accelerations: false,
            use_gazebo: false,
            gazebo_redundant_message_count: 30,
        }
    }
}

impl JogParameters {
    /// Loads parameters from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> JogResult<Self> {
        let contents = read_to_string(path.as_ref())
            .map_err(|e| create_config_error(format!("cannot read parameter file: {}", e)))?;
        let parameters: JogParameters = toml::from_str(&contents)
            .map_err(|e| create_config_error(format!("cannot parse parameter file: {}", e)))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Checks the invariants the control loop relies on.
    pub fn validate(&self) -> JogResult<()> {
        if !(self.publish_period > 0.0 && self.publish_period.is_finite()) {
            return Err(create_config_error("publish_period must be positive"));
        }
        if !(self.low_pass_filter_coeff > 1.0 && self.low_pass_filter_coeff.is_finite()) {
            return Err(create_config_error(
                "low_pass_filter_coeff must be greater than 1",
            ));
        }
        for (name, value) in [
            ("linear_scale", self.linear_scale),
            ("rotational_scale", self.rotational_scale),
            ("joint_scale", self.joint_scale),
        ] {
            if !value.is_finite() {
                return Err(create_config_error(format!("{} must be finite", name)));
            }
        }
        if !(self.lower_singularity_threshold < self.hard_stop_singularity_threshold) {
            return Err(create_config_error(
                "lower_singularity_threshold must be below hard_stop_singularity_threshold",
            ));
        }
        if !(self.joint_limit_margin >= 0.0) {
            return Err(create_config_error("joint_limit_margin must be non-negative"));
        }
        if self.use_gazebo && self.gazebo_redundant_message_count < 1 {
            return Err(create_config_error(
                "gazebo_redundant_message_count must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        assert!(JogParameters::default().validate().is_ok());
    }

    #[test]
    fn threshold_ordering_is_checked() {
        let parameters = JogParameters {
            lower_singularity_threshold: 30.0,
            hard_stop_singularity_threshold: 17.0,
            ..JogParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn non_positive_period_is_rejected() {
        let parameters = JogParameters {
            publish_period: 0.0,
            ..JogParameters::default()
        };
        assert!(parameters.validate().is_err());
    }

    #[test]
    fn parameters_parse_from_toml() {
        let parameters: JogParameters = toml::from_str(
            r#"
            move_group_name = "arm"
            command_in_type = "speed_units"
            publish_period = 0.01
            "#,
        )
        .unwrap();
        assert_eq!(parameters.move_group_name, "arm");
        assert_eq!(parameters.command_in_type, CommandInType::SpeedUnits);
        assert_eq!(parameters.publish_period, 0.01);
        assert!(parameters.validate().is_ok());
    }

    #[test]
    fn unknown_command_in_type_fails_to_parse() {
        assert!(toml::from_str::<JogParameters>(r#"command_in_type = "furlongs""#).is_err());
    }
}
