// Licensed under the EUPL-1.2-or-later

//! Contains the singularity velocity scaling and the drift-dimension
//! reduction of the Jacobian.
use nalgebra::{DMatrix, DVector, Dyn, SVD};

use crate::jog::parameters::JogParameters;
use crate::model::KinematicState;
use crate::utils::{LogThrottle, WARN_THROTTLE_PERIOD};

/// The look-ahead probe steps `1/PROBE_SCALE` along the singular direction.
static PROBE_SCALE: f64 = 100.0;

/// Deletes the Jacobian rows (and matching twist components) of the Cartesian
/// axes the caller is willing to let drift, trading task dimensions for
/// redundancy. Iterates descending from `rows()` so a deletion never renumbers
/// a pending row, and always leaves at least one row in place.
pub fn apply_drift_dimensions(
    mut jacobian: DMatrix<f64>,
    mut delta_x: DVector<f64>,
    drift_dimensions: &[bool; 6],
) -> (DMatrix<f64>, DVector<f64>) {
    let mut dimension = jacobian.nrows();
    loop {
        if dimension < drift_dimensions.len()
            && drift_dimensions[dimension]
            && jacobian.nrows() > 1
        {
            jacobian = jacobian.remove_row(dimension);
            delta_x = delta_x.remove_row(dimension);
        }
        if dimension == 0 {
            break;
        }
        dimension -= 1;
    }
    (jacobian, delta_x)
}

/// Computes a velocity multiplier in `[0, 1]` from the proximity of the
/// current configuration to a kinematic singularity and the direction of the
/// commanded motion.
///
/// The last column of U from the Jacobian's SVD points directly toward or away
/// from the nearest singularity, but its sign flips unpredictably (R. Bro,
/// "Resolving the Sign Ambiguity in the Singular Value Decomposition"). The
/// sign is resolved with a look-ahead: a small joint step along the candidate
/// direction is applied to a local copy of the positions and the Jacobian is
/// recomputed there; if its condition number does not worsen, the candidate
/// pointed away and is negated. The probe never touches the caller's
/// kinematic state.
///
/// Motion away from the singularity is never decelerated. Motion toward it is
/// ramped down linearly between the two condition-number thresholds and
/// stopped entirely at the hard-stop threshold.
pub fn velocity_scale_for_singularity(
    kinematic_state: &KinematicState,
    commanded_velocity: &DVector<f64>,
    svd: &SVD<f64, Dyn, Dyn>,
    pseudo_inverse: &DMatrix<f64>,
    drift_dimensions: &[bool; 6],
    parameters: &JogParameters,
    throttle: &mut LogThrottle,
) -> f64 {
    let u = svd.u.as_ref().unwrap();
    let num_dimensions = u.nrows();
    let mut vector_toward_singularity = u.column(num_dimensions - 1).clone_owned();

    let singular_values = &svd.singular_values;
    let ini_condition = singular_values[0] / singular_values[singular_values.len() - 1];

    // Look ahead along a scaled version of the singular vector.
    let delta_x = &vector_toward_singularity / PROBE_SCALE;
    let mut new_theta = kinematic_state.copy_joint_group_positions();
    new_theta += pseudo_inverse * delta_x;
    let probe_jacobian = kinematic_state.jacobian_at(&new_theta);
    let rows = probe_jacobian.nrows();
    let (probe_jacobian, _) =
        apply_drift_dimensions(probe_jacobian, DVector::zeros(rows), drift_dimensions);
    let probe_svd = SVD::new(probe_jacobian, false, false);
    let probe_singular_values = &probe_svd.singular_values;
    let new_condition =
        probe_singular_values[0] / probe_singular_values[probe_singular_values.len() - 1];
    if ini_condition >= new_condition {
        vector_toward_singularity = -vector_toward_singularity;
    }

    // Only decelerate when the commanded motion has a component toward the
    // singularity.
    let dot = vector_toward_singularity.dot(commanded_velocity);
    if dot > 0.0 {
        if ini_condition >= parameters.hard_stop_singularity_threshold {
            throttle.warn(
                "singularity_halt",
                WARN_THROTTLE_PERIOD,
                format_args!("Close to a singularity. Halting."),
            );
            return 0.0;
        }
        if ini_condition > parameters.lower_singularity_threshold {
            return 1.0
                - (ini_condition - parameters.lower_singularity_threshold)
                    / (parameters.hard_stop_singularity_threshold
                        - parameters.lower_singularity_threshold);
        }
    }
    1.0
}
