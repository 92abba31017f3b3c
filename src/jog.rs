// Licensed under the EUPL-1.2-or-later

//! Contains the jogging core: parameters, message types, the command and
//! safety scalers, and the periodic control loop.

pub mod bounds;
mod control_loop;
pub mod low_pass_filter;
pub mod parameters;
pub mod scaling;
pub mod shared_state;
pub mod singularity;
pub mod types;

pub use control_loop::{JogHandle, JogLoop};
