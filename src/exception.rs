// Licensed under the EUPL-1.2-or-later

//! Contains error and Result definitions
use thiserror::Error;

/// Represents all kinds of errors the jogging core can report.
///
/// Tick-level trouble (malformed samples, stale commands, bound violations) is
/// handled inside the control loop and never surfaces here; these errors are
/// reserved for conditions that make the core unusable, such as an inconsistent
/// parameter set or a frame the kinematic model does not know.
#[derive(Error, Debug)]
pub enum JogError {
    /// ConfigError is returned when the parameter set is inconsistent, for example a
    /// non-positive publish period or singularity thresholds in the wrong order.
    #[error("invalid configuration: {message}")]
    ConfigError { message: String },

    /// UnknownFrame is returned when a requested link frame does not exist in the
    /// kinematic model.
    #[error("unknown frame: {frame:?}")]
    UnknownFrame { frame: String },
}

/// creates a ConfigError from a message
pub(crate) fn create_config_error<S: Into<String>>(message: S) -> JogError {
    JogError::ConfigError {
        message: message.into(),
    }
}

/// Result type which can have JogError as Error
pub type JogResult<T> = Result<T, JogError>;
