// src/error.rs
use thiserror::Error;

/// Errors returned from the task-side motion API.
///
/// The ISR-side ramp generator never returns `Result` and never logs; these
/// variants only surface from admission-time calls (`MotionController::move_to`,
/// config loading, block-manager setup).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("unknown geometry '{0}'")]
    UnknownGeometry(String),

    #[error("axis {0} has zero acceleration configured")]
    ZeroAcceleration(usize),

    #[error("pipeline length must be greater than zero")]
    ZeroPipelineLen,

    #[error("block manager busy (split in progress)")]
    Busy,

    #[error("homing required before this move")]
    HomingRequired,

    #[error("config error: {0}")]
    Config(String),
}
