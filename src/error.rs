//! Error types for clip sampling, annotation and network plumbing.
//!
//! Recoverable range errors are surfaced here so that callers can decide to
//! clamp; the `*_clamped` helpers on [`crate::clip::Clip`] log them and carry on.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum MotionError {
    /// A timestamp was requested outside of `[0, duration]`.
    #[error("Time {time:.4}s is outside of the clip range [0, {duration:.4}]")]
    TimeOutOfRange { time: f64, duration: f64 },

    /// A frame index was requested outside of the clip.
    #[error("Frame {frame} is outside of the clip range [0, {frames})")]
    FrameOutOfRange { frame: usize, frames: usize },

    /// A joint index does not exist in the clip or character.
    #[error("Joint {joint} does not exist (character has {joints} joints)")]
    UnknownJoint { joint: usize, joints: usize },

    /// An internal invariant was violated (e.g. a missing sentinel keyframe).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The network's tensor sizes do not match the configured layout.
    #[error("Network layout mismatch: expected {expected} {what} values, network has {actual}")]
    LayoutMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input data is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, MotionError>;

impl MotionError {
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the error is a range error the caller may clamp away.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TimeOutOfRange { .. } | Self::FrameOutOfRange { .. }
        )
    }
}
