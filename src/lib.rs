//! Phase-functioned locomotion runtime.
//!
//! Runtime side: a rolling root trajectory blended from control input
//! ([`engine`]), the fixed network I/O layout ([`network`]) and the per-tick
//! bridge that runs the network and decodes a pose ([`bridge`]). Offline side:
//! clip sampling ([`clip`]), phase and style annotation ([`phase`], [`style`])
//! and the evolutionary oscillator fit that labels phase keys ([`evolution`]).

pub mod annotation;
pub mod bridge;
pub mod clip;
pub mod config;
pub mod controls;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod inference;
pub mod math;
pub mod network;
pub mod oscillator;
pub mod pfnn;
pub mod phase;
pub mod phase_clock;
pub mod style;
pub mod trajectory;
pub mod world;

pub use config::MotionConfig;
pub use error::{MotionError, Result};
