//! Control input for the trajectory engine.
//!
//! The host application implements [`ControlSource`] (gamepad, keyboard, AI).
//! [`ScriptedControls`] replays a timeline of commands for headless runs and
//! tests.

use anyhow::{Context, Result};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trait for control inputs (supports dependency injection for testing).
pub trait ControlSource {
    /// Turn input in `[-1, 1]`; positive turns right.
    fn turn_rate(&self) -> f64;

    /// Desired planar velocity in the character frame: `x` sideways, `y`
    /// forward (m/s).
    fn move_vector(&self) -> Vector2<f64>;

    /// Requested weight of style channel `channel` in `[0, 1]`.
    fn style(&self, channel: usize) -> f64;
}

/// One step of a control timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSegment {
    /// Seconds this command is held.
    pub duration: f64,
    #[serde(default)]
    pub turn: f64,
    #[serde(default)]
    pub strafe: f64,
    #[serde(default)]
    pub forward: f64,
    /// Style weights per channel; missing channels read as 0.
    #[serde(default)]
    pub styles: Vec<f64>,
}

/// Replays a timeline of control segments. After the last segment its command
/// is held.
#[derive(Debug, Clone, Default)]
pub struct ScriptedControls {
    segments: Vec<ControlSegment>,
    current: usize,
    elapsed: f64,
}

impl ScriptedControls {
    pub fn new(segments: Vec<ControlSegment>) -> Self {
        Self {
            segments,
            current: 0,
            elapsed: 0.0,
        }
    }

    /// Hold a single command forever.
    pub fn constant(turn: f64, movement: Vector2<f64>, styles: Vec<f64>) -> Self {
        Self::new(vec![ControlSegment {
            duration: f64::INFINITY,
            turn,
            strafe: movement.x,
            forward: movement.y,
            styles,
        }])
    }

    /// Load a JSON array of segments.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read control script {}", path.display()))?;
        let segments: Vec<ControlSegment> =
            serde_json::from_str(&contents).context("Failed to parse control script JSON")?;
        tracing::info!(
            "Loaded control script {} ({} segments)",
            path.display(),
            segments.len()
        );
        Ok(Self::new(segments))
    }

    /// Advance the timeline by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        self.elapsed += dt;
        while self.current + 1 < self.segments.len()
            && self.elapsed >= self.segments[self.current].duration
        {
            self.elapsed -= self.segments[self.current].duration;
            self.current += 1;
            tracing::debug!("Control script: segment {}", self.current);
        }
    }

    /// Whether the last segment has run out.
    pub fn finished(&self) -> bool {
        match self.segments.last() {
            None => true,
            Some(last) => self.current + 1 == self.segments.len() && self.elapsed >= last.duration,
        }
    }

    fn segment(&self) -> Option<&ControlSegment> {
        self.segments.get(self.current)
    }
}

impl ControlSource for ScriptedControls {
    fn turn_rate(&self) -> f64 {
        self.segment().map_or(0.0, |s| s.turn.clamp(-1.0, 1.0))
    }

    fn move_vector(&self) -> Vector2<f64> {
        self.segment()
            .map_or_else(Vector2::zeros, |s| Vector2::new(s.strafe, s.forward))
    }

    fn style(&self, channel: usize) -> f64 {
        self.segment()
            .and_then(|s| s.styles.get(channel).copied())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_controls() {
        let controls = ScriptedControls::constant(2.0, Vector2::new(0.0, 1.0), vec![0.0, 1.0]);
        assert_eq!(controls.turn_rate(), 1.0);
        assert_eq!(controls.move_vector(), Vector2::new(0.0, 1.0));
        assert_eq!(controls.style(1), 1.0);
        assert_eq!(controls.style(4), 0.0);
        assert!(!controls.finished());
    }

    #[test]
    fn test_timeline_advances_and_holds_last() {
        let mut controls = ScriptedControls::new(vec![
            ControlSegment {
                duration: 1.0,
                turn: 0.0,
                strafe: 0.0,
                forward: 1.0,
                styles: vec![0.0, 1.0],
            },
            ControlSegment {
                duration: 0.5,
                turn: -0.5,
                strafe: 0.0,
                forward: 0.0,
                styles: vec![1.0],
            },
        ]);
        controls.advance(0.6);
        assert_eq!(controls.move_vector().y, 1.0);
        controls.advance(0.6);
        assert_eq!(controls.turn_rate(), -0.5);
        assert_eq!(controls.style(0), 1.0);
        controls.advance(5.0);
        assert!(controls.finished());
        assert_eq!(controls.turn_rate(), -0.5);
    }

    #[test]
    fn test_script_parses_with_defaults() {
        let segments: Vec<ControlSegment> =
            serde_json::from_str(r#"[{ "duration": 2.0, "forward": 1.5 }]"#).unwrap();
        let controls = ScriptedControls::new(segments);
        assert_eq!(controls.move_vector(), Vector2::new(0.0, 1.5));
        assert_eq!(controls.style(0), 0.0);
    }
}
