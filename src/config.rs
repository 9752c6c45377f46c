//! Motion configuration loader: reads a JSON file of tunables shared by the
//! runtime tick and the offline annotation tools.
//!
//! Every section is optional in the file; missing values fall back to the
//! defaults of the original 60 Hz biped setup (111 trajectory samples, 12
//! network anchors, 31 joints).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

use crate::error::MotionError;

/// Top-level motion configuration, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MotionConfig {
    pub trajectory: TrajectoryConfig,
    pub network: NetworkConfig,
    pub evolution: EvolutionConfig,
    pub annotation: AnnotationConfig,
}

/// Rolling trajectory window and control blending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Total dense samples (past + root + future).
    pub samples: usize,
    /// Index of the "now" sample.
    pub root_index: usize,
    /// Dense samples per network anchor.
    pub density: usize,
    /// Lateral distance of the left/right ground probes (m).
    pub width: f64,
    /// Blend rate toward the commanded direction/velocity per tick.
    pub target_blending: f64,
    /// Blend rate of the style weights per tick.
    pub gait_transition: f64,
    /// How strongly the network's future trajectory replaces the prediction.
    pub trajectory_correction: f64,
    pub position_bias: f64,
    pub direction_bias: f64,
    /// Collision probe radius (m).
    pub safety_radius: f64,
    /// Speed (m/s) at which the idle style reaches zero.
    pub idle_speed_threshold: f64,
    /// Degrees of yaw per unit of turn input.
    pub turn_degrees: f64,
    /// Style channel names; channel 0 is the idle/stand channel.
    pub styles: Vec<String>,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            samples: 111,
            root_index: 60,
            density: 10,
            width: 0.5,
            target_blending: 0.25,
            gait_transition: 0.25,
            trajectory_correction: 1.0,
            position_bias: 0.75,
            direction_bias: 1.25,
            safety_radius: 0.5,
            idle_speed_threshold: 0.1,
            turn_degrees: 60.0,
            styles: default_styles(),
        }
    }
}

fn default_styles() -> Vec<String> {
    ["Idle", "Walk", "Run", "Crouch", "Jump"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl TrajectoryConfig {
    /// Number of network anchor samples (every `density`-th dense sample).
    pub fn anchor_count(&self) -> usize {
        (self.samples - 1) / self.density + 1
    }

    /// Anchor index of the root sample.
    pub fn root_anchor(&self) -> usize {
        self.root_index / self.density
    }

    pub fn style_count(&self) -> usize {
        self.styles.len()
    }

    /// Window shape the engine indexes by: anchors every `density` samples
    /// and at least one history sample before the root.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.density == 0 {
            return Err(MotionError::invalid_config("trajectory.density must be > 0"));
        }
        if self.samples < 2 || (self.samples - 1) % self.density != 0 {
            return Err(MotionError::invalid_config(format!(
                "trajectory.samples - 1 ({}) must be a multiple of density ({})",
                self.samples.saturating_sub(1),
                self.density
            )));
        }
        if self.root_index == 0
            || self.root_index >= self.samples - 1
            || self.root_index % self.density != 0
        {
            return Err(MotionError::invalid_config(format!(
                "trajectory.root_index ({}) must be a positive multiple of density inside the window",
                self.root_index
            )));
        }
        if self.styles.is_empty() {
            return Err(MotionError::invalid_config(
                "at least one style channel (idle) is required",
            ));
        }
        Ok(())
    }
}

/// Network-facing constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of joints the network predicts.
    pub joints: usize,
    /// Rescaling between world units (m) and network units (cm).
    pub unit_scale: f64,
    /// Phase advance floor applied even at full idle, as a fraction.
    pub idle_phase_rate: f64,
}

impl NetworkConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.unit_scale <= 0.0 {
            return Err(MotionError::invalid_config("network.unit_scale must be > 0"));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            joints: 31,
            unit_scale: 100.0,
            idle_phase_rate: 0.1,
        }
    }
}

/// Evolutionary phase fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub amplitude: f64,
    pub frequency: f64,
    pub shift: f64,
    pub offset: f64,
    pub slope: f64,
    /// Window length in seconds.
    pub window: f64,
    /// Fraction of each window blended with its neighbours, in `[0, 1]`.
    pub blending: f64,
    /// Probability of crossover (vs. full reroll) per offspring.
    pub behaviour: f64,
    pub population_size: usize,
    pub seed: u64,
    /// Evolve windows on scoped threads.
    pub parallel: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            amplitude: 10.0,
            frequency: 5.0,
            shift: PI,
            offset: 10.0,
            slope: 5.0,
            window: 1.0,
            blending: 1.0,
            behaviour: 1.0,
            population_size: 50,
            seed: 0,
            parallel: false,
        }
    }
}

impl EvolutionConfig {
    /// Lower gene bounds `[amplitude, frequency, shift, offset, slope]`.
    pub fn lower_bounds(&self) -> [f64; 5] {
        [-self.amplitude, 0.0, -self.shift, -self.offset, -self.slope]
    }

    /// Upper gene bounds `[amplitude, frequency, shift, offset, slope]`.
    pub fn upper_bounds(&self) -> [f64; 5] {
        [self.amplitude, self.frequency, self.shift, self.offset, self.slope]
    }
}

/// Signal measurement and style annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Velocity smoothing window (s); 0 uses a central difference.
    pub velocity_smoothing: f64,
    /// Summed joint speed below which a frame counts as still (m/s).
    pub velocity_threshold: f64,
    /// Joint height above ground below which it counts as grounded (m).
    pub height_threshold: f64,
    /// Style transition window (s).
    pub style_transition: f64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            velocity_smoothing: 0.0,
            velocity_threshold: 0.0,
            height_threshold: 0.0,
            style_transition: 0.25,
        }
    }
}

impl MotionConfig {
    /// Load configuration from a JSON file. Falls back to defaults if the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).context("Failed to read motion config file")?;

        let config: MotionConfig =
            serde_json::from_str(&contents).context("Failed to parse motion config JSON")?;

        config.validate().context("Motion config failed validation")?;

        Ok(config)
    }

    /// Check the structural constraints the engine and optimizer rely on.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.trajectory.validate()?;
        self.network.validate()?;

        let e = &self.evolution;
        if e.population_size < 4 {
            return Err(MotionError::invalid_config(
                "evolution.population_size must be at least 4",
            ));
        }
        if e.window <= 0.0 {
            return Err(MotionError::invalid_config("evolution.window must be > 0"));
        }
        if !(0.0..=1.0).contains(&e.blending) || !(0.0..=1.0).contains(&e.behaviour) {
            return Err(MotionError::invalid_config(
                "evolution.blending and evolution.behaviour must lie in [0, 1]",
            ));
        }
        let (lower, upper) = (e.lower_bounds(), e.upper_bounds());
        if lower.iter().zip(upper.iter()).any(|(l, u)| u <= l) {
            return Err(MotionError::invalid_config(
                "evolution gene bounds must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MotionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.trajectory.anchor_count(), 12);
        assert_eq!(config.trajectory.root_anchor(), 6);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MotionConfig =
            serde_json::from_str(r#"{ "evolution": { "window": 0.5 } }"#).unwrap();
        assert_eq!(config.evolution.window, 0.5);
        assert_eq!(config.evolution.population_size, 50);
        assert_eq!(config.trajectory.samples, 111);
    }

    #[test]
    fn test_rejects_misaligned_root() {
        let mut config = MotionConfig::default();
        config.trajectory.root_index = 55;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_root_without_history() {
        let mut config = MotionConfig::default();
        config.trajectory.root_index = 0;
        assert!(config.trajectory.validate().is_err());
        assert!(matches!(
            config.validate(),
            Err(MotionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_unit_scale() {
        let mut config = MotionConfig::default();
        config.network.unit_scale = 0.0;
        assert!(config.network.validate().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = MotionConfig::load(Path::new("/nonexistent/motion.json")).unwrap();
        assert_eq!(config, MotionConfig::default());
    }
}
