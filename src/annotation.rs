//! Persisted phase and style annotation of a clip.
//!
//! Written by the `annotate` command and read back by training-data export.
//! The document stores both phase functions (regular and mirrored), the style
//! table and the optimizer windows.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::evolution::Interval;
use crate::phase::{PhaseFunction, PhasePair};
use crate::style::StyleFunction;

/// Keyframes, phase and fitted cycle of one phase function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTrack {
    pub keys: Vec<bool>,
    pub phase: Vec<f64>,
    pub cycle: Vec<f64>,
    pub normalized_cycle: Vec<f64>,
}

impl PhaseTrack {
    fn capture(function: &PhaseFunction) -> Self {
        Self {
            keys: function.keys().to_vec(),
            phase: function.phases().to_vec(),
            cycle: function.cycle.clone(),
            normalized_cycle: function.normalized_cycle.clone(),
        }
    }

    fn apply(&self, function: &mut PhaseFunction) -> crate::error::Result<()> {
        function.restore(self.keys.clone(), self.phase.clone())?;
        function.cycle = self.cycle.clone();
        function.normalized_cycle = self.normalized_cycle.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAnnotation {
    pub clip: String,
    pub frame_time: f64,
    pub regular: PhaseTrack,
    pub mirrored: PhaseTrack,
    pub styles: StyleFunction,
    pub windows: Vec<Interval>,
}

impl PhaseAnnotation {
    pub fn capture(clip: &str, pair: &PhasePair, styles: &StyleFunction, windows: Vec<Interval>) -> Self {
        Self {
            clip: clip.to_string(),
            frame_time: pair.regular.frame_time(),
            regular: PhaseTrack::capture(&pair.regular),
            mirrored: PhaseTrack::capture(&pair.mirrored),
            styles: styles.clone(),
            windows,
        }
    }

    /// Restore both phase functions of `pair` from this annotation.
    pub fn apply(&self, pair: &mut PhasePair) -> crate::error::Result<()> {
        self.regular.apply(&mut pair.regular)?;
        self.mirrored.apply(&mut pair.mirrored)
    }

    pub fn frame_count(&self) -> usize {
        self.regular.keys.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize annotation")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write annotation {}", path.display()))?;
        tracing::info!(
            "Saved annotation for {} ({} frames) to {}",
            self.clip,
            self.frame_count(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read annotation {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse annotation JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotationConfig;

    fn annotated_pair() -> PhasePair {
        let config = AnnotationConfig::default();
        let mut regular = PhaseFunction::new(50, 2, 1.0 / 60.0, false, &config);
        let mut mirrored = PhaseFunction::new(50, 2, 1.0 / 60.0, true, &config);
        let mut keys = vec![false; 50];
        keys[13] = true;
        keys[31] = true;
        regular.assign_keys(&keys).unwrap();
        keys[13] = false;
        keys[22] = true;
        mirrored.assign_keys(&keys).unwrap();
        regular.cycle = (0..50).map(|f| (f as f64 * 0.37).sin()).collect();
        regular.normalized_cycle = regular.cycle.iter().map(|c| 0.5 * (c + 1.0)).collect();
        PhasePair::from_functions(regular, mirrored, vec![1, 0])
    }

    #[test]
    fn test_save_load_round_trip() {
        let pair = annotated_pair();
        let names = vec!["Idle".to_string(), "Walk".to_string()];
        let mut styles = StyleFunction::new(&names, 50, 1.0 / 60.0, 0.25);
        styles.set_key(0, true).unwrap();
        styles.set_flag(0, 1, true).unwrap();

        let annotation =
            PhaseAnnotation::capture("walk_01", &pair, &styles, vec![Interval::new(0, 49)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walk_01.annotation.json");
        annotation.save(&path).unwrap();
        let loaded = PhaseAnnotation::load(&path).unwrap();

        assert_eq!(loaded.regular.keys, annotation.regular.keys);
        assert_eq!(loaded.mirrored.keys, annotation.mirrored.keys);
        for (a, b) in loaded.regular.phase.iter().zip(&annotation.regular.phase) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(loaded.styles, styles);

        let mut restored = PhasePair::from_functions(
            PhaseFunction::new(50, 2, 1.0 / 60.0, false, &AnnotationConfig::default()),
            PhaseFunction::new(50, 2, 1.0 / 60.0, true, &AnnotationConfig::default()),
            vec![1, 0],
        );
        loaded.apply(&mut restored).unwrap();
        assert_eq!(restored.regular.keys(), pair.regular.keys());
        assert_eq!(restored.mirrored.phases(), pair.mirrored.phases());
    }

    #[test]
    fn test_apply_rejects_other_clip_length() {
        let pair = annotated_pair();
        let styles = StyleFunction::new(&[], 50, 1.0 / 60.0, 0.25);
        let annotation = PhaseAnnotation::capture("walk_01", &pair, &styles, Vec::new());
        let mut short = PhasePair::from_functions(
            PhaseFunction::new(20, 2, 1.0 / 60.0, false, &AnnotationConfig::default()),
            PhaseFunction::new(20, 2, 1.0 / 60.0, true, &AnnotationConfig::default()),
            vec![1, 0],
        );
        assert!(annotation.apply(&mut short).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(PhaseAnnotation::load(Path::new("/nonexistent/annotation.json")).is_err());
    }
}
