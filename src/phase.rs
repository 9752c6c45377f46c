//! Phase annotation of a clip.
//!
//! A [`PhaseFunction`] labels keyframes (cycle boundaries) and interpolates a
//! phase in `[0, 1]` between them. The first and last frames are always keys;
//! their phase is extrapolated from the neighbouring cycle length.
//!
//! Every clip carries two functions, the regular one and its mirror image,
//! held together by [`PhasePair`]. The mirrored function measures the joints
//! symmetric to the regular function's selection.

use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::config::AnnotationConfig;
use crate::error::{MotionError, Result};
use crate::math::{self, normalise, repeat};
use crate::world::World;

/// Which function of a [`PhasePair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Regular,
    Mirrored,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Regular => Side::Mirrored,
            Side::Mirrored => Side::Regular,
        }
    }
}

/// Keyframes, phase and fitted cycle of one (possibly mirrored) clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFunction {
    mirrored: bool,
    frame_time: f64,
    keys: Vec<bool>,
    phase: Vec<f64>,
    pub cycle: Vec<f64>,
    pub normalized_cycle: Vec<f64>,

    /// Joints contributing to the measured signal.
    variables: Vec<bool>,
    pub velocity_smoothing: f64,
    pub velocity_threshold: f64,
    pub height_threshold: f64,

    #[serde(skip)]
    heights: Vec<f64>,
    #[serde(skip)]
    velocities: Vec<f64>,
    #[serde(skip)]
    normalized_velocities: Vec<f64>,
}

impl PhaseFunction {
    pub fn new(
        frames: usize,
        joints: usize,
        frame_time: f64,
        mirrored: bool,
        config: &AnnotationConfig,
    ) -> Self {
        let frames = frames.max(1);
        let mut keys = vec![false; frames];
        let mut phase = vec![0.0; frames];
        keys[0] = true;
        keys[frames - 1] = true;
        if frames > 1 {
            phase[frames - 1] = 1.0;
        }
        Self {
            mirrored,
            frame_time,
            keys,
            phase,
            cycle: vec![0.0; frames],
            normalized_cycle: vec![0.0; frames],
            variables: vec![false; joints],
            velocity_smoothing: config.velocity_smoothing.max(0.0),
            velocity_threshold: config.velocity_threshold.max(0.0),
            height_threshold: config.height_threshold.max(0.0),
            heights: vec![0.0; frames],
            velocities: vec![0.0; frames],
            normalized_velocities: vec![0.0; frames],
        }
    }

    #[inline]
    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    #[inline]
    fn last(&self) -> usize {
        self.keys.len() - 1
    }

    pub fn keys(&self) -> &[bool] {
        &self.keys
    }

    pub fn phases(&self) -> &[f64] {
        &self.phase
    }

    pub fn variables(&self) -> &[bool] {
        &self.variables
    }

    /// Summed speed of the selected joints per frame (m/s).
    pub fn velocities(&self) -> &[f64] {
        &self.velocities
    }

    pub fn normalized_velocities(&self) -> &[f64] {
        &self.normalized_velocities
    }

    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    /// Replace the measured signal directly (e.g. from an external tracker).
    pub fn set_velocities(&mut self, velocities: Vec<f64>) -> Result<()> {
        if velocities.len() != self.keys.len() {
            return Err(MotionError::invalid_input(format!(
                "expected {} velocity samples, got {}",
                self.keys.len(),
                velocities.len()
            )));
        }
        let min = velocities.iter().copied().fold(f64::MAX, f64::min);
        let max = velocities.iter().copied().fold(f64::MIN, f64::max);
        self.normalized_velocities = velocities
            .iter()
            .map(|&v| normalise(v, min, max, 0.0, 1.0))
            .collect();
        self.velocities = velocities;
        Ok(())
    }

    fn check(&self, frame: usize) -> Result<()> {
        if frame >= self.keys.len() {
            return Err(MotionError::FrameOutOfRange {
                frame,
                frames: self.keys.len(),
            });
        }
        Ok(())
    }

    pub fn is_key(&self, frame: usize) -> bool {
        self.keys.get(frame).copied().unwrap_or(false)
    }

    pub fn phase(&self, frame: usize) -> Result<f64> {
        self.check(frame)?;
        Ok(self.phase[frame])
    }

    /// Add or remove a keyframe. The first and last frames stay keys.
    pub fn set_key(&mut self, frame: usize, value: bool) -> Result<()> {
        self.check(frame)?;
        if self.keys[frame] == value {
            return Ok(());
        }
        if !value && (frame == 0 || frame == self.last()) {
            return Err(MotionError::invalid_input(
                "the first and last frames are always keyframes",
            ));
        }
        self.keys[frame] = value;
        self.phase[frame] = if value { 1.0 } else { 0.0 };
        self.interpolate(frame)
    }

    pub fn set_phase(&mut self, frame: usize, value: f64) -> Result<()> {
        self.check(frame)?;
        if self.phase[frame] != value {
            self.phase[frame] = value;
            self.interpolate(frame)?;
        }
        Ok(())
    }

    pub fn previous_key(&self, frame: usize) -> Option<usize> {
        math::previous_key(&self.keys, frame)
    }

    pub fn next_key(&self, frame: usize) -> Option<usize> {
        math::next_key(&self.keys, frame)
    }

    fn previous_key_checked(&self, frame: usize) -> Result<usize> {
        self.previous_key(frame).ok_or_else(|| {
            MotionError::invalid_state(format!("no keyframe before frame {frame}"))
        })
    }

    fn next_key_checked(&self, frame: usize) -> Result<usize> {
        self.next_key(frame).ok_or_else(|| {
            MotionError::invalid_state(format!("no keyframe after frame {frame}"))
        })
    }

    fn interpolate(&mut self, frame: usize) -> Result<()> {
        if self.keys.len() < 2 {
            return Ok(());
        }
        if self.keys[frame] {
            if frame > 0 {
                let prev = self.previous_key_checked(frame)?;
                self.interpolate_segment(prev, frame)?;
            }
            if frame < self.last() {
                let next = self.next_key_checked(frame)?;
                self.interpolate_segment(frame, next)?;
            }
            Ok(())
        } else {
            let prev = self.previous_key_checked(frame)?;
            let next = self.next_key_checked(frame)?;
            self.interpolate_segment(prev, next)
        }
    }

    fn interpolate_segment(&mut self, a: usize, b: usize) -> Result<()> {
        self.fill(a, b);
        if a == 0 {
            self.refresh_first()?;
        }
        if b == self.last() {
            self.refresh_last()?;
        }
        Ok(())
    }

    /// Linear phase between keys `a` and `b`, starting from the wrapped phase of `a`.
    fn fill(&mut self, a: usize, b: usize) {
        if b < a + 2 {
            return;
        }
        let dist = (b - a) as f64;
        let start = repeat(self.phase[a], 1.0);
        let end = self.phase[b];
        for i in a + 1..b {
            let rate_a = (i - a) as f64 / dist;
            let rate_b = (b - i) as f64 / dist;
            self.phase[i] = rate_b * start + rate_a * end;
        }
    }

    /// Extrapolate the first frame's phase from the first full cycle.
    fn refresh_first(&mut self) -> Result<()> {
        self.keys[0] = true;
        let next1 = self.next_key_checked(0)?;
        let next2 = self.next_key(next1).unwrap_or(self.last());
        let x = (next1 as f64) * self.frame_time;
        let m = (next2 - next1) as f64 * self.frame_time;
        let value = if m > 0.0 { (1.0 - x / m).clamp(0.0, 1.0) } else { 0.0 };
        if self.phase[0] != value {
            self.phase[0] = value;
            self.fill(0, next1);
        }
        Ok(())
    }

    /// Extrapolate the last frame's phase from the last full cycle.
    fn refresh_last(&mut self) -> Result<()> {
        let last = self.last();
        self.keys[last] = true;
        let prev1 = self.previous_key_checked(last)?;
        let prev2 = self.previous_key(prev1).unwrap_or(0);
        let x = (last - prev1) as f64 * self.frame_time;
        let m = (prev1 - prev2) as f64 * self.frame_time;
        let value = if m > 0.0 { (x / m).clamp(0.0, 1.0) } else { 1.0 };
        if self.phase[last] != value {
            self.phase[last] = value;
            self.fill(prev1, last);
        }
        Ok(())
    }

    /// Replace every keyframe by `detected` and rebuild the phase curve: the
    /// first frame starts a cycle, every other key closes one.
    pub fn assign_keys(&mut self, detected: &[bool]) -> Result<()> {
        if detected.len() != self.keys.len() {
            return Err(MotionError::invalid_input(format!(
                "expected {} key flags, got {}",
                self.keys.len(),
                detected.len()
            )));
        }
        let last = self.last();
        self.keys.copy_from_slice(detected);
        self.keys[0] = true;
        self.keys[last] = true;
        self.phase.iter_mut().for_each(|p| *p = 0.0);
        for frame in 1..self.keys.len() {
            if self.keys[frame] {
                self.set_phase(frame, 1.0)?;
            }
        }
        Ok(())
    }

    /// Restore a persisted annotation without re-deriving it.
    pub(crate) fn restore(&mut self, keys: Vec<bool>, phase: Vec<f64>) -> Result<()> {
        if keys.len() != self.keys.len() || phase.len() != self.keys.len() {
            return Err(MotionError::invalid_input("annotation length does not match clip"));
        }
        self.keys = keys;
        self.phase = phase;
        Ok(())
    }

    /// Measure joint heights and speeds of the selected joints.
    ///
    /// A frame's speed only counts while the selection is off the ground (above
    /// `height_threshold`) and faster than `velocity_threshold`.
    pub fn compute_values(&mut self, clip: &Clip, world: &dyn World) -> Result<()> {
        let frames = self.keys.len();
        if clip.frame_count() != frames || clip.joint_count() != self.variables.len() {
            return Err(MotionError::invalid_input("phase function does not match clip"));
        }

        let selected: Vec<usize> = self
            .variables
            .iter()
            .enumerate()
            .filter_map(|(j, &on)| on.then_some(j))
            .collect();

        let mut heights = vec![0.0; frames];
        for (frame, height) in heights.iter_mut().enumerate() {
            let pose = clip.frame(frame)?;
            for &j in &selected {
                let p = pose[j].translation.vector;
                let offset = (p.y - world.ground_height(p.x, p.z)).max(0.0);
                if offset >= self.height_threshold {
                    *height += offset;
                }
            }
        }
        let (min, max) = min_max(&heights);
        self.heights = heights
            .iter()
            .map(|&h| normalise(h, min, max, 0.0, 1.0))
            .collect();

        let mut velocities = vec![0.0; frames];
        for (frame, velocity) in velocities.iter_mut().enumerate() {
            for &j in &selected {
                *velocity += clip.velocity_at(frame, j, self.velocity_smoothing)?.norm();
            }
            if *velocity < self.velocity_threshold || self.heights[frame] == 0.0 {
                *velocity = 0.0;
            }
        }
        self.set_velocities(velocities)?;

        tracing::debug!(
            "Measured {} joints over {} frames (mirrored: {})",
            selected.len(),
            frames,
            self.mirrored
        );
        Ok(())
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// A clip's regular and mirrored phase functions with the joint symmetry
/// table that couples their joint selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePair {
    pub regular: PhaseFunction,
    pub mirrored: PhaseFunction,
    symmetry: Vec<usize>,
}

impl PhasePair {
    pub fn new(clip: &Clip, config: &AnnotationConfig) -> Self {
        let (frames, joints, dt) = (clip.frame_count(), clip.joint_count(), clip.frame_time());
        Self {
            regular: PhaseFunction::new(frames, joints, dt, false, config),
            mirrored: PhaseFunction::new(frames, joints, dt, true, config),
            symmetry: clip.symmetry().to_vec(),
        }
    }

    /// Pair two existing functions. `symmetry` maps every joint to its mirror joint.
    pub fn from_functions(regular: PhaseFunction, mirrored: PhaseFunction, symmetry: Vec<usize>) -> Self {
        Self {
            regular,
            mirrored,
            symmetry,
        }
    }

    pub fn symmetry(&self) -> &[usize] {
        &self.symmetry
    }

    pub fn function(&self, side: Side) -> &PhaseFunction {
        match side {
            Side::Regular => &self.regular,
            Side::Mirrored => &self.mirrored,
        }
    }

    pub fn function_mut(&mut self, side: Side) -> &mut PhaseFunction {
        match side {
            Side::Regular => &mut self.regular,
            Side::Mirrored => &mut self.mirrored,
        }
    }

    /// Measured signal for fitting `side`: its own curve and its partner's.
    pub fn signal(&self, side: Side) -> (Vec<f64>, Vec<f64>) {
        (
            self.function(side).velocities().to_vec(),
            self.function(side.other()).velocities().to_vec(),
        )
    }

    /// Toggle a joint on one side; its mirror joint follows on the other side.
    pub fn toggle_variable(&mut self, side: Side, joint: usize) -> Result<()> {
        let partner = *self.symmetry.get(joint).ok_or(MotionError::UnknownJoint {
            joint,
            joints: self.symmetry.len(),
        })?;
        let value = !self.function(side).variables[joint];
        self.function_mut(side).variables[joint] = value;
        self.function_mut(side.other()).variables[partner] = value;
        Ok(())
    }

    /// Apply the same measurement thresholds to both functions.
    pub fn set_thresholds(&mut self, smoothing: f64, velocity: f64, height: f64) {
        for f in [&mut self.regular, &mut self.mirrored] {
            f.velocity_smoothing = smoothing.max(0.0);
            f.velocity_threshold = velocity.max(0.0);
            f.height_threshold = height.max(0.0);
        }
    }

    pub fn compute_values(&mut self, clip: &Clip, world: &dyn World) -> Result<()> {
        self.regular.compute_values(clip, world)?;
        self.mirrored.compute_values(clip, world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Isometry3;

    fn function(frames: usize) -> PhaseFunction {
        PhaseFunction::new(frames, 2, 0.1, false, &AnnotationConfig::default())
    }

    #[test]
    fn test_new_has_sentinel_keys() {
        let f = function(21);
        assert!(f.is_key(0) && f.is_key(20));
        assert_eq!(f.phase(0).unwrap(), 0.0);
        assert_eq!(f.phase(20).unwrap(), 1.0);
    }

    #[test]
    fn test_keys_interpolate_phase() {
        let mut f = function(41);
        let mut detected = vec![false; 41];
        detected[10] = true;
        detected[20] = true;
        detected[30] = true;
        f.assign_keys(&detected).unwrap();

        assert_eq!(f.phase(10).unwrap(), 1.0);
        assert!((f.phase(15).unwrap() - 0.5).abs() < 1e-12);
        assert!((f.phase(25).unwrap() - 0.5).abs() < 1e-12);
        // first frame sits exactly one cycle before frame 10
        assert_eq!(f.phase(0).unwrap(), 0.0);
        assert!((f.phase(5).unwrap() - 0.5).abs() < 1e-12);
        // last frame closes a full cycle too
        assert_eq!(f.phase(40).unwrap(), 1.0);
        for &p in f.phases() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_partial_first_cycle_is_extrapolated() {
        let mut f = function(41);
        let mut detected = vec![false; 41];
        detected[5] = true;
        detected[15] = true;
        f.assign_keys(&detected).unwrap();
        // 5 frames before a 10 frame cycle: starts half way through
        assert!((f.phase(0).unwrap() - 0.5).abs() < 1e-12);
        assert!((f.phase(3).unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_manual_key_edit() {
        let mut f = function(21);
        f.set_key(10, true).unwrap();
        assert!(f.is_key(10));
        assert!((f.phase(5).unwrap() - 0.5).abs() < 1e-12);
        f.set_key(10, false).unwrap();
        assert!(!f.is_key(10));
        assert!(f.set_key(0, false).is_err());
        assert!(f.set_key(30, true).is_err());
    }

    #[test]
    fn test_pair_couples_variables() {
        let poses = (0..5)
            .map(|_| vec![Isometry3::identity(), Isometry3::identity()])
            .collect();
        let clip = Clip::new(0.1, vec!["LeftFoot".into(), "RightFoot".into()], poses).unwrap();
        let mut pair = PhasePair::new(&clip, &AnnotationConfig::default());
        pair.toggle_variable(Side::Regular, 0).unwrap();
        assert_eq!(pair.regular.variables(), &[true, false]);
        assert_eq!(pair.mirrored.variables(), &[false, true]);
        assert!(pair.toggle_variable(Side::Mirrored, 9).is_err());
    }

    #[test]
    fn test_compute_values_measures_swing() {
        // joint 0 swings up and forward on odd frames, rests on even ones
        let poses = (0..10)
            .map(|f| {
                let lift = if f % 2 == 1 { 0.2 } else { 0.0 };
                vec![
                    Isometry3::translation(0.0, lift, f as f64 * 0.1),
                    Isometry3::identity(),
                ]
            })
            .collect();
        let clip = Clip::new(0.1, vec!["LeftFoot".into(), "RightFoot".into()], poses).unwrap();
        let mut pair = PhasePair::new(&clip, &AnnotationConfig::default());
        pair.toggle_variable(Side::Regular, 0).unwrap();
        pair.compute_values(&clip, &crate::world::FlatGround::default())
            .unwrap();

        let v = pair.regular.velocities();
        assert_eq!(v[2], 0.0);
        assert!(v[3] > 0.0);
        // the mirrored side measures the resting right foot
        assert!(pair.mirrored.velocities().iter().all(|&x| x == 0.0));
    }
}
