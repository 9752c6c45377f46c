//! Sampled root trajectory with per-sample style weights.
//!
//! Dense storage holds every tick-rate sample; every `density`-th sample is an
//! anchor exchanged with the network, and the samples in between are derived
//! by linear resampling.

use nalgebra::{Isometry3, Point3, Vector3};

use crate::config::TrajectoryConfig;
use crate::math::{ground_direction, lerp, lerp_point, lerp_vector, root_transform, yaw_rotation};
use crate::world::World;

/// One sample of the root trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySample {
    pub position: Point3<f64>,
    direction: Vector3<f64>,
    /// Left ground probe.
    pub left: Point3<f64>,
    /// Right ground probe.
    pub right: Point3<f64>,
    /// Terrain slope along the facing direction.
    pub rise: f64,
    /// Style weights in `[0, 1]`, one per channel.
    pub styles: Vec<f64>,
}

impl TrajectorySample {
    pub fn new(position: Point3<f64>, direction: Vector3<f64>, style_count: usize) -> Self {
        Self {
            position,
            direction: ground_direction(&direction, &Vector3::z()),
            left: position,
            right: position,
            rise: 0.0,
            styles: vec![0.0; style_count],
        }
    }

    /// Facing direction: unit length, on the ground plane.
    #[inline]
    pub fn direction(&self) -> Vector3<f64> {
        self.direction
    }

    /// Set the facing direction; it is ground-projected and renormalized. A
    /// degenerate vector keeps the previous direction.
    pub fn set_direction(&mut self, direction: Vector3<f64>) {
        self.direction = ground_direction(&direction, &self.direction);
    }

    /// Root transform at this sample.
    pub fn transformation(&self) -> Isometry3<f64> {
        root_transform(&self.position, &self.direction)
    }

    /// Snap to the ground and refresh the lateral probes and the rise.
    pub fn postprocess(&mut self, world: &dyn World, width: f64) {
        self.direction = ground_direction(&self.direction, &Vector3::z());
        self.position.y = world.ground_height(self.position.x, self.position.z);

        let ortho = yaw_rotation(90.0) * self.direction;
        self.right = self.position + width * ortho;
        self.right.y = world.ground_height(self.right.x, self.right.z);
        self.left = self.position - width * ortho;
        self.left.y = world.ground_height(self.left.x, self.left.z);

        let ahead = self.position + width * self.direction;
        self.rise = (world.ground_height(ahead.x, ahead.z) - self.position.y) / width;
    }

    /// Copy the geometric fields interpolated between two samples. Styles are
    /// left untouched.
    fn set_interpolated(&mut self, prev: &TrajectorySample, next: &TrajectorySample, factor: f64) {
        self.position = lerp_point(&prev.position, &next.position, factor);
        self.set_direction(lerp_vector(&prev.direction, &next.direction, factor));
        self.left = lerp_point(&prev.left, &next.left, factor);
        self.right = lerp_point(&prev.right, &next.right, factor);
        self.rise = lerp(prev.rise, next.rise, factor);
    }
}

/// Fixed-length window of trajectory samples around a root ("now") sample.
#[derive(Debug, Clone)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
    root_index: usize,
    density: usize,
    width: f64,
}

impl Trajectory {
    /// Trajectory at rest: every sample at `position`, facing `direction`.
    pub fn new(config: &TrajectoryConfig, position: Point3<f64>, direction: Vector3<f64>) -> Self {
        let sample = TrajectorySample::new(position, direction, config.style_count());
        Self {
            samples: vec![sample; config.samples],
            root_index: config.root_index,
            density: config.density,
            width: config.width,
        }
    }

    /// Build from explicit samples. `density` of 1 makes every sample an anchor.
    pub fn from_samples(
        samples: Vec<TrajectorySample>,
        root_index: usize,
        density: usize,
        width: f64,
    ) -> Self {
        Self {
            samples,
            root_index,
            density: density.max(1),
            width,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn root_index(&self) -> usize {
        self.root_index
    }

    #[inline]
    pub fn density(&self) -> usize {
        self.density
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [TrajectorySample] {
        &mut self.samples
    }

    pub fn root(&self) -> &TrajectorySample {
        &self.samples[self.root_index]
    }

    pub fn root_mut(&mut self) -> &mut TrajectorySample {
        &mut self.samples[self.root_index]
    }

    /// Number of anchor samples.
    pub fn anchor_count(&self) -> usize {
        (self.samples.len() - 1) / self.density + 1
    }

    /// Anchor `index`, clamped to the window.
    pub fn anchor(&self, index: usize) -> &TrajectorySample {
        &self.samples[(index * self.density).min(self.samples.len() - 1)]
    }

    /// Anchors bracketing dense sample `i` and the fractional position between them.
    pub fn bracket(&self, i: usize) -> (&TrajectorySample, &TrajectorySample, f64) {
        let prev = self.anchor(i / self.density);
        let next = if i % self.density == 0 {
            self.anchor(i / self.density)
        } else {
            self.anchor(i / self.density + 1)
        };
        let factor = (i % self.density) as f64 / self.density as f64;
        (prev, next, factor)
    }

    /// Postprocess every sample.
    pub fn postprocess(&mut self, world: &dyn World) {
        let width = self.width;
        for sample in &mut self.samples {
            sample.postprocess(world, width);
        }
    }

    /// Postprocess the anchors from dense index `start` onward.
    pub fn postprocess_anchors(&mut self, world: &dyn World, start: usize) {
        let width = self.width;
        for sample in self.samples.iter_mut().skip(start).step_by(self.density) {
            sample.postprocess(world, width);
        }
    }

    /// Re-derive every future non-anchor sample from its bracketing anchors.
    pub fn resample(&mut self) {
        for i in self.root_index + 1..self.samples.len() {
            if i % self.density == 0 {
                continue;
            }
            let (prev, next, factor) = self.bracket(i);
            let (prev, next) = (prev.clone(), next.clone());
            self.samples[i].set_interpolated(&prev, &next, factor);
        }
    }

    /// Drop the oldest sample and move every history sample one step back;
    /// the root slot keeps its value until the caller overwrites it.
    pub fn shift_history(&mut self) {
        for i in 0..self.root_index {
            self.samples[i] = self.samples[i + 1].clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::FlatGround;

    fn trajectory() -> Trajectory {
        Trajectory::new(
            &TrajectoryConfig::default(),
            Point3::origin(),
            Vector3::z(),
        )
    }

    #[test]
    fn test_set_direction_stays_on_ground_plane() {
        let mut sample = TrajectorySample::new(Point3::origin(), Vector3::z(), 2);
        sample.set_direction(Vector3::new(2.0, 3.0, 0.0));
        assert!((sample.direction() - Vector3::x()).norm() < 1e-12);
        sample.set_direction(Vector3::zeros());
        assert!((sample.direction() - Vector3::x()).norm() < 1e-12);
    }

    #[test]
    fn test_postprocess_places_probes() {
        let mut sample = TrajectorySample::new(Point3::new(0.0, 3.0, 0.0), Vector3::z(), 1);
        sample.postprocess(&FlatGround { height: 0.25 }, 0.5);
        assert_eq!(sample.position.y, 0.25);
        assert!((sample.right - Point3::new(0.5, 0.25, 0.0)).norm() < 1e-12);
        assert!((sample.left - Point3::new(-0.5, 0.25, 0.0)).norm() < 1e-12);
        assert_eq!(sample.rise, 0.0);
    }

    #[test]
    fn test_bracket_at_anchor_and_between() {
        let t = trajectory();
        let (_, _, f) = t.bracket(70);
        assert_eq!(f, 0.0);
        let (_, _, f) = t.bracket(73);
        assert!((f - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_resample_is_convex() {
        let mut t = trajectory();
        for (k, sample) in t.samples_mut().iter_mut().enumerate() {
            sample.position = Point3::new((k as f64).sin(), 0.0, k as f64 * 0.1);
            sample.rise = (k as f64 * 0.3).cos();
        }
        t.resample();
        for i in 61..t.len() {
            let (prev, next, f) = t.bracket(i);
            assert!((0.0..1.0).contains(&f));
            let s = &t.samples()[i];
            let lo = prev.position.x.min(next.position.x) - 1e-12;
            let hi = prev.position.x.max(next.position.x) + 1e-12;
            assert!(s.position.x >= lo && s.position.x <= hi);
            let lo = prev.rise.min(next.rise) - 1e-12;
            let hi = prev.rise.max(next.rise) + 1e-12;
            assert!(s.rise >= lo && s.rise <= hi);
        }
    }

    #[test]
    fn test_shift_history_moves_samples_down() {
        let mut t = trajectory();
        for (k, sample) in t.samples_mut().iter_mut().enumerate() {
            sample.position.z = k as f64;
        }
        t.shift_history();
        assert_eq!(t.samples()[0].position.z, 1.0);
        assert_eq!(t.samples()[59].position.z, 60.0);
        assert_eq!(t.root().position.z, 60.0);
    }
}
