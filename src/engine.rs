//! Trajectory prediction and blending.
//!
//! Every tick the engine blends the commanded direction and velocity into its
//! targets, eases the root style weights, predicts the future samples from
//! the targets, resamples between anchors and pulls samples out of obstacles.
//! After the network ran, the bridge feeds the predicted root motion and the
//! corrected future anchors back through [`TrajectoryEngine::apply_root_motion`]
//! and [`TrajectoryEngine::correct_future`].

use nalgebra::{Isometry3, Point3, Vector2, Vector3};

use crate::config::TrajectoryConfig;
use crate::controls::ControlSource;
use crate::error::Result;
use crate::math::{ground_direction, lerp, lerp_point, lerp_vector, look_rotation, repeat, yaw_rotation, EPSILON};
use crate::trajectory::Trajectory;
use crate::world::{LayerMask, World};

/// One predicted future anchor in the frame of the next root (meters).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FutureAnchor {
    /// Ground-plane position `(x, z)`.
    pub position: Vector2<f64>,
    /// Ground-plane direction `(x, z)`, not necessarily normalized.
    pub direction: Vector2<f64>,
}

#[derive(Clone)]
pub struct TrajectoryEngine {
    config: TrajectoryConfig,
    trajectory: Trajectory,
    target_direction: Vector3<f64>,
    target_velocity: Vector3<f64>,
}

impl TrajectoryEngine {
    /// Engine at rest at `position`, facing `direction`. Fails when the
    /// window shape in `config` is invalid.
    pub fn new(
        config: &TrajectoryConfig,
        position: Point3<f64>,
        direction: Vector3<f64>,
        world: &dyn World,
    ) -> Result<Self> {
        config.validate()?;
        let mut trajectory = Trajectory::new(config, position, direction);
        trajectory.postprocess(world);
        tracing::info!(
            "Trajectory engine: {} samples, root {}, {} anchors",
            config.samples,
            config.root_index,
            config.anchor_count()
        );
        Ok(Self {
            config: config.clone(),
            target_direction: trajectory.root().direction(),
            target_velocity: Vector3::zeros(),
            trajectory,
        })
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn trajectory_mut(&mut self) -> &mut Trajectory {
        &mut self.trajectory
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    pub fn target_direction(&self) -> Vector3<f64> {
        self.target_direction
    }

    pub fn target_velocity(&self) -> Vector3<f64> {
        self.target_velocity
    }

    /// Current root transform.
    pub fn root_transform(&self) -> Isometry3<f64> {
        self.trajectory.root().transformation()
    }

    /// Root transform one tick ago.
    pub fn previous_root_transform(&self) -> Isometry3<f64> {
        self.trajectory.samples()[self.trajectory.root_index() - 1].transformation()
    }

    /// Ease the target direction toward the turned root direction and the
    /// target velocity toward the commanded move.
    pub fn update_target(&mut self, controls: &dyn ControlSource) {
        let blending = self.config.target_blending;
        let turned = yaw_rotation(controls.turn_rate() * self.config.turn_degrees)
            * self.trajectory.root().direction();
        self.target_direction = lerp_vector(&self.target_direction, &turned, blending);

        let movement = controls.move_vector();
        let desired = look_rotation(&self.target_direction) * Vector3::new(movement.x, 0.0, movement.y);
        let desired = desired.try_normalize(EPSILON).unwrap_or_else(Vector3::zeros);
        self.target_velocity = lerp_vector(&self.target_velocity, &desired, blending);
    }

    /// Ease the root style weights toward the requested ones; the idle channel
    /// also follows the target speed.
    pub fn update_gait(&mut self, controls: &dyn ControlSource) {
        let transition = self.config.gait_transition;
        let speed = self.target_velocity.norm();
        let threshold = self.config.idle_speed_threshold;
        let root = self.trajectory.root_mut();
        for (i, style) in root.styles.iter_mut().enumerate() {
            *style = lerp(*style, controls.style(i), transition);
        }
        if let Some(idle) = root.styles.first_mut() {
            let stillness = 1.0 - (speed / threshold).clamp(0.0, 1.0);
            *idle = lerp(*idle, stillness, transition);
        }
    }

    /// Bend the future samples toward the targets, more strongly further out.
    pub fn predict_future(&mut self) {
        let root = self.trajectory.root_index();
        let count = self.trajectory.len();
        if root + 1 >= count {
            return;
        }
        let rescale = 1.0 / (count - (root + 1)) as f64;
        let step = self.target_velocity * rescale;
        let root_styles = self.trajectory.root().styles.clone();

        let samples = self.trajectory.samples_mut();
        let mut blended = samples[root].position;
        let mut previous = samples[root].position;
        for i in root + 1..count {
            let progress = (1.0 - (i - root) as f64 / root as f64).max(0.0);
            let scale_pos = 1.0 - progress.powf(self.config.position_bias);
            let scale_dir = 1.0 - progress.powf(self.config.direction_bias);

            let original = samples[i].position;
            blended += lerp_vector(&(original - previous), &step, scale_pos);
            previous = original;

            let sample = &mut samples[i];
            sample.position = blended;
            let direction = lerp_vector(&sample.direction(), &self.target_direction, scale_dir);
            sample.set_direction(direction);
            sample.styles.clone_from(&root_styles);
        }
    }

    /// Postprocess the anchors from the root on and re-derive the samples
    /// between them.
    pub fn resample(&mut self, world: &dyn World) {
        let root = self.trajectory.root_index();
        self.trajectory.postprocess_anchors(world, root);
        self.trajectory.resample();
    }

    /// Pull samples from `start` on back toward their predecessor when a
    /// probe of `safety_radius` in their direction hits an obstacle.
    pub fn avoid_collisions(&mut self, world: &dyn World, start: usize) {
        let safety = self.config.safety_radius;
        let samples = self.trajectory.samples_mut();
        for i in start.max(1)..samples.len() {
            let previous = samples[i - 1].position;
            let current = samples[i].position;
            let heading = (current - previous)
                .try_normalize(EPSILON)
                .unwrap_or_else(Vector3::zeros);
            let test = previous + heading * safety;
            let projected = world.project_collision(&previous, &test, LayerMask::OBSTACLES);
            if projected != test {
                let back = (previous - test).try_normalize(EPSILON).unwrap_or_else(Vector3::zeros);
                samples[i].position = test + back * safety;
                tracing::trace!("Sample {} pulled back from obstacle", i);
            }
        }
    }

    /// Drop the oldest history sample.
    pub fn shift_history(&mut self) {
        self.trajectory.shift_history();
    }

    /// Steps (a) to (e) of a tick: targets, gait, prediction, resampling and
    /// collision avoidance of the future.
    pub fn prepare(&mut self, controls: &dyn ControlSource, world: &dyn World) {
        self.update_target(controls);
        self.update_gait(controls);
        self.predict_future();
        self.resample(world);
        let start = self.trajectory.root_index() + 1;
        self.avoid_collisions(world, start);
    }

    /// Move the root by `translation` (in the current root frame, meters) and
    /// turn it by `yaw` degrees; the future moves along in the new root frame.
    /// Returns the new root transform.
    pub fn apply_root_motion(
        &mut self,
        translation: Vector3<f64>,
        yaw: f64,
        world: &dyn World,
    ) -> Isometry3<f64> {
        let current = self.root_transform();
        let width = self.trajectory.width();
        let root = self.trajectory.root_mut();
        root.position = current.transform_point(&Point3::from(translation));
        let direction = yaw_rotation(yaw) * root.direction();
        root.set_direction(direction);
        root.postprocess(world, width);
        let next = root.transformation();

        let delta = next.transform_vector(&translation);
        let start = self.trajectory.root_index() + 1;
        for sample in self.trajectory.samples_mut().iter_mut().skip(start) {
            sample.position += delta;
        }
        next
    }

    /// Blend the future samples toward the predicted anchors. `anchors[s]`
    /// describes anchor `root_anchor + s`; samples between two anchors use the
    /// linear mix of both.
    pub fn correct_future(&mut self, anchors: &[FutureAnchor], next_root: &Isometry3<f64>) {
        if anchors.is_empty() {
            return;
        }
        let correction = self.config.trajectory_correction;
        let root = self.trajectory.root_index();
        let density = self.trajectory.density();
        let root_anchor = root / density;
        let last = anchors.len() - 1;

        for (i, sample) in self.trajectory.samples_mut().iter_mut().enumerate().skip(root + 1) {
            let m = repeat((i - root) as f64 / density as f64, 1.0);
            let slot = (i / density - root_anchor).min(last);
            let (a, b) = (&anchors[slot], &anchors[(slot + 1).min(last)]);
            let position = a.position.lerp(&b.position, m);
            let direction = a.direction.lerp(&b.direction, m);

            let target = next_root.transform_point(&Point3::new(position.x, 0.0, position.y));
            sample.position = lerp_point(&sample.position, &target, correction);

            let local = ground_direction(&Vector3::new(direction.x, 0.0, direction.y), &Vector3::z());
            let target = next_root.transform_vector(&local);
            let blended = lerp_vector(&sample.direction(), &target, correction);
            sample.set_direction(blended);
        }
    }

    /// Settle the corrected future: postprocess the future anchors, resample
    /// and check collisions from the root on.
    pub fn settle_future(&mut self, world: &dyn World) {
        let root = self.trajectory.root_index();
        let density = self.trajectory.density();
        self.trajectory.postprocess_anchors(world, root + density);
        self.trajectory.resample();
        self.avoid_collisions(world, root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ScriptedControls;
    use crate::error::MotionError;
    use crate::world::{Cylinder, FlatGround, ObstacleField};
    use nalgebra::Point2;

    fn engine(world: &dyn World) -> TrajectoryEngine {
        TrajectoryEngine::new(&TrajectoryConfig::default(), Point3::origin(), Vector3::z(), world)
            .unwrap()
    }

    fn forward() -> ScriptedControls {
        ScriptedControls::constant(0.0, Vector2::new(0.0, 1.0), vec![0.0, 1.0])
    }

    /// Largest lag of a future anchor behind the constant-velocity line.
    fn deviation(engine: &TrajectoryEngine) -> f64 {
        let t = engine.trajectory();
        let root = t.root_index();
        let rescale = 1.0 / (t.len() - root - 1) as f64;
        (root + t.density()..t.len())
            .step_by(t.density())
            .map(|i| {
                let p = t.samples()[i].position;
                let ideal = (i - root) as f64 * rescale;
                (p.z - ideal).abs().max(p.x.abs())
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_rejects_invalid_window() {
        let world = FlatGround::default();
        let mut config = TrajectoryConfig::default();
        config.root_index = 0;
        let result = TrajectoryEngine::new(&config, Point3::origin(), Vector3::z(), &world);
        assert!(matches!(result, Err(MotionError::InvalidConfig(_))));

        let mut config = TrajectoryConfig::default();
        config.density = 0;
        assert!(TrajectoryEngine::new(&config, Point3::origin(), Vector3::z(), &world).is_err());
    }

    #[test]
    fn test_directions_stay_on_ground_plane() {
        let world = FlatGround::default();
        let mut engine = engine(&world);
        let controls = ScriptedControls::constant(0.7, Vector2::new(0.3, 1.0), vec![]);
        for _ in 0..30 {
            engine.prepare(&controls, &world);
            for sample in engine.trajectory().samples() {
                let d = sample.direction();
                assert!((d.norm() - 1.0).abs() < 1e-9);
                assert_eq!(d.y, 0.0);
            }
        }
    }

    #[test]
    fn test_gait_follows_speed() {
        let world = FlatGround::default();
        let mut engine = engine(&world);
        let controls = forward();
        for _ in 0..40 {
            engine.prepare(&controls, &world);
        }
        let styles = &engine.trajectory().root().styles;
        assert!(styles[0] < 0.01, "idle {}", styles[0]);
        assert!(styles[1] > 0.99, "walk {}", styles[1]);
        let last = engine.trajectory().samples().last().unwrap();
        assert_eq!(&last.styles, styles);
    }

    #[test]
    fn test_straight_line_converges() {
        let world = FlatGround::default();
        let mut engine = engine(&world);
        let controls = forward();
        let mut previous = f64::MAX;
        for tick in 0..500 {
            engine.prepare(&controls, &world);
            let d = deviation(&engine);
            if tick >= 10 {
                assert!(d <= previous + 1e-12, "tick {tick}: {d} > {previous}");
            }
            previous = d;
        }
        assert!((engine.target_velocity() - Vector3::z()).norm() < 1e-9);
        assert!(previous < 5e-3, "deviation {previous}");
    }

    #[test]
    fn test_obstacle_pulls_sample_back() {
        let world = ObstacleField::new(vec![Cylinder {
            center: Point2::new(0.0, 0.35),
            radius: 0.05,
        }]);
        let mut engine = engine(&world);
        let root = engine.trajectory().root_index();
        for (k, sample) in engine.trajectory_mut().samples_mut().iter_mut().enumerate() {
            sample.position = Point3::new(0.0, 0.0, (k as f64 - root as f64) * 0.02);
        }
        let previous = engine.trajectory().samples()[root].position;
        let naive = previous + Vector3::z() * engine.config().safety_radius;

        engine.avoid_collisions(&world, root + 1);
        let corrected = engine.trajectory().samples()[root + 1].position;
        assert!((corrected - previous).norm() < (naive - previous).norm());

        // history before the root is untouched
        assert!((engine.trajectory().samples()[root - 1].position.z + 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_free_path_is_unchanged() {
        let world = ObstacleField::new(vec![Cylinder {
            center: Point2::new(5.0, 5.0),
            radius: 0.5,
        }]);
        let mut engine = engine(&world);
        for (k, sample) in engine.trajectory_mut().samples_mut().iter_mut().enumerate() {
            sample.position = Point3::new(0.0, 0.0, k as f64 * 0.01);
        }
        let before: Vec<_> = engine.trajectory().samples().iter().map(|s| s.position).collect();
        engine.avoid_collisions(&world, 1);
        let after: Vec<_> = engine.trajectory().samples().iter().map(|s| s.position).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_root_motion_moves_future_along() {
        let world = FlatGround::default();
        let mut engine = engine(&world);
        let far = engine.trajectory().samples().last().unwrap().position;
        let next = engine.apply_root_motion(Vector3::new(0.0, 0.0, 0.1), 90.0, &world);
        let root = engine.trajectory().root();
        assert!((root.position - Point3::new(0.0, 0.0, 0.1)).norm() < 1e-12);
        assert!((root.direction() - Vector3::x()).norm() < 1e-12);
        // the step is re-expressed in the turned frame
        let moved = engine.trajectory().samples().last().unwrap().position;
        assert!((moved - far - next.transform_vector(&Vector3::new(0.0, 0.0, 0.1))).norm() < 1e-12);
    }

    #[test]
    fn test_correct_future_reaches_anchors() {
        let world = FlatGround::default();
        let mut engine = engine(&world);
        let anchors: Vec<FutureAnchor> = (0..6)
            .map(|s| FutureAnchor {
                position: Vector2::new(0.0, s as f64 * 0.2),
                direction: Vector2::new(0.0, 1.0),
            })
            .collect();
        let root = engine.root_transform();
        engine.correct_future(&anchors, &root);
        engine.settle_future(&world);
        let t = engine.trajectory();
        assert!((t.samples()[70].position.z - 0.2).abs() < 1e-9);
        assert!((t.samples()[75].position.z - 0.3).abs() < 1e-9);
        assert!((t.samples()[100].position.z - 0.8).abs() < 1e-9);
        // the last slot is held past the final anchor
        assert!((t.samples()[110].position.z - 1.0).abs() < 1e-9);
    }
}
