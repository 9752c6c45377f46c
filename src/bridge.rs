//! Per-tick glue between the trajectory engine and the motion network.
//!
//! A tick runs the engine's prediction pipeline, encodes the trajectory and
//! the previous posture into the network input, evaluates the network at the
//! current phase, then decodes the output: root motion, corrected future
//! trajectory, joint posture and phase advance. The resulting [`Pose`] goes
//! to the host's [`SkeletonBinder`].
//!
//! Without an attached network the tick is a no-op.

use anyhow::{bail, Result};
use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector2, Vector3};

use crate::config::MotionConfig;
use crate::controls::ControlSource;
use crate::engine::{FutureAnchor, TrajectoryEngine};
use crate::error::MotionError;
use crate::math::{exp_map, lerp_vector};
use crate::network::{MotionNetwork, NetworkLayout, CONTACT_OUTPUTS, ROOT_OUTPUTS};
use crate::phase_clock::PhaseClock;
use crate::world::World;

/// World-space state of one joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPose {
    pub position: Point3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub velocity: Vector3<f64>,
}

/// Character pose produced by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub root: Isometry3<f64>,
    pub joints: Vec<JointPose>,
    /// Foot contact labels as predicted.
    pub contacts: [f64; CONTACT_OUTPUTS],
    /// Phase after the tick, radians.
    pub phase: f64,
}

/// Trait for writing poses into a renderable hierarchy (supports dependency
/// injection for testing).
pub trait SkeletonBinder {
    fn apply(&mut self, pose: &Pose);
}

/// Damping of root motion and phase advance by the idle style weight.
pub fn rest_factor(styles: &[f64]) -> f64 {
    let idle = styles.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
    (1.0 - idle).powf(0.25)
}

pub struct InferenceBridge {
    engine: TrajectoryEngine,
    layout: NetworkLayout,
    unit_scale: f64,
    network: Option<Box<dyn MotionNetwork + Send>>,
    joints: Vec<JointPose>,
    clock: PhaseClock,
    input: Vec<f64>,
}

impl InferenceBridge {
    /// Bridge at rest at `position` facing `direction`, every joint at the
    /// root until [`InferenceBridge::set_posture`] is called. Fails on an
    /// invalid trajectory or network section in `config`.
    pub fn new(
        config: &MotionConfig,
        position: Point3<f64>,
        direction: Vector3<f64>,
        world: &dyn World,
    ) -> crate::error::Result<Self> {
        config.network.validate()?;
        let engine = TrajectoryEngine::new(&config.trajectory, position, direction, world)?;
        let layout = NetworkLayout::new(&config.trajectory, &config.network);
        let root = engine.trajectory().root().position;
        tracing::info!(
            "Inference bridge: {} inputs, {} outputs, {} joints",
            layout.input_size(),
            layout.output_size(),
            layout.joints
        );
        Ok(Self {
            engine,
            layout,
            unit_scale: config.network.unit_scale,
            network: None,
            joints: vec![
                JointPose {
                    position: root,
                    rotation: UnitQuaternion::identity(),
                    velocity: Vector3::zeros(),
                };
                layout.joints
            ],
            clock: PhaseClock::new(config.network.idle_phase_rate),
            input: vec![0.0; layout.input_size()],
        })
    }

    /// Attach a network after checking its sizes against the layout.
    pub fn attach(&mut self, network: Box<dyn MotionNetwork + Send>) -> crate::error::Result<()> {
        self.layout.validate(network.as_ref())?;
        tracing::info!(
            "Attached motion network ({} -> {})",
            network.input_size(),
            network.output_size()
        );
        self.network = Some(network);
        Ok(())
    }

    pub fn detach(&mut self) -> Option<Box<dyn MotionNetwork + Send>> {
        self.network.take()
    }

    pub fn is_enabled(&self) -> bool {
        self.network.is_some()
    }

    pub fn engine(&self) -> &TrajectoryEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TrajectoryEngine {
        &mut self.engine
    }

    pub fn layout(&self) -> &NetworkLayout {
        &self.layout
    }

    pub fn phase(&self) -> f64 {
        self.clock.phase()
    }

    pub fn joints(&self) -> &[JointPose] {
        &self.joints
    }

    /// Input vector of the last tick.
    pub fn input(&self) -> &[f64] {
        &self.input
    }

    /// Replace the joint positions and rotations (world space); velocities
    /// reset to zero.
    pub fn set_posture(
        &mut self,
        positions: &[Point3<f64>],
        rotations: &[UnitQuaternion<f64>],
    ) -> crate::error::Result<()> {
        if positions.len() != self.layout.joints || rotations.len() != self.layout.joints {
            return Err(MotionError::invalid_input(format!(
                "posture has {} positions and {} rotations, character has {} joints",
                positions.len(),
                rotations.len(),
                self.layout.joints
            )));
        }
        for ((joint, position), rotation) in self.joints.iter_mut().zip(positions).zip(rotations) {
            *joint = JointPose {
                position: *position,
                rotation: *rotation,
                velocity: Vector3::zeros(),
            };
        }
        Ok(())
    }

    /// Run one tick. Returns `Ok(None)` when no network is attached.
    ///
    /// When the network fails or returns the wrong number of outputs the
    /// trajectory is rolled back to its state before the tick; the phase and
    /// posture are only touched once a prediction succeeded.
    pub fn tick(
        &mut self,
        controls: &dyn ControlSource,
        world: &dyn World,
        binder: &mut dyn SkeletonBinder,
    ) -> Result<Option<Pose>> {
        if self.network.is_none() {
            tracing::trace!("No motion network attached, tick skipped");
            return Ok(None);
        }

        let checkpoint = self.engine.clone();
        self.engine.prepare(controls, world);

        let current = self.engine.root_transform();
        let previous = self.engine.previous_root_transform();
        self.encode(&current, &previous);

        let output = match self.predict() {
            Ok(Some(output)) => output,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.engine = checkpoint;
                return Err(e);
            }
        };

        let pose = self.decode(&output, &current, world);
        binder.apply(&pose);
        Ok(Some(pose))
    }

    /// Evaluate the network on the current input at the current phase.
    fn predict(&mut self) -> Result<Option<Vec<f64>>> {
        let phase = self.clock.phase();
        let Some(network) = self.network.as_mut() else {
            return Ok(None);
        };
        let output = network.predict(&self.input, phase)?;
        if output.len() != self.layout.output_size() {
            bail!(
                "Network returned {} outputs, layout expects {}",
                output.len(),
                self.layout.output_size()
            );
        }
        Ok(Some(output))
    }

    /// Fill the input vector from the trajectory and the previous posture.
    fn encode(&mut self, current: &Isometry3<f64>, previous: &Isometry3<f64>) {
        let layout = self.layout;
        let scale = self.unit_scale;
        let trajectory = self.engine.trajectory();
        let root_height = current.translation.vector.y;
        let input = &mut self.input;

        for i in 0..layout.anchors {
            let sample = trajectory.anchor(i);
            let position = current.inverse_transform_point(&sample.position);
            let direction = current.inverse_transform_vector(&sample.direction());
            input[layout.trajectory_input(0, i)] = scale * position.x;
            input[layout.trajectory_input(1, i)] = scale * position.z;
            input[layout.trajectory_input(2, i)] = direction.x;
            input[layout.trajectory_input(3, i)] = direction.z;

            for channel in 0..layout.styles {
                input[layout.style_input(channel, i)] =
                    sample.styles.get(channel).copied().unwrap_or(0.0);
            }
            input[layout.rise_input(i)] = sample.rise;

            input[layout.height_input(0, i)] = scale * (sample.right.y - root_height);
            input[layout.height_input(1, i)] = scale * (sample.position.y - root_height);
            input[layout.height_input(2, i)] = scale * (sample.left.y - root_height);
        }

        for (j, joint) in self.joints.iter().enumerate() {
            let position = previous.inverse_transform_point(&joint.position);
            let velocity = previous.inverse_transform_vector(&joint.velocity);
            let p = layout.joint_position_input(j);
            let v = layout.joint_velocity_input(j);
            for axis in 0..3 {
                input[p + axis] = scale * position[axis];
                input[v + axis] = scale * velocity[axis];
            }
        }
    }

    /// Apply the network output to the trajectory, posture and phase.
    fn decode(&mut self, output: &[f64], current: &Isometry3<f64>, world: &dyn World) -> Pose {
        let layout = self.layout;
        let scale = self.unit_scale;

        // ── Root motion ──
        self.engine.shift_history();
        let rest = rest_factor(&self.engine.trajectory().root().styles);
        let translation = Vector3::new(output[0], 0.0, output[1]) / scale * rest;
        let yaw = rest * (-output[2]).to_degrees();
        let next = self.engine.apply_root_motion(translation, yaw, world);

        // ── Future trajectory ──
        let anchors: Vec<FutureAnchor> = (0..layout.future_slots())
            .map(|s| FutureAnchor {
                position: Vector2::new(
                    output[layout.trajectory_output(0, s)],
                    output[layout.trajectory_output(1, s)],
                ) / scale,
                direction: Vector2::new(
                    output[layout.trajectory_output(2, s)],
                    output[layout.trajectory_output(3, s)],
                ),
            })
            .collect();
        self.engine.correct_future(&anchors, &next);
        self.engine.settle_future(world);

        // ── Posture ──
        let triple = |offset: usize| Vector3::new(output[offset], output[offset + 1], output[offset + 2]);
        for (j, joint) in self.joints.iter_mut().enumerate() {
            let position = triple(layout.joint_position_output(j)) / scale;
            let velocity = triple(layout.joint_velocity_output(j)) / scale;
            let rotation = exp_map(&triple(layout.joint_rotation_output(j)));

            let previous = current.inverse_transform_point(&joint.position).coords;
            let blended = lerp_vector(&(previous + velocity), &position, 0.5);
            *joint = JointPose {
                position: current.transform_point(&Point3::from(blended)),
                rotation: current.rotation * rotation,
                velocity: current.transform_vector(&velocity),
            };
        }

        // ── Phase ──
        let phase = self.clock.advance_by_rate(output[ROOT_OUTPUTS - 1], rest);

        let mut contacts = [0.0; CONTACT_OUTPUTS];
        contacts.copy_from_slice(&output[ROOT_OUTPUTS..ROOT_OUTPUTS + CONTACT_OUTPUTS]);

        tracing::debug!(
            "Tick: root ({:.3}, {:.3}), phase {:.3}, rest {:.2}",
            next.translation.vector.x,
            next.translation.vector.z,
            phase,
            rest
        );

        Pose {
            root: next,
            joints: self.joints.clone(),
            contacts,
            phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ScriptedControls;
    use crate::world::FlatGround;
    use std::f64::consts::TAU;

    /// Constant-output network.
    struct Scripted {
        layout: NetworkLayout,
        output: Vec<f64>,
    }

    impl MotionNetwork for Scripted {
        fn predict(&mut self, input: &[f64], _phase: f64) -> anyhow::Result<Vec<f64>> {
            assert_eq!(input.len(), self.layout.input_size());
            Ok(self.output.clone())
        }

        fn input_size(&self) -> usize {
            self.layout.input_size()
        }

        fn output_size(&self) -> usize {
            self.layout.output_size()
        }
    }

    #[derive(Default)]
    struct Recorder {
        poses: Vec<Pose>,
    }

    impl SkeletonBinder for Recorder {
        fn apply(&mut self, pose: &Pose) {
            self.poses.push(pose.clone());
        }
    }

    fn bridge() -> InferenceBridge {
        InferenceBridge::new(
            &MotionConfig::default(),
            Point3::origin(),
            Vector3::z(),
            &FlatGround::default(),
        )
        .unwrap()
    }

    /// Network stepping 1 cm forward per tick, with a straight future and a
    /// fixed phase rate.
    fn walker(layout: NetworkLayout) -> Scripted {
        let mut output = vec![0.0; layout.output_size()];
        output[1] = 1.0;
        output[3] = 0.05;
        output[ROOT_OUTPUTS] = 1.0;
        for s in 0..layout.future_slots() {
            output[layout.trajectory_output(1, s)] = s as f64 * 20.0;
            output[layout.trajectory_output(3, s)] = 1.0;
        }
        for j in 0..layout.joints {
            output[layout.joint_position_output(j) + 1] = 100.0;
        }
        Scripted { layout, output }
    }

    #[test]
    fn test_without_network_nothing_changes() {
        let mut bridge = bridge();
        let before = bridge.engine().trajectory().samples().to_vec();
        let mut binder = Recorder::default();
        let controls = ScriptedControls::constant(0.0, Vector2::new(0.0, 1.0), vec![0.0, 1.0]);
        let pose = bridge.tick(&controls, &FlatGround::default(), &mut binder).unwrap();
        assert!(pose.is_none());
        assert!(binder.poses.is_empty());
        assert_eq!(bridge.engine().trajectory().samples(), before.as_slice());
        assert_eq!(bridge.phase(), 0.0);
    }

    #[test]
    fn test_attach_rejects_wrong_sizes() {
        let mut bridge = bridge();
        let mut layout = *bridge.layout();
        layout.joints = 20;
        let err = bridge.attach(Box::new(walker(layout))).unwrap_err();
        assert!(matches!(err, MotionError::LayoutMismatch { what: "input", .. }));
        assert!(!bridge.is_enabled());
    }

    #[test]
    fn test_tick_moves_root_and_advances_phase() {
        let world = FlatGround::default();
        let mut bridge = bridge();
        let layout = *bridge.layout();
        bridge.attach(Box::new(walker(layout))).unwrap();
        let controls = ScriptedControls::constant(0.0, Vector2::new(0.0, 1.0), vec![0.0, 1.0]);
        let mut binder = Recorder::default();

        let pose = bridge.tick(&controls, &world, &mut binder).unwrap().unwrap();
        assert_eq!(binder.poses.len(), 1);

        // root anchor sits at the origin of its own frame, facing +z
        let input = bridge.input();
        assert_eq!(input[layout.trajectory_input(0, layout.root_anchor)], 0.0);
        assert!((input[layout.trajectory_input(3, layout.root_anchor)] - 1.0).abs() < 1e-12);

        assert!((pose.root.translation.vector - Vector3::new(0.0, 0.0, 0.01)).norm() < 1e-12);
        assert!((pose.phase - 0.05 * TAU).abs() < 1e-12);
        assert_eq!(pose.contacts, [1.0, 0.0, 0.0, 0.0]);
        // posture halfway between the carried joint and the prediction, 1 m up
        assert!((pose.joints[0].position.y - 0.5).abs() < 1e-12);

        // the future follows the predicted anchors in the new root frame
        let t = bridge.engine().trajectory();
        let anchor = t.samples()[t.root_index() + t.density()].position;
        assert!((anchor.z - 0.21).abs() < 1e-9, "anchor {anchor}");
        for sample in t.samples() {
            assert!((sample.direction() - Vector3::z()).norm() < 1e-9);
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let world = FlatGround::default();
        let mut config = MotionConfig::default();
        config.trajectory.root_index = 0;
        let result = InferenceBridge::new(&config, Point3::origin(), Vector3::z(), &world);
        assert!(matches!(result, Err(MotionError::InvalidConfig(_))));

        let mut config = MotionConfig::default();
        config.network.unit_scale = -1.0;
        assert!(InferenceBridge::new(&config, Point3::origin(), Vector3::z(), &world).is_err());
    }

    #[test]
    fn test_failed_prediction_rolls_back_trajectory() {
        let world = FlatGround::default();
        let mut bridge = bridge();
        let layout = *bridge.layout();
        let mut network = walker(layout);
        network.output.truncate(10);
        // attach checks the declared sizes, the truncated output only shows at runtime
        bridge.attach(Box::new(network)).unwrap();

        let before = bridge.engine().trajectory().samples().to_vec();
        let target = bridge.engine().target_velocity();
        let controls = ScriptedControls::constant(0.5, Vector2::new(0.0, 1.0), vec![0.0, 1.0]);
        let mut binder = Recorder::default();

        assert!(bridge.tick(&controls, &world, &mut binder).is_err());
        assert!(binder.poses.is_empty());
        assert_eq!(bridge.engine().trajectory().samples(), before.as_slice());
        assert_eq!(bridge.engine().target_velocity(), target);
        assert_eq!(bridge.phase(), 0.0);
    }

    #[test]
    fn test_full_idle_damps_root_motion() {
        let world = FlatGround::default();
        let mut bridge = bridge();
        let layout = *bridge.layout();
        bridge.attach(Box::new(walker(layout))).unwrap();
        bridge.engine_mut().trajectory_mut().root_mut().styles[0] = 1.0;
        let controls = ScriptedControls::constant(0.0, Vector2::zeros(), vec![1.0]);
        let mut binder = Recorder::default();

        let pose = bridge.tick(&controls, &world, &mut binder).unwrap().unwrap();
        assert!(pose.root.translation.vector.norm() < 1e-12);
        // phase keeps cycling at the idle floor
        assert!((pose.phase - 0.1 * 0.05 * TAU).abs() < 1e-12);
    }

    #[test]
    fn test_set_posture_checks_joint_count() {
        let mut bridge = bridge();
        let joints = bridge.layout().joints;
        let positions = vec![Point3::new(0.0, 1.0, 0.0); joints];
        let rotations = vec![UnitQuaternion::identity(); joints];
        bridge.set_posture(&positions, &rotations).unwrap();
        assert_eq!(bridge.joints()[3].position.y, 1.0);
        assert!(bridge.set_posture(&positions[1..], &rotations).is_err());
    }

    #[test]
    fn test_rest_factor() {
        assert_eq!(rest_factor(&[0.0, 1.0]), 1.0);
        assert_eq!(rest_factor(&[1.0]), 0.0);
        assert_eq!(rest_factor(&[]), 1.0);
        assert!((rest_factor(&[0.9375]) - 0.5).abs() < 1e-12);
    }
}
