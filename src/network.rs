//! Network interface and the fixed input/output layout.
//!
//! With `P` anchors, `S` style channels, `J` joints and `W` future anchor
//! slots (the anchors from the root on):
//!
//! ```text
//! input  = [pos.x ×P][pos.z ×P][dir.x ×P][dir.z ×P][style_0 ×P]…[style_S-1 ×P][rise ×P]
//!          [joint pos xyz ×J][joint vel xyz ×J][right.y ×P][pos.y ×P][left.y ×P]
//! output = [dx, dz, dyaw, dphase][contacts ×4][traj pos.x ×W][pos.z ×W][dir.x ×W][dir.z ×W]
//!          [joint pos xyz ×J][joint vel xyz ×J][joint rot xyz ×J]
//! ```

use crate::config::{NetworkConfig, TrajectoryConfig};
use crate::error::{MotionError, Result};

/// Root motion and phase values at the head of the output.
pub const ROOT_OUTPUTS: usize = 4;
/// Foot contact labels following the root values.
pub const CONTACT_OUTPUTS: usize = 4;

/// Trait for motion predictors (supports dependency injection for testing).
pub trait MotionNetwork {
    /// Evaluate the network at `phase` (radians in `[0, 2π)`).
    fn predict(&mut self, input: &[f64], phase: f64) -> anyhow::Result<Vec<f64>>;

    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize;
}

/// Index arithmetic of the network vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayout {
    /// Anchor samples exchanged with the network.
    pub anchors: usize,
    /// Index of the root anchor.
    pub root_anchor: usize,
    pub styles: usize,
    pub joints: usize,
}

impl NetworkLayout {
    pub fn new(trajectory: &TrajectoryConfig, network: &NetworkConfig) -> Self {
        Self {
            anchors: trajectory.anchor_count(),
            root_anchor: trajectory.root_anchor(),
            styles: trajectory.style_count(),
            joints: network.joints,
        }
    }

    /// Future anchor slots predicted by the network (root anchor included).
    #[inline]
    pub fn future_slots(&self) -> usize {
        self.anchors - self.root_anchor
    }

    pub fn input_size(&self) -> usize {
        self.anchors * (4 + self.styles + 1) + 6 * self.joints + 3 * self.anchors
    }

    pub fn output_size(&self) -> usize {
        ROOT_OUTPUTS + CONTACT_OUTPUTS + 4 * self.future_slots() + 9 * self.joints
    }

    // ── Input offsets ──

    /// Trajectory block `k` (0 pos.x, 1 pos.z, 2 dir.x, 3 dir.z), anchor `i`.
    #[inline]
    pub fn trajectory_input(&self, k: usize, i: usize) -> usize {
        self.anchors * k + i
    }

    #[inline]
    pub fn style_input(&self, channel: usize, i: usize) -> usize {
        self.anchors * (4 + channel) + i
    }

    #[inline]
    pub fn rise_input(&self, i: usize) -> usize {
        self.anchors * (4 + self.styles) + i
    }

    #[inline]
    fn joint_input_base(&self) -> usize {
        self.anchors * (4 + self.styles + 1)
    }

    #[inline]
    pub fn joint_position_input(&self, joint: usize) -> usize {
        self.joint_input_base() + 3 * joint
    }

    #[inline]
    pub fn joint_velocity_input(&self, joint: usize) -> usize {
        self.joint_input_base() + 3 * self.joints + 3 * joint
    }

    /// Height block `k` (0 right probe, 1 position, 2 left probe), anchor `i`.
    #[inline]
    pub fn height_input(&self, k: usize, i: usize) -> usize {
        self.joint_input_base() + 6 * self.joints + self.anchors * k + i
    }

    // ── Output offsets ──

    /// Trajectory block `k` (0 pos.x, 1 pos.z, 2 dir.x, 3 dir.z), slot `s`.
    #[inline]
    pub fn trajectory_output(&self, k: usize, s: usize) -> usize {
        ROOT_OUTPUTS + CONTACT_OUTPUTS + self.future_slots() * k + s
    }

    #[inline]
    fn joint_output_base(&self) -> usize {
        ROOT_OUTPUTS + CONTACT_OUTPUTS + 4 * self.future_slots()
    }

    #[inline]
    pub fn joint_position_output(&self, joint: usize) -> usize {
        self.joint_output_base() + 3 * joint
    }

    #[inline]
    pub fn joint_velocity_output(&self, joint: usize) -> usize {
        self.joint_output_base() + 3 * self.joints + 3 * joint
    }

    #[inline]
    pub fn joint_rotation_output(&self, joint: usize) -> usize {
        self.joint_output_base() + 6 * self.joints + 3 * joint
    }

    /// Check a network's tensor sizes against this layout.
    pub fn validate(&self, network: &dyn MotionNetwork) -> Result<()> {
        if network.input_size() != self.input_size() {
            return Err(MotionError::LayoutMismatch {
                what: "input",
                expected: self.input_size(),
                actual: network.input_size(),
            });
        }
        if network.output_size() != self.output_size() {
            return Err(MotionError::LayoutMismatch {
                what: "output",
                expected: self.output_size(),
                actual: network.output_size(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSize(usize, usize);

    impl MotionNetwork for FixedSize {
        fn predict(&mut self, _input: &[f64], _phase: f64) -> anyhow::Result<Vec<f64>> {
            Ok(vec![0.0; self.1])
        }

        fn input_size(&self) -> usize {
            self.0
        }

        fn output_size(&self) -> usize {
            self.1
        }
    }

    fn layout() -> NetworkLayout {
        NetworkLayout::new(&TrajectoryConfig::default(), &NetworkConfig::default())
    }

    #[test]
    fn test_default_sizes() {
        let layout = layout();
        assert_eq!(layout.anchors, 12);
        assert_eq!(layout.future_slots(), 6);
        assert_eq!(layout.input_size(), 342);
        assert_eq!(layout.output_size(), 311);
    }

    #[test]
    fn test_offsets_tile_the_vectors() {
        let layout = layout();
        assert_eq!(layout.rise_input(0), 108);
        assert_eq!(layout.joint_position_input(0), 120);
        assert_eq!(layout.joint_velocity_input(0), 213);
        assert_eq!(layout.height_input(2, 11), layout.input_size() - 1);
        assert_eq!(layout.trajectory_output(0, 0), 8);
        assert_eq!(layout.trajectory_output(3, 5), 31);
        assert_eq!(layout.joint_position_output(0), 32);
        assert_eq!(layout.joint_rotation_output(30) + 2, layout.output_size() - 1);
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let layout = layout();
        layout.validate(&FixedSize(342, 311)).unwrap();
        let err = layout.validate(&FixedSize(342, 300)).unwrap_err();
        assert!(matches!(
            err,
            MotionError::LayoutMismatch {
                what: "output",
                expected: 311,
                actual: 300
            }
        ));
    }
}
