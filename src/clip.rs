//! Captured motion clip and frame sampling.
//!
//! A clip is a sequence of per-frame joint world transforms at a fixed frame
//! time. Parsing the original capture format is left to the exporter; clips
//! arrive here as a neutral JSON document.

use anyhow::{Context, Result as AnyResult};
use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MotionError, Result};
use crate::math::{ground_direction, mirror_isometry, mirror_point, mirror_vector};
use crate::style::StyleFunction;
use crate::trajectory::{Trajectory, TrajectorySample};
use crate::world::World;

/// Past and future anchors of an extracted network trajectory.
const EXTRACT_PAST: usize = 6;
const EXTRACT_FUTURE: usize = 5;
/// Time span covered by the past and by the future anchors (s).
const EXTRACT_HORIZON: f64 = 1.0;

/// Serialized joint transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointRecord {
    pub position: [f64; 3],
    /// Quaternion as `[x, y, z, w]`.
    pub rotation: [f64; 4],
}

/// On-disk clip layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipDocument {
    pub frame_time: f64,
    pub joints: Vec<String>,
    pub frames: Vec<Vec<JointRecord>>,
}

/// A captured clip: joint world transforms per frame.
#[derive(Debug, Clone)]
pub struct Clip {
    frame_time: f64,
    joint_names: Vec<String>,
    frames: Vec<Vec<Isometry3<f64>>>,
    symmetry: Vec<usize>,
}

impl Clip {
    pub fn new(
        frame_time: f64,
        joint_names: Vec<String>,
        frames: Vec<Vec<Isometry3<f64>>>,
    ) -> Result<Self> {
        if frame_time <= 0.0 {
            return Err(MotionError::invalid_input("frame time must be positive"));
        }
        if frames.is_empty() {
            return Err(MotionError::invalid_input("clip has no frames"));
        }
        if let Some(index) = frames.iter().position(|f| f.len() != joint_names.len()) {
            return Err(MotionError::invalid_input(format!(
                "frame {index} has {} joints, expected {}",
                frames[index].len(),
                joint_names.len()
            )));
        }
        let symmetry = compute_symmetry(&joint_names);
        Ok(Self {
            frame_time,
            joint_names,
            frames,
            symmetry,
        })
    }

    /// Load a clip document from JSON.
    pub fn load(path: &Path) -> AnyResult<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read clip {}", path.display()))?;
        let document: ClipDocument =
            serde_json::from_str(&contents).context("Failed to parse clip JSON")?;
        let clip = Self::from_document(document)?;
        tracing::info!(
            "Loaded clip {} ({} frames, {} joints, {:.2}s)",
            path.display(),
            clip.frame_count(),
            clip.joint_count(),
            clip.duration()
        );
        Ok(clip)
    }

    pub fn from_document(document: ClipDocument) -> Result<Self> {
        let frames = document
            .frames
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|j| {
                        let [x, y, z] = j.position;
                        let [qx, qy, qz, qw] = j.rotation;
                        Isometry3::from_parts(
                            Translation3::new(x, y, z),
                            UnitQuaternion::new_normalize(Quaternion::new(qw, qx, qy, qz)),
                        )
                    })
                    .collect()
            })
            .collect();
        Self::new(document.frame_time, document.joints, frames)
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joint_names.len()
    }

    #[inline]
    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    /// Timestamp of the last frame.
    #[inline]
    pub fn duration(&self) -> f64 {
        (self.frames.len() - 1) as f64 * self.frame_time
    }

    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.joint_names.iter().position(|n| n == name)
    }

    /// Mirror partner of every joint (itself for central joints).
    pub fn symmetry(&self) -> &[usize] {
        &self.symmetry
    }

    #[inline]
    pub fn timestamp(&self, frame: usize) -> f64 {
        frame as f64 * self.frame_time
    }

    pub fn frame(&self, index: usize) -> Result<&[Isometry3<f64>]> {
        self.frames
            .get(index)
            .map(Vec::as_slice)
            .ok_or(MotionError::FrameOutOfRange {
                frame: index,
                frames: self.frames.len(),
            })
    }

    /// Nearest frame to `time`.
    pub fn frame_index(&self, time: f64) -> Result<usize> {
        let duration = self.duration();
        if !(0.0..=duration).contains(&time) {
            return Err(MotionError::TimeOutOfRange { time, duration });
        }
        Ok(((time / self.frame_time).round() as usize).min(self.frames.len() - 1))
    }

    /// Nearest frame to `time`, clamping out-of-range requests.
    pub fn frame_index_clamped(&self, time: f64) -> usize {
        match self.frame_index(time) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("{}; clamping", e);
                self.frame_index(time.clamp(0.0, self.duration())).unwrap_or(0)
            }
        }
    }

    /// Joint transforms interpolated at an arbitrary timestamp.
    pub fn sample_at(&self, time: f64) -> Result<Vec<Isometry3<f64>>> {
        let duration = self.duration();
        if !(0.0..=duration).contains(&time) {
            return Err(MotionError::TimeOutOfRange { time, duration });
        }
        let u = time / self.frame_time;
        let i0 = (u.floor() as usize).min(self.frames.len() - 1);
        let i1 = (i0 + 1).min(self.frames.len() - 1);
        let factor = (u - i0 as f64).clamp(0.0, 1.0);
        Ok(self.frames[i0]
            .iter()
            .zip(self.frames[i1].iter())
            .map(|(a, b)| a.lerp_slerp(b, factor))
            .collect())
    }

    /// Like [`Clip::sample_at`], clamping the timestamp into the clip.
    pub fn sample_at_clamped(&self, time: f64) -> Vec<Isometry3<f64>> {
        match self.sample_at(time) {
            Ok(pose) => pose,
            Err(e) => {
                tracing::warn!("{}; clamping", e);
                let index = if time < 0.0 { 0 } else { self.frames.len() - 1 };
                self.frames[index].clone()
            }
        }
    }

    #[inline]
    fn position(&self, frame: usize, joint: usize) -> Point3<f64> {
        Point3::from(self.frames[frame][joint].translation.vector)
    }

    fn check_joint(&self, joint: usize) -> Result<()> {
        if joint >= self.joint_count() {
            return Err(MotionError::UnknownJoint {
                joint,
                joints: self.joint_count(),
            });
        }
        Ok(())
    }

    /// Velocity (m/s) of one joint at `frame`.
    ///
    /// Zero smoothing uses a central difference (one-sided at the clip
    /// bounds); otherwise the frame-to-frame displacement is averaged over
    /// `[t - smoothing/2, t + smoothing/2]` clamped to the clip.
    pub fn velocity_at(&self, frame: usize, joint: usize, smoothing: f64) -> Result<Vector3<f64>> {
        self.frame(frame)?;
        self.check_joint(joint)?;
        let last = self.frames.len() - 1;
        if last == 0 {
            return Ok(Vector3::zeros());
        }

        let (lo, hi) = if smoothing <= 0.0 {
            (frame.saturating_sub(1), (frame + 1).min(last))
        } else {
            let t = self.timestamp(frame);
            let duration = self.duration();
            (
                self.frame_index_clamped((t - 0.5 * smoothing).max(0.0)),
                self.frame_index_clamped((t + 0.5 * smoothing).min(duration)),
            )
        };
        if hi == lo {
            return Ok(Vector3::zeros());
        }
        let displacement = self.position(hi, joint) - self.position(lo, joint);
        Ok(displacement / ((hi - lo) as f64 * self.frame_time))
    }

    /// Velocities of every joint at `frame`, optionally mirrored.
    pub fn velocities_at(&self, frame: usize, smoothing: f64, mirrored: bool) -> Result<Vec<Vector3<f64>>> {
        (0..self.joint_count())
            .map(|j| {
                if mirrored {
                    self.velocity_at(frame, self.symmetry[j], smoothing)
                        .map(|v| mirror_vector(&v))
                } else {
                    self.velocity_at(frame, j, smoothing)
                }
            })
            .collect()
    }

    /// Like [`Clip::velocities_at`], clamping `frame` into the clip.
    pub fn velocities_at_clamped(&self, frame: usize, smoothing: f64, mirrored: bool) -> Vec<Vector3<f64>> {
        let last = self.frames.len() - 1;
        if frame > last {
            tracing::warn!("Frame {} is outside of the clip range [0, {}); clamping", frame, last + 1);
        }
        self.velocities_at(frame.min(last), smoothing, mirrored)
            .unwrap_or_else(|_| vec![Vector3::zeros(); self.joint_count()])
    }

    /// Joint transforms at `frame`, optionally mirrored.
    pub fn transformations(&self, frame: usize, mirrored: bool) -> Result<Vec<Isometry3<f64>>> {
        let pose = self.frame(frame)?;
        Ok(if mirrored {
            self.symmetry
                .iter()
                .map(|&j| mirror_isometry(&pose[j]))
                .collect()
        } else {
            pose.to_vec()
        })
    }

    /// Ground-projected root trajectory with one sample per frame. The facing
    /// direction points from `facing.0` to `facing.1` (e.g. hips to neck).
    pub fn root_trajectory(
        &self,
        root_joint: usize,
        facing: (usize, usize),
        world: &dyn World,
        width: f64,
        style_count: usize,
    ) -> Result<Trajectory> {
        self.check_joint(root_joint)?;
        self.check_joint(facing.0)?;
        self.check_joint(facing.1)?;

        let mut samples = Vec::with_capacity(self.frames.len());
        let mut previous = Vector3::z();
        for frame in 0..self.frames.len() {
            let position = self.position(frame, root_joint);
            let span = self.position(frame, facing.1) - self.position(frame, facing.0);
            let direction = ground_direction(&span, &previous);
            previous = direction;

            let mut sample = TrajectorySample::new(position, direction, style_count);
            sample.postprocess(world, width);
            samples.push(sample);
        }
        Ok(Trajectory::from_samples(samples, 0, 1, width))
    }

    /// Network-density trajectory around `frame`: six past anchors over one
    /// second, the current frame and five future anchors over one second.
    pub fn extract_trajectory(
        &self,
        root: &Trajectory,
        frame: usize,
        styles: &StyleFunction,
        mirrored: bool,
    ) -> Result<Trajectory> {
        self.frame(frame)?;
        if root.len() != self.frames.len() {
            return Err(MotionError::invalid_input(format!(
                "root trajectory has {} samples, clip has {} frames",
                root.len(),
                self.frames.len()
            )));
        }

        let now = self.timestamp(frame);
        let duration = self.duration();
        let past = (0..EXTRACT_PAST)
            .map(|i| now - EXTRACT_HORIZON + i as f64 * EXTRACT_HORIZON / EXTRACT_PAST as f64);
        let future = (1..=EXTRACT_FUTURE)
            .map(|i| now + i as f64 * EXTRACT_HORIZON / EXTRACT_FUTURE as f64);

        let samples = past
            .chain(std::iter::once(now))
            .chain(future)
            .map(|t| {
                let index = self.frame_index_clamped(t.clamp(0.0, duration));
                let mut sample = root.samples()[index].clone();
                sample.styles = styles.values_at(index);
                if mirrored {
                    sample.position = mirror_point(&sample.position);
                    let direction = mirror_vector(&sample.direction());
                    sample.set_direction(direction);
                    sample.left = mirror_point(&sample.left);
                    sample.right = mirror_point(&sample.right);
                }
                sample
            })
            .collect();

        Ok(Trajectory::from_samples(samples, EXTRACT_PAST, 1, root.width()))
    }
}

/// Pair `Left*`/`Right*` and `L<Upper>`/`R<Upper>` joints by name.
fn compute_symmetry(names: &[String]) -> Vec<usize> {
    let find = |name: String| names.iter().position(|n| *n == name);
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let partner = if let Some(rest) = name.strip_prefix("Left") {
                Some(format!("Right{rest}"))
            } else if let Some(rest) = name.strip_prefix("Right") {
                Some(format!("Left{rest}"))
            } else if is_short_side(name, 'L') {
                Some(format!("R{}", &name[1..]))
            } else if is_short_side(name, 'R') {
                Some(format!("L{}", &name[1..]))
            } else {
                None
            };
            match partner {
                None => i,
                Some(partner) => find(partner.clone()).unwrap_or_else(|| {
                    tracing::warn!("Could not find mirror joint {} for {}", partner, name);
                    i
                }),
            }
        })
        .collect()
}

fn is_short_side(name: &str, side: char) -> bool {
    let mut chars = name.chars();
    chars.next() == Some(side) && chars.next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::FlatGround;

    /// Two joints: "Hips" moving along +z at 1 m/s, "Neck" 0.5 m ahead of it.
    fn walking_clip(frames: usize) -> Clip {
        let dt = 0.1;
        let poses = (0..frames)
            .map(|f| {
                let z = f as f64 * dt;
                vec![
                    Isometry3::translation(0.0, 1.0, z),
                    Isometry3::translation(0.0, 1.5, z + 0.5),
                ]
            })
            .collect();
        Clip::new(dt, vec!["Hips".into(), "Neck".into()], poses).unwrap()
    }

    #[test]
    fn test_frame_index_rejects_out_of_range() {
        let clip = walking_clip(11);
        assert_eq!(clip.frame_index(0.52).unwrap(), 5);
        let err = clip.frame_index(1.5).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(clip.frame_index_clamped(1.5), 10);
        assert_eq!(clip.frame_index_clamped(-3.0), 0);
    }

    #[test]
    fn test_sample_at_interpolates() {
        let clip = walking_clip(11);
        let pose = clip.sample_at(0.25).unwrap();
        assert!((pose[0].translation.vector.z - 0.25).abs() < 1e-12);
        assert!(clip.sample_at(-0.1).is_err());
        let clamped = clip.sample_at_clamped(5.0);
        assert!((clamped[0].translation.vector.z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_central_and_smoothed() {
        let clip = walking_clip(11);
        let v = clip.velocity_at(5, 0, 0.0).unwrap();
        assert!((v - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-9);
        let edge = clip.velocity_at(0, 0, 0.0).unwrap();
        assert!((edge.z - 1.0).abs() < 1e-9);
        let smooth = clip.velocity_at(5, 0, 0.4).unwrap();
        assert!((smooth.z - 1.0).abs() < 1e-9);
        assert!(clip.velocity_at(11, 0, 0.0).is_err());
        assert!(clip.velocity_at(3, 7, 0.0).is_err());

        let clamped = clip.velocities_at_clamped(40, 0.0, false);
        assert_eq!(clamped.len(), 2);
        assert!((clamped[1].z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetry_pairs_names() {
        let names: Vec<String> = ["Hips", "LeftFoot", "RightFoot", "LHand", "RHand", "Lamp"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(compute_symmetry(&names), vec![0, 2, 1, 4, 3, 5]);
    }

    #[test]
    fn test_extract_trajectory_spans_two_seconds() {
        let clip = walking_clip(41);
        let root = clip
            .root_trajectory(0, (0, 1), &FlatGround::default(), 0.5, 2)
            .unwrap();
        let styles = StyleFunction::new(&["Idle".to_string(), "Walk".to_string()], 41, 0.1, 0.25);
        let t = clip.extract_trajectory(&root, 20, &styles, false).unwrap();
        assert_eq!(t.len(), 12);
        assert_eq!(t.root_index(), 6);
        assert!((t.root().position.z - 2.0).abs() < 1e-9);
        assert!((t.samples()[0].position.z - 1.0).abs() < 1e-9);
        assert!((t.samples()[11].position.z - 3.0).abs() < 1e-9);
        assert_eq!(t.root().position.y, 0.0);

        let mirrored = clip.extract_trajectory(&root, 20, &styles, true).unwrap();
        assert!((mirrored.root().position.z + 2.0).abs() < 1e-9);
        assert!((mirrored.root().direction().z + 1.0).abs() < 1e-9);
    }
}
