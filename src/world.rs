//! Environment queries: ground height and obstacle probes.
//!
//! The host engine implements [`World`]; [`FlatGround`] and [`ObstacleField`]
//! cover headless runs and tests.

use nalgebra::{Point2, Point3};

use crate::math::lerp_point;

/// Bitmask of collision layers a probe is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const GROUND: LayerMask = LayerMask(1 << 0);
    pub const OBSTACLES: LayerMask = LayerMask(1 << 1);

    #[inline]
    pub fn contains(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }
}

/// Trait for environment implementations (supports dependency injection for testing).
pub trait World {
    /// Move from `from` toward `to`, stopping at the first hit on `mask`.
    /// Returns `to` unmodified when the path is free.
    fn project_collision(&self, from: &Point3<f64>, to: &Point3<f64>, mask: LayerMask)
        -> Point3<f64>;

    /// Ground height below `(x, z)`.
    fn ground_height(&self, _x: f64, _z: f64) -> f64 {
        0.0
    }
}

/// Infinite flat ground without obstacles.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatGround {
    pub height: f64,
}

impl World for FlatGround {
    fn project_collision(
        &self,
        _from: &Point3<f64>,
        to: &Point3<f64>,
        _mask: LayerMask,
    ) -> Point3<f64> {
        *to
    }

    fn ground_height(&self, _x: f64, _z: f64) -> f64 {
        self.height
    }
}

/// Vertical cylinder obstacle, described by its footprint on the ground plane.
#[derive(Debug, Clone, Copy)]
pub struct Cylinder {
    /// Center as `(x, z)`.
    pub center: Point2<f64>,
    pub radius: f64,
}

impl Cylinder {
    /// Entry parameter `t ∈ [0, 1]` of the segment `from → to` into the footprint.
    fn entry(&self, from: &Point3<f64>, to: &Point3<f64>) -> Option<f64> {
        let (dx, dz) = (to.x - from.x, to.z - from.z);
        let (fx, fz) = (from.x - self.center.x, from.z - self.center.y);
        let c = fx * fx + fz * fz - self.radius * self.radius;
        if c <= 0.0 {
            return Some(0.0);
        }
        let a = dx * dx + dz * dz;
        if a < f64::EPSILON {
            return None;
        }
        let b = 2.0 * (fx * dx + fz * dz);
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return None;
        }
        let t = (-b - disc.sqrt()) / (2.0 * a);
        (0.0..=1.0).contains(&t).then_some(t)
    }
}

/// Flat ground populated with cylinder obstacles.
#[derive(Debug, Clone, Default)]
pub struct ObstacleField {
    pub ground: FlatGround,
    pub obstacles: Vec<Cylinder>,
}

impl ObstacleField {
    pub fn new(obstacles: Vec<Cylinder>) -> Self {
        Self {
            ground: FlatGround::default(),
            obstacles,
        }
    }
}

impl World for ObstacleField {
    fn project_collision(
        &self,
        from: &Point3<f64>,
        to: &Point3<f64>,
        mask: LayerMask,
    ) -> Point3<f64> {
        if !mask.contains(LayerMask::OBSTACLES) {
            return *to;
        }
        self.obstacles
            .iter()
            .filter_map(|o| o.entry(from, to))
            .min_by(|a, b| a.total_cmp(b))
            .map(|t| lerp_point(from, to, t))
            .unwrap_or(*to)
    }

    fn ground_height(&self, x: f64, z: f64) -> f64 {
        self.ground.ground_height(x, z)
    }
}
