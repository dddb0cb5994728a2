// src/math.rs
//! Geometry helpers shared by every builder subsystem: rigid poses, AABBs,
//! grid snapping and the glam <-> nalgebra bridge used at the Rapier boundary.

use glam::{Quat, Vec3};
use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Rigid transform (no scale). Parts never scale in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self { position: Vec3::ZERO, rotation: Quat::IDENTITY };

    #[inline]
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    #[inline]
    pub fn from_translation(position: Vec3) -> Self {
        Self { position, rotation: Quat::IDENTITY }
    }

    /// Local point → world point.
    #[inline]
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// World point → local point.
    #[inline]
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    #[inline]
    pub fn transform_vector(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    /// `self * child`: the world pose of a child given in `self`'s frame.
    #[inline]
    pub fn compose(&self, child: &Pose) -> Pose {
        Pose {
            position: self.transform_point(child.position),
            rotation: (self.rotation * child.rotation).normalize(),
        }
    }

    /// Pose of `world` expressed relative to `self`.
    #[inline]
    pub fn relative(&self, world: &Pose) -> Pose {
        let inv = self.rotation.inverse();
        Pose {
            position: inv * (world.position - self.position),
            rotation: (inv * world.rotation).normalize(),
        }
    }

    pub fn approx_eq(&self, other: &Pose, eps: f32) -> bool {
        self.position.abs_diff_eq(other.position, eps)
            && (self.rotation.dot(other.rotation).abs() - 1.0).abs() <= eps
    }
}

// ---------------------------------------------------------------------------
// Axis-aligned bounding box
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn from_center_half_extents(center: Vec3, half: Vec3) -> Self {
        let half = half.abs();
        Self { min: center - half, max: center + half }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Strict overlap; boxes that only touch on a face do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Shrink every side by `margin` (clamped so the box never inverts).
    pub fn shrink(&self, margin: f32) -> Aabb {
        let c = self.center();
        let half = (self.half_extents() - Vec3::splat(margin)).max(Vec3::ZERO);
        Aabb::from_center_half_extents(c, half)
    }

    /// World-space AABB enclosing this local box after `pose`.
    pub fn transformed(&self, pose: &Pose) -> Aabb {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            let w = pose.transform_point(corner);
            min = min.min(w);
            max = max.max(w);
        }
        Aabb { min, max }
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Snap `point` onto the lattice `origin + k * cell`, then lift it by
/// `height_steps` cells along world up.
#[inline]
pub fn snap_to_grid(point: Vec3, origin: Vec3, cell: f32, height_steps: i32) -> Vec3 {
    let local = (point - origin) / cell;
    let snapped = Vec3::new(local.x.round(), local.y.round(), local.z.round()) * cell + origin;
    snapped + Vec3::Y * (height_steps as f32 * cell)
}

/// 90° yaw step about world up.
#[inline]
pub fn yaw_step() -> Quat {
    Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)
}

// ---------------------------------------------------------------------------
// glam <-> nalgebra
// ---------------------------------------------------------------------------

#[inline]
pub fn to_na_vector(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
pub fn to_na_point(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

#[inline]
pub fn from_na_vector(v: &Vector3<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

#[inline]
pub fn from_na_point(p: &Point3<f32>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

pub fn to_na_rotation(q: Quat) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn from_na_rotation(q: &UnitQuaternion<f32>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w).normalize()
}

pub fn to_isometry(pose: &Pose) -> Isometry3<f32> {
    Isometry3::from_parts(Translation3::from(to_na_vector(pose.position)), to_na_rotation(pose.rotation))
}

pub fn from_isometry(iso: &Isometry3<f32>) -> Pose {
    Pose {
        position: from_na_vector(&iso.translation.vector),
        rotation: from_na_rotation(&iso.rotation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_rounds_to_nearest_cell_and_applies_height() {
        let p = snap_to_grid(Vec3::new(0.13, 0.0, -0.37), Vec3::ZERO, 0.25, 0);
        assert!(p.abs_diff_eq(Vec3::new(0.25, 0.0, -0.25), 1e-6));

        let lifted = snap_to_grid(Vec3::new(0.13, 0.0, -0.37), Vec3::ZERO, 0.25, 3);
        assert!(lifted.abs_diff_eq(Vec3::new(0.25, 0.75, -0.25), 1e-6));
    }

    #[test]
    fn snap_respects_origin_offset() {
        let origin = Vec3::new(0.1, 0.0, 0.1);
        let p = snap_to_grid(Vec3::new(0.2, 0.0, 0.2), origin, 0.25, 0);
        assert!(p.abs_diff_eq(Vec3::new(0.1, 0.0, 0.1), 1e-6));
    }

    #[test]
    fn pose_inverse_round_trip() {
        let pose = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        let world = Vec3::new(-0.4, 1.1, 5.0);
        let back = pose.transform_point(pose.inverse_transform_point(world));
        assert!(back.abs_diff_eq(world, 1e-5));
    }

    #[test]
    fn compose_and_relative_are_inverse() {
        let parent = Pose::new(Vec3::new(0.5, 0.0, -1.0), Quat::from_rotation_y(1.2));
        let child = Pose::new(Vec3::new(0.0, 0.25, 0.3), Quat::from_rotation_x(0.3));
        let world = parent.compose(&child);
        assert!(parent.relative(&world).approx_eq(&child, 1e-5));
    }

    #[test]
    fn aabb_touching_faces_do_not_intersect() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(!a.intersects(&b));
        let c = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        assert!(a.intersects(&c));
    }

    #[test]
    fn rotated_aabb_swaps_extents() {
        let local = Aabb::new(Vec3::new(-0.1, -0.35, -0.35), Vec3::new(0.1, 0.35, 0.35));
        let world = local.transformed(&Pose::new(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)));
        assert!(world.size().abs_diff_eq(Vec3::new(0.7, 0.7, 0.2), 1e-5));
    }

    #[test]
    fn isometry_round_trip() {
        let pose = Pose::new(Vec3::new(3.0, -1.0, 0.5), Quat::from_rotation_z(0.4));
        assert!(from_isometry(&to_isometry(&pose)).approx_eq(&pose, 1e-5));
    }
}
