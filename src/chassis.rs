// src/chassis.rs
//! Chassis wheel aggregate.
//!
//! A chassis host owns one [`ChassisAggregate`] once its first wheel is
//! mounted. Wheel visuals and their physics wheels are kept in parallel,
//! index-aligned arrays that only [`ChassisAggregate::add_wheel`] appends to.

use glam::Vec3;
use log::{debug, info, warn};

use crate::config::WheelConfig;
use crate::error::{Error, Result};
use crate::math::{Aabb, Pose};
use crate::physics::{BodyHandle, PhysicsBackend, WheelHandle};
use crate::registry::{PartId, PartRegistry};

/* -------------------------------------------------------------------------- */
/*                                Wheel params                                */
/* -------------------------------------------------------------------------- */

/// Per-wheel physics parameters. Radius, width and axle come from the visual;
/// everything else is a configured constant.
#[derive(Debug, Clone, PartialEq)]
pub struct WheelParams {
    pub radius: f32,
    pub width: f32,
    /// Spin axis in chassis space.
    pub axle: Vec3,
    pub mass: f32,
    pub suspension_distance: f32,
    pub spring: f32,
    pub damper: f32,
    pub forward_stiffness: f32,
    pub sideways_stiffness: f32,
}

impl WheelParams {
    /// Defaults for a visual without a usable mesh.
    pub fn fallback(cfg: &WheelConfig) -> Self {
        Self {
            radius: cfg.default_radius,
            width: cfg.default_width,
            axle: Vec3::X,
            mass: cfg.mass,
            suspension_distance: cfg.suspension_distance,
            spring: cfg.spring,
            damper: cfg.damper,
            forward_stiffness: cfg.forward_stiffness,
            sideways_stiffness: cfg.sideways_stiffness,
        }
    }

    /// Radius is half the largest extent, width the smallest; the axle runs
    /// along the smallest extent. Each dimension falls back to its default
    /// when missing or at or below `cfg.min_dimension`. The axle is world space.
    pub fn infer(world_bounds: Option<Aabb>, cfg: &WheelConfig) -> Self {
        let mut params = Self::fallback(cfg);
        let Some(bounds) = world_bounds else {
            return params;
        };

        let size = bounds.size();
        let radius = size.max_element() * 0.5;
        let width = size.min_element();
        if radius > cfg.min_dimension {
            params.radius = radius;
        }
        if width > cfg.min_dimension {
            params.width = width;
        }
        params.axle = if size.x <= size.y && size.x <= size.z {
            Vec3::X
        } else if size.y <= size.z {
            Vec3::Y
        } else {
            Vec3::Z
        };
        params
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Aggregate                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug)]
pub struct ChassisAggregate {
    chassis: PartId,
    body: BodyHandle,
    wheel_visuals: Vec<PartId>,
    wheel_handles: Vec<WheelHandle>,
    // Rest pose in chassis space + params, kept so wheels can be rebuilt.
    mounts: Vec<Pose>,
    params: Vec<WheelParams>,
}

impl ChassisAggregate {
    pub fn new(chassis: PartId, body: BodyHandle) -> Self {
        Self {
            chassis,
            body,
            wheel_visuals: Vec::new(),
            wheel_handles: Vec::new(),
            mounts: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn chassis(&self) -> PartId {
        self.chassis
    }

    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn wheel_visuals(&self) -> &[PartId] {
        &self.wheel_visuals
    }

    pub fn wheel_handles(&self) -> &[WheelHandle] {
        &self.wheel_handles
    }

    pub fn len(&self) -> usize {
        self.wheel_visuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wheel_visuals.is_empty()
    }

    pub fn contains_visual(&self, visual: PartId) -> bool {
        self.wheel_visuals.contains(&visual)
    }

    /// Wheel-array consistency. A mismatch is a programming error.
    pub fn check(&self) -> Result<()> {
        if self.wheel_visuals.len() != self.wheel_handles.len() {
            return Err(Error::ChassisCorrupted {
                name: self.chassis.to_string(),
                visuals: self.wheel_visuals.len(),
                handles: self.wheel_handles.len(),
            });
        }
        Ok(())
    }

    /// The only way wheels enter the aggregate.
    pub fn add_wheel(
        &mut self,
        visual: PartId,
        mount: Pose,
        params: WheelParams,
        physics: &mut dyn PhysicsBackend,
    ) -> Result<WheelHandle> {
        self.check()?;
        let handle = physics.add_wheel(self.body, &mount, &params)?;
        self.wheel_visuals.push(visual);
        self.wheel_handles.push(handle);
        self.mounts.push(mount);
        self.params.push(params);
        debug_assert_eq!(self.wheel_visuals.len(), self.wheel_handles.len());
        Ok(handle)
    }

    /// World pose of every physics wheel, paired with its visual.
    pub fn wheel_poses(&self, physics: &dyn PhysicsBackend) -> Vec<(PartId, Pose)> {
        self.wheel_visuals
            .iter()
            .zip(self.wheel_handles.iter())
            .filter_map(|(visual, handle)| physics.wheel_pose(*handle).map(|p| (*visual, p)))
            .collect()
    }

    pub fn clear_wheels(&mut self, physics: &mut dyn PhysicsBackend) {
        physics.clear_wheels(self.body);
        self.wheel_visuals.clear();
        self.wheel_handles.clear();
        self.mounts.clear();
        self.params.clear();
    }

    /// Drop one wheel and rebuild the rest. Returns `None` if `visual` is not
    /// mounted here, otherwise the visuals whose wheels could not be rebuilt
    /// (they are no longer part of the aggregate).
    pub fn remove_wheel(&mut self, visual: PartId, physics: &mut dyn PhysicsBackend) -> Option<Vec<PartId>> {
        let slot = self.wheel_visuals.iter().position(|v| *v == visual)?;
        let mut keep: Vec<(PartId, Pose, WheelParams)> = self
            .wheel_visuals
            .iter()
            .zip(self.mounts.iter())
            .zip(self.params.iter())
            .map(|((v, m), p)| (*v, *m, p.clone()))
            .collect();
        keep.remove(slot);

        self.clear_wheels(physics);
        let mut lost = Vec::new();
        for (v, mount, params) in keep {
            if let Err(e) = self.add_wheel(v, mount, params, physics) {
                warn!("rebuilding wheel {} on {} failed: {}", v, self.chassis, e);
                lost.push(v);
            }
        }
        Some(lost)
    }

    /// Engine force on every wheel; steering only on wheels ahead of the chassis center.
    pub fn drive(&self, physics: &mut dyn PhysicsBackend, engine_force: f32, steering: f32) {
        for (handle, mount) in self.wheel_handles.iter().zip(self.mounts.iter()) {
            let steer = if mount.position.z > 0.0 { steering } else { 0.0 };
            physics.drive_wheel(*handle, engine_force, steer);
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                             Registry operations                            */
/* -------------------------------------------------------------------------- */

/// Mount `wheel` on `chassis` at the chassis attach point `chassis_point`.
///
/// The visual is reparented and snapped exactly onto the attach point, then a
/// physics wheel sized from the visual's mesh is added. The aggregate is
/// created on first use.
pub fn mount_wheel(
    parts: &mut PartRegistry,
    physics: &mut dyn PhysicsBackend,
    cfg: &WheelConfig,
    chassis: PartId,
    chassis_point: usize,
    wheel: PartId,
) -> Result<WheelHandle> {
    let body = parts.body(chassis).ok_or_else(|| Error::MissingBody(parts.name_of(chassis)))?;
    let host = parts.require(chassis)?;
    let chassis_pose = host.pose;
    let snap = host.point_world_pose(chassis_point).ok_or_else(|| {
        Error::Custom(format!("{} has no attach point {}", host.name, chassis_point))
    })?;
    let wheel_part = parts.require(wheel)?;
    if let Some(parent) = wheel_part.parent {
        return Err(Error::Custom(format!("{} is already mounted on {}", wheel_part.name, parts.name_of(parent))));
    }

    // Size from the mesh as it will sit once snapped.
    let snapped_bounds = wheel_part.definition.mesh_bounds.map(|b| b.transformed(&snap));
    let mut params = WheelParams::infer(snapped_bounds, cfg);
    params.axle = chassis_pose.rotation.inverse() * params.axle;
    let mount = chassis_pose.relative(&snap);

    if !parts.chassis.contains(chassis) {
        debug!("creating wheel aggregate for {}", parts.name_of(chassis));
        parts.chassis.insert(chassis, ChassisAggregate::new(chassis, body));
    }
    let aggregate = parts
        .chassis
        .get_mut(chassis)
        .ok_or_else(|| Error::Custom("wheel aggregate vanished".into()))?;
    let radius = params.radius;
    let width = params.width;
    let handle = aggregate.add_wheel(wheel, mount, params, physics)?;

    let w = parts.require_mut(wheel)?;
    w.pose = snap;
    w.parent = Some(chassis);
    info!("[Chassis] wheel created for '{}' (radius={:.3}, width={:.3})", w.name, radius, width);
    Ok(handle)
}

/// Copy every physics wheel pose onto its visual. Returns how many moved.
pub fn sync_wheel_poses(parts: &mut PartRegistry, physics: &dyn PhysicsBackend) -> usize {
    let poses: Vec<(PartId, Pose)> = parts
        .chassis
        .iter()
        .flat_map(|(_, aggregate)| aggregate.wheel_poses(physics))
        .collect();

    let mut moved = 0;
    for (visual, pose) in poses {
        let unchanged = parts.get(visual).map_or(true, |p| p.pose.approx_eq(&pose, 1e-5));
        if unchanged {
            continue;
        }
        if parts.set_pose(visual, pose).is_ok() {
            moved += 1;
        }
    }
    moved
}

/// Remove all physics wheels of `chassis` and unparent their visuals.
/// Returns the visuals that were mounted.
pub fn clear_wheels(parts: &mut PartRegistry, physics: &mut dyn PhysicsBackend, chassis: PartId) -> Vec<PartId> {
    let Some(aggregate) = parts.chassis.get_mut(chassis) else {
        return Vec::new();
    };
    let visuals = aggregate.wheel_visuals().to_vec();
    aggregate.clear_wheels(physics);
    unparent(parts, &visuals);
    visuals
}

/// Take `visual` off `chassis`, rebuilding the remaining wheels. Returns every
/// visual that left the aggregate: `visual` itself plus any whose wheel could
/// not be rebuilt. All of them are unparented.
pub fn unmount_wheel(
    parts: &mut PartRegistry,
    physics: &mut dyn PhysicsBackend,
    chassis: PartId,
    visual: PartId,
) -> Vec<PartId> {
    let Some(aggregate) = parts.chassis.get_mut(chassis) else {
        return Vec::new();
    };
    let Some(mut gone) = aggregate.remove_wheel(visual, physics) else {
        return Vec::new();
    };
    gone.insert(0, visual);
    unparent(parts, &gone);
    gone
}

fn unparent(parts: &mut PartRegistry, visuals: &[PartId]) {
    for visual in visuals {
        if let Some(part) = parts.get_mut(*visual) {
            part.parent = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuilderConfig;
    use crate::parts::PartCatalog;
    use crate::physics::{BodySpec, RapierWorld};
    use glam::Quat;

    struct Rig {
        config: BuilderConfig,
        parts: PartRegistry,
        physics: RapierWorld,
        chassis: PartId,
    }

    fn rig() -> Rig {
        let config = BuilderConfig::default();
        let kit = PartCatalog::starter_kit();
        let mut parts = PartRegistry::new(config.grid.cell_size, config.attach.clone());
        let mut physics = RapierWorld::new(&config.physics);
        let def = kit.require("chassis").unwrap().clone();
        let pose = Pose::new(Vec3::new(0.0, 0.5, 0.0), Quat::from_rotation_y(0.4));
        let chassis = parts.spawn(def.clone(), pose);
        let body = physics
            .create_body(&BodySpec { owner: chassis, mass: def.mass, pose, bounds: def.local_bounds(0.25) })
            .unwrap();
        parts.bodies.insert(chassis, body);
        Rig { config, parts, physics, chassis }
    }

    fn spawn_wheel(r: &mut Rig) -> PartId {
        let kit = PartCatalog::starter_kit();
        r.parts.spawn(kit.require("wheel").unwrap().clone(), Pose::IDENTITY)
    }

    fn mount_index(parts: &PartRegistry, chassis: PartId, name: &str) -> usize {
        parts.get(chassis).unwrap().attach_points.iter().position(|p| p.name == name).unwrap()
    }

    #[test]
    fn infer_uses_mesh_extents() {
        let cfg = WheelConfig::default();
        let bounds = Aabb::new(Vec3::new(-0.4, -0.05, -0.4), Vec3::new(0.4, 0.05, 0.4));
        let p = WheelParams::infer(Some(bounds), &cfg);
        assert!((p.radius - 0.4).abs() < 1e-6);
        assert!((p.width - 0.1).abs() < 1e-6);
        assert_eq!(p.axle, Vec3::Y);
    }

    #[test]
    fn infer_falls_back_without_mesh_or_on_tiny_dimensions() {
        let cfg = WheelConfig::default();
        let p = WheelParams::infer(None, &cfg);
        assert_eq!((p.radius, p.width), (0.35, 0.2));

        let flat = Aabb::new(Vec3::new(-0.3, -0.3, -0.001), Vec3::new(0.3, 0.3, 0.001));
        let p = WheelParams::infer(Some(flat), &cfg);
        assert!((p.radius - 0.3).abs() < 1e-6);
        assert_eq!(p.width, 0.2);

        let dot = Aabb::new(Vec3::splat(-0.004), Vec3::splat(0.004));
        let p = WheelParams::infer(Some(dot), &cfg);
        assert_eq!((p.radius, p.width), (0.35, 0.2));
        assert_eq!((p.spring, p.damper, p.mass), (20000.0, 4500.0, 20.0));
    }

    #[test]
    fn mount_snaps_reparents_and_keeps_arrays_aligned() {
        let mut r = rig();
        let wheel = spawn_wheel(&mut r);
        let point = mount_index(&r.parts, r.chassis, "mount_fr");
        let handle =
            mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, point, wheel).unwrap();

        let expected = r.parts.get(r.chassis).unwrap().point_world_pose(point).unwrap();
        let w = r.parts.get(wheel).unwrap();
        assert_eq!(w.parent, Some(r.chassis));
        assert!(w.pose.approx_eq(&expected, 1e-5));

        let agg = r.parts.chassis.get(r.chassis).unwrap();
        assert_eq!(agg.wheel_visuals(), &[wheel]);
        assert_eq!(agg.wheel_handles(), &[handle]);
        assert!(agg.check().is_ok());
    }

    #[test]
    fn mounted_wheel_is_never_mounted_twice() {
        let mut r = rig();
        let wheel = spawn_wheel(&mut r);
        let a = mount_index(&r.parts, r.chassis, "mount_fl");
        let b = mount_index(&r.parts, r.chassis, "mount_rl");
        mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, a, wheel).unwrap();
        assert!(mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, b, wheel).is_err());
        assert_eq!(r.parts.chassis.get(r.chassis).unwrap().len(), 1);
    }

    #[test]
    fn sync_is_quiet_at_rest_and_follows_the_chassis() {
        let mut r = rig();
        let wheel = spawn_wheel(&mut r);
        let point = mount_index(&r.parts, r.chassis, "mount_rr");
        mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, point, wheel).unwrap();
        assert_eq!(sync_wheel_poses(&mut r.parts, &r.physics), 0);

        let body = r.parts.body(r.chassis).unwrap();
        let moved = Pose::from_translation(Vec3::new(2.0, 0.5, 0.0));
        r.physics.set_body_pose(body, &moved).unwrap();
        assert_eq!(sync_wheel_poses(&mut r.parts, &r.physics), 1);
        let mount = Pose::from_translation(Vec3::new(0.75, 0.0, -0.5));
        assert!(r.parts.get(wheel).unwrap().pose.approx_eq(&moved.compose(&mount), 1e-4));
    }

    #[test]
    fn remove_and_clear_keep_invariant() {
        let mut r = rig();
        let names = ["mount_fl", "mount_fr", "mount_rl"];
        let mut wheels = Vec::new();
        for n in names {
            let w = spawn_wheel(&mut r);
            let p = mount_index(&r.parts, r.chassis, n);
            mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, p, w).unwrap();
            wheels.push(w);
        }
        let body = r.parts.body(r.chassis).unwrap();
        assert_eq!(unmount_wheel(&mut r.parts, &mut r.physics, r.chassis, wheels[1]), vec![wheels[1]]);
        let agg = r.parts.chassis.get(r.chassis).unwrap();
        assert_eq!(agg.wheel_visuals(), &[wheels[0], wheels[2]]);
        assert_eq!(r.physics.wheel_count(body), 2);
        assert!(agg.check().is_ok());
        assert_eq!(r.parts.get(wheels[1]).unwrap().parent, None);
        assert_eq!(r.parts.get(wheels[0]).unwrap().parent, Some(r.chassis));

        assert_eq!(clear_wheels(&mut r.parts, &mut r.physics, r.chassis), vec![wheels[0], wheels[2]]);
        let agg = r.parts.chassis.get(r.chassis).unwrap();
        assert!(agg.is_empty() && agg.wheel_handles().is_empty());
        assert_eq!(r.physics.wheel_count(body), 0);
        assert!(wheels.iter().all(|w| r.parts.get(*w).unwrap().parent.is_none()));
    }

    #[test]
    fn unmounting_a_stranger_changes_nothing() {
        let mut r = rig();
        let mounted = spawn_wheel(&mut r);
        let loose = spawn_wheel(&mut r);
        let p = mount_index(&r.parts, r.chassis, "mount_fl");
        mount_wheel(&mut r.parts, &mut r.physics, &r.config.wheel, r.chassis, p, mounted).unwrap();
        assert!(unmount_wheel(&mut r.parts, &mut r.physics, r.chassis, loose).is_empty());
        assert_eq!(r.parts.chassis.get(r.chassis).unwrap().len(), 1);
        assert_eq!(r.parts.get(mounted).unwrap().parent, Some(r.chassis));
    }
}
