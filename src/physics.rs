// src/physics.rs
//! Physics seam for the builder.
//!
//! [`PhysicsBackend`] is everything the attachment code needs from a physics
//! engine: bodies, unbreakable fixed joints and ray-cast wheels hung off a
//! chassis body. [`RapierWorld`] implements it on top of Rapier 3D. Handles
//! handed out here are opaque counters mapped to Rapier handles, so callers
//! never see engine types.

use std::collections::HashMap;

use glam::{Quat, Vec3};
use log::{debug, warn};
use rapier3d::control::{DynamicRayCastVehicleController, WheelTuning};
use rapier3d::prelude::*;

use crate::chassis::WheelParams;
use crate::config::PhysicsConfig;
use crate::error::{Error, Result};
use crate::math::{self, Aabb, Pose};
use crate::registry::PartId;

/* -------------------------------------------------------------------------- */
/*                                   Handles                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(u64);

impl BodyHandle {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JointHandle(u64);

/// One generated physics wheel. Valid until the chassis' wheels are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WheelHandle {
    pub chassis: BodyHandle,
    serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// Build mode: the body holds its pose and ignores gravity.
    Kinematic,
    /// Drive mode: simulated.
    Dynamic,
}

/// Everything needed to create a part body.
#[derive(Debug, Clone)]
pub struct BodySpec {
    pub owner: PartId,
    pub mass: f32,
    pub pose: Pose,
    /// Collider box in part space.
    pub bounds: Aabb,
}

/// Fixed-joint frames as stored by the engine.
#[derive(Debug, Clone, Copy)]
pub struct JointAnchors {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_a: Vec3,
    pub local_b: Vec3,
}

pub trait PhysicsBackend {
    fn create_body(&mut self, spec: &BodySpec) -> Result<BodyHandle>;

    /// Removes the body together with its joints and wheels.
    fn remove_body(&mut self, body: BodyHandle);

    fn body_pose(&self, body: BodyHandle) -> Option<Pose>;

    fn set_body_pose(&mut self, body: BodyHandle, pose: &Pose) -> Result<()>;

    fn set_body_mode(&mut self, body: BodyHandle, mode: BodyMode) -> Result<()>;

    /// Unbreakable joint anchored at `anchor` (world space), contacts between
    /// the two bodies disabled.
    fn create_fixed_joint(&mut self, a: BodyHandle, b: BodyHandle, anchor: Vec3) -> Result<JointHandle>;

    fn remove_joint(&mut self, joint: JointHandle);

    fn joint_anchors(&self, joint: JointHandle) -> Option<JointAnchors>;

    fn joint_count(&self) -> usize;

    /// Hang a wheel off `chassis`. `mount` is the wheel rest pose in chassis space.
    fn add_wheel(&mut self, chassis: BodyHandle, mount: &Pose, params: &WheelParams) -> Result<WheelHandle>;

    /// Destroy every wheel of `chassis`.
    fn clear_wheels(&mut self, chassis: BodyHandle);

    fn wheel_count(&self, chassis: BodyHandle) -> usize;

    /// Current world pose of a wheel, including suspension, steering and spin.
    fn wheel_pose(&self, wheel: WheelHandle) -> Option<Pose>;

    fn drive_wheel(&mut self, wheel: WheelHandle, engine_force: f32, steering: f32);

    fn step(&mut self, dt: f32);
}

/* -------------------------------------------------------------------------- */
/*                                 Rapier world                               */
/* -------------------------------------------------------------------------- */

struct Vehicle {
    controller: DynamicRayCastVehicleController,
    /// Serial of each controller wheel, same order as `controller.wheels()`.
    serials: Vec<u64>,
    mounts: Vec<Pose>,
}

pub struct RapierWorld {
    gravity: Vector<Real>,
    pipeline: PhysicsPipeline,
    integration_params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    handle_to_body: HashMap<BodyHandle, RigidBodyHandle>,
    handle_to_joint: HashMap<JointHandle, ImpulseJointHandle>,
    vehicles: HashMap<BodyHandle, Vehicle>,
    next_body: u64,
    next_joint: u64,
    next_wheel: u64,
}

impl RapierWorld {
    pub fn new(config: &PhysicsConfig) -> Self {
        let mut integration_params = IntegrationParameters::default();
        integration_params.dt = config.fixed_dt;

        let mut colliders = ColliderSet::new();
        if let Some(h) = config.ground_height {
            colliders.insert(
                ColliderBuilder::halfspace(Vector::y_axis())
                    .translation(Vector::new(0.0, h, 0.0))
                    .friction(1.0)
                    .build(),
            );
        }

        Self {
            gravity: math::to_na_vector(config.gravity),
            pipeline: PhysicsPipeline::new(),
            integration_params,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            handle_to_body: HashMap::new(),
            handle_to_joint: HashMap::new(),
            vehicles: HashMap::new(),
            next_body: 1,
            next_joint: 1,
            next_wheel: 1,
        }
    }

    pub fn body_count(&self) -> usize {
        self.handle_to_body.len()
    }

    fn rapier_body(&self, body: BodyHandle) -> Result<RigidBodyHandle> {
        self.handle_to_body
            .get(&body)
            .copied()
            .ok_or_else(|| Error::Physics(format!("unknown body {:?}", body)))
    }

    fn body_from_rapier(&self, handle: RigidBodyHandle) -> Option<BodyHandle> {
        self.handle_to_body.iter().find(|(_, h)| **h == handle).map(|(b, _)| *b)
    }

    fn vehicle_tuning(params: &WheelParams) -> WheelTuning {
        // Spring and damper are per-wheel N/m and N·s/m; the ray-cast
        // controller expects values per unit of suspended mass.
        let per_mass = params.mass.max(1.0) * 100.0;
        WheelTuning {
            suspension_stiffness: params.spring / per_mass,
            suspension_damping: params.damper / per_mass,
            max_suspension_travel: params.suspension_distance,
            friction_slip: params.forward_stiffness * 7.0,
            side_friction_stiffness: params.sideways_stiffness * 0.5,
            ..WheelTuning::default()
        }
    }

    fn update_vehicles(&mut self, dt: f32) {
        for (chassis, vehicle) in self.vehicles.iter_mut() {
            let Some(&rb) = self.handle_to_body.get(chassis) else { continue };
            let dynamic = self.bodies.get(rb).map_or(false, |b| b.is_dynamic());
            if !dynamic {
                continue;
            }
            vehicle.controller.update_vehicle(
                dt,
                &mut self.bodies,
                &self.colliders,
                &self.query_pipeline,
                QueryFilter::default().exclude_rigid_body(rb),
            );
        }
    }
}

impl PhysicsBackend for RapierWorld {
    fn create_body(&mut self, spec: &BodySpec) -> Result<BodyHandle> {
        if !spec.mass.is_finite() || spec.mass <= 0.0 {
            return Err(Error::Physics(format!("invalid mass {} for {:?}", spec.mass, spec.owner)));
        }
        let body = RigidBodyBuilder::kinematic_position_based()
            .position(math::to_isometry(&spec.pose))
            .gravity_scale(0.0)
            .additional_mass(spec.mass)
            .user_data(spec.owner.index() as u128)
            .build();

        let half = spec.bounds.half_extents().max(Vec3::splat(0.001));
        let collider = ColliderBuilder::cuboid(half.x, half.y, half.z)
            .translation(math::to_na_vector(spec.bounds.center()))
            .density(0.0)
            .friction(0.7)
            .build();

        let rb = self.bodies.insert(body);
        self.colliders.insert_with_parent(collider, rb, &mut self.bodies);

        let handle = BodyHandle(self.next_body);
        self.next_body += 1;
        self.handle_to_body.insert(handle, rb);
        Ok(handle)
    }

    fn remove_body(&mut self, body: BodyHandle) {
        self.vehicles.remove(&body);
        let Some(rb) = self.handle_to_body.remove(&body) else { return };
        self.bodies.remove(
            rb,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        // Rapier dropped the attached joints along with the body.
        let joints = &self.impulse_joints;
        self.handle_to_joint.retain(|_, h| joints.get(*h).is_some());
    }

    fn body_pose(&self, body: BodyHandle) -> Option<Pose> {
        let rb = self.handle_to_body.get(&body)?;
        self.bodies.get(*rb).map(|b| math::from_isometry(b.position()))
    }

    fn set_body_pose(&mut self, body: BodyHandle, pose: &Pose) -> Result<()> {
        let rb = self.rapier_body(body)?;
        let b = self
            .bodies
            .get_mut(rb)
            .ok_or_else(|| Error::Physics(format!("stale body {:?}", body)))?;
        b.set_position(math::to_isometry(pose), true);
        Ok(())
    }

    fn set_body_mode(&mut self, body: BodyHandle, mode: BodyMode) -> Result<()> {
        let rb = self.rapier_body(body)?;
        let b = self
            .bodies
            .get_mut(rb)
            .ok_or_else(|| Error::Physics(format!("stale body {:?}", body)))?;
        match mode {
            BodyMode::Kinematic => {
                b.set_body_type(RigidBodyType::KinematicPositionBased, true);
                b.set_gravity_scale(0.0, true);
                b.set_linvel(Vector::zeros(), true);
                b.set_angvel(Vector::zeros(), true);
            }
            BodyMode::Dynamic => {
                b.set_body_type(RigidBodyType::Dynamic, true);
                b.set_gravity_scale(1.0, true);
            }
        }
        Ok(())
    }

    fn create_fixed_joint(&mut self, a: BodyHandle, b: BodyHandle, anchor: Vec3) -> Result<JointHandle> {
        if a == b {
            return Err(Error::Physics("cannot joint a body to itself".into()));
        }
        let ra = self.rapier_body(a)?;
        let rb = self.rapier_body(b)?;
        let (pa, pb) = match (self.bodies.get(ra), self.bodies.get(rb)) {
            (Some(x), Some(y)) => (*x.position(), *y.position()),
            _ => return Err(Error::Physics(format!("stale body in joint {:?}-{:?}", a, b))),
        };

        // Both frames coincide with a world-aligned frame at the anchor, so the
        // joint holds the current relative pose instead of aligning the bodies.
        let anchor_frame = Isometry::translation(anchor.x, anchor.y, anchor.z);
        let joint = FixedJointBuilder::new()
            .local_frame1(pa.inverse() * anchor_frame)
            .local_frame2(pb.inverse() * anchor_frame)
            .contacts_enabled(false)
            .build();

        let jh = self.impulse_joints.insert(ra, rb, joint, true);
        let handle = JointHandle(self.next_joint);
        self.next_joint += 1;
        self.handle_to_joint.insert(handle, jh);
        Ok(handle)
    }

    fn remove_joint(&mut self, joint: JointHandle) {
        if let Some(jh) = self.handle_to_joint.remove(&joint) {
            self.impulse_joints.remove(jh, true);
        }
    }

    fn joint_anchors(&self, joint: JointHandle) -> Option<JointAnchors> {
        let jh = self.handle_to_joint.get(&joint)?;
        let j = self.impulse_joints.get(*jh)?;
        Some(JointAnchors {
            body_a: self.body_from_rapier(j.body1)?,
            body_b: self.body_from_rapier(j.body2)?,
            local_a: math::from_na_point(&j.data.local_anchor1()),
            local_b: math::from_na_point(&j.data.local_anchor2()),
        })
    }

    fn joint_count(&self) -> usize {
        self.handle_to_joint.len()
    }

    fn add_wheel(&mut self, chassis: BodyHandle, mount: &Pose, params: &WheelParams) -> Result<WheelHandle> {
        let rb = self.rapier_body(chassis)?;
        let vehicle = self.vehicles.entry(chassis).or_insert_with(|| {
            let mut controller = DynamicRayCastVehicleController::new(rb);
            controller.index_up_axis = 1;
            controller.index_forward_axis = 2;
            Vehicle { controller, serials: Vec::new(), mounts: Vec::new() }
        });

        // Raise the connection point by the rest length so a fully extended
        // wheel sits exactly on its mount.
        let connection = mount.position + Vec3::Y * params.suspension_distance;
        let tuning = Self::vehicle_tuning(params);
        vehicle.controller.add_wheel(
            math::to_na_point(connection),
            -Vector::y(),
            math::to_na_vector(params.axle),
            params.suspension_distance,
            params.radius,
            &tuning,
        );

        let serial = self.next_wheel;
        self.next_wheel += 1;
        vehicle.serials.push(serial);
        vehicle.mounts.push(*mount);
        debug!(
            "wheel {} on body {:?}: radius={:.3} width={:.3}",
            serial,
            chassis,
            params.radius,
            params.width
        );
        Ok(WheelHandle { chassis, serial })
    }

    fn clear_wheels(&mut self, chassis: BodyHandle) {
        self.vehicles.remove(&chassis);
    }

    fn wheel_count(&self, chassis: BodyHandle) -> usize {
        self.vehicles.get(&chassis).map_or(0, |v| v.serials.len())
    }

    fn wheel_pose(&self, wheel: WheelHandle) -> Option<Pose> {
        let vehicle = self.vehicles.get(&wheel.chassis)?;
        let slot = vehicle.serials.iter().position(|s| *s == wheel.serial)?;
        let w = vehicle.controller.wheels().get(slot)?;
        let mount = vehicle.mounts.get(slot)?;
        let chassis_pose = self.body_pose(wheel.chassis)?;

        let info = w.raycast_info();
        let length = if info.is_in_contact { info.suspension_length } else { w.suspension_rest_length };
        let drop = w.suspension_rest_length - length;
        let local_position = mount.position - Vec3::Y * drop;

        let axle = math::from_na_vector(&w.axle_cs).normalize_or_zero();
        let spin = if axle == Vec3::ZERO { Quat::IDENTITY } else { Quat::from_axis_angle(axle, w.rotation) };
        let steer = Quat::from_rotation_y(w.steering);
        let local = Pose::new(local_position, (steer * spin * mount.rotation).normalize());
        Some(chassis_pose.compose(&local))
    }

    fn drive_wheel(&mut self, wheel: WheelHandle, engine_force: f32, steering: f32) {
        let Some(vehicle) = self.vehicles.get_mut(&wheel.chassis) else {
            warn!("drive_wheel: no vehicle on {:?}", wheel.chassis);
            return;
        };
        let Some(slot) = vehicle.serials.iter().position(|s| *s == wheel.serial) else { return };
        if let Some(w) = vehicle.controller.wheels_mut().get_mut(slot) {
            w.engine_force = engine_force;
            w.steering = steering;
        }
    }

    fn step(&mut self, dt: f32) {
        let dt = dt.max(0.0).min(1.0 / 15.0);
        if dt == 0.0 {
            return;
        }
        self.integration_params.dt = dt;
        self.update_vehicles(dt);
        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttachConfig, BuilderConfig};
    use crate::parts::PartCatalog;
    use crate::registry::PartRegistry;

    fn owner() -> PartId {
        let kit = PartCatalog::starter_kit();
        let mut reg = PartRegistry::new(0.25, AttachConfig::default());
        reg.spawn(kit.require("bracket").unwrap().clone(), Pose::IDENTITY)
    }

    fn spec(pose: Pose) -> BodySpec {
        BodySpec {
            owner: owner(),
            mass: 1.0,
            pose,
            bounds: Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.125)),
        }
    }

    #[test]
    fn fixed_joint_anchors_map_back_to_world_anchor() {
        let mut world = RapierWorld::new(&BuilderConfig::default().physics);
        let pa = Pose::new(Vec3::new(0.0, 0.0, 0.0), Quat::from_rotation_y(0.3));
        let pb = Pose::new(Vec3::new(0.0, 0.25, 0.0), Quat::from_rotation_x(1.1));
        let a = world.create_body(&spec(pa)).unwrap();
        let b = world.create_body(&spec(pb)).unwrap();
        let anchor = Vec3::new(0.0, 0.125, 0.0);

        let j = world.create_fixed_joint(a, b, anchor).unwrap();
        let anchors = world.joint_anchors(j).unwrap();
        assert_eq!((anchors.body_a, anchors.body_b), (a, b));
        assert!(pa.transform_point(anchors.local_a).abs_diff_eq(anchor, 1e-5));
        assert!(pb.transform_point(anchors.local_b).abs_diff_eq(anchor, 1e-5));
        assert_eq!(world.joint_count(), 1);
    }

    #[test]
    fn removing_a_body_drops_its_joints() {
        let mut world = RapierWorld::new(&BuilderConfig::default().physics);
        let a = world.create_body(&spec(Pose::IDENTITY)).unwrap();
        let b = world.create_body(&spec(Pose::from_translation(Vec3::Y * 0.25))).unwrap();
        world.create_fixed_joint(a, b, Vec3::Y * 0.125).unwrap();
        world.remove_body(b);
        assert_eq!(world.joint_count(), 0);
        assert!(world.body_pose(b).is_none());
        assert!(world.create_fixed_joint(a, b, Vec3::ZERO).is_err());
    }

    #[test]
    fn rejects_invalid_mass_and_self_joint() {
        let mut world = RapierWorld::new(&BuilderConfig::default().physics);
        let mut bad = spec(Pose::IDENTITY);
        bad.mass = 0.0;
        assert!(world.create_body(&bad).is_err());
        let a = world.create_body(&spec(Pose::IDENTITY)).unwrap();
        assert!(world.create_fixed_joint(a, a, Vec3::ZERO).is_err());
    }

    #[test]
    fn resting_wheel_sits_on_its_mount() {
        let config = BuilderConfig::default();
        let mut world = RapierWorld::new(&config.physics);
        let chassis_pose = Pose::new(Vec3::new(1.0, 0.5, 0.0), Quat::from_rotation_y(0.5));
        let chassis = world.create_body(&spec(chassis_pose)).unwrap();
        let mount = Pose::from_translation(Vec3::new(0.75, 0.0, 0.5));
        let params = WheelParams::fallback(&config.wheel);

        let wheel = world.add_wheel(chassis, &mount, &params).unwrap();
        let pose = world.wheel_pose(wheel).unwrap();
        assert!(pose.approx_eq(&chassis_pose.compose(&mount), 1e-4));
        assert_eq!(world.wheel_count(chassis), 1);

        world.clear_wheels(chassis);
        assert_eq!(world.wheel_count(chassis), 0);
        assert!(world.wheel_pose(wheel).is_none());
    }

    #[test]
    fn kinematic_bodies_hold_still_while_stepping() {
        let mut world = RapierWorld::new(&BuilderConfig::default().physics);
        let pose = Pose::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let body = world.create_body(&spec(pose)).unwrap();
        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }
        assert!(world.body_pose(body).unwrap().approx_eq(&pose, 1e-5));

        world.set_body_mode(body, BodyMode::Dynamic).unwrap();
        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }
        assert!(world.body_pose(body).unwrap().position.y < 2.0);
    }

    #[test]
    fn dynamic_bodies_land_on_the_ground() {
        let mut world = RapierWorld::new(&BuilderConfig::default().physics);
        let body = world.create_body(&spec(Pose::IDENTITY)).unwrap();
        world.set_body_mode(body, BodyMode::Dynamic).unwrap();
        for _ in 0..120 {
            world.step(1.0 / 60.0);
        }
        let y = world.body_pose(body).unwrap().position.y;
        assert!(y < 0.0 && y > -0.45, "resting at {}", y);
    }
}
