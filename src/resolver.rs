// src/resolver.rs
//! Attachment resolver.
//!
//! After a part is placed, every enabled attach point of it looks for
//! compatible points of other parts inside its detection radius. Each match
//! becomes either a rigid fixed joint between the two bodies, or (when one
//! side is a wheel visual and the other a chassis host) a physics wheel on
//! the chassis. The resolver is symmetric: it does not matter which of the two
//! parts was placed last.
//!
//! A [`PairLedger`] remembers every point pair already joined, so resolving
//! the same part again never stacks a second joint on the same pair.

use std::collections::HashMap;

use glam::Vec3;
use log::{debug, info, warn};

use crate::chassis;
use crate::config::{AttachConfig, WheelConfig};
use crate::error::Result;
use crate::events::{AttachmentFormed, EventBus, JoinKind};
use crate::parts::PartKind;
use crate::physics::{BodyHandle, BodySpec, JointHandle, PhysicsBackend, WheelHandle};
use crate::registry::{PartId, PartRegistry};
use crate::spatial::ProximitySearch;

/// One attach point of one part.
pub type PointRef = (PartId, usize);

/* -------------------------------------------------------------------------- */
/*                                   Ledger                                   */
/* -------------------------------------------------------------------------- */

/// Unordered pair of attach points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointPair(PointRef, PointRef);

impl PointPair {
    pub fn new(a: PointRef, b: PointRef) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn involves(&self, part: PartId) -> bool {
        self.0 .0 == part || self.1 .0 == part
    }
}

/// What a ledger pair became. Wheels are keyed by part ids: their physics
/// handles change whenever the chassis rebuilds its wheel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Rigid(JointHandle),
    Wheel { chassis: PartId, visual: PartId },
}

#[derive(Debug, Default)]
pub struct PairLedger {
    joins: HashMap<PointPair, Join>,
}

impl PairLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pair: &PointPair) -> bool {
        self.joins.contains_key(pair)
    }

    pub fn record(&mut self, pair: PointPair, join: Join) {
        self.joins.insert(pair, join);
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Drop every pair touching `part`. Returns the joins that were dropped.
    pub fn forget_part(&mut self, part: PartId) -> Vec<Join> {
        let gone: Vec<PointPair> = self.joins.keys().filter(|p| p.involves(part)).copied().collect();
        gone.into_iter().filter_map(|p| self.joins.remove(&p)).collect()
    }

    /// Drop the wheel pairing of `visual`, so it can be mounted again.
    pub fn forget_wheel(&mut self, visual: PartId) -> bool {
        let before = self.joins.len();
        self.joins.retain(|_, j| !matches!(j, Join::Wheel { visual: v, .. } if *v == visual));
        self.joins.len() != before
    }

    /// Joins `part` takes part in.
    pub fn joins_of(&self, part: PartId) -> Vec<Join> {
        self.joins.iter().filter(|(p, _)| p.involves(part)).map(|(_, j)| *j).collect()
    }

    pub fn clear(&mut self) {
        self.joins.clear();
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Resolver                                  */
/* -------------------------------------------------------------------------- */

/// Outcome of one successful pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentResult {
    pub kind: JoinKind,
    /// The part that was resolved.
    pub part: PartId,
    pub part_point: usize,
    pub other: PartId,
    pub other_point: usize,
    pub socket_type: String,
    /// World position of `part`'s attach point when the join was formed.
    pub anchor: Vec3,
    pub joint: Option<JointHandle>,
    /// Handle at the time of mounting; a later wheel rebuild replaces it.
    pub wheel: Option<WheelHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pairing {
    Rigid,
    /// Chassis host and wheel visual, in that order.
    Wheel { chassis_is_new: bool },
    /// Wheel visual next to a plain part: nothing to build.
    Skip,
}

fn classify(new: PartKind, other: PartKind) -> Pairing {
    use PartKind::*;
    match (new, other) {
        (ChassisHost, WheelVisual) => Pairing::Wheel { chassis_is_new: true },
        (WheelVisual, ChassisHost) => Pairing::Wheel { chassis_is_new: false },
        (WheelVisual, WheelVisual) => Pairing::Rigid,
        (WheelVisual, _) | (_, WheelVisual) => Pairing::Skip,
        _ => Pairing::Rigid,
    }
}

pub struct AttachmentResolver {
    wheel: WheelConfig,
    min_mass: f32,
    ledger: PairLedger,
}

impl AttachmentResolver {
    pub fn new(wheel: WheelConfig, attach: &AttachConfig) -> Self {
        Self { wheel, min_mass: attach.min_mass, ledger: PairLedger::new() }
    }

    pub fn ledger(&self) -> &PairLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut PairLedger {
        &mut self.ledger
    }

    /// Join `new_part` to every compatible attach point in range.
    ///
    /// Fails only when the proximity search cannot answer; pairings formed
    /// before the failure stay in place. Individual candidates that cannot be
    /// joined (no body, wheel already mounted, engine refusal) are skipped
    /// with a log line.
    pub fn resolve(
        &mut self,
        new_part: PartId,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        search: &dyn ProximitySearch,
        bus: Option<&EventBus>,
    ) -> Result<Vec<AttachmentResult>> {
        let part = parts.require(new_part)?;
        if !part.is_active() {
            debug!("skipping resolve of despawning {}", part.name);
            return Ok(Vec::new());
        }
        let point_count = part.attach_points.len();

        let mut results = Vec::new();
        for pi in 0..point_count {
            // Re-read each round: mounting a wheel moves the new part.
            let part = parts.require(new_part)?;
            let Some(point) = part.attach_points.get(pi) else { continue };
            if !point.enabled {
                continue;
            }
            let socket = point.socket_type.clone();
            let radius = point.detection_radius;
            let center = point.world_position(&part.pose);
            let name = part.name.clone();

            let candidates = search
                .query(parts, center, radius, Some(&socket))
                .map_err(|e| e.context(format!("resolving {}", name)))?;

            for c in candidates {
                if c.owner == new_part || c.socket_type != socket {
                    continue;
                }
                let pair = PointPair::new((new_part, pi), (c.owner, c.point_index));
                if self.ledger.contains(&pair) {
                    continue;
                }
                let (Some(me), Some(other)) = (parts.get(new_part), parts.get(c.owner)) else { continue };

                let joined = match classify(me.kind, other.kind) {
                    Pairing::Skip => {
                        debug!("no join between {} and {} ({})", me.name, other.name, socket);
                        continue;
                    }
                    Pairing::Wheel { chassis_is_new } => {
                        let (host, host_point, wheel) = if chassis_is_new {
                            (new_part, pi, c.owner)
                        } else {
                            (c.owner, c.point_index, new_part)
                        };
                        self.join_wheel(parts, physics, host, host_point, wheel)
                    }
                    Pairing::Rigid => self.join_rigid(parts, physics, new_part, pi, c.owner),
                };
                let Some((join, anchor, wheel)) = joined else { continue };
                self.ledger.record(pair, join);

                let kind = match join {
                    Join::Rigid(_) => JoinKind::Rigid,
                    Join::Wheel { .. } => JoinKind::Wheel,
                };
                info!(
                    "Attached {} ↔ {} at ({:.3}, {:.3}, {:.3}) [{} joint, socket '{}']",
                    parts.name_of(new_part),
                    parts.name_of(c.owner),
                    anchor.x,
                    anchor.y,
                    anchor.z,
                    kind.word(),
                    socket
                );
                if let Some(bus) = bus {
                    bus.publish(AttachmentFormed {
                        kind,
                        part: new_part,
                        other: c.owner,
                        socket_type: socket.clone(),
                        anchor,
                    });
                }
                results.push(AttachmentResult {
                    kind,
                    part: new_part,
                    part_point: pi,
                    other: c.owner,
                    other_point: c.point_index,
                    socket_type: socket.clone(),
                    anchor,
                    joint: match join {
                        Join::Rigid(j) => Some(j),
                        Join::Wheel { .. } => None,
                    },
                    wheel,
                });
            }
        }
        Ok(results)
    }

    fn join_wheel(
        &self,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        host: PartId,
        host_point: usize,
        wheel: PartId,
    ) -> Option<(Join, Vec3, Option<WheelHandle>)> {
        if parts.body(host).is_none() {
            warn!("chassis {} has no body, wheel {} left loose", parts.name_of(host), parts.name_of(wheel));
            return None;
        }
        if parts.get(wheel)?.parent.is_some() {
            debug!("{} is already mounted", parts.name_of(wheel));
            return None;
        }
        let anchor = parts.get(host)?.point_world_position(host_point)?;
        match chassis::mount_wheel(parts, physics, &self.wheel, host, host_point, wheel) {
            Ok(handle) => Some((Join::Wheel { chassis: host, visual: wheel }, anchor, Some(handle))),
            Err(e) => {
                warn!("mounting {} on {} failed: {}", parts.name_of(wheel), parts.name_of(host), e);
                None
            }
        }
    }

    fn join_rigid(
        &self,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        new_part: PartId,
        point: usize,
        other: PartId,
    ) -> Option<(Join, Vec3, Option<WheelHandle>)> {
        let Some(other_body) = parts.body(other) else {
            warn!("{} has no body, not joining {}", parts.name_of(other), parts.name_of(new_part));
            return None;
        };
        let own_body = match parts.body(new_part) {
            Some(b) => b,
            None => self.create_missing_body(parts, physics, new_part)?,
        };
        let anchor = parts.get(new_part)?.point_world_position(point)?;
        match physics.create_fixed_joint(own_body, other_body, anchor) {
            Ok(joint) => Some((Join::Rigid(joint), anchor, None)),
            Err(e) => {
                warn!("joint {} ↔ {} refused: {}", parts.name_of(new_part), parts.name_of(other), e);
                None
            }
        }
    }

    fn create_missing_body(
        &self,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        id: PartId,
    ) -> Option<BodyHandle> {
        let part = parts.get(id)?;
        let spec = BodySpec {
            owner: id,
            mass: part.definition.mass.max(self.min_mass),
            pose: part.pose,
            bounds: part.definition.local_bounds(parts.cell_size()),
        };
        match physics.create_body(&spec) {
            Ok(body) => {
                warn!("{} had no body, created one (mass {:.4})", part.name, spec.mass);
                parts.bodies.insert(id, body);
                Some(body)
            }
            Err(e) => {
                warn!("could not create body for {}: {}", part.name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::BuilderConfig;
    use crate::math::Pose;
    use crate::parts::{AttachPointSpec, PartCatalog, PartDefinition};
    use crate::physics::RapierWorld;
    use crate::spatial::{AttachPointIndex, LinearSearch};

    struct Bench {
        parts: PartRegistry,
        physics: RapierWorld,
        resolver: AttachmentResolver,
        bus: EventBus,
    }

    impl Bench {
        fn new() -> Self {
            let config = BuilderConfig::default();
            Self {
                parts: PartRegistry::new(config.grid.cell_size, config.attach.clone()),
                physics: RapierWorld::new(&config.physics),
                resolver: AttachmentResolver::new(config.wheel.clone(), &config.attach),
                bus: EventBus::new(),
            }
        }

        /// Spawn and give the part a body if its kind has one.
        fn place(&mut self, def: &Arc<PartDefinition>, at: Vec3) -> PartId {
            let pose = Pose::from_translation(at);
            let id = self.parts.spawn(def.clone(), pose);
            if PartKind::of(def).has_body() {
                let body = self
                    .physics
                    .create_body(&BodySpec { owner: id, mass: def.mass, pose, bounds: def.local_bounds(0.25) })
                    .unwrap();
                self.parts.bodies.insert(id, body);
            }
            id
        }

        fn resolve(&mut self, id: PartId) -> Vec<AttachmentResult> {
            self.resolver
                .resolve(id, &mut self.parts, &mut self.physics, &LinearSearch, Some(&self.bus))
                .unwrap()
        }

        fn wheel_count(&self, chassis: PartId) -> usize {
            self.parts.chassis.get(chassis).map_or(0, |a| a.len())
        }
    }

    fn custom(id: &str, kind: PartKind, points: &[(&str, &str, Vec3)], radius: f32) -> Arc<PartDefinition> {
        let mut def = PartDefinition::new(id);
        def.is_chassis = kind == PartKind::ChassisHost;
        def.is_wheel_visual = kind == PartKind::WheelVisual;
        def.template.attach_points = points
            .iter()
            .map(|(name, socket, at)| {
                let mut spec = AttachPointSpec::new(name, socket, *at);
                spec.detection_radius = Some(radius);
                spec
            })
            .collect();
        Arc::new(def)
    }

    #[test]
    fn chassis_adopts_wheel_placed_on_its_mount() {
        let mut b = Bench::new();
        let chassis = custom("c", PartKind::ChassisHost, &[("m", "wheel", Vec3::new(0.5, 0.0, 0.0))], 0.05);
        let wheel = custom("w", PartKind::WheelVisual, &[("hub", "wheel", Vec3::ZERO)], 0.05);

        let c = b.place(&chassis, Vec3::ZERO);
        let w = b.place(&wheel, Vec3::new(0.5, 0.0, 0.0));
        let out = b.resolve(w);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, JoinKind::Wheel);
        assert!(out[0].wheel.is_some() && out[0].joint.is_none());
        assert_eq!(b.wheel_count(c), 1);
        assert_eq!(b.parts.get(w).unwrap().parent, Some(c));
        assert!(b.parts.body(w).is_none());
        assert_eq!(b.physics.joint_count(), 0);
    }

    #[test]
    fn nearby_frames_get_one_rigid_joint() {
        let mut b = Bench::new();
        let frame = custom("f", PartKind::ChassisHost, &[("p", "frame", Vec3::ZERO)], 0.2);
        let second = b.place(&frame, Vec3::new(0.1, 0.0, 0.0));
        let first = b.place(&frame, Vec3::ZERO);

        let out = b.resolve(first);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, JoinKind::Rigid);
        assert_eq!(out[0].other, second);
        assert!(out[0].anchor.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert_eq!(b.physics.joint_count(), 1);
    }

    #[test]
    fn mismatched_sockets_never_join() {
        let mut b = Bench::new();
        let x = custom("x", PartKind::Generic, &[("p", "frame", Vec3::ZERO)], 0.2);
        let y = custom("y", PartKind::Generic, &[("p", "power", Vec3::ZERO)], 0.2);
        b.place(&x, Vec3::ZERO);
        let id = b.place(&y, Vec3::new(0.05, 0.0, 0.0));

        assert!(b.resolve(id).is_empty());
        assert_eq!(b.physics.joint_count(), 0);
        assert!(b.parts.chassis.is_empty());
    }

    #[test]
    fn wheel_sockets_match_case_sensitively() {
        for socket in ["Wheel", "axle"] {
            let mut b = Bench::new();
            let chassis = custom("c", PartKind::ChassisHost, &[("m", "wheel", Vec3::new(0.5, 0.0, 0.0))], 0.1);
            let wheel = custom("w", PartKind::WheelVisual, &[("hub", socket, Vec3::ZERO)], 0.1);
            let c = b.place(&chassis, Vec3::ZERO);
            let w = b.place(&wheel, Vec3::new(0.5, 0.0, 0.0));

            assert!(b.resolve(w).is_empty(), "socket '{}'", socket);
            assert!(b.resolve(c).is_empty(), "socket '{}'", socket);
            assert!(b.parts.chassis.get(c).is_none());
            assert_eq!(b.parts.get(w).unwrap().parent, None);
            assert_eq!(b.physics.wheel_count(b.parts.body(c).unwrap()), 0);
        }
    }

    #[test]
    fn forgotten_wheel_can_be_mounted_again() {
        let mut b = Bench::new();
        let chassis = custom("c", PartKind::ChassisHost, &[("m", "wheel", Vec3::new(0.5, 0.0, 0.0))], 0.05);
        let wheel = custom("w", PartKind::WheelVisual, &[("hub", "wheel", Vec3::ZERO)], 0.05);
        let c = b.place(&chassis, Vec3::ZERO);
        let w = b.place(&wheel, Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(b.resolve(w).len(), 1);
        assert_eq!(b.resolver.ledger().joins_of(w), vec![Join::Wheel { chassis: c, visual: w }]);

        assert_eq!(crate::chassis::clear_wheels(&mut b.parts, &mut b.physics, c), vec![w]);
        assert!(b.resolve(c).is_empty());
        assert!(b.resolver.ledger_mut().forget_wheel(w));
        assert!(!b.resolver.ledger_mut().forget_wheel(w));

        assert_eq!(b.resolve(c).len(), 1);
        assert_eq!(b.wheel_count(c), 1);
        assert_eq!(b.parts.get(w).unwrap().parent, Some(c));
    }

    #[test]
    fn never_joins_points_of_the_same_part() {
        let mut b = Bench::new();
        let twin = custom(
            "t",
            PartKind::Generic,
            &[("a", "default", Vec3::ZERO), ("b", "default", Vec3::new(0.01, 0.0, 0.0))],
            0.2,
        );
        let id = b.place(&twin, Vec3::ZERO);
        assert!(b.resolve(id).is_empty());
        assert_eq!(b.physics.joint_count(), 0);
    }

    #[test]
    fn wheel_chassis_order_does_not_matter() {
        let kit = PartCatalog::starter_kit();
        let chassis = kit.require("chassis").unwrap().clone();
        let wheel = kit.require("wheel").unwrap().clone();
        let mount = Vec3::new(0.75, 0.0, 0.5);

        let mut a = Bench::new();
        let ca = a.place(&chassis, Vec3::ZERO);
        let wa = a.place(&wheel, mount);
        a.resolve(wa);

        let mut b = Bench::new();
        let wb = b.place(&wheel, mount);
        let cb = b.place(&chassis, Vec3::ZERO);
        b.resolve(cb);

        for (bench, c, w) in [(&a, ca, wa), (&b, cb, wb)] {
            assert_eq!(bench.wheel_count(c), 1);
            assert_eq!(bench.parts.get(w).unwrap().parent, Some(c));
            let body = bench.parts.body(c).unwrap();
            assert_eq!(bench.physics.wheel_count(body), 1);
        }
        let pa = a.parts.get(wa).unwrap().pose;
        let pb = b.parts.get(wb).unwrap().pose;
        assert!(pa.approx_eq(&pb, 1e-5));
    }

    #[test]
    fn rigid_anchor_maps_back_to_world() {
        let mut b = Bench::new();
        let kit = PartCatalog::starter_kit();
        let chassis = b.place(kit.require("chassis").unwrap(), Vec3::new(1.0, 0.5, -2.0));
        let bracket = b.place(kit.require("bracket").unwrap(), Vec3::new(1.0, 0.75, -2.0));

        let out = b.resolve(bracket);
        assert_eq!(out.len(), 1);
        let joint = out[0].joint.unwrap();
        let anchors = b.physics.joint_anchors(joint).unwrap();
        let pa = b.physics.body_pose(anchors.body_a).unwrap();
        let pb = b.physics.body_pose(anchors.body_b).unwrap();
        let expected = Vec3::new(1.0, 0.625, -2.0);
        assert!(pa.transform_point(anchors.local_a).abs_diff_eq(expected, 1e-5));
        assert!(pb.transform_point(anchors.local_b).abs_diff_eq(expected, 1e-5));
        assert_eq!(anchors.body_b, b.parts.body(chassis).unwrap());
    }

    #[test]
    fn resolving_twice_adds_nothing() {
        let mut b = Bench::new();
        let kit = PartCatalog::starter_kit();
        let chassis = b.place(kit.require("chassis").unwrap(), Vec3::ZERO);
        let bracket = b.place(kit.require("bracket").unwrap(), Vec3::new(0.0, 0.25, 0.0));
        let wheel = b.place(kit.require("wheel").unwrap(), Vec3::new(-0.75, 0.0, 0.5));

        assert_eq!(b.resolve(bracket).len(), 1);
        assert_eq!(b.resolve(wheel).len(), 1);
        assert!(b.resolve(bracket).is_empty());
        assert!(b.resolve(wheel).is_empty());
        // The chassis side sees both pairs as already formed.
        assert!(b.resolve(chassis).is_empty());
        assert_eq!(b.physics.joint_count(), 1);
        assert_eq!(b.wheel_count(chassis), 1);
        assert_eq!(b.resolver.ledger().len(), 2);
    }

    #[test]
    fn wheel_next_to_plain_part_is_left_alone() {
        let mut b = Bench::new();
        let plate = custom("plate", PartKind::Generic, &[("p", "wheel", Vec3::ZERO)], 0.05);
        let kit = PartCatalog::starter_kit();
        b.place(&plate, Vec3::ZERO);
        let w = b.place(kit.require("wheel").unwrap(), Vec3::ZERO);
        assert!(b.resolve(w).is_empty());
        assert!(b.parts.body(w).is_none());
    }

    #[test]
    fn missing_body_on_new_part_is_created() {
        let mut b = Bench::new();
        let kit = PartCatalog::starter_kit();
        b.place(kit.require("chassis").unwrap(), Vec3::ZERO);
        let bracket = b.parts.spawn(
            kit.require("bracket").unwrap().clone(),
            Pose::from_translation(Vec3::new(0.0, 0.25, 0.0)),
        );
        assert!(b.parts.body(bracket).is_none());
        assert_eq!(b.resolve(bracket).len(), 1);
        assert!(b.parts.body(bracket).is_some());
    }

    #[test]
    fn candidate_without_body_is_skipped() {
        let mut b = Bench::new();
        let kit = PartCatalog::starter_kit();
        let bracket = kit.require("bracket").unwrap().clone();
        b.parts.spawn(bracket.clone(), Pose::IDENTITY);
        let top = b.place(&bracket, Vec3::new(0.0, 0.25, 0.0));
        assert!(b.resolve(top).is_empty());
        assert_eq!(b.physics.joint_count(), 0);
    }

    #[test]
    fn unavailable_search_is_an_error() {
        let mut b = Bench::new();
        let kit = PartCatalog::starter_kit();
        b.place(kit.require("chassis").unwrap(), Vec3::ZERO);
        let bracket = b.place(kit.require("bracket").unwrap(), Vec3::new(0.0, 0.25, 0.0));

        let index = AttachPointIndex::new(0.25);
        let err = b
            .resolver
            .resolve(bracket, &mut b.parts, &mut b.physics, &index, None)
            .unwrap_err();
        assert!(err.is_proximity_unavailable());
        assert_eq!(b.physics.joint_count(), 0);

        index.rebuild(&b.parts);
        let out = b.resolver.resolve(bracket, &mut b.parts, &mut b.physics, &index, None).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn publishes_one_event_per_pairing() {
        let mut b = Bench::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        b.bus.subscribe(move |e: &AttachmentFormed| {
            assert_eq!(e.kind, JoinKind::Rigid);
            s.fetch_add(1, Ordering::SeqCst);
        });
        let kit = PartCatalog::starter_kit();
        b.place(kit.require("chassis").unwrap(), Vec3::ZERO);
        let bracket = b.place(kit.require("bracket").unwrap(), Vec3::new(0.0, 0.25, 0.0));
        b.resolve(bracket);
        b.resolve(bracket);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forgetting_a_part_releases_its_pairs() {
        let mut ledger = PairLedger::new();
        let mut reg = PartRegistry::new(0.25, AttachConfig::default());
        let kit = PartCatalog::starter_kit();
        let a = reg.spawn(kit.require("bracket").unwrap().clone(), Pose::IDENTITY);
        let c = reg.spawn(kit.require("bracket").unwrap().clone(), Pose::IDENTITY);
        let pair = PointPair::new((c, 0), (a, 1));
        assert_eq!(pair, PointPair::new((a, 1), (c, 0)));

        let mut world = RapierWorld::new(&Default::default());
        let bodies: Vec<BodyHandle> = [a, c]
            .iter()
            .map(|id| {
                world
                    .create_body(&BodySpec {
                        owner: *id,
                        mass: 1.0,
                        pose: Pose::IDENTITY,
                        bounds: kit.require("bracket").unwrap().local_bounds(0.25),
                    })
                    .unwrap()
            })
            .collect();
        let joint = world.create_fixed_joint(bodies[0], bodies[1], Vec3::ZERO).unwrap();
        ledger.record(pair, Join::Rigid(joint));
        assert_eq!(ledger.joins_of(a), vec![Join::Rigid(joint)]);
        assert_eq!(ledger.forget_part(c), vec![Join::Rigid(joint)]);
        assert!(ledger.is_empty());
    }
}
