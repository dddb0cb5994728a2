// src/builder.rs
//! Grid placement controller.
//!
//! Holds the ghost (the part about to be placed): which catalog entry is
//! selected, where the cursor ray hits the ground, the height offset and the
//! yaw. Placing spawns the part with a kinematic body and queues it for a
//! deferred attachment resolve, run by the app on the next frame so the new
//! body exists before anything tries to joint to it.

use std::collections::VecDeque;
use std::sync::Arc;

use glam::{Quat, Vec3};
use log::{debug, info, warn};

use crate::config::GridConfig;
use crate::error::Result;
use crate::events::{EventBus, PartPlaced};
use crate::math::{self, Aabb, Pose};
use crate::parts::{PartCatalog, PartDefinition};
use crate::physics::{BodySpec, PhysicsBackend};
use crate::registry::{PartId, PartRegistry};

pub struct BuildController {
    grid: GridConfig,
    min_mass: f32,
    selected: usize,
    height_offset: i32,
    rotation: Quat,
    /// Last ground hit of the cursor ray, before snapping.
    target: Vec3,
    pending: VecDeque<PartId>,
}

impl BuildController {
    pub fn new(grid: GridConfig, min_mass: f32) -> Self {
        let target = grid.origin;
        Self {
            grid,
            min_mass,
            selected: 0,
            height_offset: 0,
            rotation: Quat::IDENTITY,
            target,
            pending: VecDeque::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Ghost state
    // -----------------------------------------------------------------------

    /// Select a catalog entry; out-of-range indices clamp to the last one.
    pub fn select(&mut self, index: usize, catalog: &PartCatalog) -> usize {
        self.selected = index.min(catalog.len().saturating_sub(1));
        self.selected
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_definition<'a>(&self, catalog: &'a PartCatalog) -> Option<&'a Arc<PartDefinition>> {
        catalog.by_index(self.selected)
    }

    /// Turn the ghost 90° about world up.
    pub fn rotate(&mut self) {
        self.rotation = (math::yaw_step() * self.rotation).normalize();
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn raise(&mut self) -> i32 {
        self.height_offset = (self.height_offset + 1).min(self.grid.max_height_offset);
        self.height_offset
    }

    pub fn lower(&mut self) -> i32 {
        self.height_offset = (self.height_offset - 1).max(self.grid.min_height_offset);
        self.height_offset
    }

    pub fn height_offset(&self) -> i32 {
        self.height_offset
    }

    pub fn set_target(&mut self, world: Vec3) {
        self.target = world;
    }

    /// Intersect a cursor ray with the ground plane through the grid origin.
    /// A miss keeps the previous target and returns false.
    pub fn target_from_ray(&mut self, origin: Vec3, direction: Vec3) -> bool {
        let dir = direction.normalize_or_zero();
        if dir.y.abs() < 1e-6 {
            return false;
        }
        let t = (self.grid.origin.y - origin.y) / dir.y;
        if !(t >= 0.0) {
            return false;
        }
        self.target = origin + dir * t;
        true
    }

    /// Snapped ghost pose.
    pub fn ghost_pose(&self) -> Pose {
        let position = math::snap_to_grid(self.target, self.grid.origin, self.grid.cell_size, self.height_offset);
        Pose::new(position, self.rotation)
    }

    pub fn ghost_bounds(&self, def: &PartDefinition) -> Aabb {
        def.local_bounds(self.grid.cell_size).transformed(&self.ghost_pose())
    }

    /// First placed part the ghost would overlap, if any.
    pub fn colliding_with(&self, def: &PartDefinition, parts: &PartRegistry) -> Option<PartId> {
        let ghost = self.ghost_bounds(def).shrink(self.grid.overlap_margin);
        parts
            .placed_in_order()
            .into_iter()
            .filter(|id| parts.get(*id).map_or(false, |p| p.is_active()))
            .find(|id| {
                parts
                    .world_bounds(*id)
                    .map_or(false, |b| b.shrink(self.grid.overlap_margin).intersects(&ghost))
            })
    }

    pub fn is_valid(&self, def: &PartDefinition, parts: &PartRegistry) -> bool {
        self.colliding_with(def, parts).is_none()
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place the selected part at the ghost. `Ok(None)` when the ghost
    /// overlaps something.
    pub fn place_current(
        &mut self,
        catalog: &PartCatalog,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        bus: Option<&EventBus>,
    ) -> Result<Option<PartId>> {
        let def = match self.selected_definition(catalog) {
            Some(d) => Arc::clone(d),
            None => crate::bail!("catalog is empty, nothing to place"),
        };
        if let Some(blocker) = self.colliding_with(&def, parts) {
            debug!("ghost {} blocked by {}", def.part_id, parts.name_of(blocker));
            return Ok(None);
        }
        let pose = self.ghost_pose();
        self.place(def, pose, parts, physics, bus).map(Some)
    }

    /// Spawn `def` at `pose` without an overlap check and queue its resolve.
    pub fn place(
        &mut self,
        def: Arc<PartDefinition>,
        pose: Pose,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
        bus: Option<&EventBus>,
    ) -> Result<PartId> {
        let id = self.spawn(def, pose, parts, physics)?;
        self.defer(id);
        if let Some(bus) = bus {
            let part = parts.require(id)?;
            bus.publish(PartPlaced {
                part: id,
                part_id: part.part_id().to_string(),
                position: part.pose.position,
            });
        }
        Ok(id)
    }

    /// Spawn `def` with its body (wheel visuals get none). Nothing is queued.
    pub fn spawn(
        &self,
        def: Arc<PartDefinition>,
        pose: Pose,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
    ) -> Result<PartId> {
        crate::ensure!(def.mass.is_finite(), "part '{}' has a non-finite mass", def.part_id);
        let id = parts.spawn(Arc::clone(&def), pose);
        let kind = parts.require(id)?.kind;
        if kind.has_body() {
            let spec = BodySpec {
                owner: id,
                mass: def.mass.max(self.min_mass),
                pose,
                bounds: def.local_bounds(self.grid.cell_size),
            };
            match physics.create_body(&spec) {
                Ok(body) => {
                    parts.bodies.insert(id, body);
                }
                Err(e) => {
                    parts.remove(id);
                    return Err(e.context(format!("placing {}", def.part_id)));
                }
            }
        }
        info!("placed {} at {:?}", parts.name_of(id), pose.position);
        Ok(id)
    }

    /// Queue `id` for a resolve on the next frame.
    pub fn defer(&mut self, id: PartId) {
        if !self.pending.contains(&id) {
            self.pending.push_back(id);
        }
    }

    /// Parts waiting for their deferred resolve, oldest first.
    pub fn take_pending(&mut self) -> Vec<PartId> {
        self.pending.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Remove every placed part and body.
    pub fn clear_all(&mut self, parts: &mut PartRegistry, physics: &mut dyn PhysicsBackend) {
        let count = parts.len();
        for (_, aggregate) in parts.chassis.iter_mut() {
            aggregate.clear_wheels(physics);
        }
        for (_, body) in parts.bodies.iter() {
            physics.remove_body(*body);
        }
        parts.clear();
        self.pending.clear();
        if count > 0 {
            warn!("cleared {} parts", count);
        }
    }
}
