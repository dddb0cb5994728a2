// src/registry.rs
// Part arena + sparse component tables.
//
// Parts live in a generational arena; optional per-part data (physics body,
// chassis aggregate) lives in `ComponentTable`s keyed by the same `PartId`.
// Every structural or pose change bumps `version()` so caches (the proximity
// index) can tell when they are stale.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use crate::chassis::ChassisAggregate;
use crate::config::AttachConfig;
use crate::error::{Error, Result};
use crate::math::{Aabb, Pose};
use crate::parts::{AttachPoint, PartDefinition, PartKind};
use crate::physics::BodyHandle;

/// Stable part id (index + generation). Ids of removed parts never resolve again.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartId {
    index: u32,
    generation: u32,
}

impl PartId {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// ComponentTable: dense storage + sparse index
// ---------------------------------------------------------------------------

pub struct ComponentTable<T> {
    dense: Vec<T>,
    dense_ids: Vec<PartId>,
    sparse: Vec<i32>, // -1 = empty, else index into dense
}

impl<T> Default for ComponentTable<T> {
    fn default() -> Self {
        Self { dense: Vec::new(), dense_ids: Vec::new(), sparse: Vec::new() }
    }
}

impl<T> ComponentTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn slot(&self, id: PartId) -> Option<usize> {
        let si = *self.sparse.get(id.index())?;
        if si < 0 {
            return None;
        }
        let di = si as usize;
        (self.dense_ids[di] == id).then_some(di)
    }

    /// Insert or overwrite. Returns the previous value, if any.
    pub fn insert(&mut self, id: PartId, value: T) -> Option<T> {
        if let Some(di) = self.slot(id) {
            return Some(std::mem::replace(&mut self.dense[di], value));
        }
        // A stale id from an older generation may still occupy this index.
        self.remove_index(id.index());

        let idx = id.index();
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, -1);
        }
        self.sparse[idx] = self.dense.len() as i32;
        self.dense.push(value);
        self.dense_ids.push(id);
        None
    }

    fn remove_index(&mut self, idx: usize) -> Option<T> {
        let si = *self.sparse.get(idx)?;
        if si < 0 {
            return None;
        }
        let di = si as usize;
        let value = self.dense.swap_remove(di);
        self.dense_ids.swap_remove(di);
        if di < self.dense.len() {
            let moved = self.dense_ids[di];
            self.sparse[moved.index()] = di as i32;
        }
        self.sparse[idx] = -1;
        Some(value)
    }

    pub fn remove(&mut self, id: PartId) -> Option<T> {
        self.slot(id)?;
        self.remove_index(id.index())
    }

    #[inline]
    pub fn get(&self, id: PartId) -> Option<&T> {
        self.slot(id).map(|di| &self.dense[di])
    }

    #[inline]
    pub fn get_mut(&mut self, id: PartId) -> Option<&mut T> {
        self.slot(id).map(move |di| &mut self.dense[di])
    }

    #[inline]
    pub fn contains(&self, id: PartId) -> bool {
        self.slot(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartId, &T)> {
        self.dense_ids.iter().copied().zip(self.dense.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PartId, &mut T)> {
        self.dense_ids.iter().copied().zip(self.dense.iter_mut())
    }

    pub fn ids(&self) -> Vec<PartId> {
        self.dense_ids.clone()
    }

    pub fn clear(&mut self) {
        self.dense.clear();
        self.dense_ids.clear();
        self.sparse.clear();
    }
}

// ---------------------------------------------------------------------------
// Part instances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    /// Scheduled for removal; invisible to proximity searches.
    Despawning,
}

#[derive(Debug, Clone)]
pub struct PartInstance {
    pub id: PartId,
    pub definition: Arc<PartDefinition>,
    pub kind: PartKind,
    /// Unique per session: `{part_id}_{n}`.
    pub name: String,
    pub pose: Pose,
    /// Set only when a wheel visual is mounted on a chassis.
    pub parent: Option<PartId>,
    pub attach_points: Vec<AttachPoint>,
    pub state: LifecycleState,
    pub placement_seq: u64,
}

impl PartInstance {
    #[inline]
    pub fn part_id(&self) -> &str {
        &self.definition.part_id
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn point_world_position(&self, index: usize) -> Option<Vec3> {
        self.attach_points.get(index).map(|p| p.world_position(&self.pose))
    }

    pub fn point_world_pose(&self, index: usize) -> Option<Pose> {
        self.attach_points.get(index).map(|p| p.world_pose(&self.pose))
    }
}

struct Slot {
    generation: u32,
    value: Option<PartInstance>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct PartRegistry {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    alive: usize,
    next_seq: u64,
    version: u64,
    cell_size: f32,
    attach: AttachConfig,
    /// Body of every part that has one (never wheel visuals).
    pub bodies: ComponentTable<BodyHandle>,
    /// Wheel aggregates, created lazily on chassis hosts.
    pub chassis: ComponentTable<ChassisAggregate>,
}

impl PartRegistry {
    pub fn new(cell_size: f32, attach: AttachConfig) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            alive: 0,
            next_seq: 0,
            version: 0,
            cell_size,
            attach,
            bodies: ComponentTable::new(),
            chassis: ComponentTable::new(),
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.alive
    }

    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }

    /// Create an instance with its attach points. No body is created here.
    pub fn spawn(&mut self, definition: Arc<PartDefinition>, pose: Pose) -> PartId {
        let (index, generation) = match self.free_list.pop() {
            Some(i) => (i, self.slots[i as usize].generation),
            None => {
                self.slots.push(Slot { generation: 0, value: None });
                ((self.slots.len() - 1) as u32, 0)
            }
        };
        let id = PartId { index, generation };
        let seq = self.next_seq;
        self.next_seq += 1;

        let instance = PartInstance {
            id,
            kind: PartKind::of(&definition),
            name: format!("{}_{}", definition.part_id, seq),
            pose,
            parent: None,
            attach_points: definition.instantiate_attach_points(&self.attach),
            state: LifecycleState::Active,
            placement_seq: seq,
            definition,
        };
        self.slots[index as usize].value = Some(instance);
        self.alive += 1;
        self.touch();
        id
    }

    #[inline]
    pub fn get(&self, id: PartId) -> Option<&PartInstance> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutable access. Counts as a change for cache invalidation.
    pub fn get_mut(&mut self, id: PartId) -> Option<&mut PartInstance> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation || slot.value.is_none() {
            return None;
        }
        self.version = self.version.wrapping_add(1);
        slot.value.as_mut()
    }

    pub fn require(&self, id: PartId) -> Result<&PartInstance> {
        self.get(id).ok_or_else(|| Error::UnknownPart(id.to_string()))
    }

    pub fn require_mut(&mut self, id: PartId) -> Result<&mut PartInstance> {
        self.get_mut(id).ok_or_else(|| Error::UnknownPart(id.to_string()))
    }

    #[inline]
    pub fn contains(&self, id: PartId) -> bool {
        self.get(id).is_some()
    }

    /// Display name, or the raw id when the part is gone.
    pub fn name_of(&self, id: PartId) -> String {
        self.get(id).map(|p| p.name.clone()).unwrap_or_else(|| id.to_string())
    }

    pub fn set_pose(&mut self, id: PartId, pose: Pose) -> Result<()> {
        self.require_mut(id)?.pose = pose;
        Ok(())
    }

    pub fn set_point_enabled(&mut self, id: PartId, point: usize, enabled: bool) -> Result<()> {
        let part = self.require_mut(id)?;
        let name = part.name.clone();
        let p = part
            .attach_points
            .get_mut(point)
            .ok_or_else(|| Error::Custom(format!("{} has no attach point {}", name, point)))?;
        p.enabled = enabled;
        Ok(())
    }

    pub fn begin_despawn(&mut self, id: PartId) -> Result<()> {
        self.require_mut(id)?.state = LifecycleState::Despawning;
        Ok(())
    }

    /// Drop the instance and all of its components.
    pub fn remove(&mut self, id: PartId) -> Option<PartInstance> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        self.alive -= 1;
        self.bodies.remove(id);
        self.chassis.remove(id);
        self.touch();
        Some(value)
    }

    #[inline]
    pub fn body(&self, id: PartId) -> Option<BodyHandle> {
        self.bodies.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartInstance> {
        self.slots.iter().filter_map(|s| s.value.as_ref())
    }

    /// Alive parts ordered by placement.
    pub fn placed_in_order(&self) -> Vec<PartId> {
        let mut parts: Vec<(u64, PartId)> = self.iter().map(|p| (p.placement_seq, p.id)).collect();
        parts.sort_unstable();
        parts.into_iter().map(|(_, id)| id).collect()
    }

    /// World AABB used for the placement overlap test.
    pub fn world_bounds(&self, id: PartId) -> Option<Aabb> {
        let part = self.get(id)?;
        Some(part.definition.local_bounds(self.cell_size).transformed(&part.pose))
    }

    /// World AABB of the renderable mesh, when the definition has one.
    pub fn mesh_world_bounds(&self, id: PartId) -> Option<Aabb> {
        let part = self.get(id)?;
        part.definition.mesh_bounds.map(|b| b.transformed(&part.pose))
    }

    /// Remove everything. Session name counter keeps counting.
    pub fn clear(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(i as u32);
            }
        }
        self.alive = 0;
        self.bodies.clear();
        self.chassis.clear();
        self.touch();
    }
}
