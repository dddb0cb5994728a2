// src/spatial.rs
//! Proximity search over attach-point detection volumes.
//!
//! [`AttachPointIndex`] buckets every enabled attach point of every active
//! part into a uniform hash grid. It refreshes itself when the registry
//! version moves, and reports `ProximityUnavailable` until it has been built
//! once (or after it is invalidated).

use std::collections::HashMap;

use glam::{IVec3, Vec3};
use log::debug;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::registry::{PartId, PartRegistry};

/// A point returned by a proximity query.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePoint {
    pub owner: PartId,
    pub point_index: usize,
    pub world_position: Vec3,
    pub socket_type: String,
    pub distance: f32,
}

pub trait ProximitySearch {
    /// Enabled attach points of active parts within `radius` of `center`,
    /// nearest first. `socket` restricts results to an exact socket type.
    fn query(&self, parts: &PartRegistry, center: Vec3, radius: f32, socket: Option<&str>) -> Result<Vec<CandidatePoint>>;
}

fn sort_candidates(out: &mut [CandidatePoint]) {
    out.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.owner.cmp(&b.owner))
            .then(a.point_index.cmp(&b.point_index))
    });
}

fn accept(parts: &PartRegistry, owner: PartId, index: usize, center: Vec3, radius: f32, socket: Option<&str>) -> Option<CandidatePoint> {
    let part = parts.get(owner)?;
    if !part.is_active() {
        return None;
    }
    let point = part.attach_points.get(index)?;
    if !point.enabled {
        return None;
    }
    if let Some(s) = socket {
        if point.socket_type != s {
            return None;
        }
    }
    let world = point.world_position(&part.pose);
    let distance = world.distance(center);
    (distance <= radius).then(|| CandidatePoint {
        owner,
        point_index: index,
        world_position: world,
        socket_type: point.socket_type.clone(),
        distance,
    })
}

// ---------------------------------------------------------------------------
// Linear scan
// ---------------------------------------------------------------------------

/// Checks every attach point. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearSearch;

impl ProximitySearch for LinearSearch {
    fn query(&self, parts: &PartRegistry, center: Vec3, radius: f32, socket: Option<&str>) -> Result<Vec<CandidatePoint>> {
        let mut out: Vec<CandidatePoint> = parts
            .iter()
            .flat_map(|p| (0..p.attach_points.len()).map(move |i| (p.id, i)))
            .filter_map(|(owner, i)| accept(parts, owner, i, center, radius, socket))
            .collect();
        sort_candidates(&mut out);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Hash grid
// ---------------------------------------------------------------------------

struct Grid {
    version: u64,
    cells: HashMap<IVec3, Vec<(PartId, usize)>>,
    points: usize,
}

pub struct AttachPointIndex {
    cell: f32,
    grid: RwLock<Option<Grid>>,
}

impl AttachPointIndex {
    /// `cell` should be at least the largest detection radius in use.
    pub fn new(cell: f32) -> Self {
        Self { cell: cell.max(1e-3), grid: RwLock::new(None) }
    }

    #[inline]
    fn key(&self, p: Vec3) -> IVec3 {
        (p / self.cell).floor().as_ivec3()
    }

    fn build(&self, parts: &PartRegistry) -> Grid {
        let mut cells: HashMap<IVec3, Vec<(PartId, usize)>> = HashMap::new();
        let mut points = 0;
        for part in parts.iter().filter(|p| p.is_active()) {
            for (i, point) in part.attach_points.iter().enumerate() {
                if !point.enabled {
                    continue;
                }
                let key = self.key(point.world_position(&part.pose));
                cells.entry(key).or_default().push((part.id, i));
                points += 1;
            }
        }
        Grid { version: parts.version(), cells, points }
    }

    pub fn rebuild(&self, parts: &PartRegistry) {
        let grid = self.build(parts);
        debug!("attach index rebuilt: {} points in {} cells", grid.points, grid.cells.len());
        *self.grid.write() = Some(grid);
    }

    /// Make the index unavailable until the next `rebuild`.
    pub fn invalidate(&self) {
        *self.grid.write() = None;
    }

    pub fn is_built(&self) -> bool {
        self.grid.read().is_some()
    }

    pub fn point_count(&self) -> usize {
        self.grid.read().as_ref().map_or(0, |g| g.points)
    }
}

impl ProximitySearch for AttachPointIndex {
    fn query(&self, parts: &PartRegistry, center: Vec3, radius: f32, socket: Option<&str>) -> Result<Vec<CandidatePoint>> {
        let stale = match self.grid.read().as_ref() {
            None => return Err(Error::ProximityUnavailable("attach point index not built".into())),
            Some(g) => g.version != parts.version(),
        };
        if stale {
            *self.grid.write() = Some(self.build(parts));
        }

        let guard = self.grid.read();
        let grid = guard
            .as_ref()
            .ok_or_else(|| Error::ProximityUnavailable("attach point index invalidated".into()))?;

        let lo = self.key(center - Vec3::splat(radius));
        let hi = self.key(center + Vec3::splat(radius));
        let mut out = Vec::new();
        let mut take = |bucket: &Vec<(PartId, usize)>| {
            out.extend(
                bucket
                    .iter()
                    .filter_map(|(owner, i)| accept(parts, *owner, *i, center, radius, socket)),
            );
        };

        // A wide radius spans more cells than are occupied: walk the occupied ones.
        if cell_span(lo, hi) > grid.cells.len() as u64 {
            for (_, bucket) in grid.cells.iter().filter(|(k, _)| k.cmpge(lo).all() && k.cmple(hi).all()) {
                take(bucket);
            }
        } else {
            for x in lo.x..=hi.x {
                for y in lo.y..=hi.y {
                    for z in lo.z..=hi.z {
                        if let Some(bucket) = grid.cells.get(&IVec3::new(x, y, z)) {
                            take(bucket);
                        }
                    }
                }
            }
        }
        sort_candidates(&mut out);
        Ok(out)
    }
}

/// Number of grid cells in the box `lo..=hi`.
fn cell_span(lo: IVec3, hi: IVec3) -> u64 {
    let axis = |a: i32, b: i32| (i64::from(b) - i64::from(a) + 1).max(0) as u64;
    axis(lo.x, hi.x).saturating_mul(axis(lo.y, hi.y)).saturating_mul(axis(lo.z, hi.z))
}
