// src/persistence.rs
//! Saved vehicles.
//!
//! A save is the list of placed parts in placement order, each with its
//! catalog id and world pose:
//!
//! ```json
//! { "parts": [ { "partId": "chassis",
//!                "position": { "x": 0.0, "y": 0.0, "z": 0.0 },
//!                "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 } } ] }
//! ```
//!
//! Joints and wheels are not stored; they are rebuilt by resolving every
//! part again once all of them exist (see `AppContext::load_vehicle`).

use std::path::Path;
use std::sync::Arc;

use glam::{Quat, Vec3};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::builder::BuildController;
use crate::context::Context;
use crate::error::Result;
use crate::math::Pose;
use crate::parts::PartCatalog;
use crate::physics::PhysicsBackend;
use crate::registry::{PartId, PartRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SavedVec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3> for SavedVec3 {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<SavedVec3> for Vec3 {
    fn from(v: SavedVec3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedQuat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for SavedQuat {
    fn default() -> Self {
        Quat::IDENTITY.into()
    }
}

impl From<Quat> for SavedQuat {
    fn from(q: Quat) -> Self {
        Self { x: q.x, y: q.y, z: q.z, w: q.w }
    }
}

impl From<SavedQuat> for Quat {
    /// Zero or non-finite quaternions load as identity.
    fn from(q: SavedQuat) -> Self {
        let raw = Quat::from_xyzw(q.x, q.y, q.z, q.w);
        if !raw.is_finite() || raw.length_squared() < 1e-12 {
            return Quat::IDENTITY;
        }
        raw.normalize()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPart {
    #[serde(rename = "partId")]
    pub part_id: String,
    #[serde(default)]
    pub position: SavedVec3,
    #[serde(default)]
    pub rotation: SavedQuat,
}

impl SavedPart {
    pub fn pose(&self) -> Pose {
        Pose::new(self.position.into(), self.rotation.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedVehicle {
    #[serde(default)]
    pub parts: Vec<SavedPart>,
}

impl SavedVehicle {
    /// Snapshot of every active part, in placement order.
    pub fn capture(parts: &PartRegistry) -> Self {
        let parts = parts
            .placed_in_order()
            .into_iter()
            .filter_map(|id| parts.get(id))
            .filter(|p| p.is_active())
            .map(|p| SavedPart {
                part_id: p.part_id().to_string(),
                position: p.pose.position.into(),
                rotation: p.pose.rotation.into(),
            })
            .collect();
        Self { parts }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing saved vehicle")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).with_context(|| format!("writing {}", path.display()))?;
        info!("saved {} parts to {}", self.parts.len(), path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text)
    }

    /// First load phase: spawn every known part with its body, in storage
    /// order. Unknown ids are skipped with a warning. Nothing is resolved.
    pub fn instantiate(
        &self,
        catalog: &PartCatalog,
        builder: &BuildController,
        parts: &mut PartRegistry,
        physics: &mut dyn PhysicsBackend,
    ) -> Result<Vec<PartId>> {
        let mut created = Vec::with_capacity(self.parts.len());
        for saved in &self.parts {
            let Some(def) = catalog.get(&saved.part_id) else {
                warn!("definition not found for id '{}', skipping", saved.part_id);
                continue;
            };
            created.push(builder.spawn(Arc::clone(def), saved.pose(), parts, physics)?);
        }
        Ok(created)
    }
}
