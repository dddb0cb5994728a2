// src/parts.rs
//! Part definitions, prefab templates and attach points.
//!
//! A [`PartDefinition`] is immutable catalog data. Instantiating one produces
//! the attach points of a live part: the template's root list when it has
//! entries, otherwise every attach point found in the template sub-tree.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use glam::{IVec3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::AttachConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::math::{Aabb, Pose};

/* -------------------------------------------------------------------------- */
/*                                Attach points                               */
/* -------------------------------------------------------------------------- */

/// Attach point as authored in a template. Unset fields take the owning
/// definition's socket type and the configured detection radius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachPointSpec {
    pub name: String,
    pub socket_type: Option<String>,
    pub local: Pose,
    pub detection_radius: Option<f32>,
    pub is_connector: bool,
}

impl AttachPointSpec {
    pub fn new(name: &str, socket_type: &str, offset: Vec3) -> Self {
        Self {
            name: name.to_string(),
            socket_type: Some(socket_type.to_string()),
            local: Pose::from_translation(offset),
            detection_radius: None,
            is_connector: true,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.local.rotation = rotation;
        self
    }
}

/// Live attach point, owned by exactly one part instance. `local` is relative
/// to the owning part's root.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachPoint {
    pub name: String,
    pub socket_type: String,
    pub local: Pose,
    pub detection_radius: f32,
    /// Detection volume active. Disabled points are never returned by a search.
    pub enabled: bool,
    pub is_connector: bool,
}

impl AttachPoint {
    #[inline]
    pub fn world_position(&self, owner: &Pose) -> Vec3 {
        owner.transform_point(self.local.position)
    }

    #[inline]
    pub fn world_rotation(&self, owner: &Pose) -> Quat {
        (owner.rotation * self.local.rotation).normalize()
    }

    #[inline]
    pub fn world_pose(&self, owner: &Pose) -> Pose {
        owner.compose(&self.local)
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Templates                                 */
/* -------------------------------------------------------------------------- */

/// Child node of a prefab. Only its attach points matter to the builder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateNode {
    pub name: String,
    pub local: Pose,
    pub attach_points: Vec<AttachPointSpec>,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartTemplate {
    /// Explicit list on the root. Empty means "discover from the sub-tree".
    pub attach_points: Vec<AttachPointSpec>,
    pub children: Vec<TemplateNode>,
}

impl PartTemplate {
    /// Attach points in root space, depth first, parents before children.
    pub fn discover(&self) -> Vec<(AttachPointSpec, Pose)> {
        fn walk(node: &TemplateNode, parent: &Pose, out: &mut Vec<(AttachPointSpec, Pose)>) {
            let here = parent.compose(&node.local);
            for spec in &node.attach_points {
                out.push((spec.clone(), here.compose(&spec.local)));
            }
            for child in &node.children {
                walk(child, &here, out);
            }
        }

        let mut out = Vec::new();
        for child in &self.children {
            walk(child, &Pose::IDENTITY, &mut out);
        }
        out
    }

    fn resolved_specs(&self) -> Vec<(AttachPointSpec, Pose)> {
        if self.attach_points.is_empty() {
            self.discover()
        } else {
            self.attach_points.iter().map(|s| (s.clone(), s.local)).collect()
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                               Part definitions                             */
/* -------------------------------------------------------------------------- */

fn default_mass() -> f32 {
    1.0
}

fn default_size() -> IVec3 {
    IVec3::ONE
}

fn default_socket() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartDefinition {
    pub part_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_mass")]
    pub mass: f32,
    #[serde(default = "default_socket")]
    pub default_socket_type: String,
    /// Purely visual wheel: never gets a body, becomes a physics wheel on a chassis.
    #[serde(default)]
    pub is_wheel_visual: bool,
    /// Can host generated physics wheels.
    #[serde(default)]
    pub is_chassis: bool,
    #[serde(default = "default_size")]
    pub size_in_cells: IVec3,
    /// Renderable bounds in part space, used for wheel sizing.
    #[serde(default)]
    pub mesh_bounds: Option<Aabb>,
    #[serde(default)]
    pub template: PartTemplate,
}

impl PartDefinition {
    pub fn new(part_id: &str) -> Self {
        Self {
            part_id: part_id.to_string(),
            display_name: String::new(),
            mass: default_mass(),
            default_socket_type: default_socket(),
            is_wheel_visual: false,
            is_chassis: false,
            size_in_cells: default_size(),
            mesh_bounds: None,
            template: PartTemplate::default(),
        }
    }

    /// Part-space box used for bodies and the placement overlap test.
    pub fn local_bounds(&self, cell_size: f32) -> Aabb {
        match self.mesh_bounds {
            Some(b) => b,
            None => Aabb::from_center_half_extents(Vec3::ZERO, self.size_in_cells.as_vec3() * cell_size * 0.5),
        }
    }

    /// Build the live attach points of a new instance.
    pub fn instantiate_attach_points(&self, attach: &AttachConfig) -> Vec<AttachPoint> {
        self.template
            .resolved_specs()
            .into_iter()
            .map(|(spec, local)| AttachPoint {
                name: spec.name,
                socket_type: spec.socket_type.unwrap_or_else(|| self.default_socket_type.clone()),
                local,
                detection_radius: spec.detection_radius.unwrap_or(attach.detection_radius),
                enabled: true,
                is_connector: spec.is_connector,
            })
            .collect()
    }
}

/// How a part takes part in joins. Decided once, when the part is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Generic,
    WheelVisual,
    ChassisHost,
}

impl PartKind {
    pub fn of(def: &PartDefinition) -> Self {
        if def.is_wheel_visual {
            PartKind::WheelVisual
        } else if def.is_chassis {
            PartKind::ChassisHost
        } else {
            PartKind::Generic
        }
    }

    #[inline]
    pub fn has_body(self) -> bool {
        self != PartKind::WheelVisual
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Catalog                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default)]
pub struct PartCatalog {
    parts: Vec<Arc<PartDefinition>>,
    by_id: HashMap<String, usize>,
}

impl PartCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition, keeping the original slot on replace.
    pub fn register(&mut self, def: PartDefinition) {
        let def = Arc::new(def);
        match self.by_id.get(&def.part_id) {
            Some(&i) => self.parts[i] = def,
            None => {
                self.by_id.insert(def.part_id.clone(), self.parts.len());
                self.parts.push(def);
            }
        }
    }

    pub fn get(&self, part_id: &str) -> Option<&Arc<PartDefinition>> {
        self.by_id.get(part_id).map(|&i| &self.parts[i])
    }

    pub fn require(&self, part_id: &str) -> Result<&Arc<PartDefinition>> {
        self.get(part_id).ok_or_else(|| Error::UnknownDefinition(part_id.to_string()))
    }

    pub fn by_index(&self, index: usize) -> Option<&Arc<PartDefinition>> {
        self.parts.get(index)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PartDefinition>> {
        self.parts.iter()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let defs: Vec<PartDefinition> = serde_json::from_str(text).context("parsing part catalog")?;
        let mut catalog = Self::new();
        for def in defs {
            catalog.register(def);
        }
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading part catalog {}", path.display()))?;
        Self::from_json(&text)
    }

    /// The stock rover kit: chassis, wheel, bracket, sensor.
    pub fn starter_kit() -> Self {
        let mut catalog = Self::new();

        // 4 x 1 x 6 cells, wheel mounts on the sides, discovered from a child node.
        let mut chassis = PartDefinition::new("chassis");
        chassis.display_name = "Rover chassis".into();
        chassis.mass = 12.0;
        chassis.is_chassis = true;
        chassis.size_in_cells = IVec3::new(4, 1, 6);
        chassis.template.children = vec![
            TemplateNode {
                name: "wheel_mounts".into(),
                local: Pose::IDENTITY,
                attach_points: vec![
                    AttachPointSpec::new("mount_fl", "wheel", Vec3::new(-0.75, 0.0, 0.5)),
                    AttachPointSpec::new("mount_fr", "wheel", Vec3::new(0.75, 0.0, 0.5)),
                    AttachPointSpec::new("mount_rl", "wheel", Vec3::new(-0.75, 0.0, -0.5)),
                    AttachPointSpec::new("mount_rr", "wheel", Vec3::new(0.75, 0.0, -0.5)),
                ],
                children: Vec::new(),
            },
            TemplateNode {
                name: "deck".into(),
                local: Pose::from_translation(Vec3::new(0.0, 0.125, 0.0)),
                attach_points: vec![AttachPointSpec::new("deck_center", "default", Vec3::ZERO)],
                children: Vec::new(),
            },
            TemplateNode {
                name: "nose".into(),
                local: Pose::from_translation(Vec3::new(0.0, 0.0, 0.75)),
                attach_points: vec![AttachPointSpec::new("sensor_mount", "sensor", Vec3::ZERO)],
                children: Vec::new(),
            },
        ];
        catalog.register(chassis);

        let mut wheel = PartDefinition::new("wheel");
        wheel.display_name = "Wheel".into();
        wheel.mass = 2.0;
        wheel.is_wheel_visual = true;
        wheel.size_in_cells = IVec3::new(1, 3, 3);
        wheel.mesh_bounds = Some(Aabb::new(Vec3::new(-0.1, -0.35, -0.35), Vec3::new(0.1, 0.35, 0.35)));
        wheel.template.attach_points = vec![AttachPointSpec::new("hub", "wheel", Vec3::ZERO)];
        catalog.register(wheel);

        let mut bracket = PartDefinition::new("bracket");
        bracket.display_name = "Bracket".into();
        bracket.mass = 0.5;
        bracket.template.attach_points = vec![
            AttachPointSpec::new("bottom", "default", Vec3::new(0.0, -0.125, 0.0)),
            AttachPointSpec::new("top", "default", Vec3::new(0.0, 0.125, 0.0)),
        ];
        catalog.register(bracket);

        let mut sensor = PartDefinition::new("sensor");
        sensor.display_name = "Distance sensor".into();
        sensor.mass = 0.2;
        sensor.size_in_cells = IVec3::new(1, 1, 2);
        sensor.template.attach_points = vec![AttachPointSpec::new("base", "sensor", Vec3::new(0.0, 0.0, -0.25))];
        catalog.register(sensor);

        catalog
    }
}
