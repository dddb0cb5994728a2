// src/config.rs
//! Builder configuration.
//!
//! Every tunable the builder uses lives here with the value the game ships
//! with as its `Default`. A JSON file may override any subset of fields.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Error, Result};

/* -------------------------------------------------------------------------- */
/*                               Grid placement                               */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub origin: Vec3,
    pub cell_size: f32,
    /// Lowest height offset, in cells.
    pub min_height_offset: i32,
    /// Highest height offset, in cells.
    pub max_height_offset: i32,
    /// Shrink applied to AABBs before the ghost overlap test so flush parts
    /// may sit next to each other.
    pub overlap_margin: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            cell_size: 0.25,
            min_height_offset: -10,
            max_height_offset: 50,
            overlap_margin: 0.01,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Attachment                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Detection radius for attach points that do not set their own.
    pub detection_radius: f32,
    /// Lower bound applied to definition mass when creating bodies.
    pub min_mass: f32,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            detection_radius: 0.05,
            min_mass: 0.0001,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                Wheel physics                               */
/* -------------------------------------------------------------------------- */

/// Constants applied to every generated wheel. Only radius and width are
/// inferred per wheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelConfig {
    pub default_radius: f32,
    pub default_width: f32,
    /// Inferred radius/width at or below this value fall back to the defaults.
    pub min_dimension: f32,
    pub mass: f32,
    pub suspension_distance: f32,
    pub spring: f32,
    pub damper: f32,
    pub forward_stiffness: f32,
    pub sideways_stiffness: f32,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            default_radius: 0.35,
            default_width: 0.2,
            min_dimension: 0.01,
            mass: 20.0,
            suspension_distance: 0.2,
            spring: 20000.0,
            damper: 4500.0,
            forward_stiffness: 1.5,
            sideways_stiffness: 2.0,
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                               Physics stepping                             */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Fixed timestep for `AppContext::fixed_update`.
    pub fixed_dt: f32,
    /// Engine force applied per wheel at full throttle in drive mode.
    pub max_engine_force: f32,
    /// Height of the static ground plane; `None` for no ground.
    pub ground_height: Option<f32>,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_dt: 1.0 / 60.0,
            max_engine_force: 400.0,
            ground_height: Some(-0.5),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                Drive easing                                */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub max_speed: f32,
    /// Fraction of the gap to the target closed by each speed line.
    pub acceleration_rate: f32,
    /// Coasting loss, units per second.
    pub deceleration_rate: f32,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self { max_speed: 8.0, acceleration_rate: 0.15, deceleration_rate: 0.4 }
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Top level                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub grid: GridConfig,
    pub attach: AttachConfig,
    pub wheel: WheelConfig,
    pub physics: PhysicsConfig,
    pub drive: DriveConfig,
}

impl BuilderConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: BuilderConfig = serde_json::from_str(text).context("parsing builder config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.grid.cell_size > 0.0) {
            return Err(Error::Config(format!("grid.cell_size must be > 0, got {}", self.grid.cell_size)));
        }
        if self.grid.min_height_offset > self.grid.max_height_offset {
            return Err(Error::Config(format!(
                "grid height range is empty: [{}, {}]",
                self.grid.min_height_offset, self.grid.max_height_offset
            )));
        }
        if !(self.attach.detection_radius > 0.0) {
            return Err(Error::Config("attach.detection_radius must be > 0".into()));
        }
        if !(self.physics.fixed_dt > 0.0) {
            return Err(Error::Config("physics.fixed_dt must be > 0".into()));
        }
        if self.wheel.default_radius <= self.wheel.min_dimension
            || self.wheel.default_width <= self.wheel.min_dimension
        {
            return Err(Error::Config("wheel defaults must exceed wheel.min_dimension".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_constants() {
        let c = BuilderConfig::default();
        assert_eq!(c.grid.cell_size, 0.25);
        assert_eq!((c.grid.min_height_offset, c.grid.max_height_offset), (-10, 50));
        assert_eq!(c.attach.detection_radius, 0.05);
        assert_eq!(c.wheel.spring, 20000.0);
        assert_eq!(c.wheel.damper, 4500.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let c = BuilderConfig::from_json(r#"{ "grid": { "cell_size": 0.5 } }"#).unwrap();
        assert_eq!(c.grid.cell_size, 0.5);
        assert_eq!(c.grid.max_height_offset, 50);
        assert_eq!(c.wheel.default_radius, 0.35);
    }

    #[test]
    fn invalid_cell_size_is_rejected() {
        let err = BuilderConfig::from_json(r#"{ "grid": { "cell_size": 0.0 } }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
