// src/lib.rs
//! Part attachment engine of the rover builder.
//!
//! Parts are placed on a grid; every attach point then looks for compatible
//! points nearby and the pair becomes either a rigid joint or a physics wheel
//! hung off a chassis. See [`app::AppContext`] for the whole loop.

// -------------------------------
// Core data
// -------------------------------
pub mod config;
pub mod context;
pub mod error;
pub mod math;
pub mod parts;
pub mod registry;

// -------------------------------
// Attachment
// -------------------------------
pub mod chassis;
pub mod physics;
pub mod resolver;
pub mod spatial;

// -------------------------------
// Application
// -------------------------------
pub mod app;
pub mod builder;
pub mod events;
pub mod persistence;
pub mod telemetry;

pub use app::AppContext;
pub use config::BuilderConfig;
pub use error::{Error, Result};
pub use math::Pose;
pub use parts::{PartCatalog, PartDefinition, PartKind};
pub use registry::{PartId, PartRegistry};
pub use resolver::{AttachmentResolver, AttachmentResult};

use std::path::PathBuf;

use glam::Vec3;
use log::info;

use crate::events::{AttachmentFormed, Mode};

/// Options for [`run_headless`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    pub config: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    /// Load this vehicle instead of building the stock rover.
    pub load: Option<PathBuf>,
    /// Write the vehicle here before driving.
    pub save: Option<PathBuf>,
    /// Program output to replay while driving.
    pub telemetry: Vec<String>,
    pub seconds: f32,
}

/// Build (or load) a rover, then drive it from replayed program output
/// without a window. Returns the final chassis position, if there is one.
pub fn run_headless(opts: &HeadlessOptions) -> Result<Option<Vec3>> {
    let config = match &opts.config {
        Some(path) => BuilderConfig::load(path)?,
        None => BuilderConfig::default(),
    };
    let catalog = match &opts.catalog {
        Some(path) => PartCatalog::load(path)?,
        None => PartCatalog::starter_kit(),
    };
    let mut app = AppContext::new(config, catalog)?;
    app.bus.subscribe(|e: &AttachmentFormed| {
        log::debug!("{} join {} -> {} ({})", e.kind.word(), e.part, e.other, e.socket_type);
    });

    match &opts.load {
        Some(path) => {
            app.load_vehicle(path)?;
        }
        None => build_stock_rover(&mut app)?,
    }
    if let Some(path) = &opts.save {
        app.save_vehicle(path)?;
    }

    app.set_mode(Mode::Drive)?;
    app.program_started();
    let frame = 1.0 / 60.0;
    let frames = (opts.seconds.max(0.0) / frame).round() as usize;
    let mut lines = opts.telemetry.iter();
    for n in 0..frames {
        // One line of output every half second.
        if n % 30 == 0 {
            if let Some(line) = lines.next() {
                app.ingest_line(line);
            }
        }
        app.update(frame)?;
    }
    app.program_stopped();

    let chassis = app
        .parts
        .iter()
        .find(|p| p.kind == PartKind::ChassisHost)
        .map(|p| p.pose.position);
    if let Some(at) = chassis {
        info!("rover finished at ({:.2}, {:.2}, {:.2})", at.x, at.y, at.z);
    }
    Ok(chassis)
}

/// Chassis, four wheels and a sensor on a bracket, placed through the ghost.
fn build_stock_rover(app: &mut AppContext) -> Result<()> {
    let steps: [(&str, Vec3, i32); 7] = [
        ("chassis", Vec3::new(0.0, 0.0, 0.0), 0),
        ("wheel", Vec3::new(-0.75, 0.0, 0.5), 0),
        ("wheel", Vec3::new(0.75, 0.0, 0.5), 0),
        ("wheel", Vec3::new(-0.75, 0.0, -0.5), 0),
        ("wheel", Vec3::new(0.75, 0.0, -0.5), 0),
        ("bracket", Vec3::new(0.0, 0.0, 0.0), 1),
        ("sensor", Vec3::new(0.0, 0.0, 1.0), 0),
    ];
    for (part_id, at, height) in steps {
        let index = app
            .catalog
            .iter()
            .position(|d| d.part_id == part_id)
            .ok_or_else(|| Error::UnknownDefinition(part_id.to_string()))?;
        app.builder.select(index, &app.catalog);
        while app.builder.height_offset() < height {
            app.builder.raise();
        }
        while app.builder.height_offset() > height {
            app.builder.lower();
        }
        app.builder.set_target(at);
        if app.place_current()?.is_none() {
            log::warn!("{} at {:?} is blocked, skipped", part_id, at);
        }
    }
    app.frame_update()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_rover_rolls_out() {
        let opts = HeadlessOptions {
            telemetry: vec!["MOTOR_STATE: FORWARD at 60%".into()],
            seconds: 0.5,
            ..Default::default()
        };
        assert!(run_headless(&opts).unwrap().is_some());
    }

    #[test]
    fn stock_rover_has_four_wheels() {
        let mut app = AppContext::new(BuilderConfig::default(), PartCatalog::starter_kit()).unwrap();
        build_stock_rover(&mut app).unwrap();
        let chassis = app.parts.iter().find(|p| p.kind == PartKind::ChassisHost).unwrap().id;
        assert_eq!(app.parts.chassis.get(chassis).unwrap().len(), 4);
        assert_eq!(app.parts.len(), 7);
    }
}
