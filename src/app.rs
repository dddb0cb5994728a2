// src/app.rs
//! The builder application state.
//!
//! [`AppContext`] owns every subsystem and is passed by reference; there are
//! no globals. The frame loop follows the usual split: `update` accumulates
//! frame time and runs `fixed_update` at the physics rate, then
//! `frame_update` runs deferred resolves and copies simulated poses back
//! onto the parts.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::builder::BuildController;
use crate::chassis;
use crate::config::BuilderConfig;
use crate::error::Result;
use crate::events::{
    ConnectionStatus, EventBus, ExecutionStarted, ExecutionStopped, Mode, ModeChanged, PartPlaced, PartRemoved,
};
use crate::math::Pose;
use crate::parts::{PartCatalog, PartKind};
use crate::persistence::SavedVehicle;
use crate::physics::{BodyMode, PhysicsBackend, RapierWorld};
use crate::registry::{PartId, PartRegistry};
use crate::resolver::{AttachmentResolver, AttachmentResult, Join};
use crate::spatial::AttachPointIndex;
use crate::telemetry::{DriveState, TelemetryLine, TelemetryParser};

/// Longest frame fed into the fixed-step accumulator.
const MAX_FRAME_DT: f32 = 0.25;

pub struct AppContext {
    pub config: BuilderConfig,
    pub catalog: PartCatalog,
    pub parts: PartRegistry,
    pub physics: Box<dyn PhysicsBackend>,
    pub index: AttachPointIndex,
    pub bus: Arc<EventBus>,
    pub builder: BuildController,
    pub resolver: AttachmentResolver,
    pub drive: DriveState,
    telemetry: TelemetryParser,
    mode: Mode,
    steering: f32,
    accumulator: f32,
}

impl AppContext {
    /// Context backed by a Rapier world.
    pub fn new(config: BuilderConfig, catalog: PartCatalog) -> Result<Self> {
        let physics = Box::new(RapierWorld::new(&config.physics));
        Self::with_backend(config, catalog, physics)
    }

    pub fn with_backend(config: BuilderConfig, catalog: PartCatalog, physics: Box<dyn PhysicsBackend>) -> Result<Self> {
        config.validate()?;
        let parts = PartRegistry::new(config.grid.cell_size, config.attach.clone());
        let index = AttachPointIndex::new(config.grid.cell_size.max(config.attach.detection_radius));
        index.rebuild(&parts);
        info!("builder ready: {} part definitions", catalog.len());

        Ok(Self {
            builder: BuildController::new(config.grid.clone(), config.attach.min_mass),
            resolver: AttachmentResolver::new(config.wheel.clone(), &config.attach),
            drive: DriveState::new(config.drive.clone()),
            telemetry: TelemetryParser::new()?,
            bus: Arc::new(EventBus::new()),
            mode: Mode::Build,
            steering: 0.0,
            accumulator: 0.0,
            config,
            catalog,
            parts,
            physics,
            index,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    // -----------------------------------------------------------------------
    // Frame loop
    // -----------------------------------------------------------------------

    /// Advance one rendered frame. Returns the number of fixed steps taken.
    pub fn update(&mut self, frame_dt: f32) -> Result<u32> {
        let frame_dt = frame_dt.clamp(0.0, MAX_FRAME_DT);
        self.drive.update(frame_dt);

        let step = self.config.physics.fixed_dt;
        self.accumulator += frame_dt;
        let mut steps = 0;
        while self.accumulator >= step {
            self.fixed_update(step);
            self.accumulator -= step;
            steps += 1;
        }
        self.frame_update()?;
        Ok(steps)
    }

    /// One physics step. In drive mode the drive state powers every wheel first.
    pub fn fixed_update(&mut self, dt: f32) {
        if self.mode == Mode::Drive {
            let force = self.drive.throttle() * self.config.physics.max_engine_force;
            for (_, aggregate) in self.parts.chassis.iter() {
                aggregate.drive(&mut *self.physics, force, self.steering);
            }
        }
        self.physics.step(dt);
    }

    /// Run deferred resolves, then sync poses. Returns how many pairings formed.
    ///
    /// If the proximity search fails, the failed part and everything after it
    /// stay queued for the next frame and the error is returned.
    pub fn frame_update(&mut self) -> Result<usize> {
        let formed = self.process_pending()?;
        if self.mode == Mode::Drive {
            self.sync_body_poses();
        }
        chassis::sync_wheel_poses(&mut self.parts, &*self.physics);
        Ok(formed)
    }

    fn process_pending(&mut self) -> Result<usize> {
        let pending = self.builder.take_pending();
        let mut formed = 0;
        for (n, id) in pending.iter().enumerate() {
            if !self.parts.contains(*id) {
                continue;
            }
            match self.resolve(*id) {
                Ok(results) => formed += results.len(),
                Err(e) => {
                    for later in &pending[n..] {
                        self.builder.defer(*later);
                    }
                    return Err(e);
                }
            }
        }
        Ok(formed)
    }

    /// Resolve `id` right away instead of on the next frame.
    pub fn resolve(&mut self, id: PartId) -> Result<Vec<AttachmentResult>> {
        self.resolver.resolve(id, &mut self.parts, &mut *self.physics, &self.index, Some(&*self.bus))
    }

    fn sync_body_poses(&mut self) {
        let bodies: Vec<(PartId, Pose)> = self
            .parts
            .bodies
            .iter()
            .filter_map(|(id, body)| self.physics.body_pose(*body).map(|p| (id, p)))
            .collect();
        for (id, pose) in bodies {
            let moved = self.parts.get(id).map_or(false, |p| !p.pose.approx_eq(&pose, 1e-5));
            if !moved {
                continue;
            }
            if let Err(e) = self.parts.set_pose(id, pose) {
                warn!("pose sync for {} failed: {}", self.parts.name_of(id), e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Modes
    // -----------------------------------------------------------------------

    /// Switch between building (kinematic, frozen) and driving (simulated).
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        if mode == Mode::Drive {
            self.process_pending()?;
        }
        let body_mode = match mode {
            Mode::Build => BodyMode::Kinematic,
            Mode::Drive => BodyMode::Dynamic,
        };
        for (_, body) in self.parts.bodies.iter() {
            self.physics.set_body_mode(*body, body_mode)?;
        }
        let from = self.mode;
        self.mode = mode;
        self.accumulator = 0.0;
        info!("mode {:?} -> {:?}", from, mode);
        self.bus.publish(ModeChanged { from, to: mode });
        Ok(())
    }

    /// Steering angle in radians for front wheels, clamped to ±45°.
    pub fn set_steering(&mut self, angle: f32) {
        let limit = std::f32::consts::FRAC_PI_4;
        self.steering = angle.clamp(-limit, limit);
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place the builder's ghost. `Ok(None)` when it overlaps a part.
    pub fn place_current(&mut self) -> Result<Option<PartId>> {
        self.builder
            .place_current(&self.catalog, &mut self.parts, &mut *self.physics, Some(&*self.bus))
    }

    /// Place a catalog part at `pose`, skipping the overlap check.
    pub fn place(&mut self, part_id: &str, pose: Pose) -> Result<PartId> {
        let def = Arc::clone(self.catalog.require(part_id)?);
        self.builder.place(def, pose, &mut self.parts, &mut *self.physics, Some(&*self.bus))
    }

    /// Remove a part with its body, joints and wheels. Wheel visuals mounted
    /// on a removed chassis go with it.
    pub fn remove_part(&mut self, id: PartId) -> Result<()> {
        let part = self.parts.require(id)?;
        let kind = part.kind;
        let parent = part.parent;

        if kind == PartKind::WheelVisual {
            if let Some(host) = parent {
                let gone = chassis::unmount_wheel(&mut self.parts, &mut *self.physics, host, id);
                // Wheels that failed to rebuild can be mounted again later.
                for visual in gone.into_iter().filter(|v| *v != id) {
                    self.resolver.ledger_mut().forget_wheel(visual);
                    self.builder.defer(visual);
                }
            }
        }
        let mounted = chassis::clear_wheels(&mut self.parts, &mut *self.physics, id);
        for visual in mounted {
            self.despawn(visual);
        }
        self.despawn(id);
        Ok(())
    }

    /// Take every wheel off `chassis` and let the resolver mount them again
    /// on the next frame. Returns the visuals that were mounted.
    pub fn reset_chassis(&mut self, host: PartId) -> Result<Vec<PartId>> {
        self.parts.require(host)?;
        let visuals = chassis::clear_wheels(&mut self.parts, &mut *self.physics, host);
        for visual in &visuals {
            self.resolver.ledger_mut().forget_wheel(*visual);
        }
        self.builder.defer(host);
        info!("reset {}: {} wheels unmounted", self.parts.name_of(host), visuals.len());
        Ok(visuals)
    }

    fn despawn(&mut self, id: PartId) {
        if self.parts.begin_despawn(id).is_err() {
            return;
        }
        for join in self.resolver.ledger_mut().forget_part(id) {
            if let Join::Rigid(joint) = join {
                self.physics.remove_joint(joint);
            }
        }
        if let Some(body) = self.parts.body(id) {
            self.physics.remove_body(body);
        }
        if let Some(part) = self.parts.remove(id) {
            debug!("removed {}", part.name);
            self.bus.publish(PartRemoved { part: id, name: part.name });
        }
    }

    pub fn clear_all(&mut self) {
        self.builder.clear_all(&mut self.parts, &mut *self.physics);
        self.resolver.ledger_mut().clear();
    }

    // -----------------------------------------------------------------------
    // Save / load
    // -----------------------------------------------------------------------

    pub fn save_vehicle(&self, path: impl AsRef<Path>) -> Result<usize> {
        let saved = SavedVehicle::capture(&self.parts);
        saved.save(path)?;
        Ok(saved.parts.len())
    }

    pub fn load_vehicle(&mut self, path: impl AsRef<Path>) -> Result<Vec<PartId>> {
        let saved = SavedVehicle::load(path)?;
        self.restore(&saved)
    }

    /// Replace the scene with `saved`: spawn every part first, then resolve
    /// them all in storage order so wheels find their chassis whichever was
    /// stored first.
    pub fn restore(&mut self, saved: &SavedVehicle) -> Result<Vec<PartId>> {
        self.clear_all();
        let created = saved.instantiate(&self.catalog, &self.builder, &mut self.parts, &mut *self.physics)?;
        for id in &created {
            if let Some(part) = self.parts.get(*id) {
                self.bus.publish(PartPlaced {
                    part: *id,
                    part_id: part.part_id().to_string(),
                    position: part.pose.position,
                });
            }
        }

        let mut formed = 0;
        for id in &created {
            formed += self.resolve(*id)?.len();
        }
        chassis::sync_wheel_poses(&mut self.parts, &*self.physics);
        if created.len() < saved.parts.len() {
            warn!("loaded {} of {} saved parts", created.len(), saved.parts.len());
        }
        info!("loaded {} parts, {} attachments", created.len(), formed);
        Ok(created)
    }

    // -----------------------------------------------------------------------
    // Program output
    // -----------------------------------------------------------------------

    /// Feed one line of program output.
    pub fn ingest_line(&mut self, line: &str) -> TelemetryLine {
        let parsed = self.telemetry.ingest(line, &self.bus);
        self.drive.apply(&parsed);
        parsed
    }

    pub fn program_started(&mut self) {
        self.drive = DriveState::new(self.config.drive.clone());
        self.bus.publish(ExecutionStarted);
    }

    pub fn program_stopped(&mut self) {
        self.drive = DriveState::new(self.config.drive.clone());
        self.bus.publish(ExecutionStopped);
    }

    pub fn set_connection(&self, connected: bool, detail: impl Into<String>) {
        self.bus.publish(ConnectionStatus { connected, detail: detail.into() });
    }
}
