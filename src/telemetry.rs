// src/telemetry.rs
//! Output lines of the running rover program.
//!
//! The program prints motor commands (`MOTOR_SPEED: 40%`, `MOTOR_STATE:
//! FORWARD at 60%`, `MOTOR_EMERGENCY: STOPPED`) and GPIO writes
//! (`GPIO 17 output: True`). [`TelemetryParser`] classifies a line,
//! [`DriveState`] turns motor lines into a speed, and [`DigitalTwin`] mirrors
//! pin states from bus events.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use regex::Regex;

use crate::config::DriveConfig;
use crate::error::Result;
use crate::events::{ConnectionStatus, EventBus, ExecutionStarted, GpioStateChanged, RawMessage, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryLine {
    MotorSpeed { percent: u32 },
    MotorState { direction: String, percent: u32 },
    Emergency { status: String },
    Gpio { pin: u32, active: bool },
    Other,
}

pub struct TelemetryParser {
    speed: Regex,
    state: Regex,
    emergency: Regex,
    gpio: Regex,
}

impl TelemetryParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            speed: Regex::new(r"MOTOR_(?:SPEED|PULSE|STEP):\s*(\d+)%")?,
            state: Regex::new(r"MOTOR_STATE:\s*(\w+)\s*at\s*(\d+)%")?,
            emergency: Regex::new(r"MOTOR_EMERGENCY:\s*(\w+)")?,
            gpio: Regex::new(r"(?i)GPIO\s+(\d+)\s+output:\s+(True|False)")?,
        })
    }

    pub fn parse(&self, line: &str) -> Result<TelemetryLine> {
        if let Some(c) = self.speed.captures(line) {
            return Ok(TelemetryLine::MotorSpeed { percent: c[1].parse()? });
        }
        if let Some(c) = self.state.captures(line) {
            return Ok(TelemetryLine::MotorState {
                direction: c[1].to_uppercase(),
                percent: c[2].parse()?,
            });
        }
        if let Some(c) = self.emergency.captures(line) {
            return Ok(TelemetryLine::Emergency { status: c[1].to_uppercase() });
        }
        if let Some(c) = self.gpio.captures(line) {
            return Ok(TelemetryLine::Gpio {
                pin: c[1].parse()?,
                active: c[2].eq_ignore_ascii_case("true"),
            });
        }
        Ok(TelemetryLine::Other)
    }

    /// Parse `line`, publish the GPIO event it carries (if any) plus a
    /// `RawMessage`, and return the classification.
    pub fn ingest(&self, line: &str, bus: &EventBus) -> TelemetryLine {
        let parsed = match self.parse(line) {
            Ok(p) => p,
            Err(e) => {
                warn!("unreadable telemetry line {:?}: {}", line, e);
                TelemetryLine::Other
            }
        };
        if let TelemetryLine::Gpio { pin, active } = parsed {
            bus.publish(GpioStateChanged { pin, active });
        }
        bus.publish(RawMessage { text: line.to_string() });
        parsed
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Drive state                                */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone)]
pub struct DriveState {
    cfg: DriveConfig,
    pub current_speed: f32,
    pub moving_forward: bool,
    pub emergency_stop: bool,
}

impl DriveState {
    pub fn new(cfg: DriveConfig) -> Self {
        Self { cfg, current_speed: 0.0, moving_forward: false, emergency_stop: false }
    }

    /// Apply one motor line. Returns false for lines that are not motor commands.
    pub fn apply(&mut self, line: &TelemetryLine) -> bool {
        match line {
            TelemetryLine::MotorSpeed { percent } => {
                let target = *percent as f32 / 100.0 * self.cfg.max_speed;
                self.current_speed += (target - self.current_speed) * self.cfg.acceleration_rate;
                self.emergency_stop = false;
                true
            }
            TelemetryLine::MotorState { direction, percent } => {
                self.moving_forward = direction == "FORWARD";
                self.current_speed = *percent as f32 / 100.0 * self.cfg.max_speed;
                self.emergency_stop = false;
                true
            }
            TelemetryLine::Emergency { status } => {
                if status == "STOPPED" {
                    info!("emergency stop");
                    self.emergency_stop = true;
                    self.current_speed = 0.0;
                }
                true
            }
            TelemetryLine::Gpio { .. } | TelemetryLine::Other => false,
        }
    }

    /// Per-frame coasting.
    pub fn update(&mut self, dt: f32) {
        if self.emergency_stop {
            return;
        }
        if self.current_speed > 0.1 {
            self.current_speed = (self.current_speed - self.cfg.deceleration_rate * dt).max(0.0);
        }
    }

    /// Forward throttle in [0, 1]; zero unless moving forward.
    pub fn throttle(&self) -> f32 {
        if self.emergency_stop || !self.moving_forward || self.cfg.max_speed <= 0.0 {
            return 0.0;
        }
        (self.current_speed / self.cfg.max_speed).clamp(0.0, 1.0)
    }
}

/* -------------------------------------------------------------------------- */
/*                                Digital twin                                */
/* -------------------------------------------------------------------------- */

/// Last known state of every GPIO pin.
#[derive(Debug, Default)]
pub struct DigitalTwin {
    pins: BTreeMap<u32, bool>,
    connected: bool,
}

impl DigitalTwin {
    /// Unknown pins read as inactive.
    pub fn pin(&self, pin: u32) -> bool {
        self.pins.get(&pin).copied().unwrap_or(false)
    }

    pub fn pins(&self) -> &BTreeMap<u32, bool> {
        &self.pins
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// A twin kept current by bus events. Unsubscribes on drop.
pub struct TwinHandle {
    twin: Arc<RwLock<DigitalTwin>>,
    bus: Arc<EventBus>,
    subs: Vec<Subscription>,
}

impl TwinHandle {
    pub fn attach(bus: Arc<EventBus>) -> Self {
        let twin = Arc::new(RwLock::new(DigitalTwin::default()));

        let t = Arc::clone(&twin);
        let gpio = bus.subscribe(move |e: &GpioStateChanged| {
            t.write().pins.insert(e.pin, e.active);
        });
        let t = Arc::clone(&twin);
        let conn = bus.subscribe(move |e: &ConnectionStatus| {
            t.write().connected = e.connected;
        });
        let t = Arc::clone(&twin);
        let start = bus.subscribe(move |_: &ExecutionStarted| {
            debug!("digital twin reset for new run");
            t.write().pins.clear();
        });

        Self { twin, bus, subs: vec![gpio, conn, start] }
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, DigitalTwin> {
        self.twin.read()
    }
}

impl Drop for TwinHandle {
    fn drop(&mut self) {
        for sub in self.subs.drain(..) {
            self.bus.unsubscribe(sub);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_motor_form() {
        let p = TelemetryParser::new().unwrap();
        assert_eq!(p.parse("MOTOR_PULSE: 40%").unwrap(), TelemetryLine::MotorSpeed { percent: 40 });
        assert_eq!(
            p.parse(">> MOTOR_STATE: forward at 75%").unwrap(),
            TelemetryLine::MotorState { direction: "FORWARD".into(), percent: 75 }
        );
        assert_eq!(
            p.parse("MOTOR_EMERGENCY: stopped").unwrap(),
            TelemetryLine::Emergency { status: "STOPPED".into() }
        );
        assert_eq!(p.parse("gpio 17 OUTPUT: true").unwrap(), TelemetryLine::Gpio { pin: 17, active: true });
        assert_eq!(p.parse("LED blink done").unwrap(), TelemetryLine::Other);
    }

    #[test]
    fn speed_lines_ease_and_state_lines_set() {
        let mut d = DriveState::new(DriveConfig::default());
        d.apply(&TelemetryLine::MotorSpeed { percent: 100 });
        assert!((d.current_speed - 1.2).abs() < 1e-5);

        d.apply(&TelemetryLine::MotorState { direction: "FORWARD".into(), percent: 50 });
        assert_eq!(d.current_speed, 4.0);
        assert!((d.throttle() - 0.5).abs() < 1e-6);

        d.update(1.0);
        assert!((d.current_speed - 3.6).abs() < 1e-5);
    }

    #[test]
    fn emergency_stop_freezes_until_next_command() {
        let mut d = DriveState::new(DriveConfig::default());
        d.apply(&TelemetryLine::MotorState { direction: "FORWARD".into(), percent: 100 });
        d.apply(&TelemetryLine::Emergency { status: "STOPPED".into() });
        assert_eq!(d.throttle(), 0.0);
        d.update(1.0);
        assert_eq!(d.current_speed, 0.0);
        d.apply(&TelemetryLine::MotorState { direction: "FORWARD".into(), percent: 25 });
        assert!(!d.emergency_stop);
        assert_eq!(d.current_speed, 2.0);
    }

    #[test]
    fn twin_tracks_pins_and_resets_on_run() {
        let bus = Arc::new(EventBus::new());
        let parser = TelemetryParser::new().unwrap();
        let twin = TwinHandle::attach(Arc::clone(&bus));

        parser.ingest("GPIO 18 output: True", &bus);
        parser.ingest("GPIO 23 output: False", &bus);
        assert!(twin.read().pin(18));
        assert!(!twin.read().pin(23));
        assert!(!twin.read().pin(4));

        bus.publish(ExecutionStarted);
        assert!(twin.read().pins().is_empty());

        drop(twin);
        assert_eq!(bus.subscriber_count::<GpioStateChanged>(), 0);
    }
}
