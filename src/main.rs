#![cfg(not(target_arch = "wasm32"))]

use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{error, info, LevelFilter};
use rover_builder::HeadlessOptions;

// mimalloc keeps the per-frame Vec churn of the resolver and pose sync cheap.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Build (or load) a rover and drive it from replayed program output.
#[derive(Parser, Debug)]
#[command(name = "rover_builder")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Headless rover builder", long_about = None)]
struct Args {
    /// Builder configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Part catalog (JSON); the starter kit when omitted
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Saved vehicle to load instead of the stock rover
    #[arg(long)]
    load: Option<PathBuf>,

    /// Write the vehicle here before driving
    #[arg(long)]
    save: Option<PathBuf>,

    /// File of program output lines to replay while driving
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Seconds to drive
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,
}

impl Args {
    fn into_options(self) -> anyhow::Result<HeadlessOptions> {
        let telemetry = match &self.telemetry {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?
                .lines()
                .map(str::to_string)
                .collect(),
            None => vec!["MOTOR_STATE: FORWARD at 60%".into(), "GPIO 17 output: True".into()],
        };
        Ok(HeadlessOptions {
            config: self.config,
            catalog: self.catalog,
            load: self.load,
            save: self.save,
            telemetry,
            seconds: self.seconds,
        })
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_diagnostics();
    info!("Starting rover builder (headless)...");

    let opts = args.into_options()?;
    match rover_builder::run_headless(&opts) {
        Ok(Some(at)) => println!("rover at ({:.2}, {:.2}, {:.2})", at.x, at.y, at.z),
        Ok(None) => println!("no chassis in the scene"),
        Err(e) => {
            error!("builder failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}

/// Logging and crash reports.
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));

        let crash_msg = format!("=== BUILDER CRASH ===\nReason: {}\nLocation: {}\n\nStack Trace:\n{}", msg, location, backtrace);
        eprintln!("\x1b[31;1m{}\x1b[0m", crash_msg);

        if let Ok(mut file) = File::create("rover_builder_crash.log") {
            let _ = file.write_all(crash_msg.as_bytes());
            eprintln!("Crash report saved to rover_builder_crash.log");
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_seconds() {
        let args = Args::try_parse_from(["rover_builder", "--load", "rover.json", "--seconds", "2.5"]).unwrap();
        let opts = args.into_options().unwrap();
        assert_eq!(opts.load, Some(PathBuf::from("rover.json")));
        assert_eq!(opts.seconds, 2.5);
        assert!(!opts.telemetry.is_empty());
    }

    #[test]
    fn seconds_default_to_five() {
        let args = Args::try_parse_from(["rover_builder"]).unwrap();
        assert_eq!(args.seconds, 5.0);
        assert!(args.config.is_none());
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(Args::try_parse_from(["rover_builder", "--fly"]).is_err());
        assert!(Args::try_parse_from(["rover_builder", "--save"]).is_err());
        assert!(Args::try_parse_from(["rover_builder", "--seconds", "soon"]).is_err());
    }

    #[test]
    fn telemetry_file_is_read_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "MOTOR_SPEED: 40%\nGPIO 4 output: False\n").unwrap();
        let args = Args::try_parse_from(["rover_builder", "--telemetry", path.to_str().unwrap()]).unwrap();
        let opts = args.into_options().unwrap();
        assert_eq!(opts.telemetry, vec!["MOTOR_SPEED: 40%".to_string(), "GPIO 4 output: False".to_string()]);
    }
}
