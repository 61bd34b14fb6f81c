//! `hauler-cli` – simulation harness for the vehicle control core
//!
//! This binary drives one [`VehicleControlCore`] against the in-memory
//! [`SimVehicleIo`] bridge. It:
//!
//! 1. Loads `~/.hauler/config.toml` (or `--config PATH`), falling back to
//!    defaults with `HAULER_*` environment overrides.
//! 2. Starts the perception, safety and directive loops and sends the vehicle
//!    to a goal.
//! 3. Prints motion and safety status until the trajectory ends.
//! 4. Maps **Ctrl-C** to a hardware E-Stop, waits for the procedure, and
//!    exits.
//!
//! ```text
//! hauler run [--goal X,Y[,THETA]] [--config PATH]
//! hauler config init [--config PATH] [--force]
//! hauler config show [--config PATH]
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use serde_json::json;
use tracing::{info, warn};

use hauler_hal::SimVehicleIo;
use hauler_runtime::{CoreConfig, StartPose, VehicleControlCore, config_path};
use hauler_types::{MotionState, Pose, SensorKind};

const DEFAULT_GOAL: (f64, f64) = (2000.0, 0.0);
const STATUS_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Run { goal: Pose, config: Option<PathBuf> },
    ConfigInit { config: Option<PathBuf>, force: bool },
    ConfigShow { config: Option<PathBuf> },
    Help,
}

fn main() -> ExitCode {
    let _guard = hauler_runtime::init_tracing("hauler");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };

    match command {
        Command::Help => {
            print_banner();
            print_usage();
            ExitCode::SUCCESS
        }
        Command::ConfigInit { config, force } => {
            init_config(&config.unwrap_or_else(config_path), force)
        }
        Command::ConfigShow { config } => show_config(config.as_deref()),
        Command::Run { goal, config } => {
            print_banner();
            let cfg = match load_config(config.as_deref()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("{}: {e}", "Config error".red());
                    return ExitCode::FAILURE;
                }
            };
            run(cfg, goal)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument parsing
// ─────────────────────────────────────────────────────────────────────────────

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some((head, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };
    match head.as_str() {
        "run" => {
            let mut goal = Pose::at(DEFAULT_GOAL.0, DEFAULT_GOAL.1, 0.0);
            let mut config = None;
            let mut it = rest.iter();
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--goal" => goal = parse_goal(it.next().ok_or("--goal needs X,Y")?)?,
                    "--config" => config = Some(PathBuf::from(it.next().ok_or("--config needs a path")?)),
                    other => return Err(format!("unknown option `{other}`")),
                }
            }
            Ok(Command::Run { goal, config })
        }
        "config" => {
            let (action, rest) = rest
                .split_first()
                .ok_or("config needs `init` or `show`")?;
            let mut config = None;
            let mut force = false;
            let mut it = rest.iter();
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--config" => config = Some(PathBuf::from(it.next().ok_or("--config needs a path")?)),
                    "--force" if action == "init" => force = true,
                    other => return Err(format!("unknown option `{other}`")),
                }
            }
            match action.as_str() {
                "init" => Ok(Command::ConfigInit { config, force }),
                "show" => Ok(Command::ConfigShow { config }),
                other => Err(format!("unknown config action `{other}`")),
            }
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command `{other}`")),
    }
}

/// `X,Y` or `X,Y,THETA` in millimetres and radians.
fn parse_goal(raw: &str) -> Result<Pose, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("invalid goal `{raw}`"))?;
    if parts.iter().any(|v| !v.is_finite()) {
        return Err(format!("invalid goal `{raw}`"));
    }
    match parts.as_slice() {
        [x, y] => Ok(Pose::at(*x, *y, 0.0)),
        [x, y, theta] => Ok(Pose::at(*x, *y, *theta)),
        _ => Err(format!("goal `{raw}` must be X,Y or X,Y,THETA")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config commands
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<CoreConfig, hauler_runtime::ConfigError> {
    match path {
        Some(p) => Ok(CoreConfig::load_from(p)?.unwrap_or_else(|| {
            let mut cfg = CoreConfig::default();
            cfg.apply_env_overrides();
            cfg
        })),
        None => CoreConfig::load(),
    }
}

fn init_config(path: &Path, force: bool) -> ExitCode {
    match write_default_config(path, force) {
        Ok(()) => {
            println!("  {} {}", "✓ Config written to".green(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("  {e}");
            ExitCode::FAILURE
        }
    }
}

fn write_default_config(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", path.display()));
    }
    CoreConfig::default()
        .save_to(path)
        .map_err(|e| e.to_string())
}

fn show_config(path: Option<&Path>) -> ExitCode {
    let rendered = load_config(path)
        .map_err(|e| e.to_string())
        .and_then(|cfg| toml::to_string_pretty(&cfg).map_err(|e| e.to_string()));
    match rendered {
        Ok(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulation run
// ─────────────────────────────────────────────────────────────────────────────

/// A bridge with compass, accelerometer and docking frames and a scan with one box
/// well outside the safety distance.
fn demo_bridge() -> SimVehicleIo {
    let ranges: Vec<f64> = (0..360)
        .map(|deg| if (40..=44).contains(&deg) { 3.0 } else { 8.0 })
        .collect();
    SimVehicleIo::builder()
        .with_frame(
            SensorKind::Compass,
            "compass_0",
            json!({"heading": 0.0, "accuracy": 0.9, "field_strength": 45.0}),
        )
        .with_frame(
            SensorKind::Accelerometer,
            "imu_0",
            json!({"x": 0.0, "y": 0.0, "z": 9.81}),
        )
        .with_frame(
            SensorKind::Docking,
            "dock_0",
            json!({"front": 2.0, "left": 2.0, "right": 2.0, "back": 2.0}),
        )
        .with_scan(json!({ "ranges": ranges }))
        .build()
}

fn run(mut cfg: CoreConfig, goal: Pose) -> ExitCode {
    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – engaging E-Stop …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; E-Stop on Ctrl-C unavailable");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };

    if cfg.initial_pose.is_none() {
        cfg.initial_pose = Some(StartPose { x: 0.0, y: 0.0, theta: 0.0 });
    }
    println!(
        "  Vehicle {} · {} zone(s) · max speed {} mm/s",
        cfg.vehicle_id.bold(),
        cfg.zones.len(),
        cfg.motion.max_speed
    );

    runtime.block_on(async move {
        let io = Arc::new(demo_bridge());
        let core = Arc::new(VehicleControlCore::new(cfg, io));
        let handle = match core.start() {
            Ok(h) => h,
            Err(e) => {
                eprintln!("{}: {e}", "failed to start core".red());
                return ExitCode::FAILURE;
            }
        };

        let mut code = ExitCode::SUCCESS;
        match core.go_to(goal.clone()) {
            Ok(traj) => println!(
                "  {} {:.0} mm ({:?}, {:.2} s) → ({:.0}, {:.0})",
                "Trajectory accepted:".green(),
                traj.total_distance,
                traj.profile.shape,
                traj.total_duration,
                goal.x,
                goal.y
            ),
            Err(e) => {
                eprintln!("  {}: {e}", "Trajectory rejected".red());
                code = ExitCode::FAILURE;
            }
        }

        loop {
            tokio::time::sleep(STATUS_PERIOD).await;
            if shutdown.load(Ordering::SeqCst) {
                let status = core.handle_estop().await;
                info!(cause = ?status.cause, "operator E-Stop");
                println!(
                    "  {} {}",
                    "E-Stop procedure".yellow(),
                    if status.resolved { "completed".green() } else { "incomplete".red() }
                );
                break;
            }
            let status = core.motion_status();
            println!(
                "  {:<14} x={:>7.1} y={:>7.1} v={:>6.1} mm/s  {}",
                format!("{:?}", status.state).cyan(),
                status.position.x,
                status.position.y,
                status.speed,
                status
                    .progress
                    .map(|p| format!("{:>5.1}%", p * 100.0))
                    .unwrap_or_default()
                    .dimmed()
            );
            if !matches!(status.state, MotionState::Executing | MotionState::Paused) {
                break;
            }
        }

        print_summary(&core);
        handle.shutdown().await;
        code
    })
}

fn print_summary(core: &VehicleControlCore) {
    let motion = core.motion_status();
    let safety = core.safety_status();
    println!();
    println!("  Final state  {}", format!("{:?}", motion.state).bold());
    println!(
        "  Position     ({:.1}, {:.1}) mm",
        motion.position.x, motion.position.y
    );
    println!(
        "  Safety       health {:.2} · {} active alert(s){}",
        safety.health,
        safety.active_alerts,
        if safety.emergency.active {
            format!(
                " · {} {}",
                "EMERGENCY".red().bold(),
                safety.emergency.cause.as_deref().unwrap_or("unknown")
            )
        } else {
            String::new()
        }
    );
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __                __         "#.bold().cyan());
    println!("{}", r#"  / /  ___ ___ _____/ /__ ____  "#.bold().cyan());
    println!("{}", r#" / _ \/ _ `/ // / / / -_) __/  "#.bold().cyan());
    println!("{}", r#"/_//_/\_,_/\_,_/_/_/\__/_/     "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "hauler".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vehicle control core simulator");
    println!();
}

fn print_usage() {
    println!("  {}", "Usage:".bold());
    println!("    hauler run [--goal X,Y[,THETA]] [--config PATH]");
    println!("    hauler config init [--config PATH] [--force]");
    println!("    hauler config show [--config PATH]");
    println!();
}
