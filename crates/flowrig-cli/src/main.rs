//! Command line front end for FlowRig
//!
//! Drives an R2/R4 controller over a serial port, or the built-in simulator
//! with `--simulate`.
//!
//! # Usage
//!
//! ```bash
//! flowrig ports
//! flowrig --module R2S status
//! flowrig flow A 0.5
//! flowrig ramp --from 1.0 --to 0.1 --minutes 10
//! flowrig sweep --from 1.0 --to 0.1 --pickup-ml 0.5 --reactor-ml 2.0
//! ```
//!
//! Ramps and sweeps run on a blocking task; Ctrl-C cancels them and powers
//! the controller off.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use flowrig_core::config::RigConfig;
use flowrig_core::control::{FlowController, RunLog, RunSummary, SequenceError, SweepProfile};
use flowrig_core::device::{FlowDevice, FlowRate, HeaterChannel, HeaterTarget, Pump, ValveId};
use flowrig_core::sim::SimulatedDevice;
use flowrig_core::status::StatusReading;
use flowrig_core::timing::{CancelToken, SystemClock};
use flowrig_core::transport::{list_ports, Transport};

#[derive(Parser)]
#[command(name = "flowrig", version)]
#[command(about = "Control R2/R4 flow-chemistry controllers", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Rig configuration file (JSON); defaults are used if it does not exist
    #[arg(long, global = true, default_value = "flowrig.json")]
    config: PathBuf,

    /// Controller module to address
    #[arg(long, global = true, default_value = "R2S")]
    module: String,

    /// Serial port, overriding the configured one
    #[arg(long, global = true)]
    port: Option<String>,

    /// Talk to the built-in simulator instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Query and print the status record
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Power on pumps and heaters
    Start,

    /// Power off pumps and heaters
    Stop,

    /// Set a pump flow rate
    Flow {
        /// Pump (A or B)
        pump: Pump,
        /// Rate in mL/min
        ml_per_min: f64,
    },

    /// Switch a valve
    Valve {
        /// Valve id (0-9)
        id: u8,
    },

    /// Set a heater target, power-cycling the controller first
    Temp {
        /// Heater channel (0-3)
        channel: u8,
        /// Target in °C (20-250) or "off"
        target: HeaterTarget,
    },

    /// Linear flow ramp on pump A
    Ramp {
        /// Start rate, mL/min
        #[arg(long)]
        from: f64,
        /// End rate, mL/min
        #[arg(long)]
        to: f64,
        /// Ramp length in minutes
        #[arg(long, default_value = "10")]
        minutes: f64,
        /// Seconds between set points (default from config)
        #[arg(long)]
        step_secs: Option<u64>,
    },

    /// Pickup sweep on both pumps
    Sweep {
        /// Pickup rate, mL/min
        #[arg(long)]
        from: f64,
        /// Rate after pickup, mL/min
        #[arg(long)]
        to: f64,
        /// Sample volume to pick up, mL
        #[arg(long)]
        pickup_ml: f64,
        /// Reactor volume, mL
        #[arg(long)]
        reactor_ml: f64,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write it
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Commands::Ports => {
            print_ports();
            Ok(())
        }
        Commands::InitConfig { path } => init_config(&path),
        command => {
            let config = RigConfig::load_or_default(&cli.global.config)
                .with_context(|| format!("loading {}", cli.global.config.display()))?;
            run_device_command(cli.global, config, command).await
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{:<16} {:04x}:{:04x} {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    RigConfig::default()
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn open_device(global: &GlobalArgs, config: &RigConfig) -> Result<FlowDevice> {
    let transport = if global.simulate {
        tracing::info!("using simulated controller");
        Transport::new(SimulatedDevice::new().connector())
    } else {
        let mut connection = config.connection_for(&global.module)?.clone();
        if let Some(port) = &global.port {
            connection.port_name = port.clone();
        }
        tracing::info!(module = %global.module, port = %connection.port_name, "connecting");
        Transport::serial(connection)
    };

    let mut device = FlowDevice::with_clock(transport, Arc::new(SystemClock::new()));
    device.set_stop_settle(config.timing.stop_settle());
    device
        .open()
        .with_context(|| format!("opening {}", global.module))?;
    Ok(device)
}

async fn run_device_command(
    global: GlobalArgs,
    config: RigConfig,
    command: Commands,
) -> Result<()> {
    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            watcher.cancel();
        }
    });

    let task = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut device = open_device(&global, &config)?;
        execute(&mut device, &config, command, cancel)
    });
    let result = task.await.context("device task failed")?;
    interrupt.abort();
    result
}

fn execute(
    device: &mut FlowDevice,
    config: &RigConfig,
    command: Commands,
    cancel: CancelToken,
) -> Result<()> {
    match command {
        Commands::Status { json } => match device.get_status()? {
            StatusReading::Valid(status) if json => {
                println!("{}", serde_json::to_string_pretty(&status)?)
            }
            StatusReading::Valid(status) => {
                println!("{status}");
                let (airlock_a, airlock_b) = status.airlock_numbers;
                println!("airlocks:     {airlock_a} / {airlock_b}");
                println!("LEDs:         {}", status.front_panel_leds);
                println!("heaters (°C): {:?}", status.temperature_set_points);
            }
            StatusReading::Invalid { raw, error } => {
                anyhow::bail!("invalid status frame {raw:?}: {error}")
            }
        },
        Commands::Start => println!("{}", device.start()?),
        Commands::Stop => println!("{}", device.stop()?),
        Commands::Flow { pump, ml_per_min } => {
            let rate = FlowRate::from_ml_per_min(ml_per_min)?;
            println!("{}", device.set_flow_rate(pump, rate)?);
        }
        Commands::Valve { id } => println!("{}", device.switch_valve(ValveId::new(id)?)?),
        Commands::Temp { channel, target } => {
            let channel = HeaterChannel::new(channel)?;
            FlowController::new(device)
                .with_cancel(cancel)
                .set_reactor_temperature(channel, target)?;
            match target {
                HeaterTarget::Off => println!("Heater {channel} off"),
                HeaterTarget::Celsius(t) => println!("Heater {channel} set to {t} °C"),
            }
        }
        Commands::Ramp {
            from,
            to,
            minutes,
            step_secs,
        } => {
            let duration = Duration::try_from_secs_f64(minutes * 60.0)
                .context("ramp length out of range")?;
            let mut ramp = config.ramp_profile(from, to, duration)?;
            if let Some(step) = step_secs {
                ramp = ramp.with_step(Duration::from_secs(step));
            }
            let summary = run_sequence(device, config, "ramp", cancel, |c| c.ramp(&ramp))?;
            print_summary(&summary);
        }
        Commands::Sweep {
            from,
            to,
            pickup_ml,
            reactor_ml,
        } => {
            let sweep = SweepProfile::new(from, to, pickup_ml, reactor_ml)?;
            let report = sweep.report()?;
            println!(
                "Pickup hold {:.1} s, residence {:.2} min at start rate",
                report.pickup_time.as_secs_f64(),
                report.min_residence.as_secs_f64() / 60.0
            );
            let summary = run_sequence(device, config, "sweep", cancel, |c| c.sweep(&sweep))?;
            print_summary(&summary);
        }
        Commands::Ports | Commands::InitConfig { .. } => {
            anyhow::bail!("command does not talk to the controller")
        }
    }
    Ok(())
}

/// Power on, run one sequence, power off again and write the run log.
///
/// The device is powered off before any run-log error is reported, so a full
/// disk cannot leave the pumps running.
fn run_sequence<F>(
    device: &mut FlowDevice,
    config: &RigConfig,
    name: &str,
    cancel: CancelToken,
    run: F,
) -> Result<RunSummary>
where
    F: FnOnce(&mut FlowController<'_>) -> Result<RunSummary, SequenceError>,
{
    device.start().context("powering on")?;

    let mut controller = FlowController::new(device)
        .with_cancel(cancel)
        .with_options(config.timing.controller_options())
        .with_run_log(RunLog::new(name));
    let outcome = run(&mut controller);
    let log = controller.take_run_log();

    // A failed sequence has already stopped the device
    let powered_off = if outcome.is_ok() {
        device.shutdown().context("powering off")
    } else {
        device.close();
        Ok(())
    };

    let logged = match (&config.run_log_dir, log) {
        (Some(dir), Some(log)) => write_run_log(dir, &log),
        _ => Ok(()),
    };

    let summary = outcome.with_context(|| format!("{name} aborted"))?;
    powered_off?;
    logged?;
    Ok(summary)
}

fn write_run_log(dir: &Path, log: &RunLog) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    log.write_csv(dir).context("writing run log")?;
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} complete: {} set points in {:.0} s",
        summary.profile,
        summary.set_points_applied,
        summary.elapsed.as_secs_f64()
    );
    if summary.invalid_status_frames > 0 {
        println!(
            "{} status frames could not be decoded",
            summary.invalid_status_frames
        );
    }
    if let Some(status) = &summary.last_status {
        println!("last status: {status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrig_core::control::RampProfile;
    use flowrig_core::timing::ManualClock;

    fn simulated(sim: &SimulatedDevice) -> FlowDevice {
        let mut transport = Transport::new(sim.connector());
        transport.set_timeout(Duration::from_millis(25));
        transport.set_poll_interval(Duration::from_millis(1));
        FlowDevice::connect(transport, Arc::new(ManualClock::new())).unwrap()
    }

    fn short_ramp() -> RampProfile {
        RampProfile::new(1.0, 0.5, Duration::from_secs(30)).unwrap()
    }

    #[test]
    fn test_sequence_writes_log_and_powers_off() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.run_log_dir = Some(dir.path().join("runs"));

        let sim = SimulatedDevice::new();
        let mut device = simulated(&sim);
        let ramp = short_ramp();

        let summary = run_sequence(&mut device, &config, "ramp", CancelToken::new(), |c| {
            c.ramp(&ramp)
        })
        .unwrap();

        assert_eq!(summary.set_points_applied, 3);
        assert_eq!(sim.commands().first().map(String::as_str), Some("PN"));
        assert_eq!(sim.commands().last().map(String::as_str), Some("PF"));
        assert_eq!(sim.count("PF"), 1);
        assert!(!device.is_open());

        let written = std::fs::read_dir(dir.path().join("runs")).unwrap().count();
        assert_eq!(written, 1);
    }

    #[test]
    fn test_sequence_powers_off_when_run_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut config = RigConfig::default();
        config.run_log_dir = Some(blocker.join("runs"));

        let sim = SimulatedDevice::new();
        let mut device = simulated(&sim);
        let ramp = short_ramp();

        let err = run_sequence(&mut device, &config, "ramp", CancelToken::new(), |c| {
            c.ramp(&ramp)
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("creating"), "{err:#}");
        assert_eq!(sim.count("PF"), 1);
        assert_eq!(sim.commands().last().map(String::as_str), Some("PF"));
        assert!(!device.is_open());
    }

    #[test]
    fn test_failed_sequence_stops_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.run_log_dir = Some(dir.path().to_path_buf());

        let sim = SimulatedDevice::new().reject_verb("KP");
        let mut device = simulated(&sim);
        let ramp = short_ramp();

        let err = run_sequence(&mut device, &config, "ramp", CancelToken::new(), |c| {
            c.ramp(&ramp)
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("ramp aborted"), "{err:#}");
        assert_eq!(sim.commands(), vec!["PN", "KP 1", "PF"]);
        assert!(!device.is_open());
        // The aborted run is still logged
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
