//! CLI entry point for the TOSCA workstation hardware layer.
//!
//! # Usage
//!
//! ```bash
//! tosca ports
//! tosca actuator move 2500 --speed 2000
//! tosca --mock laser power 25
//! tosca --mock camera capture --patient P-001
//! tosca config
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tosca::config::{AppConfig, DEFAULT_CONFIG_FILE};
use tosca::tracing_config;
use tosca::workstation::{self, Workstation};
use tosca_core::camera::FeatureValue;
use tosca_core::serial::{PortOpener, SystemPorts};
use tosca_driver_camera::FrameStatsTap;
use tosca_driver_mock::MockMode;
use tosca_driver_xeryon::{ScanDirection, Sequence};

#[derive(Parser)]
#[command(name = "tosca")]
#[command(about = "TOSCA workstation hardware control", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Use simulated devices instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports available for auto-detection
    Ports,

    /// Drive the piezo stage
    Actuator {
        #[command(subcommand)]
        action: ActuatorAction,
    },

    /// Control the treatment laser
    Laser {
        #[command(subcommand)]
        action: LaserAction,
    },

    /// Acquire images
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ActuatorAction {
    /// Find the index and move to it
    Home,
    /// Absolute move in encoder units
    Move {
        #[arg(allow_hyphen_values = true)]
        position: i64,
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Relative move in encoder units
    Step {
        #[arg(allow_hyphen_values = true)]
        distance: i64,
        #[arg(long)]
        speed: Option<u32>,
    },
    /// Continuous motion for a fixed time
    Scan {
        #[arg(long)]
        negative: bool,
        #[arg(long, default_value = "1000")]
        duration_ms: u64,
    },
    /// Halt motion
    Stop,
    /// Print the status word and position
    Status,
    /// Run a JSON motion sequence
    Sequence { file: PathBuf },
}

#[derive(Subcommand)]
enum LaserAction {
    Identify,
    /// Set output power
    Power { value: f64 },
    Enable,
    Disable,
    Status,
}

#[derive(Subcommand)]
enum CameraAction {
    /// List cameras the driver can see
    List,
    /// Capture one frame and save it
    Capture {
        #[arg(long)]
        patient: Option<String>,
    },
    /// Stream for a while and report frame statistics
    Stream {
        #[arg(long, default_value = "5")]
        seconds: u64,
        #[arg(long)]
        buffers: Option<usize>,
    },
    /// Read a feature, or write it when a value is given
    Feature { name: String, value: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    tracing_config::init_from_config(&config)?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Ports => list_ports(config, cli.mock),
        command => {
            let (workstation, _devices) = workstation::build(config, cli.mock)?;
            let result = run_device_command(&workstation, command).await;
            workstation.shutdown().await;
            result
        }
    }
}

fn list_ports(config: AppConfig, mock: bool) -> Result<()> {
    let candidates = if mock {
        let (_, devices) = Workstation::simulated(config, MockMode::Instant);
        devices.ports.candidates()
    } else {
        SystemPorts.candidates()
    };
    if candidates.is_empty() {
        println!("No serial ports found");
    }
    for port in candidates {
        match port.description {
            Some(description) => println!("{}  ({})", port.name, description),
            None => println!("{}", port.name),
        }
    }
    Ok(())
}

async fn run_device_command(ws: &Workstation, command: Commands) -> Result<()> {
    match command {
        Commands::Actuator { action } => actuator_command(ws, action).await,
        Commands::Laser { action } => laser_command(ws, action).await,
        Commands::Camera { action } => camera_command(ws, action).await,
        Commands::Ports | Commands::Config => Ok(()),
    }
}

async fn actuator_command(ws: &Workstation, action: ActuatorAction) -> Result<()> {
    let actuator = ws.actuator();
    actuator
        .connect(&ws.config().actuator.port)
        .await
        .context("cannot connect to the actuator")?;

    match action {
        ActuatorAction::Home => actuator.home().await?,
        ActuatorAction::Move { position, speed } => actuator.move_to(position, speed).await?,
        ActuatorAction::Step { distance, speed } => {
            actuator.move_relative(distance, speed).await?
        }
        ActuatorAction::Scan {
            negative,
            duration_ms,
        } => {
            let direction = if negative {
                ScanDirection::Negative
            } else {
                ScanDirection::Positive
            };
            actuator
                .scan(direction, Duration::from_millis(duration_ms))
                .await?
        }
        ActuatorAction::Stop => actuator.stop().await?,
        ActuatorAction::Status => {}
        ActuatorAction::Sequence { file } => {
            let sequence = Sequence::load(&file)?;
            let report = actuator.run_sequence(&sequence).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    let status = actuator.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn laser_command(ws: &Workstation, action: LaserAction) -> Result<()> {
    let laser = ws.laser();
    laser
        .connect(&ws.config().laser.port)
        .await
        .context("cannot connect to the laser")?;

    match action {
        LaserAction::Identify => println!("{}", laser.identify().await?),
        LaserAction::Power { value } => {
            laser.set_power(value).await?;
            println!("Power set to {:.1}", laser.power().await?);
        }
        LaserAction::Enable => laser.enable().await?,
        LaserAction::Disable => laser.disable().await?,
        LaserAction::Status => {
            let status = laser.get_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

async fn camera_command(ws: &Workstation, action: CameraAction) -> Result<()> {
    let camera = ws.camera();
    if let CameraAction::List = action {
        for info in camera.list_cameras().await? {
            println!("{}  {} (S/N {})", info.id, info.model, info.serial);
        }
        return Ok(());
    }

    let info = camera
        .initialize_configured()
        .await
        .context("cannot initialize the camera")?;
    println!("Using {} ({})", info.model, info.id);

    match action {
        CameraAction::List => {}
        CameraAction::Capture { patient } => {
            let saved = camera.save_latest(patient.as_deref()).await?;
            println!("Saved {}", saved.raw.display());
        }
        CameraAction::Stream { seconds, buffers } => {
            let stats = FrameStatsTap::new();
            let handle = camera.register_tap(Box::new(stats.clone()));
            camera.start_streaming(buffers).await?;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
            }

            camera.stop_streaming().await?;
            camera.unregister_tap(handle);
            println!(
                "{} frames, {} missing, {} bytes",
                stats.frames(),
                stats.gaps(),
                stats.bytes()
            );
            println!("{}", serde_json::to_string_pretty(&camera.counters())?);
        }
        CameraAction::Feature { name, value } => {
            if let Some(raw) = value {
                camera.set_feature(&name, FeatureValue::parse(&raw)).await?;
            }
            println!("{} = {}", name, camera.get_feature(&name).await?);
        }
    }
    Ok(())
}
