//! CLI entry point for the AMi plate imager
//!
//! Each invocation loads the settings and the plate file, brings up the
//! hardware, performs one operation and shuts the hardware down again.
//!
//! # Usage
//!
//! ```bash
//! ami --plate plates/xs2.toml run          # image the whole plate (Ctrl+C stops after the current sample)
//! ami --plate plates/xs2.toml goto B4b
//! ami --plate plates/xs2.toml snap --stack --at C7
//! ami --plate plates/xs2.toml calibrate tr --dx 0.2 --dy -0.1
//! ami check-plate plates/xs2.toml
//! ```

use ami::config::{Settings, DEFAULT_SETTINGS_PATH};
use ami::hardware::Hardware;
use ami::{
    logging, spawn_plate_run, ControllerOptions, Corner, DeviceController, PlateConfig,
    TracingStatusSink,
};
use ami_core::sample_label;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "ami")]
#[command(about = "Automated plate microscope control", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Plate file (defaults to `imaging.plate_file` from the settings)
    #[arg(long)]
    plate: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Image every sample of the plate
    Run,

    /// Move to a sample address such as B4 or b4c
    Goto {
        /// Sample address
        address: String,
    },

    /// Capture a snapshot or focus stack
    Snap {
        /// Capture a focus stack and write its merge script
        #[arg(long)]
        stack: bool,

        /// Move to this address first
        #[arg(long)]
        at: Option<String>,
    },

    /// Move to a corner well, apply a correction and save it as the new corner
    Calibrate {
        /// Corner to calibrate
        corner: CornerArg,

        /// Correction in x (mm)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        dx: f64,

        /// Correction in y (mm)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        dy: f64,

        /// Correction in z (mm)
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        dz: f64,
    },

    /// Clear an alarm and run the homing cycle
    Home,

    /// Clear an alarm lock without homing
    Unlock,

    /// Print the machine and work positions
    Status,

    /// Validate a plate file and print where every sample resolves
    CheckPlate {
        /// Plate file (overrides --plate)
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CornerArg {
    Tl,
    Tr,
    Bl,
    Br,
}

impl From<CornerArg> for Corner {
    fn from(arg: CornerArg) -> Self {
        match arg {
            CornerArg::Tl => Corner::TopLeft,
            CornerArg::Tr => Corner::TopRight,
            CornerArg::Bl => Corner::BottomLeft,
            CornerArg::Br => Corner::BottomRight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    logging::init(&settings.logging)?;
    settings.validate()?;

    let plate_path = cli
        .plate
        .clone()
        .unwrap_or_else(|| settings.imaging.plate_file.clone());

    match cli.command {
        Commands::CheckPlate { path } => check_plate(path.as_deref().unwrap_or(&plate_path)),
        command => {
            let plate = PlateConfig::load(&plate_path)
                .with_context(|| format!("loading plate from {}", plate_path.display()))?;
            let hw = Hardware::from_settings(&settings).await?;
            let controller = DeviceController::new(
                plate,
                hw,
                ControllerOptions::from(&settings),
                Arc::new(TracingStatusSink),
            )?;
            execute(controller, command, &plate_path).await
        }
    }
}

async fn execute(mut controller: DeviceController, command: Commands, plate_path: &Path) -> Result<()> {
    let outcome = match command {
        Commands::Run => {
            let shared = Arc::new(Mutex::new(controller));
            let outcome = run_until_interrupted(shared.clone()).await;
            controller = Arc::try_unwrap(shared)
                .map_err(|_| anyhow::anyhow!("plate run still holds the controller"))?
                .into_inner();
            outcome
        }
        Commands::Goto { address } => controller
            .goto_label(&address)
            .await
            .map(|position| println!("{} at {}", controller.current_label(), position))
            .map_err(Into::into),
        Commands::Snap { stack, at } => snap(&mut controller, stack, at.as_deref()).await,
        Commands::Calibrate {
            corner,
            dx,
            dy,
            dz,
        } => calibrate(&mut controller, corner.into(), (dx, dy, dz), plate_path).await,
        Commands::Home => controller.home().await.map_err(Into::into),
        Commands::Unlock => controller.unlock().await.map_err(Into::into),
        Commands::Status => status(&mut controller).await,
        Commands::CheckPlate { .. } => Ok(()),
    };

    let shutdown = controller.shutdown().await;
    outcome?;
    shutdown?;
    Ok(())
}

/// Run the plate on a background task; the first Ctrl+C asks it to stop
/// after the current sample.
async fn run_until_interrupted(controller: Arc<Mutex<DeviceController>>) -> Result<()> {
    let handle = controller.lock().await.run_handle();
    let mut task = spawn_plate_run(controller);

    let summary = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, stopping after the current sample");
            handle.request_cancel();
            task.await?
        }
    }?;

    println!(
        "{} samples imaged, {} skipped, {} images in {}",
        summary.samples_completed,
        summary.samples_skipped,
        summary.images_captured,
        summary.run_dir.display()
    );
    println!("source {} to combine z-stacks", summary.script.display());
    Ok(())
}

async fn snap(controller: &mut DeviceController, stack: bool, at: Option<&str>) -> Result<()> {
    if let Some(address) = at {
        controller.goto_label(address).await?;
    }
    if stack {
        let capture = controller.snap_stack().await?;
        for image in &capture.images {
            println!("{}", image.display());
        }
        println!("source {} to combine z-stack", capture.script.display());
    } else {
        let path = controller.snap().await?;
        println!("{}", path.display());
    }
    Ok(())
}

async fn calibrate(
    controller: &mut DeviceController,
    corner: Corner,
    (dx, dy, dz): (f64, f64, f64),
    plate_path: &Path,
) -> Result<()> {
    controller.select_corner(corner).await?;
    if dx != 0.0 || dy != 0.0 || dz != 0.0 {
        controller.jog(dx, dy, dz).await?;
    }
    controller.commit_calibration().await?;
    controller.save_plate(plate_path)?;
    println!("{} = {}", corner, controller.plate().corner(corner));
    Ok(())
}

async fn status(controller: &mut DeviceController) -> Result<()> {
    let machine = controller.sync_position().await?;
    let work = controller.hardware().motion.get_work_position().await?;
    println!("machine position {}", machine);
    println!("work position    {}", work);
    println!("state            {}", controller.state());
    Ok(())
}

fn check_plate(path: &Path) -> Result<()> {
    let plate = PlateConfig::load(path)
        .with_context(|| format!("loading plate from {}", path.display()))?;
    plate.check_corners()?;
    println!(
        "{}/{}: {} x {} wells, {} samples per well, {} images per stack",
        plate.sample_id,
        plate.plate_id,
        plate.nx,
        plate.ny,
        plate.samples_per_well,
        plate.n_focus_images
    );
    for (row, col, sample) in plate.sample_order() {
        println!(
            "{:<5} {}",
            sample_label(&plate, row, col, sample),
            plate.resolve(row, col, sample)?
        );
    }
    Ok(())
}
