use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use recaller::config::Config;
use recaller::live::{run_live, LiveOptions};
use recaller::pipeline::{ShutdownReason, StopSignal};
use recaller::targetter::{run_targetter, TargetterOptions};

#[derive(Parser)]
#[command(
    name = "recaller",
    version,
    about = "Live face detection pipeline and face dataset packager",
    long_about = None
)]
struct Cli {
    /// Path to config file (overrides $RECALLER_CONFIG and the default location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Live options when no mode is given
    #[command(flatten)]
    live: LiveArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Default, Clone)]
struct LiveArgs {
    /// Camera index into the configured frame sources
    #[arg(long)]
    cam: Option<usize>,

    /// Frame directory to read instead of a configured camera
    #[arg(long)]
    source: Option<PathBuf>,
}

impl From<LiveArgs> for LiveOptions {
    fn from(args: LiveArgs) -> Self {
        Self {
            camera: args.cam,
            source: args.source,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live detection and recognition pipeline (default).
    Live(LiveArgs),

    /// Package face crops from still images and test the recognizer.
    Targetter {
        /// Package the off-target images instead of the target images
        #[arg(long = "build_test_images", alias = "build-test-images")]
        build_test_images: bool,

        /// Keep overlapping detections of the same face
        #[arg(long = "no_nms", alias = "no-nms")]
        no_nms: bool,

        /// Train on packaged target faces, then predict the off-target faces
        #[arg(long = "test_recognition", alias = "test-recognition")]
        test_recognition: bool,
    },
}

impl LiveArgs {
    fn is_empty(&self) -> bool {
        self.cam.is_none() && self.source.is_none()
    }
}

impl Cli {
    /// The selected mode; live with the top-level options when none is given.
    fn into_command(self) -> std::result::Result<Commands, clap::Error> {
        match self.command {
            None => Ok(Commands::Live(self.live)),
            Some(command) if self.live.is_empty() => Ok(command),
            Some(_) => Err(Cli::command().error(
                ErrorKind::ArgumentConflict,
                "--cam and --source go after `live` or replace the mode, not before it",
            )),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let command = cli.into_command().unwrap_or_else(|e| e.exit());

    if let Err(e) = recaller::logging::init(None) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    if let Err(e) = run(config_path, command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>, command: Commands) -> Result<()> {
    let config = match &config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    match command {
        Commands::Live(args) => live(config, args.into()).await,
        Commands::Targetter {
            build_test_images,
            no_nms,
            test_recognition,
        } => {
            let options = TargetterOptions {
                build_test_images,
                no_nms,
                test_recognition,
            };
            tokio::task::spawn_blocking(move || run_targetter(&config, &options))
                .await
                .context("Targetter task failed")??;
            Ok(())
        }
    }
}

async fn live(config: Config, options: LiveOptions) -> Result<()> {
    let stop = StopSignal::new();

    let interrupt = stop.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            interrupt.trigger();
        }
    });

    let report = tokio::task::spawn_blocking(move || run_live(&config, &options, stop))
        .await
        .context("Pipeline task failed")?;
    signal_task.abort();

    let report = report.context("Failed to start pipeline")?;
    for stage in &report.stages {
        info!(stage = %stage.name, state = ?stage.state, uptime = ?stage.uptime, "Stage finished");
    }

    let clean = report.is_clean();
    match report.reason {
        ShutdownReason::Requested if clean => Ok(()),
        ShutdownReason::Requested => {
            warn!("Pipeline stopped with failed stages");
            bail!("a pipeline stage failed during shutdown")
        }
        ShutdownReason::StageExited(name) => bail!("stage '{}' stopped unexpectedly", name),
    }
}
