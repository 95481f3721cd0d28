use anyhow::Result;
use clap::Parser;
use posetrack_config::AppConfig;
use posetrack_imu::source::{LinkSource, MissCounter, SampleSource, SyntheticSource};
use posetrack_imu::TrackerClient;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Real-time orientation and position tracking from a 6/9-axis IMU.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Use synthetic samples instead of the device link.
    #[arg(long)]
    simulate: bool,
    /// Device link path, e.g. /dev/ttyACM0.
    #[arg(long)]
    device: Option<PathBuf>,
    /// Seed for the synthetic source.
    #[arg(long)]
    seed: Option<u64>,
    /// Write the effective config to disk and exit.
    #[arg(long)]
    save_config: bool,
}

fn open_source(config: &AppConfig) -> Box<dyn SampleSource> {
    if !config.source.simulation {
        let misses = MissCounter::for_interval_ms(config.timing.dashboard_interval_ms);
        match LinkSource::open(&config.source.device, misses) {
            Ok(link) => return Box::new(link),
            Err(e) => warn!(?e, "Device link not available, switching to simulation"),
        }
    }
    info!(seed = ?config.source.seed, "Using synthetic samples");
    Box::new(SyntheticSource::new(config.source.seed))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "posetrack=info,posetrack_imu=info,posetrack_config=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    info!("posetrack starting");

    let loaded = match &cli.config {
        Some(path) => posetrack_config::load_config_from(path),
        None => posetrack_config::load_config(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if cli.simulate {
        config.source.simulation = true;
    }
    if let Some(device) = cli.device {
        config.source.device = device;
    }
    if cli.seed.is_some() {
        config.source.seed = cli.seed;
    }

    if cli.save_config {
        match &cli.config {
            Some(path) => posetrack_config::save_config_to(&config, path)?,
            None => posetrack_config::save_config(&config)?,
        }
        return Ok(());
    }

    info!(?config.fusion, ?config.timing, "Config loaded");

    let client = TrackerClient::spawn(
        config.fusion.estimator(),
        Duration::from_millis(config.timing.physics_interval_ms),
        open_source(&config),
    )?;

    run_dashboard(&client, config.timing.dashboard_interval_ms).await;

    client.shutdown().await;
    info!("posetrack stopped");
    Ok(())
}

/// Print pose snapshots until the user quits or the tracker stops.
///
/// Commands on stdin: `r`/`reset` zeroes the pose, `q`/`quit` exits.
async fn run_dashboard(client: &TrackerClient, interval_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    let ticks_per_report = (1000 / interval_ms).max(1);
    let mut ticks: u64 = 0;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !client.is_running() {
                    warn!("Tracker stopped unexpectedly");
                    break;
                }

                let pose = client.pose();
                ticks += 1;
                if ticks % ticks_per_report == 0 {
                    let stats = client.stats();
                    info!(
                        pitch = %format!("{:.2}", pose.pitch),
                        roll = %format!("{:.2}", pose.roll),
                        yaw = %format!("{:.2}", pose.yaw),
                        x = %format!("{:.3}", pose.x),
                        y = %format!("{:.3}", pose.y),
                        z = %format!("{:.3}", pose.z),
                        miss_rate = %format!("{:.2}", stats.miss_rate),
                        samples = stats.samples,
                        "Pose"
                    );
                } else {
                    tracing::trace!(?pose, "Pose");
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(cmd)) => match cmd.trim() {
                        "r" | "reset" => client.reset(),
                        "q" | "quit" => break,
                        "" => {}
                        other => warn!(command = other, "Unknown command (use reset or quit)"),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!(?e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }
}
