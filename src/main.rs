//! CLI entry point for biosense-node
//!
//! - `run`: run the node with simulated peripherals
//! - `dump`: print the records stored in a flash image
//! - `erase`: erase the log region of a flash image
//!
//! # Usage
//!
//! ```bash
//! biosense-node run --image node.img --duration 10
//! biosense-node dump node.img --json
//! biosense-node erase node.img
//! ```
//!
//! With no serial port configured, `run` uses stdio as the link: any input
//! line triggers a retrieval and the records are written to stdout.

use anyhow::{Context, Result};
use biosense_node::config::{NodeConfig, SensorConfig};
use biosense_node::flash::{FlashDevice, FlashGeometry, MmapFlash, RamFlash};
use biosense_node::sensor::mock::{MockAdc, MockLeads, MockOximeter};
use biosense_node::sensor::{RtcClock, SampleProducer};
use biosense_node::storage::{FlashLog, LogHandle};
use biosense_node::transport::{spawn_rx_watcher, Link};
use biosense_node::{events::Event, telemetry, Record, Supervisor};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "biosense-node")]
#[command(about = "ECG/SpO2 sensor node with a flash record log", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config/node.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Flash image file (RAM flash when omitted)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Serial port of the radio link (stdio when omitted)
        #[arg(long)]
        port: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Keep the records already in the image
        #[arg(long)]
        keep: bool,
    },

    /// Print the records stored in a flash image
    Dump {
        /// Flash image file
        image: PathBuf,

        /// One JSON object per record
        #[arg(long)]
        json: bool,
    },

    /// Erase the log region of a flash image
    Erase {
        /// Flash image file
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = format!("{e:#}"), "biosense-node failed");
            eprintln!("Error: {e:#}");
            1
        }
    };
    // the stdio link leaves a blocking stdin read behind that would hold up
    // runtime shutdown
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = NodeConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            image,
            port,
            duration,
            keep,
        } => {
            if image.is_some() {
                config.flash.image = image;
            }
            if port.is_some() {
                config.link.port = port;
            }
            if keep {
                config.flash.erase_on_boot = false;
            }
            prepare(&config)?;
            run(config, duration.map(Duration::from_secs)).await
        }
        Commands::Dump { image, json } => {
            prepare(&config)?;
            dump(&config, &image, json)
        }
        Commands::Erase { image } => {
            prepare(&config)?;
            erase(&config, &image)
        }
    }
}

fn prepare(config: &NodeConfig) -> Result<()> {
    config.validate()?;
    telemetry::init_from_config(config)?;
    Ok(())
}

async fn run(config: NodeConfig, duration: Option<Duration>) -> Result<()> {
    let geometry = FlashGeometry::from_config(&config.flash);
    match config.flash.image.clone() {
        Some(path) => {
            let device = MmapFlash::open_or_create(&path, geometry)
                .with_context(|| format!("opening flash image {}", path.display()))?;
            run_node(device, &config, duration).await
        }
        None => run_node(RamFlash::with_geometry(geometry), &config, duration).await,
    }
}

async fn run_node<F: FlashDevice + 'static>(
    device: F,
    config: &NodeConfig,
    duration: Option<Duration>,
) -> Result<()> {
    info!(name = %config.application.name, "Booting");
    let log = LogHandle::new(FlashLog::from_config(device, &config.flash)?);
    let link = Link::open(&config.link)?;

    let supervisor = Supervisor::new(
        log,
        simulated_producer(&config.sensors),
        link.writer,
        &config.timing,
    )
    .erase_on_boot(config.flash.erase_on_boot);

    let events = supervisor.events();
    let watcher = spawn_rx_watcher(link.reader, events.clone());
    let stopper = tokio::spawn(async move {
        let deadline = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = deadline => info!("Run duration elapsed"),
        }
        events.post(Event::Shutdown);
    });

    let result = supervisor.run().await;
    watcher.abort();
    stopper.abort();

    let stats = result?;
    info!(
        appended = stats.records_appended,
        dropped = stats.records_dropped,
        retrievals = stats.retrievals_completed,
        cleanups = stats.cleanups,
        "Node stopped"
    );
    Ok(())
}

fn simulated_producer(sensors: &SensorConfig) -> SampleProducer {
    let seed = rand::random();
    let mut producer = SampleProducer::new(RtcClock::board_default(), sensors);
    if sensors.ecg {
        producer = producer.with_ecg(MockAdc::heartbeat(seed), MockLeads::attached());
    }
    if sensors.spo2 {
        producer = producer.with_spo2(MockOximeter::healthy(seed));
    }
    producer
}

fn mount_image(config: &NodeConfig, image: &Path) -> Result<FlashLog<MmapFlash>> {
    if !image.exists() {
        anyhow::bail!("flash image {} does not exist", image.display());
    }
    let device = MmapFlash::open_or_create(image, FlashGeometry::from_config(&config.flash))?;
    Ok(FlashLog::from_config(device, &config.flash)?)
}

fn dump(config: &NodeConfig, image: &Path, json: bool) -> Result<()> {
    let log = mount_image(config, image)?;
    let mut count = 0;
    for token in log.read_all() {
        match Record::parse(token) {
            Ok(record) if json => println!("{}", serde_json::to_string(&record)?),
            Ok(record) => print!("{record}"),
            Err(e) => warn!(error = %e, "Skipping unreadable record"),
        }
        count += 1;
    }
    info!(count, used = log.used(), capacity = log.capacity(), "Dump complete");
    Ok(())
}

fn erase(config: &NodeConfig, image: &Path) -> Result<()> {
    let mut log = mount_image(config, image)?;
    let records = log.read_all().count();
    log.erase()?;
    info!(records, image = %image.display(), "Log region erased");
    Ok(())
}
