//! ==============================================================================
//! main.rs - sensor agent entry point
//! ==============================================================================
//!
//! purpose:
//!     the process that runs next to the sensors. it connects to the device
//!     management service, registers the datapoints listed in the configuration
//!     document and then serves requests and pushes samples until interrupted.
//!
//! responsibilities:
//!     - parse the command line and the optional agent.toml settings
//!     - install logging
//!     - load the configuration document (fatal if unusable)
//!     - pick a sampler (virtual, grove kit or smartfarm kit)
//!     - connect, run the session, map the outcome to an exit code
//!
//! exit codes:
//!     0  interrupted by the user (ctrl-c / SIGQUIT)
//!     1  bad configuration, connection failure, or the session broke
//!
//! ==============================================================================

use sensor_agent::config::{AgentSettings, ConfigStore, SensorDriver};
use sensor_agent::hal::Hal;
use sensor_agent::sampler::Sampler;
use sensor_agent::sensors::{GroveSampler, SmartFarmSampler, VirtualSampler, DEFAULT_WEBCAM_RESOLUTION};
use sensor_agent::session::{self, Session};
use sensor_agent::upload::Uploader;
use sensor_agent::AgentState;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Device-side sensor agent
#[derive(Parser, Debug)]
#[command(name = "sensor-agent")]
#[command(about = "Bridges local sensors to a remote management service")]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "sensor-app.json")]
    config: PathBuf,

    /// Runtime settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Sampler to use
    #[arg(long, value_enum)]
    driver: Option<SensorDriver>,

    /// Directory for captured files awaiting upload
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("===========================================================");
    println!("  sensor-agent {}", env!("CARGO_PKG_VERSION"));
    println!("===========================================================");

    // step 1: runtime settings and logging
    let settings = AgentSettings::load_or_default(args.settings.as_deref());
    let level = args.log_level.clone().unwrap_or_else(|| settings.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // step 2: the configuration document
    let store = ConfigStore::new(&args.config);
    let config = store
        .load()
        .with_context(|| format!("Failed to parse configuration file: {}", args.config.display()))?;
    settings.print_summary(&config);

    // step 3: the sampler
    let driver = args.driver.unwrap_or(settings.sensor.driver);
    let resolution = config.string_by_name("webcamResolution").unwrap_or(DEFAULT_WEBCAM_RESOLUTION);
    let sampler: Arc<dyn Sampler> = match driver {
        SensorDriver::Virtual => Arc::new(VirtualSampler::new(&args.workdir)),
        SensorDriver::Grove => Arc::new(GroveSampler::new(Hal::new(), &args.workdir, resolution)),
        SensorDriver::Smartfarm => Arc::new(SmartFarmSampler::new(Hal::new(), &args.workdir, resolution)),
    };

    // step 4: interrupt handling flips the running flag
    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_listener(running.clone());

    // step 5: connect and serve
    let addr = config.service_addr();
    let stream = session::connect(&addr, Duration::from_millis(settings.connection.reconnect_delay_ms)).await?;
    tracing::info!("connected to {}", addr);

    let state = AgentState::new(config, store, sampler, Uploader::spawn(reqwest::Client::new()));
    let (reader, writer) = stream.into_split();
    let mut session = Session::new(state, reader, writer, running)
        .with_poll_interval(Duration::from_millis(settings.polling.interval_ms))
        .show_sensor_data(settings.logging.show_sensor_data);

    if let Err(e) = session.run().await {
        tracing::error!("session ended: {}", e);
        return Err(e.into());
    }

    println!("sensor app is terminated!");
    Ok(())
}

fn spawn_signal_listener(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_interrupt().await;
        tracing::info!("interrupt received, finishing current iteration");
        running.store(false, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut quit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Can't register SIGQUIT handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}
