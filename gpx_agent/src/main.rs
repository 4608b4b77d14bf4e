//! # GPX Agent Binary
//!
//! GPIO sensor and actuator control engine.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration file
//! gpx_agent -c /etc/gpx/gpx_agent.toml
//!
//! # Sandboxed device tree, verbose logging
//! gpx_agent -c gpx_agent.toml --test-root ./sys/class/gpio -v
//!
//! # JSON logs
//! gpx_agent --json
//! ```

use clap::Parser;
use crossbeam::channel;
use gpx_agent::control::{ControlCommand, server_startup, tracker_startup};
use gpx_agent::{AssetTracker, GpioServer, LocalBroker, LocalClient, ServerSettings, SharedState};
use gpx_common::config::{AgentConfig, ConfigError, ConfigLoader};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// GPX Agent - GPIO sensor and actuator control engine
#[derive(Parser, Debug)]
#[command(name = "gpx_agent")]
#[command(version)]
#[command(about = "GPIO sensor monitoring and actuator control agent")]
#[command(long_about = None)]
struct Args {
    /// Path to the agent configuration file.
    #[arg(short, long, default_value = "/etc/gpx/gpx_agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Redirect device I/O to this sandbox root (test mode)
    #[arg(long, value_name = "DIR")]
    test_root: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        error!("GPX agent failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = AgentConfig::load(&args.config);
    let level = match &loaded {
        Ok(config) => Level::from(config.shared.log_level),
        Err(_) => Level::INFO,
    };
    setup_tracing(&args, level);

    let config = match loaded {
        Ok(config) => config,
        Err(ConfigError::FileNotFound) => {
            warn!("{} not found, using built-in defaults", args.config.display());
            AgentConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.validate()?;

    info!("GPX agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let broker = LocalBroker::bind(&config.bus.endpoint);
    let shared = SharedState::new();

    let server = GpioServer::new(
        ServerSettings::from_config(&config),
        Box::new(LocalClient::new()),
        shared.clone(),
    );
    let tracker = AssetTracker::new(
        Box::new(LocalClient::new()),
        shared,
        &config.shared.service_name,
    );

    let (server_tx, server_rx) = channel::unbounded();
    let (tracker_tx, tracker_rx) = channel::unbounded();
    let server_handle = thread::Builder::new()
        .name("gpx-server".to_string())
        .spawn(move || server.run(server_rx))?;
    let tracker_handle = thread::Builder::new()
        .name("gpx-assets".to_string())
        .spawn(move || tracker.run(tracker_rx))?;

    for command in server_startup(&config, args.test_root.as_deref()) {
        server_tx.send(command)?;
    }
    for command in tracker_startup(&config) {
        tracker_tx.send(command)?;
    }

    // Setup signal handler.
    let (stop_tx, stop_rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = stop_tx.try_send(());
    })?;

    let ticker = channel::tick(config.agent.poll_interval());
    loop {
        channel::select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                if server_tx.send(ControlCommand::Update).is_err() {
                    warn!("Protocol server is gone");
                    break;
                }
            }
        }
    }

    let _ = tracker_tx.send(ControlCommand::Terminate);
    let _ = server_tx.send(ControlCommand::Terminate);
    join("asset tracker", tracker_handle);
    join("protocol server", server_handle);
    broker.unbind();

    info!("GPX agent shutdown complete");
    Ok(())
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("{} panicked", name);
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, level: Level) {
    let level = if args.verbose { Level::DEBUG } else { level };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
