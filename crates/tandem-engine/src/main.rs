//! Co-simulation controller binary.
//!
//! This is the entry point that wires together the step cycle, the two
//! simulator clients (or their in-process synthetic stand-ins), the
//! built-in demo application, and the operator stop signal. It loads
//! configuration, connects everything, and runs the lockstep loop until
//! a termination condition is met.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `tandem-config.yaml`
//! 3. Build the controller state (clock, station table, tracker, registry)
//! 4. Register the zone-alert demo application when enabled
//! 5. Open the simulator pair (socket clients or the seeded synthetic pair)
//! 6. Mirror configured fixed stations into the network simulator
//! 7. Wire Ctrl-C to the stop handle
//! 8. Run the step loop
//! 9. Log the result

mod error;
mod synthetic;
mod zone_alert;

use std::path::Path;

use tandem_core::client::{NetworkSim, TrafficSim};
use tandem_core::config::ControllerConfig;
use tandem_core::runner::{self, StopHandle};
use tandem_core::scheduler::{self, ControllerState};
use tandem_sim::{NetworkClient, TrafficClient};
use tandem_types::StationId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::zone_alert::ZoneAlertApp;

/// Application entry point for the controller.
///
/// Initializes all subsystems and runs the step loop. Returns an error
/// code on failure.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("tandem-engine starting");

    // 2. Load configuration.
    let config = load_config()?;
    info!(
        mode = config.run.mode,
        begin_step = config.run.begin_step,
        end_step = config.run.end_step,
        step_length_ms = config.run.step_length_ms,
        fixed_stations = config.fixed_stations.len(),
        "Configuration loaded"
    );

    // 3. Build the controller state.
    let mut state = ControllerState::new(&config)?;

    // 4. Register the demo application.
    if config.demo_app.enabled {
        let host = StationId::new(config.demo_app.host_station);
        state.register_app(host, Box::new(ZoneAlertApp::new(&config.demo_app)));
    }

    // 5. Open the simulator pair.
    let (mut traffic, mut network) = open_simulators(&config).await?;

    // 6. Mirror fixed stations and mark the controller connected.
    scheduler::connect(&mut state, network.as_mut()).await?;

    // 7. Wire Ctrl-C to the stop handle.
    let stop = StopHandle::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current step");
                signal_stop.request();
            }
            Err(err) => warn!(error = %err, "Ctrl-C handler unavailable"),
        }
    });

    // 8. Run the step loop.
    let report = runner::run(&mut state, traffic.as_mut(), network.as_mut(), &stop).await?;

    // 9. Log the result.
    info!(
        run_id = %report.run_id,
        end_reason = ?report.end_reason,
        steps_executed = report.steps_executed,
        "tandem-engine shutdown complete"
    );

    Ok(())
}

/// Load the controller configuration from `tandem-config.yaml`.
///
/// Looks for the config file relative to the current working directory
/// and falls back to defaults when it is absent.
fn load_config() -> Result<ControllerConfig, EngineError> {
    let config_path = Path::new("tandem-config.yaml");
    if config_path.exists() {
        let config = ControllerConfig::from_file(config_path)?;
        Ok(config)
    } else {
        info!("Config file not found, using defaults");
        Ok(ControllerConfig::default())
    }
}

/// Open the simulator backing selected by `run.mode`.
///
/// `live` dials the two socket endpoints; `synthetic` builds the seeded
/// in-process pair so the controller runs without external processes.
async fn open_simulators(
    config: &ControllerConfig,
) -> Result<(Box<dyn TrafficSim>, Box<dyn NetworkSim>), EngineError> {
    match config.run.mode.as_str() {
        "live" => {
            let traffic = TrafficClient::connect(config).await?;
            let network = NetworkClient::connect(config).await?;
            Ok((Box::new(traffic), Box::new(network)))
        }
        "synthetic" => {
            info!(seed = config.run.synthetic_seed, "Using the synthetic simulator pair");
            let (traffic, network) = synthetic::seeded_pair(config);
            Ok((Box::new(traffic), Box::new(network)))
        }
        other => Err(EngineError::Mode {
            mode: other.to_owned(),
        }),
    }
}
