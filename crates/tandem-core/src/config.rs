//! Configuration loading and typed config structures for the controller.
//!
//! The canonical configuration lives in `tandem-config.yaml` next to
//! the binary. This module defines strongly-typed structs that mirror
//! the YAML structure and provides a loader that reads, overrides and
//! validates the file. Every field has a default, so a missing file or
//! an empty document yields a runnable configuration.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use tandem_types::SimStep;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// Two fixed stations were declared with the same id.
    #[error("fixed station id {station} is declared twice")]
    DuplicateFixedStation {
        /// The id that appeared more than once.
        station: u32,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level controller configuration.
///
/// Mirrors the structure of `tandem-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ControllerConfig {
    /// Traffic simulator endpoint and connect policy.
    #[serde(default)]
    pub traffic: TrafficEndpointConfig,

    /// Network simulator endpoint and connect policy.
    #[serde(default)]
    pub network: NetworkEndpointConfig,

    /// Run bounds, timing and mode.
    #[serde(default)]
    pub run: RunConfig,

    /// Request/response deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Geobroadcast tracker tuning.
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Roadside units present for the whole run.
    #[serde(default)]
    pub fixed_stations: Vec<FixedStationConfig>,

    /// Built-in zone-alert demo application.
    #[serde(default)]
    pub demo_app: DemoAppConfig,
}

impl ControllerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `TANDEM_TRAFFIC_ADDR` overrides `traffic.host`/`traffic.port`
    ///   (as `host:port`)
    /// - `TANDEM_NETWORK_ADDR` overrides `network.host`/`network.port`
    /// - `TANDEM_MAX_STEPS` overrides `run.end_step`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or a
    /// validation error for contradictory values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML,
    /// or a validation error for contradictory values.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateFixedStation`] if two roadside
    /// units share an id.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for station in &self.fixed_stations {
            if !seen.insert(station.id) {
                return Err(ConfigError::DuplicateFixedStation {
                    station: station.id,
                });
            }
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TANDEM_TRAFFIC_ADDR") {
            apply_addr(&addr, &mut self.traffic.host, &mut self.traffic.port);
        }
        if let Ok(addr) = std::env::var("TANDEM_NETWORK_ADDR") {
            apply_addr(&addr, &mut self.network.host, &mut self.network.port);
        }
        if let Ok(steps) = std::env::var("TANDEM_MAX_STEPS")
            && let Ok(parsed) = steps.parse::<u64>()
        {
            self.run.end_step = parsed;
        }
    }
}

/// Apply a `host:port` override; values that do not parse are ignored.
fn apply_addr(addr: &str, host: &mut String, port: &mut u16) {
    if let Some((new_host, new_port)) = addr.rsplit_once(':')
        && let Ok(parsed) = new_port.parse::<u16>()
    {
        *host = new_host.to_owned();
        *port = parsed;
    }
}

/// Traffic simulator endpoint and connect policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrafficEndpointConfig {
    /// Host the traffic simulator listens on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port of the traffic simulator.
    #[serde(default = "default_traffic_port")]
    pub port: u16,

    /// Connect attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between connect attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl TrafficEndpointConfig {
    /// `host:port` form for socket connects and log fields.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TrafficEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_traffic_port(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Network simulator endpoint and connect policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkEndpointConfig {
    /// Host the network simulator listens on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port of the network simulator.
    #[serde(default = "default_network_port")]
    pub port: u16,

    /// Connect attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between connect attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Radio technologies assigned to mobile stations mirrored into the
    /// network simulator.
    #[serde(default = "default_technologies")]
    pub mobile_technologies: Vec<String>,
}

impl NetworkEndpointConfig {
    /// `host:port` form for socket connects and log fields.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NetworkEndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_network_port(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            mobile_technologies: default_technologies(),
        }
    }
}

/// Run bounds, timing and mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// First step to execute.
    #[serde(default)]
    pub begin_step: u64,

    /// Last step to execute (0 = run until stopped).
    #[serde(default)]
    pub end_step: u64,

    /// Simulated milliseconds per step, shared by both simulators.
    #[serde(default = "default_step_length_ms")]
    pub step_length_ms: u64,

    /// Backing mode: `live` (socket clients) or `synthetic`
    /// (in-process seeded pair).
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Seed for the synthetic simulator pair.
    #[serde(default = "default_seed")]
    pub synthetic_seed: u64,
}

impl RunConfig {
    /// The configured end step, `None` when the run is unbounded.
    #[must_use]
    pub const fn run_until(&self) -> Option<SimStep> {
        if self.end_step == 0 {
            None
        } else {
            Some(self.end_step)
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            begin_step: 0,
            end_step: 0,
            step_length_ms: default_step_length_ms(),
            mode: default_mode(),
            synthetic_seed: default_seed(),
        }
    }
}

/// Request/response deadlines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    /// Milliseconds to wait for any single simulator response before
    /// the reconnect-and-resend retry, and again before giving up.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

/// Geobroadcast tracker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerConfig {
    /// Steps a closed message id stays classifiable as a late
    /// reception before it is pruned.
    #[serde(default = "default_closed_retention_steps")]
    pub closed_retention_steps: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            closed_retention_steps: default_closed_retention_steps(),
        }
    }
}

/// One roadside unit, present from the first step to the last.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixedStationConfig {
    /// Station id; must not collide with other fixed stations.
    pub id: u32,

    /// East-west position in meters.
    pub x: f64,

    /// North-south position in meters.
    pub y: f64,

    /// Radio technologies installed on this unit.
    #[serde(default = "default_technologies")]
    pub technologies: Vec<String>,
}

/// Built-in zone-alert demo application.
///
/// When enabled, the engine registers an application that periodically
/// geobroadcasts an alert to every station inside a configured circle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemoAppConfig {
    /// Whether the demo application is registered at startup.
    #[serde(default)]
    pub enabled: bool,

    /// Station the demo application is installed on.
    #[serde(default = "default_demo_host")]
    pub host_station: u32,

    /// Alert zone center, east-west meters.
    #[serde(default)]
    pub center_x: f64,

    /// Alert zone center, north-south meters.
    #[serde(default)]
    pub center_y: f64,

    /// Alert zone radius in meters.
    #[serde(default = "default_demo_radius")]
    pub radius: f64,

    /// Steps each alert stays eligible for delivery.
    #[serde(default = "default_demo_ttl_steps")]
    pub ttl_steps: u32,

    /// Steps between consecutive alerts.
    #[serde(default = "default_demo_period_steps")]
    pub period_steps: u64,
}

impl Default for DemoAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host_station: default_demo_host(),
            center_x: 0.0,
            center_y: 0.0,
            radius: default_demo_radius(),
            ttl_steps: default_demo_ttl_steps(),
            period_steps: default_demo_period_steps(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_traffic_port() -> u16 {
    8813
}

const fn default_network_port() -> u16 {
    9813
}

const fn default_connect_attempts() -> u32 {
    10
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_step_length_ms() -> u64 {
    1000
}

fn default_mode() -> String {
    "live".to_owned()
}

const fn default_seed() -> u64 {
    42
}

const fn default_response_timeout_ms() -> u64 {
    5000
}

const fn default_closed_retention_steps() -> u64 {
    50
}

fn default_technologies() -> Vec<String> {
    vec!["its-g5".to_owned()]
}

const fn default_demo_host() -> u32 {
    900
}

const fn default_demo_radius() -> f64 {
    200.0
}

const fn default_demo_ttl_steps() -> u32 {
    5
}

const fn default_demo_period_steps() -> u64 {
    10
}
