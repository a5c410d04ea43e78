//! Static configuration loading.
//!
//! One YAML file describes the node fleet, the link topology, how to reach the
//! nodes, and the endpoints of the telemetry store and submission gateways.
//! Secrets are never read from the file; `main` injects them from the
//! environment after loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! ssh:
//!   user: "pi"
//!   key_path: "/etc/linkload/id_ed25519"
//! nodes:
//!   node01:
//!     host: "10.64.44.101"
//!   node05:
//!     host: "10.64.44.105"
//!     interface: "wlan1"
//! links:
//!   link1: [node01, node05]        # [access_point, station]
//! telemetry:
//!   url: "http://10.64.44.196:8086"
//!   database: "shelly_power"
//! ```
//!
//! Every other section (`estimator`, `scheduler`, `server`,
//! `prediction_store`, `submission`) is optional.

pub mod topology;

pub use topology::{Link, NodeEndpoint, Topology};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use tracing::info;
use url::Url;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    ssh: SshSettings,
    nodes: HashMap<String, topology::NodeEntry>,
    links: BTreeMap<String, Vec<String>>,
    telemetry: TelemetrySettings,
    #[serde(default)]
    estimator: EstimatorSettings,
    #[serde(default)]
    scheduler: SchedulerSettings,
    #[serde(default)]
    server: ServerSettings,
    prediction_store: Option<PredictionStoreSettings>,
    submission: Option<CimSettings>,
}

// ── Sections ──────────────────────────────────────────────────────────────────

/// Credentials and timeouts for the management channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    pub user: String,
    pub key_path: PathBuf,
    /// Timeout for every short management command (address lookup, kill, …).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SshSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn default_command_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// InfluxDB 1.x instance holding per-node power and bitrate series.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    pub url: Url,
    pub database: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Series are tagged `topic = "<topic_prefix><node>"`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<SecretString>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_measurement() -> String {
    "mqtt_consumer".to_string()
}

fn default_topic_prefix() -> String {
    "power/".to_string()
}

fn default_http_timeout_secs() -> u64 {
    20
}

/// Tuning knobs for the energy estimator.  Defaults match the field
/// deployment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Executions shorter than this use the historical-match path.
    pub short_workload_threshold_secs: u64,
    /// Margin added before the execution start when integrating.
    pub settle_in_secs: u64,
    /// Margin added after the execution end when integrating.
    pub settle_out_secs: u64,
    pub lookback_days: u32,
    /// Relative tolerance (0.1 = ±10 %) around the requested bandwidth.
    pub bandwidth_tolerance: f64,
    /// Max distance between a bitrate sample and its matching power samples.
    pub align_tolerance_secs: u64,
    /// Number of most-recent historical matches that are averaged.
    pub max_samples: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            short_workload_threshold_secs: 60,
            settle_in_secs: 10,
            settle_out_secs: 20,
            lookback_days: 90,
            bandwidth_tolerance: 0.10,
            align_tolerance_secs: 5,
            max_samples: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Pause after an execution so the tail of the power trace lands in the
    /// telemetry store before it is queried.
    pub tail_wait_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tail_wait_secs: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

/// InfluxDB database that receives one point per finished prediction.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionStoreSettings {
    pub url: Url,
    pub database: String,
    #[serde(default = "default_prediction_measurement")]
    pub measurement: String,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<SecretString>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_prediction_measurement() -> String {
    "workloads".to_string()
}

/// How the token request body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthBodyMode {
    #[default]
    Json,
    Form,
}

/// Upstream metrics API (CIM) that receives every prediction.
#[derive(Debug, Clone, Deserialize)]
pub struct CimSettings {
    pub base_url: Url,
    #[serde(default = "default_auth_path")]
    pub auth_path: String,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
    pub email: String,
    #[serde(skip)]
    pub password: Option<SecretString>,
    #[serde(default = "default_email_field")]
    pub email_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    #[serde(default = "default_token_field")]
    pub token_field: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub auth_body: AuthBodyMode,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    #[serde(default = "default_network_type")]
    pub network_type: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_auth_path() -> String {
    "/gd-cim-api/get-token".to_string()
}

fn default_submit_path() -> String {
    "/gd-cim-api/submit".to_string()
}

fn default_email_field() -> String {
    "email".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

fn default_token_field() -> String {
    "access_token".to_string()
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_site() -> String {
    "SLICES-GR-UTH".to_string()
}

fn default_owner() -> String {
    "vo:network-ops".to_string()
}

fn default_network_type() -> String {
    "IoT".to_string()
}

fn default_true() -> bool {
    true
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Fully parsed and validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub topology: Topology,
    pub ssh: SshSettings,
    pub telemetry: TelemetrySettings,
    pub estimator: EstimatorSettings,
    pub scheduler: SchedulerSettings,
    pub server: ServerSettings,
    pub prediction_store: Option<PredictionStoreSettings>,
    pub submission: Option<CimSettings>,
}

impl Config {
    /// Parses and validates the YAML file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is structurally
    /// invalid, or the topology breaks the one-link-per-node rule.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parses and validates configuration held in memory.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        let topology = Topology::build(file.nodes, file.links)?;

        info!(
            nodes = topology.node_count(),
            links = topology.links().count(),
            "Topology loaded"
        );
        for link in topology.links() {
            info!(
                "  Link: {} | AP: {} | STA: {}",
                link.name, link.access_point, link.station
            );
        }

        Ok(Self {
            topology,
            ssh: file.ssh,
            telemetry: file.telemetry,
            estimator: file.estimator,
            scheduler: file.scheduler,
            server: file.server,
            prediction_store: file.prediction_store,
            submission: file.submission,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
