//! ironsight-engine configuration
//!
//! Bootstrap TOML loaded once at startup. Every field has a compiled
//! default, so an empty (or absent) file yields a working single-node
//! setup listening on UDP 5005 with the firmware's default channel map.

use ironsight_common::config::{load_toml, ConfigSource, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{Error, Result};
use crate::ingest::ChannelLabel;
use crate::localization::SensorGeometry;
use crate::scoring::RingTable;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default, skip_serializing)]
    pub logging: LoggingConfig,

    /// Sensor nodes (default: one node `PICO_A01` on 0.0.0.0:5005)
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub geometry: GeometryConfig,

    #[serde(default)]
    pub localization: LocalizationConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

/// HTTP control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (default: 0.0.0.0)
    #[serde(default = "default_http_bind")]
    pub bind: IpAddr,

    /// Listen port (default: 5006)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

/// One sensor node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,

    /// UDP socket the node sends to (default: 0.0.0.0:5005). Nodes may
    /// share a socket.
    #[serde(default = "default_node_bind")]
    pub bind: SocketAddr,

    /// Raw firmware channel key → label (default: 0=N, 1=E, 2=W, 3=S)
    #[serde(default = "default_channel_map")]
    pub channel_map: BTreeMap<String, String>,

    /// Labels this node is expected to report (default: N, E, S, W)
    #[serde(default = "default_node_channels")]
    pub channels: Vec<ChannelLabel>,
}

/// Multi-node correlation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Max distance between a bundle and a window's start (default: 3000us)
    #[serde(default = "default_window_us")]
    pub window_us: u64,

    /// Age at which an incomplete window is closed (default: 50ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Timeout sweep period (default: 10ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Datagram validation bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Largest accepted datagram (default: 4096 bytes)
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,

    /// Largest accepted |peak| (default: 1e6)
    #[serde(default = "default_max_abs_peak")]
    pub max_abs_peak: f64,

    /// Largest accepted energy or energy2 (default: 1e12)
    #[serde(default = "default_max_energy")]
    pub max_energy: f64,

    /// Largest accepted arrival offset (default: 20000us)
    #[serde(default = "default_max_tdoa_us")]
    pub max_tdoa_us: f64,

    /// Silence after which a node's sequence history is forgotten (default: 30s)
    #[serde(default = "default_node_idle_reset_ms")]
    pub node_idle_reset_ms: u64,

    /// Listener → correlator queue depth (default: 256)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Sensor mounting geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Distance of every sensor from target center (default: 0.5)
    #[serde(default = "default_sensor_radius")]
    pub sensor_radius: f64,

    /// Per-label angle overrides in degrees, counter-clockwise from east
    #[serde(default)]
    pub angles_deg: BTreeMap<String, f64>,
}

/// Energy-ratio → radius mapping
///
/// Material dependent; pick the form that fits the measured curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RadiusCurveConfig {
    /// `r = d · max_radius`
    Linear { max_radius: f64 },
    /// `r = d^exponent · max_radius`
    Power { max_radius: f64, exponent: f64 },
    /// Piecewise-linear through `[dominance, radius]` points
    Table { points: Vec<[f64; 2]> },
}

/// Localization estimator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizationConfig {
    /// Propagation speed in the target material, units/s (default: 600)
    #[serde(default = "default_wave_speed")]
    pub wave_speed: f64,

    /// RMS residual at which TDOA confidence falls to 1/e (default: 50us)
    #[serde(default = "default_residual_scale_us")]
    pub residual_scale_us: f64,

    #[serde(default = "default_radius_curve")]
    pub radius_curve: RadiusCurveConfig,

    /// TDOA solutions farther out than this are rejected (default: 1.0)
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,
}

/// Ring table and debounce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Outer radius of X, 10, 9, ..., 1 (default: 0.010, 0.020 ... 0.200)
    #[serde(default = "default_ring_radii")]
    pub ring_radii: Vec<f64>,

    /// Echo suppression window after an accepted event (default: 500ms)
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: u64,

    /// Sensor-plane units per centimetre divisor (default: 100, i.e. metres)
    #[serde(default = "default_units_to_cm")]
    pub units_to_cm: f64,
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_arrows_per_end")]
    pub arrows_per_end: u32,

    #[serde(default = "default_num_ends")]
    pub num_ends: u32,

    /// Ended sessions kept queryable in memory (default: 100)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber buffer before drop-oldest (default: 256)
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

// Default value functions
fn default_http_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    5006
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![NodeConfig::new("PICO_A01")]
}

fn default_node_bind() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5005)
}

fn default_channel_map() -> BTreeMap<String, String> {
    [("0", "N"), ("1", "E"), ("2", "W"), ("3", "S")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_node_channels() -> Vec<ChannelLabel> {
    vec![ChannelLabel::N, ChannelLabel::E, ChannelLabel::S, ChannelLabel::W]
}

fn default_window_us() -> u64 {
    3000
}

fn default_timeout_ms() -> u64 {
    50
}

fn default_sweep_interval_ms() -> u64 {
    10
}

fn default_max_datagram_bytes() -> usize {
    4096
}

fn default_max_abs_peak() -> f64 {
    1.0e6
}

fn default_max_energy() -> f64 {
    1.0e12
}

fn default_max_tdoa_us() -> f64 {
    20_000.0
}

fn default_node_idle_reset_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_sensor_radius() -> f64 {
    0.5
}

fn default_wave_speed() -> f64 {
    600.0
}

fn default_residual_scale_us() -> f64 {
    50.0
}

fn default_radius_curve() -> RadiusCurveConfig {
    RadiusCurveConfig::Linear { max_radius: 0.5 }
}

fn default_max_radius() -> f64 {
    1.0
}

fn default_ring_radii() -> Vec<f64> {
    vec![
        0.010, 0.020, 0.040, 0.060, 0.080, 0.100, 0.120, 0.140, 0.160, 0.180, 0.200,
    ]
}

fn default_refractory_ms() -> u64 {
    500
}

fn default_units_to_cm() -> f64 {
    100.0
}

fn default_arrows_per_end() -> u32 {
    3
}

fn default_num_ends() -> u32 {
    10
}

fn default_history_limit() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}

impl NodeConfig {
    /// Node with default bind, channel map and channels
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            bind: default_node_bind(),
            channel_map: default_channel_map(),
            channels: default_node_channels(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            nodes: default_nodes(),
            correlation: CorrelationConfig::default(),
            ingest: IngestConfig::default(),
            geometry: GeometryConfig::default(),
            localization: LocalizationConfig::default(),
            scoring: ScoringConfig::default(),
            session: SessionConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            port: default_http_port(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_us: default_window_us(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_datagram_bytes: default_max_datagram_bytes(),
            max_abs_peak: default_max_abs_peak(),
            max_energy: default_max_energy(),
            max_tdoa_us: default_max_tdoa_us(),
            node_idle_reset_ms: default_node_idle_reset_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            sensor_radius: default_sensor_radius(),
            angles_deg: BTreeMap::new(),
        }
    }
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            wave_speed: default_wave_speed(),
            residual_scale_us: default_residual_scale_us(),
            radius_curve: default_radius_curve(),
            max_radius: default_max_radius(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ring_radii: default_ring_radii(),
            refractory_ms: default_refractory_ms(),
            units_to_cm: default_units_to_cm(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            arrows_per_end: default_arrows_per_end(),
            num_ends: default_num_ends(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load from the resolved source and validate
    pub fn load(source: &ConfigSource) -> Result<Self> {
        let config: EngineConfig = load_toml(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document and validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// More than one node means bundles must be correlated
    pub fn is_multi_node(&self) -> bool {
        self.nodes.len() > 1
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Nodes grouped by the socket they send to, in first-seen order
    pub fn nodes_by_bind(&self) -> Vec<(SocketAddr, Vec<&NodeConfig>)> {
        let mut groups: Vec<(SocketAddr, Vec<&NodeConfig>)> = Vec::new();
        for node in &self.nodes {
            match groups.iter_mut().find(|(addr, _)| *addr == node.bind) {
                Some((_, members)) => members.push(node),
                None => groups.push((node.bind, vec![node])),
            }
        }
        groups
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("at least one [[nodes]] entry is required".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.node_id.trim().is_empty() {
                return Err(Error::Config("node_id must not be empty".into()));
            }
            if !seen.insert(node.node_id.as_str()) {
                return Err(Error::Config(format!("duplicate node_id '{}'", node.node_id)));
            }
            if node.channels.is_empty() {
                return Err(Error::Config(format!(
                    "node '{}' must expect at least one channel",
                    node.node_id
                )));
            }
            for (key, label) in &node.channel_map {
                label.parse::<ChannelLabel>().map_err(|e| {
                    Error::Config(format!("node '{}' channel_map[{}]: {}", node.node_id, key, e))
                })?;
            }
        }

        let c = &self.correlation;
        if c.window_us == 0 || c.timeout_ms == 0 || c.sweep_interval_ms == 0 {
            return Err(Error::Config(
                "correlation window_us, timeout_ms and sweep_interval_ms must be > 0".into(),
            ));
        }
        if c.window_us > c.timeout_ms.saturating_mul(1000) {
            return Err(Error::Config(format!(
                "correlation window_us ({}) must not exceed timeout_ms ({} ms)",
                c.window_us, c.timeout_ms
            )));
        }

        if self.ingest.max_datagram_bytes == 0 || self.ingest.queue_capacity == 0 {
            return Err(Error::Config(
                "ingest max_datagram_bytes and queue_capacity must be > 0".into(),
            ));
        }

        let l = &self.localization;
        if !(l.wave_speed.is_finite() && l.wave_speed > 0.0) {
            return Err(Error::Config(format!("wave_speed must be > 0, got {}", l.wave_speed)));
        }
        if !(l.residual_scale_us.is_finite() && l.residual_scale_us > 0.0) {
            return Err(Error::Config("residual_scale_us must be > 0".into()));
        }
        if !(l.max_radius.is_finite() && l.max_radius > 0.0) {
            return Err(Error::Config("max_radius must be > 0".into()));
        }

        l.radius_curve.build()?;
        SensorGeometry::from_config(&self.geometry)?;
        RingTable::new(self.scoring.ring_radii.clone())?;

        if !(self.scoring.units_to_cm.is_finite() && self.scoring.units_to_cm > 0.0) {
            return Err(Error::Config("units_to_cm must be > 0".into()));
        }
        if self.session.arrows_per_end == 0 || self.session.num_ends == 0 {
            return Err(Error::Config("arrows_per_end and num_ends must be > 0".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.http.port, 5006);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].bind.port(), 5005);
        assert_eq!(config.nodes[0].channel_map["2"], "W");
        assert_eq!(config.correlation.window_us, 3000);
        assert_eq!(config.correlation.timeout_ms, 50);
        assert_eq!(config.scoring.refractory_ms, 500);
        assert_eq!(config.scoring.ring_radii.len(), 11);
        assert_eq!(config.session.arrows_per_end, 3);
        assert_eq!(config.session.num_ends, 10);
        assert!(!config.is_multi_node());
    }

    #[test]
    fn test_two_node_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[nodes]]
            node_id = "A"
            bind = "127.0.0.1:6000"
            channels = ["N", "E", "S", "W"]

            [[nodes]]
            node_id = "B"
            bind = "127.0.0.1:6000"
            channel_map = { "0" = "NE", "1" = "NW", "2" = "SE", "3" = "SW" }
            channels = ["NE", "NW", "SE", "SW"]

            [localization]
            wave_speed = 450.0
            radius_curve = { kind = "power", max_radius = 0.4, exponent = 1.5 }
            "#,
        )
        .unwrap();

        assert!(config.is_multi_node());
        assert_eq!(config.nodes[1].channels[0], ChannelLabel::NE);
        assert_eq!(
            config.localization.radius_curve,
            RadiusCurveConfig::Power {
                max_radius: 0.4,
                exponent: 1.5
            }
        );
        let groups = config.nodes_by_bind();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_rejects_duplicate_node_ids() {
        let err = EngineConfig::from_toml_str(
            "[[nodes]]\nnode_id = \"A\"\n[[nodes]]\nnode_id = \"A\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_bad_channel_map_label() {
        let result = EngineConfig::from_toml_str(
            "[[nodes]]\nnode_id = \"A\"\nchannel_map = { \"0\" = \"UP\" }\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_increasing_rings() {
        let result = EngineConfig::from_toml_str(
            "[scoring]\nring_radii = [1.0, 2.0, 3.0, 4.0, 5.0, 5.0, 7.0, 8.0, 9.0, 10.0, 11.0]\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_wave_speed_and_window() {
        assert!(EngineConfig::from_toml_str("[localization]\nwave_speed = 0.0\n").is_err());
        assert!(EngineConfig::from_toml_str("[correlation]\nwindow_us = 0\n").is_err());
    }

    #[test]
    fn test_rejects_window_longer_than_timeout() {
        let doc = |window_us: u64| format!("[correlation]\nwindow_us = {}\ntimeout_ms = 5\n", window_us);
        let err = EngineConfig::from_toml_str(&doc(5001)).unwrap_err();
        assert!(err.to_string().contains("must not exceed timeout_ms"));
        assert!(EngineConfig::from_toml_str(&doc(5000)).is_ok());
    }
}
