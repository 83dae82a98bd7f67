//! Datagram parsing and validation
//!
//! Nodes send one JSON document per datagram:
//!
//! ```json
//! {"type":"hit_bundle","node":"PICO_A01","seq":17,"t_ms":123456,
//!  "ch":{"0":{"peak":41.5,"energy":812.0,"energy2":95.2}, ...},
//!  "peak_tdoa_us":{"0":0,"1":212,"2":-1,"3":388}}
//! ```
//!
//! Channel keys are either labels (`"N"`) or raw firmware indices resolved
//! through the node's configured channel map. Per-channel arrival offsets
//! may be inline (`"tdoa_us"` inside the channel) or in a top-level map
//! (`peak_tdoa_us` preferred over the legacy interrupt-based `tdoa_us`).
//! A negative offset means the node had no valid timing for that channel.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::time::Instant;

use super::bundle::{ChannelLabel, ChannelSet, HitBundle, SensorChannelSample};
use crate::config::{IngestConfig, NodeConfig};

/// Reasons a datagram is dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacketError {
    #[error("datagram of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("empty datagram")]
    Empty,

    #[error("malformed bundle: {0}")]
    Malformed(String),

    #[error("ignored message type '{0}'")]
    NotHitBundle(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{node}' sent unknown channel '{key}'")]
    UnknownChannel { node: String, key: String },

    #[error("node '{node}' replayed sequence {seq} (last accepted {last})")]
    Replay { node: String, seq: u64, last: u64 },

    #[error("out-of-range value: {0}")]
    OutOfRange(String),
}

/// Diagnostic bucket a rejected datagram is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownNode,
    Replay,
    OutOfRange,
}

impl PacketError {
    pub fn reason(&self) -> DropReason {
        match self {
            PacketError::UnknownNode(_) => DropReason::UnknownNode,
            PacketError::Replay { .. } => DropReason::Replay,
            PacketError::OutOfRange(_) => DropReason::OutOfRange,
            PacketError::TooLarge { .. }
            | PacketError::Empty
            | PacketError::Malformed(_)
            | PacketError::NotHitBundle(_)
            | PacketError::UnknownChannel { .. } => DropReason::Malformed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireBundle {
    #[serde(rename = "type")]
    kind: String,
    node: String,
    seq: u64,
    #[serde(default)]
    t_us: Option<u64>,
    #[serde(default)]
    t_ms: Option<u64>,
    ch: BTreeMap<String, WireChannel>,
    #[serde(default)]
    peak_tdoa_us: BTreeMap<String, f64>,
    #[serde(default)]
    tdoa_us: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    peak: f64,
    energy: f64,
    #[serde(default)]
    energy2: f64,
    #[serde(default)]
    tdoa_us: Option<f64>,
}

/// Numeric bounds a channel value must satisfy
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_datagram_bytes: usize,
    pub max_abs_peak: f64,
    pub max_energy: f64,
    pub max_tdoa_us: f64,
}

impl From<&IngestConfig> for IngestLimits {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_datagram_bytes: config.max_datagram_bytes,
            max_abs_peak: config.max_abs_peak,
            max_energy: config.max_energy,
            max_tdoa_us: config.max_tdoa_us,
        }
    }
}

/// Parses datagrams for a fixed set of known nodes
#[derive(Debug, Clone)]
pub struct PacketParser {
    channel_maps: HashMap<String, HashMap<String, ChannelLabel>>,
    limits: IngestLimits,
}

impl PacketParser {
    /// Build a parser accepting the given nodes
    ///
    /// Channel map entries naming an unknown label are skipped; config
    /// validation rejects them before a parser is ever built.
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a NodeConfig>, limits: IngestLimits) -> Self {
        let channel_maps = nodes
            .into_iter()
            .map(|node| {
                let map = node
                    .channel_map
                    .iter()
                    .filter_map(|(key, label)| label.parse().ok().map(|l| (key.clone(), l)))
                    .collect();
                (node.node_id.clone(), map)
            })
            .collect();
        Self {
            channel_maps,
            limits,
        }
    }

    /// Parse and validate one datagram into a HitBundle
    ///
    /// Sequence replay is not checked here; see [`super::SequenceTracker`].
    pub fn parse(
        &self,
        datagram: &[u8],
        received_at: Instant,
        received_wall: DateTime<Utc>,
    ) -> Result<HitBundle, PacketError> {
        if datagram.is_empty() {
            return Err(PacketError::Empty);
        }
        if datagram.len() > self.limits.max_datagram_bytes {
            return Err(PacketError::TooLarge {
                len: datagram.len(),
                max: self.limits.max_datagram_bytes,
            });
        }

        let wire: WireBundle =
            serde_json::from_slice(datagram).map_err(|e| PacketError::Malformed(e.to_string()))?;

        if wire.kind != "hit_bundle" {
            return Err(PacketError::NotHitBundle(wire.kind));
        }

        let channel_map = self
            .channel_maps
            .get(&wire.node)
            .ok_or_else(|| PacketError::UnknownNode(wire.node.clone()))?;

        let node_timestamp_us = match (wire.t_us, wire.t_ms) {
            (Some(us), _) => us,
            (None, Some(ms)) => ms.saturating_mul(1000),
            (None, None) => return Err(PacketError::Malformed("missing t_us/t_ms".to_string())),
        };

        if wire.ch.is_empty() {
            return Err(PacketError::Malformed("bundle has no channels".to_string()));
        }

        let mut channels = ChannelSet::new();
        for (key, raw) in &wire.ch {
            let label = channel_map
                .get(key)
                .copied()
                .or_else(|| key.parse().ok())
                .ok_or_else(|| PacketError::UnknownChannel {
                    node: wire.node.clone(),
                    key: key.clone(),
                })?;

            let tdoa = raw
                .tdoa_us
                .or_else(|| wire.peak_tdoa_us.get(key).copied())
                .or_else(|| wire.tdoa_us.get(key).copied());

            let sample = self.validate_channel(label, raw, tdoa)?;
            if channels.insert(label, sample).is_some() {
                return Err(PacketError::Malformed(format!(
                    "channel {} reported twice",
                    label
                )));
            }
        }

        Ok(HitBundle {
            node_id: wire.node,
            sequence: wire.seq,
            node_timestamp_us,
            received_at,
            received_wall,
            channels,
        })
    }

    fn validate_channel(
        &self,
        label: ChannelLabel,
        raw: &WireChannel,
        tdoa: Option<f64>,
    ) -> Result<SensorChannelSample, PacketError> {
        let finite = raw.peak.is_finite() && raw.energy.is_finite() && raw.energy2.is_finite();
        if !finite {
            return Err(PacketError::OutOfRange(format!("{} has non-finite values", label)));
        }
        if raw.peak.abs() > self.limits.max_abs_peak {
            return Err(PacketError::OutOfRange(format!(
                "{} peak {} exceeds {}",
                label, raw.peak, self.limits.max_abs_peak
            )));
        }
        for (name, value) in [("energy", raw.energy), ("energy2", raw.energy2)] {
            if value < 0.0 || value > self.limits.max_energy {
                return Err(PacketError::OutOfRange(format!(
                    "{} {} {} outside [0, {}]",
                    label, name, value, self.limits.max_energy
                )));
            }
        }

        let tdoa_us = match tdoa {
            None => None,
            Some(t) if !t.is_finite() => {
                return Err(PacketError::OutOfRange(format!("{} tdoa is non-finite", label)))
            }
            // -1 is the firmware's "no valid timing" marker
            Some(t) if t < 0.0 => None,
            Some(t) if t > self.limits.max_tdoa_us => {
                return Err(PacketError::OutOfRange(format!(
                    "{} tdoa {}us exceeds {}us",
                    label, t, self.limits.max_tdoa_us
                )))
            }
            Some(t) => Some(t),
        };

        Ok(SensorChannelSample {
            peak: raw.peak,
            energy: raw.energy,
            energy2: raw.energy2,
            tdoa_us,
        })
    }
}
