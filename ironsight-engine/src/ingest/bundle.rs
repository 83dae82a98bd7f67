//! Per-node hit bundle and the fixed set of channel labels

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// Mounting position of a sensor on the target perimeter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelLabel {
    N,
    E,
    S,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl ChannelLabel {
    /// Every label, in index order
    pub const ALL: [ChannelLabel; 8] = [
        ChannelLabel::N,
        ChannelLabel::E,
        ChannelLabel::S,
        ChannelLabel::W,
        ChannelLabel::NE,
        ChannelLabel::NW,
        ChannelLabel::SE,
        ChannelLabel::SW,
    ];

    pub const COUNT: usize = 8;

    pub fn index(self) -> usize {
        match self {
            ChannelLabel::N => 0,
            ChannelLabel::E => 1,
            ChannelLabel::S => 2,
            ChannelLabel::W => 3,
            ChannelLabel::NE => 4,
            ChannelLabel::NW => 5,
            ChannelLabel::SE => 6,
            ChannelLabel::SW => 7,
        }
    }

    /// Compass angle in degrees, counter-clockwise from +x (east)
    pub fn default_angle_deg(self) -> f64 {
        match self {
            ChannelLabel::E => 0.0,
            ChannelLabel::NE => 45.0,
            ChannelLabel::N => 90.0,
            ChannelLabel::NW => 135.0,
            ChannelLabel::W => 180.0,
            ChannelLabel::SW => 225.0,
            ChannelLabel::S => 270.0,
            ChannelLabel::SE => 315.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelLabel::N => "N",
            ChannelLabel::E => "E",
            ChannelLabel::S => "S",
            ChannelLabel::W => "W",
            ChannelLabel::NE => "NE",
            ChannelLabel::NW => "NW",
            ChannelLabel::SE => "SE",
            ChannelLabel::SW => "SW",
        }
    }
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ChannelLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == upper)
            .ok_or_else(|| format!("unknown channel label '{}'", s))
    }
}

/// Scalar features of one channel for one impact window
///
/// Immutable once produced by a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorChannelSample {
    /// Signed peak amplitude
    pub peak: f64,
    /// Sum of squared samples over the impact window
    pub energy: f64,
    /// Secondary (post-peak tail) energy window
    pub energy2: f64,
    /// Arrival offset relative to the node's reference channel, if the node
    /// measured a valid arrival for this channel
    pub tdoa_us: Option<f64>,
}

/// Fixed-shape map from channel label to a per-channel value
///
/// A label appears at most once by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet<T> {
    slots: [Option<T>; ChannelLabel::COUNT],
}

impl<T> ChannelSet<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, label: ChannelLabel) -> Option<&T> {
        self.slots[label.index()].as_ref()
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&mut self, label: ChannelLabel, value: T) -> Option<T> {
        self.slots[label.index()].replace(value)
    }

    pub fn contains(&self, label: ChannelLabel) -> bool {
        self.slots[label.index()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Present channels in label index order
    pub fn iter(&self) -> impl Iterator<Item = (ChannelLabel, &T)> {
        ChannelLabel::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(label, slot)| slot.as_ref().map(|v| (*label, v)))
    }

    pub fn labels(&self) -> Vec<ChannelLabel> {
        self.iter().map(|(label, _)| label).collect()
    }
}

impl<T> Default for ChannelSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(ChannelLabel, T)> for ChannelSet<T> {
    fn from_iter<I: IntoIterator<Item = (ChannelLabel, T)>>(iter: I) -> Self {
        let mut set = ChannelSet::new();
        for (label, value) in iter {
            set.insert(label, value);
        }
        set
    }
}

/// One node's report of an impact
///
/// Created by the node listener on packet receipt; read-only thereafter.
/// Both clocks are retained because node clocks drift relative to each
/// other and to the backend.
#[derive(Debug, Clone)]
pub struct HitBundle {
    pub node_id: String,
    /// Monotonic per node
    pub sequence: u64,
    /// Node-local high-resolution timestamp
    pub node_timestamp_us: u64,
    /// Backend monotonic receipt time
    pub received_at: Instant,
    /// Backend wall-clock receipt time
    pub received_wall: DateTime<Utc>,
    pub channels: ChannelSet<SensorChannelSample>,
}
