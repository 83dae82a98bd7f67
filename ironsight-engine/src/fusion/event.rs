//! Fused impact event

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::ingest::{ChannelSet, SensorChannelSample};

/// One channel of a fused event, tagged with the node that reported it
///
/// `group` identifies the node's timing reference: arrival offsets are only
/// comparable between channels of the same group, since each node measures
/// them against its own earliest channel on its own clock.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedChannel {
    pub node_id: String,
    pub group: usize,
    pub sample: SensorChannelSample,
}

/// The logical impact: channels from every bundle judged to be one strike
///
/// Consumed exactly once by the scoring processor (moved, never cloned on
/// the pipeline path).
#[derive(Debug, Clone)]
pub struct FusedEvent {
    pub id: Uuid,
    pub channels: ChannelSet<FusedChannel>,
    /// Contributing nodes in configuration order
    pub node_ids: Vec<String>,
    /// 1.0 when every expected node contributed; otherwise the fraction of
    /// expected channels present
    pub fusion_confidence: f64,
    /// All expected nodes arrived before the window closed
    pub complete: bool,
    /// Earliest backend receipt among contributing bundles
    pub detected_at: Instant,
    pub detected_wall: DateTime<Utc>,
    /// Correlator context the event was produced in
    pub epoch: u64,
}

impl FusedEvent {
    /// Number of distinct timing groups with at least one channel
    pub fn group_count(&self) -> usize {
        let mut groups: Vec<usize> = self.channels.iter().map(|(_, c)| c.group).collect();
        groups.sort_unstable();
        groups.dedup();
        groups.len()
    }
}
