//! Bundle correlator
//!
//! Single-writer state machine merging same-impact bundles into one
//! [`FusedEvent`]. Windows are keyed by backend receipt time rather than
//! the nodes' own clocks, which drift independently.
//!
//! A window is single-use: once it closes (complete or timed out) it is
//! removed and can accept nothing further.

use chrono::{DateTime, Utc};
use ironsight_common::time;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use super::event::{FusedChannel, FusedEvent};
use crate::config::{CorrelationConfig, NodeConfig};
use crate::ingest::{ChannelLabel, ChannelSet, HitBundle};

/// Whether bundles need correlating at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Every bundle is its own impact
    SingleNode,
    /// Each impact is reported by every configured node
    MultiNode,
}

#[derive(Debug, Clone)]
struct ExpectedNode {
    node_id: String,
    channels: Vec<ChannelLabel>,
}

#[derive(Debug)]
struct OpenWindow {
    opened_at: Instant,
    /// At most one bundle per node
    bundles: Vec<HitBundle>,
}

impl OpenWindow {
    fn bundle_from(&self, node_id: &str) -> Option<usize> {
        self.bundles.iter().position(|b| b.node_id == node_id)
    }
}

/// Merges bundles from multiple nodes into fused events
#[derive(Debug)]
pub struct Correlator {
    mode: CorrelationMode,
    expected: Vec<ExpectedNode>,
    expected_channels: usize,
    window: Duration,
    timeout: Duration,
    windows: Vec<OpenWindow>,
    epoch: u64,
}

impl Correlator {
    pub fn new(nodes: &[NodeConfig], config: &CorrelationConfig) -> Self {
        let expected: Vec<ExpectedNode> = nodes
            .iter()
            .map(|n| ExpectedNode {
                node_id: n.node_id.clone(),
                channels: n.channels.clone(),
            })
            .collect();

        // Counted per node so overlapping labels still weigh a missing node
        let expected_channels = expected.iter().map(|n| n.channels.len()).sum();

        Self {
            mode: if expected.len() > 1 {
                CorrelationMode::MultiNode
            } else {
                CorrelationMode::SingleNode
            },
            expected,
            expected_channels,
            window: time::micros_to_duration(config.window_us),
            timeout: time::millis_to_duration(config.timeout_ms),
            windows: Vec::new(),
            epoch: 0,
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    /// Feed one bundle; returns an event if it completed a window
    pub fn ingest(&mut self, bundle: HitBundle) -> Option<FusedEvent> {
        if self.mode == CorrelationMode::SingleNode {
            return Some(self.fuse(vec![bundle], true));
        }

        let at = bundle.received_at;
        let span = self.window;
        let in_range = |w: &OpenWindow| abs_diff(at, w.opened_at) <= span;

        // Prefer a window still waiting on this node
        let idx = match self
            .windows
            .iter()
            .position(|w| in_range(w) && w.bundle_from(&bundle.node_id).is_none())
        {
            Some(idx) => {
                self.windows[idx].bundles.push(bundle);
                idx
            }
            None => match self.windows.iter().position(|w| in_range(w)) {
                // Same node twice in one window: later sequence replaces
                Some(idx) => {
                    let window = &mut self.windows[idx];
                    if let Some(pos) = window.bundle_from(&bundle.node_id) {
                        if bundle.sequence > window.bundles[pos].sequence {
                            trace!(
                                "Node {} seq {} replaces seq {} in open window",
                                bundle.node_id,
                                bundle.sequence,
                                window.bundles[pos].sequence
                            );
                            window.bundles[pos] = bundle;
                        }
                    }
                    idx
                }
                None => {
                    self.windows.push(OpenWindow {
                        opened_at: at,
                        bundles: vec![bundle],
                    });
                    self.windows.len() - 1
                }
            },
        };

        if self.is_complete(&self.windows[idx]) {
            let window = self.windows.remove(idx);
            trace!(
                "Correlation window complete after {}us",
                time::duration_to_micros(at.saturating_duration_since(window.opened_at))
            );
            return Some(self.fuse(window.bundles, true));
        }
        None
    }

    /// Close every window older than the timeout as a degraded event
    pub fn sweep(&mut self, now: Instant) -> Vec<FusedEvent> {
        let timeout = self.timeout;
        let (expired, open): (Vec<OpenWindow>, Vec<OpenWindow>) = std::mem::take(&mut self.windows)
            .into_iter()
            .partition(|w| now.saturating_duration_since(w.opened_at) >= timeout);
        self.windows = open;

        expired
            .into_iter()
            .map(|w| {
                debug!(
                    "Correlation window timed out with {}/{} nodes",
                    w.bundles.len(),
                    self.expected.len()
                );
                self.fuse(w.bundles, false)
            })
            .collect()
    }

    /// Discard open windows and start a new context
    ///
    /// Returns the number of windows discarded.
    pub fn reset(&mut self, epoch: u64) -> usize {
        let discarded = self.windows.len();
        self.windows.clear();
        self.epoch = epoch;
        discarded
    }

    /// Close everything still open, regardless of age
    pub fn drain(&mut self) -> Vec<FusedEvent> {
        std::mem::take(&mut self.windows)
            .into_iter()
            .map(|w| self.fuse(w.bundles, false))
            .collect()
    }

    fn is_complete(&self, window: &OpenWindow) -> bool {
        self.expected
            .iter()
            .all(|n| window.bundle_from(&n.node_id).is_some())
    }

    fn group_of(&self, node_id: &str) -> usize {
        self.expected
            .iter()
            .position(|n| n.node_id == node_id)
            .unwrap_or(self.expected.len())
    }

    fn fuse(&self, mut bundles: Vec<HitBundle>, complete: bool) -> FusedEvent {
        // Configuration order decides which node wins a duplicated label
        bundles.sort_by_key(|b| self.group_of(&b.node_id));

        let mut channels = ChannelSet::new();
        for bundle in &bundles {
            let group = self.group_of(&bundle.node_id);
            for (label, sample) in bundle.channels.iter() {
                if !channels.contains(label) {
                    channels.insert(
                        label,
                        FusedChannel {
                            node_id: bundle.node_id.clone(),
                            group,
                            sample: *sample,
                        },
                    );
                }
            }
        }

        let (detected_at, detected_wall) = earliest_receipt(&bundles);
        let fusion_confidence = if complete || self.mode == CorrelationMode::SingleNode {
            1.0
        } else {
            self.partial_confidence(&bundles)
        };

        FusedEvent {
            id: Uuid::new_v4(),
            channels,
            node_ids: bundles.iter().map(|b| b.node_id.clone()).collect(),
            fusion_confidence,
            complete: complete || self.mode == CorrelationMode::SingleNode,
            detected_at,
            detected_wall,
            epoch: self.epoch,
        }
    }

    /// Fraction of expected (node, channel) pairs actually delivered
    fn partial_confidence(&self, bundles: &[HitBundle]) -> f64 {
        if self.expected_channels == 0 {
            return 0.0;
        }
        let present: usize = self
            .expected
            .iter()
            .filter_map(|node| {
                bundles
                    .iter()
                    .find(|b| b.node_id == node.node_id)
                    .map(|bundle| {
                        node.channels
                            .iter()
                            .filter(|label| bundle.channels.contains(**label))
                            .count()
                    })
            })
            .sum();
        (present as f64 / self.expected_channels as f64).clamp(0.0, 1.0)
    }
}

fn abs_diff(a: Instant, b: Instant) -> Duration {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

fn earliest_receipt(bundles: &[HitBundle]) -> (Instant, DateTime<Utc>) {
    bundles
        .iter()
        .min_by_key(|b| b.received_at)
        .map(|b| (b.received_at, b.received_wall))
        .unwrap_or_else(|| (Instant::now(), time::now()))
}
