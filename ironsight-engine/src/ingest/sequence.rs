//! Per-node replay protection

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::packet::PacketError;

#[derive(Debug, Clone, Copy)]
struct NodeHistory {
    last_sequence: u64,
    last_seen: Instant,
}

/// Tracks the last accepted sequence number of each node
///
/// A bundle is accepted only if its sequence is strictly greater than the
/// last accepted one. A node silent for longer than `idle_reset` has its
/// history forgotten, so a rebooted node restarting at 0 is re-admitted.
#[derive(Debug)]
pub struct SequenceTracker {
    nodes: HashMap<String, NodeHistory>,
    idle_reset: Duration,
}

impl SequenceTracker {
    pub fn new(idle_reset: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            idle_reset,
        }
    }

    /// Accept or reject `sequence` from `node_id` observed at `now`
    pub fn check(&mut self, node_id: &str, sequence: u64, now: Instant) -> Result<(), PacketError> {
        if let Some(history) = self.nodes.get(node_id) {
            let idle = now.saturating_duration_since(history.last_seen);
            if idle < self.idle_reset && sequence <= history.last_sequence {
                return Err(PacketError::Replay {
                    node: node_id.to_string(),
                    seq: sequence,
                    last: history.last_sequence,
                });
            }
        }
        self.nodes.insert(
            node_id.to_string(),
            NodeHistory {
                last_sequence: sequence,
                last_seen: now,
            },
        );
        Ok(())
    }

    pub fn last_sequence(&self, node_id: &str) -> Option<u64> {
        self.nodes.get(node_id).map(|h| h.last_sequence)
    }
}
