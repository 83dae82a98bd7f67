//! Shared engine state
//!
//! Thread-safe state shared between the listener tasks, the correlator,
//! the scoring processor and the HTTP handlers. Session and mode state are
//! deliberately absent: they are owned by the scoring processor and only
//! reachable through its command channel.

use ironsight_common::events::{EventBus, IronsightEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::calibration::ActiveModel;
use crate::ingest::DropReason;

/// Ingest and fusion counters since startup
///
/// Lock-free; every field is a monotonically increasing count.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub bundles_accepted: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_unknown_node: AtomicU64,
    pub dropped_replay: AtomicU64,
    pub dropped_out_of_range: AtomicU64,
    /// Fused events with every expected node present
    pub fused_complete: AtomicU64,
    /// Fused events closed by timeout with nodes missing
    pub fused_partial: AtomicU64,
    /// Events suppressed by the refractory window
    pub echoes_suppressed: AtomicU64,
    /// Events discarded because they predate a mode/session/calibration switch
    pub stale_events: AtomicU64,
    /// Events ignored in scoring mode
    pub ignored_while_scoring: AtomicU64,
    pub shots_scored: AtomicU64,
    pub calibration_samples: AtomicU64,
}

/// Serializable copy of [`PipelineCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub bundles_accepted: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_node: u64,
    pub dropped_replay: u64,
    pub dropped_out_of_range: u64,
    pub fused_complete: u64,
    pub fused_partial: u64,
    pub echoes_suppressed: u64,
    pub stale_events: u64,
    pub ignored_while_scoring: u64,
    pub shots_scored: u64,
    pub calibration_samples: u64,
}

impl PipelineCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected datagram under its drop reason
    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::UnknownNode => &self.dropped_unknown_node,
            DropReason::Replay => &self.dropped_replay,
            DropReason::OutOfRange => &self.dropped_out_of_range,
        };
        Self::incr(counter);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            bundles_accepted: load(&self.bundles_accepted),
            dropped_malformed: load(&self.dropped_malformed),
            dropped_unknown_node: load(&self.dropped_unknown_node),
            dropped_replay: load(&self.dropped_replay),
            dropped_out_of_range: load(&self.dropped_out_of_range),
            fused_complete: load(&self.fused_complete),
            fused_partial: load(&self.fused_partial),
            echoes_suppressed: load(&self.echoes_suppressed),
            stale_events: load(&self.stale_events),
            ignored_while_scoring: load(&self.ignored_while_scoring),
            shots_scored: load(&self.shots_scored),
            calibration_samples: load(&self.calibration_samples),
        }
    }
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Fan-out to dashboard/logger subscribers
    pub event_bus: EventBus,

    /// The calibration model applied to every shot
    pub active_model: ActiveModel,

    pub counters: PipelineCounters,
}

impl SharedState {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            event_bus: EventBus::new(event_capacity),
            active_model: ActiveModel::new(),
            counters: PipelineCounters::default(),
        }
    }

    /// Broadcast an event, ignoring the absence of subscribers
    pub fn broadcast_event(&self, event: IronsightEvent) {
        self.event_bus.emit_lossy(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<IronsightEvent> {
        self.event_bus.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(256)
    }
}
