//! Event types for the Ironsight event system
//!
//! Provides the typed event enum pushed to external subscribers (dashboard,
//! logger) and the EventBus that fans events out to them.

mod calibration_types;
mod record_types;
mod scoring_types;

pub use calibration_types::{CalibrationModel, CalibrationStatus, PendingSample};
pub use record_types::{ChannelRecord, EstimateDiagnostics, GroundTruth, ShotRecord};
pub use scoring_types::{
    EndRow, EndStats, Mode, RingScore, ScoreCount, Scorecard, SessionStats, SessionSummary, Shot,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Ironsight event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// The transport layer subscribes and serializes outward; the core never
/// waits on a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IronsightEvent {
    /// A shot was scored in shooting mode
    ///
    /// `scorecard` is the active session's snapshot after the shot was
    /// appended, or `None` when the shot was not attributed to a session.
    ShotScored {
        record: Box<ShotRecord>,
        scorecard: Option<Scorecard>,
        timestamp: DateTime<Utc>,
    },

    /// An impact arrived in calibration mode and awaits a ground-truth click
    CalibrationPending {
        raw_x: f64,
        raw_y: f64,
        /// Confirmed samples collected so far
        sample_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A new calibration model became active
    CalibrationApplied {
        version: u64,
        mean_error_cm: f64,
        max_error_cm: f64,
        n: usize,
        timestamp: DateTime<Utc>,
    },

    /// A fit was attempted and rejected; the previous model stays active
    CalibrationRejected {
        reason: String,
        sample_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Operating mode changed
    ModeChanged {
        old_mode: Mode,
        new_mode: Mode,
        timestamp: DateTime<Utc>,
    },

    /// A session was started
    SessionStarted {
        session: SessionSummary,
        timestamp: DateTime<Utc>,
    },

    /// A session was ended by the operator
    SessionEnded {
        session: SessionSummary,
        timestamp: DateTime<Utc>,
    },

    /// Ground truth was attached to an already-scored shot
    ShotAnnotated {
        record: Box<ShotRecord>,
        timestamp: DateTime<Utc>,
    },

    /// Full state snapshot, sent to a subscriber when it connects
    State {
        mode: Mode,
        scorecard: Option<Scorecard>,
        calibration: CalibrationStatus,
        timestamp: DateTime<Utc>,
    },
}

impl IronsightEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            IronsightEvent::ShotScored { .. } => "ShotScored",
            IronsightEvent::CalibrationPending { .. } => "CalibrationPending",
            IronsightEvent::CalibrationApplied { .. } => "CalibrationApplied",
            IronsightEvent::CalibrationRejected { .. } => "CalibrationRejected",
            IronsightEvent::ModeChanged { .. } => "ModeChanged",
            IronsightEvent::SessionStarted { .. } => "SessionStarted",
            IronsightEvent::SessionEnded { .. } => "SessionEnded",
            IronsightEvent::ShotAnnotated { .. } => "ShotAnnotated",
            IronsightEvent::State { .. } => "State",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the scoring pipeline)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Drop-oldest on overflow: a lagging subscriber loses its oldest
///   buffered events and sees `RecvError::Lagged`; other subscribers are
///   unaffected
///
/// # Examples
///
/// ```
/// use ironsight_common::events::{EventBus, IronsightEvent, Mode};
///
/// let event_bus = EventBus::new(64);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(IronsightEvent::ModeChanged {
///     old_mode: Mode::Shooting,
///     new_mode: Mode::Scoring,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IronsightEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IronsightEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IronsightEvent,
    ) -> Result<usize, broadcast::error::SendError<IronsightEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IronsightEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
