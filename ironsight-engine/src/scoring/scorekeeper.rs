//! Scoring and session state machine
//!
//! The single writer for mode, sessions, calibration collection and the
//! refractory clock. Every fused event and every operator command passes
//! through here in arrival order, which is what keeps shot numbering and
//! session totals consistent.
//!
//! Time is passed in rather than read, so the state machine can be driven
//! deterministically.

use chrono::Utc;
use ironsight_common::events::{
    CalibrationModel, CalibrationStatus, ChannelRecord, GroundTruth, IronsightEvent, Mode,
    PendingSample, RingScore, Scorecard, SessionStats, SessionSummary, Shot, ShotRecord,
};
use ironsight_common::time;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::rings::RingTable;
use super::session::{Session, SessionBook, SessionDetail};
use crate::calibration::{CalibrationCollector, CalibrationError, MIN_CALIBRATION_SAMPLES};
use crate::config::{EngineConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::fusion::FusedEvent;
use crate::localization::{LocalizationEstimate, LocalizationEstimator};
use crate::state::{PipelineCounters, SharedState};

/// What happened to one fused event
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Scored(Box<ShotRecord>),
    CalibrationPending(PendingSample),
    /// Produced before the latest mode/session/calibration switch
    Stale,
    IgnoredWhileScoring,
    CalibrationPaused,
    /// Inside the refractory window of the previous accepted event
    Echo,
    /// Neither estimator could place the impact
    Unlocalized,
}

/// Mode, scorecard and calibration state in one read
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub mode: Mode,
    pub session: Option<SessionSummary>,
    pub scorecard: Option<Scorecard>,
    pub calibration: CalibrationStatus,
}

impl StateSnapshot {
    pub fn into_event(self) -> IronsightEvent {
        IronsightEvent::State {
            mode: self.mode,
            scorecard: self.scorecard,
            calibration: self.calibration,
            timestamp: Utc::now(),
        }
    }
}

pub struct Scorekeeper {
    state: Arc<SharedState>,
    estimator: LocalizationEstimator,
    rings: RingTable,
    refractory: Duration,
    units_to_cm: f64,
    session_defaults: SessionConfig,

    mode: Mode,
    /// Bumped on every context switch; events from older epochs are stale
    epoch: u64,
    context_started: Instant,
    last_accepted: Option<Instant>,

    collector: CalibrationCollector,
    last_fit_error: Option<String>,
    sessions: SessionBook,
}

impl Scorekeeper {
    pub fn new(config: &EngineConfig, state: Arc<SharedState>, now: Instant) -> Result<Self> {
        let estimator = LocalizationEstimator::from_config(&config.geometry, &config.localization)?;
        let rings = RingTable::new(config.scoring.ring_radii.clone())?;
        Ok(Self::with_parts(estimator, rings, config, state, now))
    }

    pub fn with_parts(
        estimator: LocalizationEstimator,
        rings: RingTable,
        config: &EngineConfig,
        state: Arc<SharedState>,
        now: Instant,
    ) -> Self {
        Self {
            state,
            estimator,
            rings,
            refractory: time::millis_to_duration(config.scoring.refractory_ms),
            units_to_cm: config.scoring.units_to_cm,
            session_defaults: config.session.clone(),
            mode: Mode::default(),
            epoch: 0,
            context_started: now,
            last_accepted: None,
            collector: CalibrationCollector::new(config.scoring.units_to_cm),
            last_fit_error: None,
            sessions: SessionBook::new(config.session.history_limit),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // ========================================
    // Fused events
    // ========================================

    pub fn handle_event(&mut self, event: FusedEvent) -> Disposition {
        let counters = &self.state.counters;

        if event.epoch != self.epoch || event.detected_at < self.context_started {
            PipelineCounters::incr(&counters.stale_events);
            debug!(
                "Discarding event {} from epoch {} (current {})",
                event.id, event.epoch, self.epoch
            );
            return Disposition::Stale;
        }

        match self.mode {
            Mode::Scoring => {
                PipelineCounters::incr(&counters.ignored_while_scoring);
                trace!("Ignoring event {} in scoring mode", event.id);
                return Disposition::IgnoredWhileScoring;
            }
            Mode::Calibration if self.collector.is_paused() => {
                trace!("Ignoring event {} while calibration is paused", event.id);
                return Disposition::CalibrationPaused;
            }
            _ => {}
        }

        if let Some(last) = self.last_accepted {
            if event.detected_at.saturating_duration_since(last) < self.refractory {
                PipelineCounters::incr(&counters.echoes_suppressed);
                trace!("Suppressed echo {} inside refractory window", event.id);
                return Disposition::Echo;
            }
        }

        let Some(estimate) = self.estimator.estimate(&event) else {
            warn!(
                "Could not localize event {} ({} channels)",
                event.id,
                event.channels.len()
            );
            return Disposition::Unlocalized;
        };
        self.last_accepted = Some(event.detected_at);

        if self.mode == Mode::Calibration {
            self.offer_calibration_sample(&estimate)
        } else {
            self.score(&event, &estimate)
        }
    }

    fn offer_calibration_sample(&mut self, estimate: &LocalizationEstimate) -> Disposition {
        let Some(pending) = self.collector.offer(estimate.x, estimate.y) else {
            return Disposition::CalibrationPaused;
        };
        PipelineCounters::incr(&self.state.counters.calibration_samples);
        info!(
            "Calibration impact at ({:.4}, {:.4}); awaiting ground truth",
            pending.raw_x, pending.raw_y
        );
        self.state.broadcast_event(IronsightEvent::CalibrationPending {
            raw_x: pending.raw_x,
            raw_y: pending.raw_y,
            sample_count: self.collector.sample_count(),
            timestamp: Utc::now(),
        });
        Disposition::CalibrationPending(pending)
    }

    fn score(&mut self, event: &FusedEvent, estimate: &LocalizationEstimate) -> Disposition {
        let model = self.state.active_model.current();
        let (x, y) = model.apply(estimate.x, estimate.y);
        let r = x.hypot(y);
        let ring = self.rings.score(r);

        let attribution = self
            .sessions
            .active()
            .and_then(|s| s.next_numbering().map(|(end, shot)| (s.id(), end, shot)));

        let record = ShotRecord {
            shot: Shot {
                shot_id: Uuid::new_v4(),
                session_id: attribution.map(|(id, _, _)| id),
                end_number: attribution.map(|(_, end, _)| end),
                shot_number: attribution.map(|(_, _, shot)| shot),
                x,
                y,
                r,
                raw_x: estimate.x,
                raw_y: estimate.y,
                score: ring.score,
                is_x: ring.is_x,
                calibration_version: model.version,
                detected_at: event.detected_wall,
                scored_at: Utc::now(),
            },
            channels: channel_records(event),
            node_ids: event.node_ids.clone(),
            fusion_confidence: event.fusion_confidence,
            diagnostics: estimate.diagnostics(),
            ground_truth: None,
        };

        let scorecard = match (attribution, self.sessions.active_mut()) {
            (Some(_), Some(session)) => match session.append(record.clone()) {
                Ok(()) => Some(session.scorecard()),
                Err(e) => {
                    warn!("Shot {} not added to session: {}", record.shot.shot_id, e);
                    None
                }
            },
            (None, Some(session)) => {
                warn!(
                    "Session {} is complete; shot {} not attributed",
                    session.id(),
                    record.shot.shot_id
                );
                None
            }
            (_, None) => {
                warn!("No active session; shot {} not attributed", record.shot.shot_id);
                None
            }
        };

        PipelineCounters::incr(&self.state.counters.shots_scored);
        info!(
            "Shot {} scored {} at ({:.4}, {:.4}) r={:.4} [model v{}]",
            record.shot.shot_id,
            ring.label(),
            x,
            y,
            r,
            model.version
        );

        self.state.broadcast_event(IronsightEvent::ShotScored {
            record: Box::new(record.clone()),
            scorecard,
            timestamp: Utc::now(),
        });
        Disposition::Scored(Box::new(record))
    }

    /// Start a new context: events detected before `now` are stale and the
    /// unconfirmed calibration impact belongs to the old context
    fn switch_context(&mut self, now: Instant) {
        self.epoch += 1;
        self.context_started = now;
        if self.collector.discard_pending().is_some() {
            debug!("Discarded unconfirmed calibration impact");
        }
    }

    fn change_mode(&mut self, mode: Mode) -> Mode {
        let old_mode = self.mode;
        if old_mode != mode {
            self.mode = mode;
            info!("Mode changed: {} -> {}", old_mode, mode);
            self.state.broadcast_event(IronsightEvent::ModeChanged {
                old_mode,
                new_mode: mode,
                timestamp: Utc::now(),
            });
        }
        old_mode
    }

    // ========================================
    // Mode
    // ========================================

    /// Returns the previous mode; setting the current mode is a no-op
    pub fn set_mode(&mut self, mode: Mode, now: Instant) -> Mode {
        if mode == self.mode {
            return mode;
        }
        let old = self.change_mode(mode);
        self.switch_context(now);
        old
    }

    // ========================================
    // Sessions
    // ========================================

    pub fn start_session(
        &mut self,
        arrows_per_end: Option<u32>,
        num_ends: Option<u32>,
        notes: Option<String>,
        now: Instant,
    ) -> Result<SessionSummary> {
        let session = Session::new(
            arrows_per_end.unwrap_or(self.session_defaults.arrows_per_end),
            num_ends.unwrap_or(self.session_defaults.num_ends),
            notes,
        )?;
        let summary = session.summary();

        if let Some(retired) = self.sessions.start(session) {
            info!("Session {} ended by a new start", retired.session_id);
            self.state.broadcast_event(IronsightEvent::SessionEnded {
                session: retired,
                timestamp: Utc::now(),
            });
        }
        self.switch_context(now);

        info!(
            "Started session {}: {} arrows/end x {} ends",
            summary.session_id, summary.arrows_per_end, summary.num_ends
        );
        self.state.broadcast_event(IronsightEvent::SessionStarted {
            session: summary.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    pub fn end_session(&mut self, now: Instant) -> Result<SessionSummary> {
        let summary = self
            .sessions
            .end()
            .ok_or_else(|| Error::InvalidState("no active session".to_string()))?;
        self.switch_context(now);

        info!(
            "Ended session {}: {} points, {}/{} arrows",
            summary.session_id, summary.total_score, summary.current_arrows, summary.target_arrows
        );
        self.state.broadcast_event(IronsightEvent::SessionEnded {
            session: summary.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    pub fn current_session(&self) -> Option<SessionSummary> {
        self.sessions.active().map(Session::summary)
    }

    pub fn list_sessions(
        &self,
        limit: usize,
        offset: usize,
        complete_only: bool,
    ) -> Vec<SessionSummary> {
        self.sessions.list(limit, offset, complete_only)
    }

    pub fn session_detail(&self, id: Uuid) -> Result<SessionDetail> {
        self.sessions
            .get(id)
            .map(Session::detail)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    pub fn session_stats(&self, id: Uuid) -> Result<SessionStats> {
        self.sessions
            .get(id)
            .map(Session::stats)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    pub fn delete_session(&mut self, id: Uuid) -> Result<SessionSummary> {
        let summary = self.sessions.delete(id)?;
        info!("Deleted session {}", id);
        Ok(summary)
    }

    /// Shot records of the active session
    pub fn shots(&self) -> Vec<ShotRecord> {
        self.sessions
            .active()
            .map(|s| s.shots().to_vec())
            .unwrap_or_default()
    }

    pub fn scorecard(&self) -> Option<Scorecard> {
        self.sessions.active().map(Session::scorecard)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: self.mode,
            session: self.current_session(),
            scorecard: self.scorecard(),
            calibration: self.calibration_status(),
        }
    }

    /// Record a measured position against an already-scored shot
    pub fn annotate_shot(&mut self, shot_id: Uuid, gt_x: f64, gt_y: f64) -> Result<ShotRecord> {
        if !(gt_x.is_finite() && gt_y.is_finite()) {
            return Err(Error::BadRequest("ground truth must be finite".to_string()));
        }
        let rings = &self.rings;
        let units_to_cm = self.units_to_cm;
        let record = self
            .sessions
            .annotate(shot_id, |shot| {
                let r = gt_x.hypot(gt_y);
                let ring = rings.score(r);
                GroundTruth {
                    x: gt_x,
                    y: gt_y,
                    r,
                    score: ring.score,
                    is_x: ring.is_x,
                    error_cm: (shot.x - gt_x).hypot(shot.y - gt_y) * units_to_cm,
                }
            })
            .ok_or_else(|| Error::NotFound(format!("shot {}", shot_id)))?;

        if let Some(truth) = &record.ground_truth {
            info!(
                "Shot {} annotated: error {:.2} cm (scored {}, measured {})",
                shot_id,
                truth.error_cm,
                record.shot.ring().label(),
                RingScore {
                    score: truth.score,
                    is_x: truth.is_x
                }
                .label()
            );
        }
        self.state.broadcast_event(IronsightEvent::ShotAnnotated {
            record: Box::new(record.clone()),
            timestamp: Utc::now(),
        });
        Ok(record)
    }

    // ========================================
    // Rings
    // ========================================

    pub fn ring_radii(&self) -> Vec<f64> {
        self.rings.radii().to_vec()
    }

    pub fn set_ring_radii(&mut self, radii: Vec<f64>) -> Result<Vec<f64>> {
        let table = RingTable::new(radii).map_err(|e| Error::BadRequest(e.to_string()))?;
        info!("Ring radii updated: {:?}", table.radii());
        self.rings = table;
        Ok(self.ring_radii())
    }

    // ========================================
    // Calibration
    // ========================================

    pub fn calibration_status(&self) -> CalibrationStatus {
        CalibrationStatus {
            collecting: self.mode == Mode::Calibration,
            paused: self.collector.is_paused(),
            sample_count: self.collector.sample_count(),
            min_samples: MIN_CALIBRATION_SAMPLES,
            pending: self.collector.pending(),
            model: CalibrationModel::clone(&self.state.active_model.current()),
            last_fit_error: self.last_fit_error.clone(),
        }
    }

    /// Clear samples, reset the active model to identity and enter
    /// calibration mode
    pub fn start_calibration(&mut self, now: Instant) -> Result<CalibrationStatus> {
        self.collector.restart();
        self.last_fit_error = None;
        let identity = CalibrationModel::identity(self.state.active_model.next_version());
        let model = self.state.active_model.install(identity)?;
        self.state.broadcast_event(IronsightEvent::CalibrationApplied {
            version: model.version,
            mean_error_cm: model.mean_error_cm,
            max_error_cm: model.max_error_cm,
            n: model.n,
            timestamp: Utc::now(),
        });

        self.change_mode(Mode::Calibration);
        self.switch_context(now);
        info!("Calibration started (identity model v{})", model.version);
        Ok(self.calibration_status())
    }

    /// Pair the pending impact with the operator's click
    ///
    /// Once enough pairs exist every confirmation refits. A rejected refit
    /// does not fail the confirmation; the returned status carries the
    /// rejection in `last_fit_error`.
    pub fn confirm_calibration(&mut self, gt_x: f64, gt_y: f64) -> Result<CalibrationStatus> {
        self.require_calibration_mode()?;
        let count = self.collector.confirm(gt_x, gt_y)?;
        info!(
            "Calibration sample {} confirmed at ({:.4}, {:.4})",
            count, gt_x, gt_y
        );
        if count >= MIN_CALIBRATION_SAMPLES {
            if let Err(e) = self.fit_calibration() {
                debug!("Confirmation kept after refit failure: {}", e);
            }
        }
        Ok(self.calibration_status())
    }

    /// Fit every confirmed pair and make the result active
    pub fn fit_calibration(&mut self) -> Result<Arc<CalibrationModel>> {
        let version = self.state.active_model.next_version();
        let fitted = self
            .collector
            .fit(version)
            .and_then(|model| self.state.active_model.install(model));

        match fitted {
            Ok(model) => {
                self.last_fit_error = None;
                self.state.broadcast_event(IronsightEvent::CalibrationApplied {
                    version: model.version,
                    mean_error_cm: model.mean_error_cm,
                    max_error_cm: model.max_error_cm,
                    n: model.n,
                    timestamp: Utc::now(),
                });
                Ok(model)
            }
            Err(e) => {
                warn!("Calibration fit rejected: {}", e);
                self.last_fit_error = Some(e.to_string());
                self.state.broadcast_event(IronsightEvent::CalibrationRejected {
                    reason: e.to_string(),
                    sample_count: self.collector.sample_count(),
                    timestamp: Utc::now(),
                });
                Err(e.into())
            }
        }
    }

    pub fn pause_calibration(&mut self) -> Result<CalibrationStatus> {
        self.require_calibration_mode()?;
        self.collector.pause();
        info!("Calibration paused");
        Ok(self.calibration_status())
    }

    pub fn resume_calibration(&mut self) -> Result<CalibrationStatus> {
        self.require_calibration_mode()?;
        self.collector.resume();
        info!("Calibration resumed");
        Ok(self.calibration_status())
    }

    fn require_calibration_mode(&self) -> Result<()> {
        if self.mode == Mode::Calibration {
            Ok(())
        } else {
            Err(CalibrationError::NotCalibrating.into())
        }
    }
}

fn channel_records(event: &FusedEvent) -> Vec<ChannelRecord> {
    event
        .channels
        .iter()
        .map(|(label, channel)| ChannelRecord {
            label: label.to_string(),
            node_id: channel.node_id.clone(),
            peak: channel.sample.peak,
            energy: channel.sample.energy,
            energy2: channel.sample.energy2,
            tdoa_us: channel.sample.tdoa_us,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::FusedChannel;
    use crate::ingest::{ChannelLabel, ChannelSet, SensorChannelSample};
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        keeper: Scorekeeper,
        state: Arc<SharedState>,
        t0: Instant,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(SharedState::new(64));
        let t0 = Instant::now();
        let keeper = Scorekeeper::new(&EngineConfig::default(), Arc::clone(&state), t0).unwrap();
        Fixture { keeper, state, t0 }
    }

    /// Energy-only event whose dominant channel is `label`
    fn event(keeper: &Scorekeeper, label: ChannelLabel, at: Instant) -> FusedEvent {
        let channels: ChannelSet<FusedChannel> = [
            ChannelLabel::N,
            ChannelLabel::E,
            ChannelLabel::S,
            ChannelLabel::W,
        ]
        .into_iter()
        .map(|l| {
            (
                l,
                FusedChannel {
                    node_id: "A".to_string(),
                    group: 0,
                    sample: SensorChannelSample {
                        peak: 1.0,
                        energy: if l == label { 4.0 } else { 1.0 },
                        energy2: 0.0,
                        tdoa_us: None,
                    },
                },
            )
        })
        .collect();
        FusedEvent {
            id: Uuid::new_v4(),
            channels,
            node_ids: vec!["A".to_string()],
            fusion_confidence: 1.0,
            complete: true,
            detected_at: at,
            detected_wall: Utc::now(),
            epoch: keeper.epoch(),
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_refractory_window() {
        let mut f = fixture();
        let first = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));
        assert!(matches!(f.keeper.handle_event(first), Disposition::Scored(_)));

        let echo = event(&f.keeper, ChannelLabel::N, f.t0 + ms(101));
        assert_eq!(f.keeper.handle_event(echo), Disposition::Echo);

        let next = event(&f.keeper, ChannelLabel::E, f.t0 + ms(601));
        assert!(matches!(f.keeper.handle_event(next), Disposition::Scored(_)));

        let snap = f.state.counters.snapshot();
        assert_eq!(snap.shots_scored, 2);
        assert_eq!(snap.echoes_suppressed, 1);
    }

    #[test]
    fn test_shot_attribution_and_completion() {
        let mut f = fixture();
        let summary = f
            .keeper
            .start_session(Some(3), Some(2), None, f.t0 + ms(1))
            .unwrap();

        for i in 0..7u64 {
            let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(10 + i * 600));
            let Disposition::Scored(record) = f.keeper.handle_event(e) else {
                panic!("shot {} not scored", i + 1);
            };
            if i < 6 {
                assert_eq!(record.shot.session_id, Some(summary.session_id));
                assert_eq!(record.shot.end_number, Some(i as u32 / 3 + 1));
                assert_eq!(record.shot.shot_number, Some(i as u32 % 3 + 1));
                assert_eq!(f.keeper.current_session().unwrap().is_complete, i == 5);
            } else {
                // Session already full
                assert_eq!(record.shot.session_id, None);
            }
        }
        assert_eq!(f.keeper.shots().len(), 6);
    }

    #[test]
    fn test_shot_without_session_is_still_broadcast() {
        let mut f = fixture();
        let mut rx = f.state.subscribe_events();
        let e = event(&f.keeper, ChannelLabel::E, f.t0 + ms(1));
        let Disposition::Scored(record) = f.keeper.handle_event(e) else {
            panic!("not scored");
        };
        assert!(record.shot.session_id.is_none());
        assert!(record.shot.x > 0.0);
        assert_eq!(record.channels.len(), 4);

        match rx.try_recv().unwrap() {
            IronsightEvent::ShotScored { record, scorecard, .. } => {
                assert!(scorecard.is_none());
                assert_eq!(record.shot.calibration_version, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scoring_mode_ignores_events() {
        let mut f = fixture();
        f.keeper.set_mode(Mode::Scoring, f.t0);
        let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));
        assert_eq!(f.keeper.handle_event(e), Disposition::IgnoredWhileScoring);
        assert_eq!(f.state.counters.snapshot().ignored_while_scoring, 1);
    }

    #[test]
    fn test_events_from_before_a_switch_are_stale() {
        let mut f = fixture();
        let early = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));

        f.keeper.set_mode(Mode::Scoring, f.t0 + ms(5));
        f.keeper.set_mode(Mode::Shooting, f.t0 + ms(10));
        assert_eq!(f.keeper.epoch(), 2);
        assert_eq!(f.keeper.handle_event(early), Disposition::Stale);

        // Current epoch but detected before the switch
        let queued = event(&f.keeper, ChannelLabel::N, f.t0 + ms(8));
        assert_eq!(f.keeper.handle_event(queued), Disposition::Stale);

        let fresh = event(&f.keeper, ChannelLabel::N, f.t0 + ms(12));
        assert!(matches!(f.keeper.handle_event(fresh), Disposition::Scored(_)));
        assert_eq!(f.state.counters.snapshot().stale_events, 2);
    }

    #[test]
    fn test_setting_same_mode_keeps_context() {
        let mut f = fixture();
        assert_eq!(f.keeper.set_mode(Mode::Shooting, f.t0 + ms(5)), Mode::Shooting);
        assert_eq!(f.keeper.epoch(), 0);
    }

    #[test]
    fn test_calibration_flow_refits_live() {
        let mut f = fixture();
        let status = f.keeper.start_calibration(f.t0).unwrap();
        assert!(status.collecting);
        assert_eq!(status.model.version, 1);
        assert!(status.model.is_identity());
        let mut rx = f.state.subscribe_events();

        let clicks = [
            (ChannelLabel::N, (0.0, 0.1)),
            (ChannelLabel::E, (0.1, 0.0)),
            (ChannelLabel::S, (0.0, -0.1)),
        ];
        for (i, (label, (gx, gy))) in clicks.into_iter().enumerate() {
            let e = event(&f.keeper, label, f.t0 + ms(1 + i as u64 * 600));
            assert!(matches!(
                f.keeper.handle_event(e),
                Disposition::CalibrationPending(_)
            ));
            let status = f.keeper.confirm_calibration(gx, gy).unwrap();
            assert_eq!(status.sample_count, i + 1);
        }

        // Third confirmation triggered a fit
        let model = f.state.active_model.current();
        assert_eq!(model.version, 2);
        assert_eq!(model.n, 3);

        let mut applied = false;
        while let Ok(event) = rx.try_recv() {
            if let IronsightEvent::CalibrationApplied { version, .. } = event {
                applied = version == 2;
            }
        }
        assert!(applied);
    }

    #[test]
    fn test_rejected_fit_keeps_previous_model() {
        let mut f = fixture();
        f.keeper.start_calibration(f.t0).unwrap();
        let mut rx = f.state.subscribe_events();

        // Collinear ground truth
        for (i, label) in [ChannelLabel::N, ChannelLabel::E, ChannelLabel::S]
            .into_iter()
            .enumerate()
        {
            let e = event(&f.keeper, label, f.t0 + ms(1 + i as u64 * 600));
            f.keeper.handle_event(e);
            let g = i as f64 * 0.05;
            let status = f.keeper.confirm_calibration(g, g).unwrap();
            assert_eq!(status.sample_count, i + 1);
            if i == 2 {
                let reason = status.last_fit_error.expect("refit rejection reported");
                assert!(reason.contains("degenerate"), "{}", reason);
            } else {
                assert!(status.last_fit_error.is_none());
            }
        }

        assert_eq!(f.state.active_model.version(), 1);
        assert!(matches!(
            f.keeper.fit_calibration(),
            Err(Error::Calibration(CalibrationError::DegenerateGeometry(_)))
        ));

        let mut rejected = 0;
        loop {
            match rx.try_recv() {
                Ok(IronsightEvent::CalibrationRejected { sample_count, .. }) => {
                    assert_eq!(sample_count, 3);
                    rejected += 1;
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(e) => panic!("{:?}", e),
            }
        }
        assert_eq!(rejected, 2);
    }

    #[test]
    fn test_calibration_commands_need_calibration_mode() {
        let mut f = fixture();
        assert!(matches!(
            f.keeper.confirm_calibration(0.0, 0.0),
            Err(Error::Calibration(CalibrationError::NotCalibrating))
        ));
        assert!(f.keeper.pause_calibration().is_err());
    }

    #[test]
    fn test_paused_calibration_ignores_impacts() {
        let mut f = fixture();
        f.keeper.start_calibration(f.t0).unwrap();
        f.keeper.pause_calibration().unwrap();
        let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));
        assert_eq!(f.keeper.handle_event(e), Disposition::CalibrationPaused);

        f.keeper.resume_calibration().unwrap();
        let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(2));
        assert!(matches!(
            f.keeper.handle_event(e),
            Disposition::CalibrationPending(_)
        ));
    }

    #[test]
    fn test_leaving_calibration_discards_pending_impact() {
        let mut f = fixture();
        f.keeper.start_calibration(f.t0).unwrap();
        let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));
        f.keeper.handle_event(e);
        assert!(f.keeper.calibration_status().pending.is_some());

        f.keeper.set_mode(Mode::Shooting, f.t0 + ms(10));
        assert!(f.keeper.calibration_status().pending.is_none());
        assert!(!f.keeper.calibration_status().collecting);
    }

    #[test]
    fn test_end_session_requires_active_session() {
        let mut f = fixture();
        assert!(matches!(
            f.keeper.end_session(f.t0),
            Err(Error::InvalidState(_))
        ));

        let started = f.keeper.start_session(None, None, None, f.t0).unwrap();
        assert_eq!(started.arrows_per_end, 3);
        assert_eq!(started.num_ends, 10);

        let ended = f.keeper.end_session(f.t0 + ms(1)).unwrap();
        assert!(ended.ended_at.is_some());
        assert!(f.keeper.current_session().is_none());
        assert_eq!(f.keeper.list_sessions(10, 0, false).len(), 1);
        assert!(f.keeper.session_stats(started.session_id).is_ok());
    }

    #[test]
    fn test_annotate_shot_measures_error() {
        let mut f = fixture();
        f.keeper.start_session(Some(3), Some(1), None, f.t0).unwrap();
        let e = event(&f.keeper, ChannelLabel::E, f.t0 + ms(1));
        let Disposition::Scored(record) = f.keeper.handle_event(e) else {
            panic!("not scored");
        };
        let shot = &record.shot;

        let annotated = f
            .keeper
            .annotate_shot(shot.shot_id, shot.x + 0.03, shot.y + 0.04)
            .unwrap();
        let truth = annotated.ground_truth.unwrap();
        assert!((truth.error_cm - 5.0).abs() < 1e-9);
        assert_eq!(annotated.shot, *shot);

        assert!(matches!(
            f.keeper.annotate_shot(Uuid::new_v4(), 0.0, 0.0),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.keeper.annotate_shot(shot.shot_id, f64::NAN, 0.0),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_ring_update_changes_scoring() {
        let mut f = fixture();
        let mut radii = vec![5.0];
        radii.extend((1..=10).map(|r| 5.0 + r as f64));
        f.keeper.set_ring_radii(radii).unwrap();

        let e = event(&f.keeper, ChannelLabel::N, f.t0 + ms(1));
        let Disposition::Scored(record) = f.keeper.handle_event(e) else {
            panic!("not scored");
        };
        assert_eq!(record.shot.ring(), RingScore::X);

        assert!(matches!(
            f.keeper.set_ring_radii(vec![1.0, 2.0]),
            Err(Error::BadRequest(_))
        ));
    }
}
