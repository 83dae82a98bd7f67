//! Scoring processor task and its command handle
//!
//! One task owns the [`Scorekeeper`]. Fused events and operator commands
//! are serialized through it; HTTP handlers talk to it through an
//! [`EngineHandle`] and wait on a oneshot reply.

use ironsight_common::events::{
    CalibrationModel, CalibrationStatus, Mode, SessionStats, SessionSummary, ShotRecord,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::scorekeeper::{Disposition, Scorekeeper, StateSnapshot};
use super::session::SessionDetail;
use crate::error::{Error, Result};
use crate::fusion::{CorrelatorCommand, FusedEvent};

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Requests served by the scoring processor
pub enum EngineCommand {
    GetMode(Reply<Mode>),
    SetMode {
        mode: Mode,
        reply: Reply<Mode>,
    },
    Snapshot(Reply<StateSnapshot>),
    StartSession {
        arrows_per_end: Option<u32>,
        num_ends: Option<u32>,
        notes: Option<String>,
        reply: Reply<Result<SessionSummary>>,
    },
    EndSession(Reply<Result<SessionSummary>>),
    CurrentSession(Reply<Option<SessionSummary>>),
    ListSessions {
        limit: usize,
        offset: usize,
        complete_only: bool,
        reply: Reply<Vec<SessionSummary>>,
    },
    GetSession {
        id: Uuid,
        reply: Reply<Result<SessionDetail>>,
    },
    SessionStats {
        id: Uuid,
        reply: Reply<Result<SessionStats>>,
    },
    DeleteSession {
        id: Uuid,
        reply: Reply<Result<SessionSummary>>,
    },
    Shots(Reply<Vec<ShotRecord>>),
    AnnotateShot {
        shot_id: Uuid,
        x: f64,
        y: f64,
        reply: Reply<Result<ShotRecord>>,
    },
    RingRadii(Reply<Vec<f64>>),
    SetRingRadii {
        radii: Vec<f64>,
        reply: Reply<Result<Vec<f64>>>,
    },
    CalibrationStatus(Reply<CalibrationStatus>),
    StartCalibration(Reply<Result<CalibrationStatus>>),
    ConfirmCalibration {
        x: f64,
        y: f64,
        reply: Reply<Result<CalibrationStatus>>,
    },
    FitCalibration(Reply<Result<Arc<CalibrationModel>>>),
    PauseCalibration(Reply<Result<CalibrationStatus>>),
    ResumeCalibration(Reply<Result<CalibrationStatus>>),
}

pub struct ScoringProcessor {
    keeper: Scorekeeper,
    event_rx: mpsc::Receiver<FusedEvent>,
    command_rx: mpsc::Receiver<EngineCommand>,
    correlator_tx: mpsc::Sender<CorrelatorCommand>,
    /// Last epoch the correlator was told about
    announced_epoch: u64,
}

impl ScoringProcessor {
    pub fn new(
        keeper: Scorekeeper,
        event_rx: mpsc::Receiver<FusedEvent>,
        correlator_tx: mpsc::Sender<CorrelatorCommand>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let announced_epoch = keeper.epoch();
        (
            Self {
                keeper,
                event_rx,
                command_rx,
                correlator_tx,
                announced_epoch,
            },
            EngineHandle { tx: command_tx },
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Scoring processor started in {} mode", self.keeper.mode());
        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let disposition = self.keeper.handle_event(event);
                    debug!("Event {}", disposition_name(&disposition));
                }
                Some(command) = self.command_rx.recv() => {
                    self.dispatch(command, Instant::now());
                    self.sync_correlator().await;
                }
            }
        }
        info!("Scoring processor stopped");
    }

    fn dispatch(&mut self, command: EngineCommand, now: Instant) {
        let k = &mut self.keeper;
        // A dropped receiver means the caller gave up; nothing to do
        let delivered = match command {
            EngineCommand::GetMode(reply) => reply.send(k.mode()).is_ok(),
            EngineCommand::SetMode { mode, reply } => reply.send(k.set_mode(mode, now)).is_ok(),
            EngineCommand::Snapshot(reply) => reply.send(k.snapshot()).is_ok(),
            EngineCommand::StartSession {
                arrows_per_end,
                num_ends,
                notes,
                reply,
            } => reply
                .send(k.start_session(arrows_per_end, num_ends, notes, now))
                .is_ok(),
            EngineCommand::EndSession(reply) => reply.send(k.end_session(now)).is_ok(),
            EngineCommand::CurrentSession(reply) => reply.send(k.current_session()).is_ok(),
            EngineCommand::ListSessions {
                limit,
                offset,
                complete_only,
                reply,
            } => reply
                .send(k.list_sessions(limit, offset, complete_only))
                .is_ok(),
            EngineCommand::GetSession { id, reply } => reply.send(k.session_detail(id)).is_ok(),
            EngineCommand::SessionStats { id, reply } => reply.send(k.session_stats(id)).is_ok(),
            EngineCommand::DeleteSession { id, reply } => {
                reply.send(k.delete_session(id)).is_ok()
            }
            EngineCommand::Shots(reply) => reply.send(k.shots()).is_ok(),
            EngineCommand::AnnotateShot {
                shot_id,
                x,
                y,
                reply,
            } => reply.send(k.annotate_shot(shot_id, x, y)).is_ok(),
            EngineCommand::RingRadii(reply) => reply.send(k.ring_radii()).is_ok(),
            EngineCommand::SetRingRadii { radii, reply } => {
                reply.send(k.set_ring_radii(radii)).is_ok()
            }
            EngineCommand::CalibrationStatus(reply) => {
                reply.send(k.calibration_status()).is_ok()
            }
            EngineCommand::StartCalibration(reply) => {
                reply.send(k.start_calibration(now)).is_ok()
            }
            EngineCommand::ConfirmCalibration { x, y, reply } => {
                reply.send(k.confirm_calibration(x, y)).is_ok()
            }
            EngineCommand::FitCalibration(reply) => reply.send(k.fit_calibration()).is_ok(),
            EngineCommand::PauseCalibration(reply) => {
                reply.send(k.pause_calibration()).is_ok()
            }
            EngineCommand::ResumeCalibration(reply) => {
                reply.send(k.resume_calibration()).is_ok()
            }
        };
        if !delivered {
            debug!("Command caller went away before the reply");
        }
    }

    /// Tell the correlator to drop windows from the previous context
    async fn sync_correlator(&mut self) {
        let epoch = self.keeper.epoch();
        if epoch == self.announced_epoch {
            return;
        }
        self.announced_epoch = epoch;
        if self
            .correlator_tx
            .send(CorrelatorCommand::Reset { epoch })
            .await
            .is_err()
        {
            warn!("Correlator gone; epoch {} not announced", epoch);
        }
    }
}

fn disposition_name(d: &Disposition) -> &'static str {
    match d {
        Disposition::Scored(_) => "scored",
        Disposition::CalibrationPending(_) => "calibration sample",
        Disposition::Stale => "stale",
        Disposition::IgnoredWhileScoring => "ignored (scoring)",
        Disposition::CalibrationPaused => "ignored (calibration paused)",
        Disposition::Echo => "echo",
        Disposition::Unlocalized => "unlocalized",
    }
}

/// Cloneable handle to the scoring processor
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::Internal("scoring processor is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("scoring processor dropped the request".to_string()))
    }

    pub async fn mode(&self) -> Result<Mode> {
        self.request(EngineCommand::GetMode).await
    }

    /// Returns the previous mode
    pub async fn set_mode(&self, mode: Mode) -> Result<Mode> {
        self.request(|reply| EngineCommand::SetMode { mode, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        self.request(EngineCommand::Snapshot).await
    }

    pub async fn start_session(
        &self,
        arrows_per_end: Option<u32>,
        num_ends: Option<u32>,
        notes: Option<String>,
    ) -> Result<SessionSummary> {
        self.request(|reply| EngineCommand::StartSession {
            arrows_per_end,
            num_ends,
            notes,
            reply,
        })
        .await?
    }

    pub async fn end_session(&self) -> Result<SessionSummary> {
        self.request(EngineCommand::EndSession).await?
    }

    pub async fn current_session(&self) -> Result<Option<SessionSummary>> {
        self.request(EngineCommand::CurrentSession).await
    }

    pub async fn list_sessions(
        &self,
        limit: usize,
        offset: usize,
        complete_only: bool,
    ) -> Result<Vec<SessionSummary>> {
        self.request(|reply| EngineCommand::ListSessions {
            limit,
            offset,
            complete_only,
            reply,
        })
        .await
    }

    pub async fn session(&self, id: Uuid) -> Result<SessionDetail> {
        self.request(|reply| EngineCommand::GetSession { id, reply })
            .await?
    }

    pub async fn session_stats(&self, id: Uuid) -> Result<SessionStats> {
        self.request(|reply| EngineCommand::SessionStats { id, reply })
            .await?
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<SessionSummary> {
        self.request(|reply| EngineCommand::DeleteSession { id, reply })
            .await?
    }

    pub async fn shots(&self) -> Result<Vec<ShotRecord>> {
        self.request(EngineCommand::Shots).await
    }

    pub async fn annotate_shot(&self, shot_id: Uuid, x: f64, y: f64) -> Result<ShotRecord> {
        self.request(|reply| EngineCommand::AnnotateShot {
            shot_id,
            x,
            y,
            reply,
        })
        .await?
    }

    pub async fn ring_radii(&self) -> Result<Vec<f64>> {
        self.request(EngineCommand::RingRadii).await
    }

    pub async fn set_ring_radii(&self, radii: Vec<f64>) -> Result<Vec<f64>> {
        self.request(|reply| EngineCommand::SetRingRadii { radii, reply })
            .await?
    }

    pub async fn calibration_status(&self) -> Result<CalibrationStatus> {
        self.request(EngineCommand::CalibrationStatus).await
    }

    pub async fn start_calibration(&self) -> Result<CalibrationStatus> {
        self.request(EngineCommand::StartCalibration).await?
    }

    pub async fn confirm_calibration(&self, x: f64, y: f64) -> Result<CalibrationStatus> {
        self.request(|reply| EngineCommand::ConfirmCalibration { x, y, reply })
            .await?
    }

    pub async fn fit_calibration(&self) -> Result<Arc<CalibrationModel>> {
        self.request(EngineCommand::FitCalibration).await?
    }

    pub async fn pause_calibration(&self) -> Result<CalibrationStatus> {
        self.request(EngineCommand::PauseCalibration).await?
    }

    pub async fn resume_calibration(&self) -> Result<CalibrationStatus> {
        self.request(EngineCommand::ResumeCalibration).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::state::SharedState;
    use std::time::Duration;

    fn spawn() -> (
        EngineHandle,
        mpsc::Sender<FusedEvent>,
        mpsc::Receiver<CorrelatorCommand>,
        JoinHandle<()>,
    ) {
        let state = Arc::new(SharedState::default());
        let keeper = Scorekeeper::new(&EngineConfig::default(), state, Instant::now()).unwrap();
        let (event_tx, event_rx) = mpsc::channel(8);
        let (correlator_tx, correlator_rx) = mpsc::channel(8);
        let (processor, handle) = ScoringProcessor::new(keeper, event_rx, correlator_tx);
        (handle, event_tx, correlator_rx, processor.start())
    }

    #[tokio::test]
    async fn test_mode_switch_resets_correlator() {
        let (handle, _event_tx, mut correlator_rx, _task) = spawn();

        assert_eq!(handle.mode().await.unwrap(), Mode::Shooting);
        assert_eq!(handle.set_mode(Mode::Scoring).await.unwrap(), Mode::Shooting);
        assert_eq!(handle.mode().await.unwrap(), Mode::Scoring);

        let command = tokio::time::timeout(Duration::from_secs(1), correlator_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command, CorrelatorCommand::Reset { epoch: 1 });
    }

    #[tokio::test]
    async fn test_queries_do_not_reset_correlator() {
        let (handle, _event_tx, mut correlator_rx, _task) = spawn();
        handle.snapshot().await.unwrap();
        handle.ring_radii().await.unwrap();
        handle.calibration_status().await.unwrap();
        assert!(correlator_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_lifecycle_through_handle() {
        let (handle, _event_tx, _correlator_rx, _task) = spawn();

        assert!(handle.current_session().await.unwrap().is_none());
        let started = handle.start_session(Some(6), Some(5), None).await.unwrap();
        assert_eq!(started.target_arrows, 30);

        assert!(matches!(
            handle.delete_session(started.session_id).await,
            Err(Error::InvalidState(_))
        ));
        handle.end_session().await.unwrap();
        assert!(matches!(
            handle.end_session().await,
            Err(Error::InvalidState(_))
        ));
        handle.delete_session(started.session_id).await.unwrap();
        assert!(handle.list_sessions(10, 0, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_processor() {
        let (handle, event_tx, _correlator_rx, task) = spawn();
        drop(event_tx);
        task.await.unwrap();
        assert!(matches!(handle.mode().await, Err(Error::Internal(_))));
    }
}
