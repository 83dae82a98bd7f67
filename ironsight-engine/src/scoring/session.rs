//! Sessions and the session book
//!
//! A session owns its shot records in arrival order. End and shot numbers
//! are derived from the arrival index, so appending is the only mutation
//! that changes them.

use chrono::{DateTime, Utc};
use ironsight_common::events::{
    EndRow, EndStats, GroundTruth, RingScore, ScoreCount, Scorecard, SessionStats,
    SessionSummary, Shot, ShotRecord,
};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Scorecard labels in ring order
const LABELS: [&str; 12] = ["X", "10", "9", "8", "7", "6", "5", "4", "3", "2", "1", "M"];

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    arrows_per_end: u32,
    num_ends: u32,
    notes: Option<String>,
    shots: Vec<ShotRecord>,
    /// Set when the session is ended, whether or not it was full
    completed: bool,
}

/// Full view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub scorecard: Scorecard,
    pub shots: Vec<ShotRecord>,
}

impl Session {
    pub fn new(arrows_per_end: u32, num_ends: u32, notes: Option<String>) -> Result<Self> {
        if arrows_per_end == 0 || num_ends == 0 {
            return Err(Error::BadRequest(
                "arrows_per_end and num_ends must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            arrows_per_end,
            num_ends,
            notes,
            shots: Vec::new(),
            completed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target_arrows(&self) -> u32 {
        self.arrows_per_end * self.num_ends
    }

    pub fn arrow_count(&self) -> u32 {
        self.shots.len() as u32
    }

    /// Every target arrow has been shot
    pub fn is_full(&self) -> bool {
        self.arrow_count() >= self.target_arrows()
    }

    pub fn is_complete(&self) -> bool {
        self.completed || self.is_full()
    }

    /// `(end_number, shot_number)` the next shot will get, `None` once full
    pub fn next_numbering(&self) -> Option<(u32, u32)> {
        if self.is_full() {
            return None;
        }
        let n = self.arrow_count() + 1;
        Some((
            (n - 1) / self.arrows_per_end + 1,
            (n - 1) % self.arrows_per_end + 1,
        ))
    }

    /// Append a record already numbered via [`next_numbering`](Self::next_numbering)
    pub fn append(&mut self, record: ShotRecord) -> Result<()> {
        if self.is_full() {
            return Err(Error::InvalidState(format!(
                "session {} already has {} arrows",
                self.id,
                self.target_arrows()
            )));
        }
        self.shots.push(record);
        if self.is_full() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn end(&mut self, at: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(at);
        }
        self.completed = true;
    }

    pub fn shots(&self) -> &[ShotRecord] {
        &self.shots
    }

    pub fn contains_shot(&self, shot_id: Uuid) -> bool {
        self.shots.iter().any(|r| r.shot.shot_id == shot_id)
    }

    /// Attach ground truth to one of this session's shots
    ///
    /// The shot itself is left untouched; only the record gains the
    /// measurement.
    pub fn annotate(
        &mut self,
        shot_id: Uuid,
        measure: impl FnOnce(&Shot) -> GroundTruth,
    ) -> Option<&ShotRecord> {
        let record = self.shots.iter_mut().find(|r| r.shot.shot_id == shot_id)?;
        record.ground_truth = Some(measure(&record.shot));
        Some(record)
    }

    pub fn total_score(&self) -> u32 {
        self.shots.iter().map(|r| u32::from(r.shot.score)).sum()
    }

    pub fn summary(&self) -> SessionSummary {
        let (current_end, arrows_in_current_end) = self
            .shots
            .last()
            .map(|r| {
                (
                    r.shot.end_number.unwrap_or(0),
                    r.shot.shot_number.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        SessionSummary {
            session_id: self.id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            arrows_per_end: self.arrows_per_end,
            num_ends: self.num_ends,
            current_arrows: self.arrow_count(),
            target_arrows: self.target_arrows(),
            total_score: self.total_score(),
            is_complete: self.is_complete(),
            current_end,
            arrows_in_current_end,
            notes: self.notes.clone(),
        }
    }

    /// Scorecard rows for every end that has at least one arrow
    ///
    /// X arrows are counted under both "X" and "10".
    pub fn scorecard(&self) -> Scorecard {
        let mut ends: Vec<EndRow> = Vec::new();
        let mut counts = [0u32; LABELS.len()];
        let mut running = 0;

        for record in &self.shots {
            let shot = &record.shot;
            let end = shot.end_number.unwrap_or(1);
            if ends.last().map(|row| row.end) != Some(end) {
                ends.push(EndRow {
                    end,
                    arrows: Vec::new(),
                    score: 0,
                    running,
                });
            }
            let ring = shot.ring();
            running += u32::from(shot.score);
            if let Some(row) = ends.last_mut() {
                row.arrows.push(ring.label());
                row.score += u32::from(shot.score);
                row.running = running;
            }

            if ring.is_x {
                counts[0] += 1;
                counts[1] += 1;
            } else {
                counts[label_index(ring)] += 1;
            }
        }

        Scorecard {
            session_id: self.id,
            ends,
            counts: LABELS
                .iter()
                .zip(counts)
                .map(|(label, count)| ScoreCount {
                    label: label.to_string(),
                    count,
                })
                .collect(),
            total: running,
            total_arrows: self.arrow_count(),
            arrows_per_end: self.arrows_per_end,
            num_ends: self.num_ends,
            is_complete: self.is_complete(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        let n = self.shots.len();
        if n == 0 {
            return SessionStats {
                session_id: self.id,
                avg_score: 0.0,
                x_count: 0,
                score_distribution: Vec::new(),
                avg_r: 0.0,
                ends: Vec::new(),
            };
        }

        let mut distribution = [0u32; LABELS.len()];
        let mut ends: Vec<EndStats> = Vec::new();
        for record in &self.shots {
            let shot = &record.shot;
            distribution[label_index(shot.ring())] += 1;

            let end = shot.end_number.unwrap_or(1);
            if ends.last().map(|e| e.end) != Some(end) {
                ends.push(EndStats {
                    end,
                    arrows: 0,
                    score: 0,
                    avg_score: 0.0,
                });
            }
            if let Some(stats) = ends.last_mut() {
                stats.arrows += 1;
                stats.score += u32::from(shot.score);
            }
        }
        for e in &mut ends {
            e.avg_score = f64::from(e.score) / f64::from(e.arrows);
        }

        let avg_score = f64::from(self.total_score()) / n as f64;
        let avg_r = self.shots.iter().map(|r| r.shot.r).sum::<f64>() / n as f64;

        SessionStats {
            session_id: self.id,
            avg_score: round_to(avg_score, 2),
            x_count: self.shots.iter().filter(|r| r.shot.is_x).count() as u32,
            score_distribution: LABELS
                .iter()
                .zip(distribution)
                .filter(|(_, count)| *count > 0)
                .map(|(label, count)| ScoreCount {
                    label: label.to_string(),
                    count,
                })
                .collect(),
            avg_r: round_to(avg_r, 4),
            ends,
        }
    }

    pub fn detail(&self) -> SessionDetail {
        SessionDetail {
            summary: self.summary(),
            scorecard: self.scorecard(),
            shots: self.shots.clone(),
        }
    }
}

fn label_index(ring: RingScore) -> usize {
    if ring.is_x {
        0
    } else if ring.score == 0 {
        LABELS.len() - 1
    } else {
        // 10 → 1, 1 → 10
        11 - usize::from(ring.score.min(10))
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// The active session plus a bounded history of finished ones
#[derive(Debug)]
pub struct SessionBook {
    active: Option<Session>,
    /// Newest first
    history: VecDeque<Session>,
    history_limit: usize,
}

impl SessionBook {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: None,
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }

    /// Install a new active session, retiring the previous one
    ///
    /// Returns the retired session's summary.
    pub fn start(&mut self, session: Session) -> Option<SessionSummary> {
        let retired = self.retire();
        self.active = Some(session);
        retired
    }

    /// End the active session and move it into history
    pub fn end(&mut self) -> Option<SessionSummary> {
        self.retire()
    }

    fn retire(&mut self) -> Option<SessionSummary> {
        let mut session = self.active.take()?;
        session.end(Utc::now());
        let summary = session.summary();
        self.history.push_front(session);
        self.history.truncate(self.history_limit);
        Some(summary)
    }

    /// Active session first, then history; newest first throughout
    pub fn list(&self, limit: usize, offset: usize, complete_only: bool) -> Vec<SessionSummary> {
        self.active
            .iter()
            .chain(self.history.iter())
            .filter(|s| !complete_only || s.is_complete())
            .skip(offset)
            .take(limit)
            .map(Session::summary)
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|s| s.id() == id)
    }

    /// Attach ground truth to a shot in any known session
    pub fn annotate(
        &mut self,
        shot_id: Uuid,
        measure: impl FnOnce(&Shot) -> GroundTruth,
    ) -> Option<ShotRecord> {
        self.active
            .iter_mut()
            .chain(self.history.iter_mut())
            .find(|s| s.contains_shot(shot_id))?
            .annotate(shot_id, measure)
            .cloned()
    }

    /// Delete a finished session
    pub fn delete(&mut self, id: Uuid) -> Result<SessionSummary> {
        if self.active.as_ref().is_some_and(|s| s.id() == id) {
            return Err(Error::InvalidState(
                "cannot delete the active session; end it first".to_string(),
            ));
        }
        let index = self
            .history
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        self.history
            .remove(index)
            .map(|s| s.summary())
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }
}
