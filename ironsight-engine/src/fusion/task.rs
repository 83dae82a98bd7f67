//! Correlator task
//!
//! Owns the [`Correlator`] exclusively. Listener tasks hand bundles over
//! through a channel, so window bookkeeping never needs a lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::correlator::Correlator;
use super::event::FusedEvent;
use crate::ingest::HitBundle;
use crate::state::{PipelineCounters, SharedState};

/// Control messages from the scoring processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorCommand {
    /// Drop every open window; new events carry `epoch`
    Reset { epoch: u64 },
}

pub struct CorrelatorTask {
    correlator: Correlator,
    bundle_rx: mpsc::Receiver<HitBundle>,
    command_rx: mpsc::Receiver<CorrelatorCommand>,
    event_tx: mpsc::Sender<FusedEvent>,
    sweep_interval: Duration,
    state: Arc<SharedState>,
}

impl CorrelatorTask {
    pub fn new(
        correlator: Correlator,
        bundle_rx: mpsc::Receiver<HitBundle>,
        command_rx: mpsc::Receiver<CorrelatorCommand>,
        event_tx: mpsc::Sender<FusedEvent>,
        sweep_interval: Duration,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            correlator,
            bundle_rx,
            command_rx,
            event_tx,
            sweep_interval,
            state,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            "Correlator started ({:?}, sweep every {:?})",
            self.correlator.mode(),
            self.sweep_interval
        );
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                bundle = self.bundle_rx.recv() => {
                    let Some(bundle) = bundle else {
                        break;
                    };
                    if let Some(event) = self.correlator.ingest(bundle) {
                        if !self.forward(event).await {
                            return;
                        }
                    }
                }
                Some(command) = self.command_rx.recv() => {
                    match command {
                        CorrelatorCommand::Reset { epoch } => {
                            let discarded = self.correlator.reset(epoch);
                            debug!("Correlator reset to epoch {} ({} windows discarded)", epoch, discarded);
                        }
                    }
                }
                _ = sweep.tick() => {
                    for event in self.correlator.sweep(Instant::now()) {
                        if !self.forward(event).await {
                            return;
                        }
                    }
                }
            }
        }

        // Listeners are gone; flush what is left
        for event in self.correlator.drain() {
            if !self.forward(event).await {
                return;
            }
        }
        info!("Correlator stopped");
    }

    /// Returns false once the processor has gone away
    async fn forward(&self, event: FusedEvent) -> bool {
        let counter = if event.complete {
            &self.state.counters.fused_complete
        } else {
            &self.state.counters.fused_partial
        };
        PipelineCounters::incr(counter);

        debug!(
            "Fused event {} from {:?} ({} channels, confidence {:.2})",
            event.id,
            event.node_ids,
            event.channels.len(),
            event.fusion_confidence
        );
        self.event_tx.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrelationConfig, NodeConfig};
    use crate::ingest::{ChannelLabel, SensorChannelSample};
    use chrono::Utc;

    fn bundle(node_id: &str, label: ChannelLabel) -> HitBundle {
        HitBundle {
            node_id: node_id.to_string(),
            sequence: 1,
            node_timestamp_us: 0,
            received_at: Instant::now(),
            received_wall: Utc::now(),
            channels: [(
                label,
                SensorChannelSample {
                    peak: 1.0,
                    energy: 1.0,
                    energy2: 0.0,
                    tdoa_us: None,
                },
            )]
            .into_iter()
            .collect(),
        }
    }

    #[tokio::test]
    async fn test_task_times_out_partial_window() {
        let nodes = vec![NodeConfig::new("A"), NodeConfig::new("B")];
        let correlator = Correlator::new(&nodes, &CorrelationConfig::default());
        let (bundle_tx, bundle_rx) = mpsc::channel(8);
        let (_command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let state = Arc::new(SharedState::default());

        let handle = CorrelatorTask::new(
            correlator,
            bundle_rx,
            command_rx,
            event_tx,
            Duration::from_millis(5),
            Arc::clone(&state),
        )
        .start();

        bundle_tx.send(bundle("A", ChannelLabel::N)).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!event.complete);
        assert!(event.fusion_confidence < 1.0);
        assert_eq!(state.counters.snapshot().fused_partial, 1);

        drop(bundle_tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_after_reset_carry_new_epoch() {
        let nodes = vec![NodeConfig::new("A"), NodeConfig::new("B")];
        let correlator = Correlator::new(&nodes, &CorrelationConfig::default());
        let (bundle_tx, bundle_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);

        let _handle = CorrelatorTask::new(
            correlator,
            bundle_rx,
            command_rx,
            event_tx,
            Duration::from_millis(5),
            Arc::new(SharedState::default()),
        )
        .start();

        command_tx
            .send(CorrelatorCommand::Reset { epoch: 3 })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bundle_tx.send(bundle("A", ChannelLabel::E)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.epoch, 3);
        assert!(event.channels.contains(ChannelLabel::E));
    }
}
