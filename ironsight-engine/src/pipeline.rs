//! Pipeline assembly
//!
//! Wires listener tasks → correlator task → scoring processor:
//!
//! ```text
//! UDP ─► NodeListener (one per socket) ─┐
//! UDP ─► NodeListener ──────────────────┴─► CorrelatorTask ─► ScoringProcessor ─► EventBus
//!                                               ▲                   │
//!                                               └── Reset{epoch} ◄──┘
//! ```

use ironsight_common::time;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fusion::{Correlator, CorrelatorTask};
use crate::ingest::NodeListener;
use crate::scoring::{EngineHandle, Scorekeeper, ScoringProcessor};
use crate::state::SharedState;

const CORRELATOR_COMMAND_QUEUE: usize = 16;

/// Running ingest/fusion/scoring tasks
pub struct Pipeline {
    handle: EngineHandle,
    state: Arc<SharedState>,
    node_addrs: Vec<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Bind every node socket and spawn the pipeline tasks
    pub async fn start(config: &EngineConfig, state: Arc<SharedState>) -> Result<Self> {
        let capacity = config.ingest.queue_capacity;
        let (bundle_tx, bundle_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (correlator_tx, correlator_rx) = mpsc::channel(CORRELATOR_COMMAND_QUEUE);

        let keeper = Scorekeeper::new(config, Arc::clone(&state), Instant::now())?;

        let mut listeners = Vec::new();
        for (addr, nodes) in config.nodes_by_bind() {
            let listener = NodeListener::bind(
                addr,
                &nodes,
                &config.ingest,
                bundle_tx.clone(),
                Arc::clone(&state),
            )
            .await?;
            listeners.push(listener);
        }
        // Listeners hold the only senders, so the correlator stops with them
        drop(bundle_tx);

        let node_addrs = listeners
            .iter()
            .map(NodeListener::local_addr)
            .collect::<Result<Vec<_>>>()?;

        let correlator = Correlator::new(&config.nodes, &config.correlation);
        info!(
            "Correlator mode {:?} over {} node(s)",
            correlator.mode(),
            config.nodes.len()
        );
        let correlator_task = CorrelatorTask::new(
            correlator,
            bundle_rx,
            correlator_rx,
            event_tx,
            time::millis_to_duration(config.correlation.sweep_interval_ms),
            Arc::clone(&state),
        );
        let (processor, handle) = ScoringProcessor::new(keeper, event_rx, correlator_tx);

        let mut tasks = vec![processor.start(), correlator_task.start()];
        tasks.extend(listeners.into_iter().map(NodeListener::start));

        Ok(Self {
            handle,
            state,
            node_addrs,
            tasks,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Bound UDP addresses, in `nodes_by_bind` order
    pub fn node_addrs(&self) -> &[SocketAddr] {
        &self.node_addrs
    }

    /// Abort every task
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("Pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn loopback_config(node_ids: &[&str]) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.nodes = node_ids
            .iter()
            .map(|id| {
                let mut node = NodeConfig::new(id);
                node.bind = "127.0.0.1:0".parse().unwrap();
                node
            })
            .collect();
        config
    }

    #[tokio::test]
    async fn test_start_binds_and_serves_commands() {
        let config = loopback_config(&["PICO_A01"]);
        let pipeline = Pipeline::start(&config, Arc::new(SharedState::default()))
            .await
            .unwrap();

        assert_eq!(pipeline.node_addrs().len(), 1);
        assert_ne!(pipeline.node_addrs()[0].port(), 0);
        assert!(pipeline.handle().snapshot().await.is_ok());
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn test_nodes_sharing_a_socket_share_a_listener() {
        let mut config = loopback_config(&["A", "B"]);
        let shared: SocketAddr = "127.0.0.1:0".parse().unwrap();
        for node in &mut config.nodes {
            node.bind = shared;
        }
        let pipeline = Pipeline::start(&config, Arc::new(SharedState::default()))
            .await
            .unwrap();
        assert_eq!(pipeline.node_addrs().len(), 1);
        pipeline.shutdown();
    }
}
