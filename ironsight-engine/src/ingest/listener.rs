//! UDP node listener
//!
//! One listener task per bound socket. Each task parses, validates and
//! replay-checks datagrams from the nodes configured on its socket and
//! hands accepted bundles to the correlator. Rejected datagrams are
//! counted and logged; nothing a node sends can stop the task.

use ironsight_common::time;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::bundle::HitBundle;
use super::packet::{DropReason, IngestLimits, PacketError, PacketParser};
use super::sequence::SequenceTracker;
use crate::config::{IngestConfig, NodeConfig};
use crate::error::Result;
use crate::state::{PipelineCounters, SharedState};

/// Listener bound to one UDP socket
pub struct NodeListener {
    socket: UdpSocket,
    parser: PacketParser,
    sequences: SequenceTracker,
    max_datagram_bytes: usize,
    bundle_tx: mpsc::Sender<HitBundle>,
    state: Arc<SharedState>,
}

impl NodeListener {
    /// Bind `addr` for the given nodes
    ///
    /// Binding happens eagerly so the caller learns the local address (and
    /// any bind failure) before the task starts.
    pub async fn bind(
        addr: SocketAddr,
        nodes: &[&NodeConfig],
        ingest: &IngestConfig,
        bundle_tx: mpsc::Sender<HitBundle>,
        state: Arc<SharedState>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let limits = IngestLimits::from(ingest);
        let node_ids: Vec<&str> = nodes.iter().map(|n| n.node_id.as_str()).collect();
        info!(
            "Node listener bound on {} for nodes {:?}",
            socket.local_addr()?,
            node_ids
        );

        Ok(Self {
            socket,
            parser: PacketParser::new(nodes.iter().copied(), limits),
            sequences: SequenceTracker::new(time::millis_to_duration(ingest.node_idle_reset_ms)),
            max_datagram_bytes: limits.max_datagram_bytes,
            bundle_tx,
            state,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the receive loop
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        // One spare byte so an oversize datagram is detected, not truncated
        let mut buf = vec![0u8; self.max_datagram_bytes + 1];

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP port-unreachable and friends surface here on some platforms
                    debug!("UDP receive error: {}", e);
                    continue;
                }
            };
            let received_at = Instant::now();

            match self.accept(&buf[..len], received_at) {
                Ok(bundle) => {
                    trace!(
                        "Accepted bundle node={} seq={} channels={} from {}",
                        bundle.node_id,
                        bundle.sequence,
                        bundle.channels.len(),
                        peer
                    );
                    PipelineCounters::incr(&self.state.counters.bundles_accepted);
                    if self.bundle_tx.send(bundle).await.is_err() {
                        info!("Correlator gone, node listener stopping");
                        break;
                    }
                }
                Err(e) => {
                    self.state.counters.record_drop(e.reason());
                    match e.reason() {
                        // Duplicates are routine with UDP retransmits
                        DropReason::Replay => trace!("Dropped datagram from {}: {}", peer, e),
                        _ => warn!("Dropped datagram from {}: {}", peer, e),
                    }
                }
            }
        }
    }

    fn accept(&mut self, datagram: &[u8], received_at: Instant) -> std::result::Result<HitBundle, PacketError> {
        let bundle = self.parser.parse(datagram, received_at, time::now())?;
        self.sequences
            .check(&bundle.node_id, bundle.sequence, received_at)?;
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn bound_listener(
        capacity: usize,
    ) -> (NodeListener, mpsc::Receiver<HitBundle>, Arc<SharedState>) {
        let node = NodeConfig::new("PICO_A01");
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(SharedState::default());
        let listener = NodeListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            &[&node],
            &IngestConfig::default(),
            tx,
            Arc::clone(&state),
        )
        .await
        .unwrap();
        (listener, rx, state)
    }

    fn datagram(node: &str, seq: u64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "hit_bundle", "node": node, "seq": seq, "t_us": seq * 1000,
            "ch": {"N": {"peak": 5.0, "energy": 10.0, "energy2": 1.0}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_listener_forwards_valid_and_drops_invalid() {
        let (listener, mut rx, state) = bound_listener(8).await;
        let addr = listener.local_addr().unwrap();
        let handle = listener.start();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&datagram("PICO_A01", 1), addr).await.unwrap();
        sender.send_to(&datagram("PICO_A01", 1), addr).await.unwrap(); // replay
        sender.send_to(&datagram("STRANGER", 2), addr).await.unwrap();
        sender.send_to(b"garbage", addr).await.unwrap();
        sender.send_to(&datagram("PICO_A01", 2), addr).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.sequence, 1);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.sequence, 2);

        let snap = state.counters.snapshot();
        assert_eq!(snap.bundles_accepted, 2);
        assert_eq!(snap.dropped_replay, 1);
        assert_eq!(snap.dropped_unknown_node, 1);
        assert_eq!(snap.dropped_malformed, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_listener_stops_when_correlator_gone() {
        let (listener, rx, _state) = bound_listener(1).await;
        let addr = listener.local_addr().unwrap();
        drop(rx);
        let handle = listener.start();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&datagram("PICO_A01", 1), addr).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should exit")
            .unwrap();
    }
}
