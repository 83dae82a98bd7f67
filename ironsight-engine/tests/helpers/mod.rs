//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ironsight_common::events::IronsightEvent;
use ironsight_engine::api::{create_router, AppContext};
use ironsight_engine::config::{EngineConfig, NodeConfig};
use ironsight_engine::ingest::ChannelLabel;
use ironsight_engine::{Pipeline, SharedState};
use serde_json::{json, Map, Value};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(2);

/// Config whose nodes all listen on an ephemeral loopback port
pub fn loopback_config(node_ids: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.nodes = node_ids
        .iter()
        .map(|id| {
            let mut node = NodeConfig::new(id);
            node.bind = "127.0.0.1:0".parse().unwrap();
            node
        })
        .collect();
    config.scoring.refractory_ms = 0;
    config
}

/// Two nodes sharing one socket, each owning half the sensors
pub fn split_config() -> EngineConfig {
    let mut config = loopback_config(&["PICO_A01", "PICO_B01"]);
    config.nodes[0].channels = vec![ChannelLabel::N, ChannelLabel::E];
    config.nodes[1].channels = vec![ChannelLabel::S, ChannelLabel::W];
    config.correlation.timeout_ms = 200;
    config
}

pub async fn start_pipeline(config: &EngineConfig) -> Pipeline {
    let state = Arc::new(SharedState::new(config.events.capacity));
    Pipeline::start(config, state)
        .await
        .expect("Failed to start pipeline")
}

/// Pipeline plus router for HTTP tests
pub async fn test_app(config: EngineConfig) -> (axum::Router, Pipeline) {
    let pipeline = start_pipeline(&config).await;
    let ctx = AppContext::new(pipeline.handle(), pipeline.state(), Arc::new(config))
        .expect("Failed to build context");
    (create_router(ctx), pipeline)
}

/// One `hit_bundle` datagram with label-keyed channels and no timing
pub fn hit_bundle(node: &str, seq: u64, energies: &[(&str, f64)]) -> Vec<u8> {
    let mut ch = Map::new();
    for (label, energy) in energies {
        ch.insert(
            label.to_string(),
            json!({"peak": energy.sqrt(), "energy": energy, "energy2": energy / 10.0}),
        );
    }
    serde_json::to_vec(&json!({
        "type": "hit_bundle",
        "node": node,
        "seq": seq,
        "t_ms": 1000 + seq * 10,
        "ch": Value::Object(ch),
    }))
    .unwrap()
}

/// Equal energy on all four sensors: a dead-centre impact
pub fn centre_hit(node: &str, seq: u64) -> Vec<u8> {
    hit_bundle(
        node,
        seq,
        &[("N", 500.0), ("E", 500.0), ("S", 500.0), ("W", 500.0)],
    )
}

pub async fn send(addr: SocketAddr, datagram: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(datagram, addr).await.unwrap();
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn next_event<F>(rx: &mut broadcast::Receiver<IronsightEvent>, pred: F) -> IronsightEvent
where
    F: Fn(&IronsightEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

/// Poll `check` until it returns true or the wait expires
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
