//! End-to-end pipeline tests over real loopback UDP
//!
//! Datagrams go in through the node sockets; results are observed on the
//! event bus and through the engine handle.

mod helpers;

use std::sync::atomic::Ordering;

use helpers::*;
use ironsight_common::events::{IronsightEvent, Mode};

fn is_shot(event: &IronsightEvent) -> bool {
    matches!(event, IronsightEvent::ShotScored { .. })
}

#[tokio::test]
async fn test_centre_impact_is_scored_into_session() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let handle = pipeline.handle();
    let mut rx = pipeline.state().subscribe_events();

    let session = handle.start_session(Some(3), Some(2), None).await.unwrap();
    send(pipeline.node_addrs()[0], &centre_hit("PICO_A01", 1)).await;

    let IronsightEvent::ShotScored {
        record, scorecard, ..
    } = next_event(&mut rx, is_shot).await
    else {
        unreachable!()
    };
    assert!(record.shot.is_x);
    assert_eq!(record.shot.score, 10);
    assert!(record.shot.r < 1e-9);
    assert_eq!(record.shot.session_id, Some(session.session_id));
    assert_eq!(record.shot.end_number, Some(1));
    assert_eq!(record.shot.shot_number, Some(1));
    assert_eq!(record.node_ids, vec!["PICO_A01".to_string()]);

    let scorecard = scorecard.expect("shot should be attributed");
    assert_eq!(scorecard.total, 10);
    assert_eq!(scorecard.total_arrows, 1);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_shot_without_session_is_unattributed() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let mut rx = pipeline.state().subscribe_events();

    send(pipeline.node_addrs()[0], &centre_hit("PICO_A01", 1)).await;

    let IronsightEvent::ShotScored {
        record, scorecard, ..
    } = next_event(&mut rx, is_shot).await
    else {
        unreachable!()
    };
    assert_eq!(record.shot.session_id, None);
    assert!(scorecard.is_none());
    assert!(pipeline.handle().shots().await.unwrap().is_empty());

    pipeline.shutdown();
}

#[tokio::test]
async fn test_dominant_north_sensor_places_shot_north() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let mut rx = pipeline.state().subscribe_events();

    let datagram = hit_bundle(
        "PICO_A01",
        1,
        &[("N", 400.0), ("E", 200.0), ("S", 200.0), ("W", 200.0)],
    );
    send(pipeline.node_addrs()[0], &datagram).await;

    let IronsightEvent::ShotScored { record, .. } = next_event(&mut rx, is_shot).await else {
        unreachable!()
    };
    assert!(record.shot.y > 0.0);
    assert!(record.shot.x.abs() < 1e-9);
    assert!(!record.shot.is_x);
    assert!(record.shot.score < 10);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_replayed_and_unknown_datagrams_are_counted() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let addr = pipeline.node_addrs()[0];
    let state = pipeline.state();

    send(addr, &centre_hit("PICO_A01", 5)).await;
    send(addr, &centre_hit("PICO_A01", 5)).await;
    send(addr, &centre_hit("PICO_Z99", 1)).await;
    send(addr, b"not json").await;

    eventually(|| {
        let state = state.clone();
        async move {
            let c = &state.counters;
            c.dropped_replay.load(Ordering::Relaxed) == 1
                && c.dropped_unknown_node.load(Ordering::Relaxed) == 1
                && c.dropped_malformed.load(Ordering::Relaxed) == 1
        }
    })
    .await;
    assert_eq!(state.counters.bundles_accepted.load(Ordering::Relaxed), 1);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_scoring_mode_ignores_impacts() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let handle = pipeline.handle();
    let state = pipeline.state();

    handle.set_mode(Mode::Scoring).await.unwrap();
    send(pipeline.node_addrs()[0], &centre_hit("PICO_A01", 1)).await;

    eventually(|| {
        let state = state.clone();
        async move { state.counters.ignored_while_scoring.load(Ordering::Relaxed) == 1 }
    })
    .await;
    assert!(handle.shots().await.unwrap().is_empty());

    pipeline.shutdown();
}

#[tokio::test]
async fn test_split_nodes_fuse_into_one_shot() {
    let config = split_config();
    let pipeline = start_pipeline(&config).await;
    let addr = pipeline.node_addrs()[0];
    let mut rx = pipeline.state().subscribe_events();

    send(addr, &hit_bundle("PICO_A01", 1, &[("N", 300.0), ("E", 300.0)])).await;
    send(addr, &hit_bundle("PICO_B01", 1, &[("S", 300.0), ("W", 300.0)])).await;

    let IronsightEvent::ShotScored { record, .. } = next_event(&mut rx, is_shot).await else {
        unreachable!()
    };
    assert_eq!(record.node_ids.len(), 2);
    assert!(record.node_ids.contains(&"PICO_A01".to_string()));
    assert!(record.node_ids.contains(&"PICO_B01".to_string()));
    assert_eq!(record.channels.len(), 4);
    assert!(record.shot.is_x);

    let counters = pipeline.state().counters.snapshot();
    assert_eq!(counters.fused_complete, 1);
    assert_eq!(counters.fused_partial, 0);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_lone_node_times_out_as_partial_event() {
    let config = split_config();
    let pipeline = start_pipeline(&config).await;
    let mut rx = pipeline.state().subscribe_events();

    send(
        pipeline.node_addrs()[0],
        &hit_bundle("PICO_A01", 1, &[("N", 300.0), ("E", 100.0)]),
    )
    .await;

    let IronsightEvent::ShotScored { record, .. } = next_event(&mut rx, is_shot).await else {
        unreachable!()
    };
    assert_eq!(record.node_ids, vec!["PICO_A01".to_string()]);
    assert!(record.fusion_confidence < 1.0);
    assert_eq!(pipeline.state().counters.snapshot().fused_partial, 1);

    pipeline.shutdown();
}

#[tokio::test]
async fn test_calibration_round_trip_installs_model() {
    let config = loopback_config(&["PICO_A01"]);
    let pipeline = start_pipeline(&config).await;
    let handle = pipeline.handle();
    let addr = pipeline.node_addrs()[0];
    let mut rx = pipeline.state().subscribe_events();

    handle.start_calibration().await.unwrap();

    // Raw estimates land north, east and at centre; truth is offset by +0.01 in x
    let impacts = [
        [("N", 400.0), ("E", 200.0), ("S", 200.0), ("W", 200.0)],
        [("N", 200.0), ("E", 400.0), ("S", 200.0), ("W", 200.0)],
        [("N", 200.0), ("E", 200.0), ("S", 200.0), ("W", 200.0)],
    ];
    for (seq, energies) in impacts.iter().enumerate() {
        send(addr, &hit_bundle("PICO_A01", seq as u64 + 1, energies)).await;
        let IronsightEvent::CalibrationPending { raw_x, raw_y, .. } = next_event(&mut rx, |e| {
            matches!(e, IronsightEvent::CalibrationPending { .. })
        })
        .await
        else {
            unreachable!()
        };
        handle
            .confirm_calibration(raw_x + 0.01, raw_y)
            .await
            .unwrap();
    }

    let IronsightEvent::CalibrationApplied { n, version, .. } = next_event(&mut rx, |e| {
        matches!(e, IronsightEvent::CalibrationApplied { n: 3, .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(n, 3);

    let status = handle.calibration_status().await.unwrap();
    assert_eq!(status.sample_count, 3);
    assert_eq!(status.model.version, version);
    assert!(status.model.mean_error_cm < 0.01);
    assert!(handle.shots().await.unwrap().is_empty());

    pipeline.shutdown();
}
