//! Bootstrap config files driving a real pipeline

mod helpers;

use std::io::Write;

use helpers::*;
use ironsight_common::config::ConfigSource;
use ironsight_common::events::IronsightEvent;
use ironsight_engine::config::EngineConfig;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
        [scoring]
        ring_radii = [0.1, 0.2]
        "#,
    );
    let result = EngineConfig::load(&ConfigSource::File(file.path().to_path_buf()));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_file_config_drives_pipeline() {
    let file = write_config(
        r#"
        [http]
        port = 0

        [[nodes]]
        node_id = "LANE_3"
        bind = "127.0.0.1:0"
        channel_map = { "a" = "N", "b" = "E", "c" = "S", "d" = "W" }

        [scoring]
        ring_radii = [0.02, 0.04, 0.06, 0.08, 0.10, 0.12, 0.14, 0.16, 0.18, 0.20, 0.22]
        refractory_ms = 0

        [session]
        arrows_per_end = 6
        num_ends = 12
        "#,
    );
    let config = EngineConfig::load(&ConfigSource::File(file.path().to_path_buf())).unwrap();
    assert_eq!(config.nodes[0].node_id, "LANE_3");

    let pipeline = start_pipeline(&config).await;
    let handle = pipeline.handle();
    let mut rx = pipeline.state().subscribe_events();

    let session = handle.start_session(None, None, None).await.unwrap();
    assert_eq!(session.target_arrows, 72);

    // Firmware channel keys resolved through the configured map
    let datagram = hit_bundle(
        "LANE_3",
        1,
        &[("a", 250.0), ("b", 250.0), ("c", 250.0), ("d", 250.0)],
    );
    send(pipeline.node_addrs()[0], &datagram).await;

    let IronsightEvent::ShotScored { record, .. } = next_event(&mut rx, |e| {
        matches!(e, IronsightEvent::ShotScored { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert!(record.shot.is_x);
    assert_eq!(record.channels.len(), 4);

    assert_eq!(handle.ring_radii().await.unwrap()[0], 0.02);

    pipeline.shutdown();
}
