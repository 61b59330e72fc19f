mod common;

use std::time::Duration;

use common::{assert_close, blank, sensor_for, waking_scene, ServerRecorder};
use shared::config_storage::NodeConfig;
use shared::packet::route;
use tokio::sync::oneshot;
use vsn_client::transport::Link;
use vsn_client::{NodeState, Reactor};

#[tokio::test(start_paused = true)]
async fn test_tick_period_shrinks_once_activation_crosses_threshold() {
    // Seed frame plus three idle ticks, then motion
    let (sensor, stats) = sensor_for(waking_scene(4));
    let (link, mut server) = Link::pair();
    let mut reactor = Reactor::standalone(NodeConfig::default(), sensor, Some(link));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let collect = async move {
        let mut recorder = ServerRecorder::new();
        while recorder.data.len() < 8 {
            let record = server.recv().await.expect("reactor hung up early");
            route(record, &mut recorder).unwrap();
        }
        let _ = stop_tx.send(());
        // Keep the link open until the reactor has seen the stop signal
        (recorder, server)
    };
    let shutdown = async {
        let _ = stop_rx.await;
    };

    let (result, (recorder, _server)) = tokio::join!(reactor.run(shutdown), collect);
    result.unwrap();
    assert_eq!(reactor.state(), NodeState::Stopped);
    assert!(recorder.reports.is_empty());

    let sample_times: Vec<f64> = recorder.data.iter().map(|p| p.sample_time).collect();
    assert_eq!(sample_times, vec![1.0, 1.0, 1.0, 0.1, 0.1, 0.1, 0.1, 0.1]);

    // First tick one idle period after start
    assert_close(recorder.arrivals[0], 1000);
    let intervals = recorder.intervals();
    for interval in &intervals[..3] {
        assert_close(*interval, 1000);
    }
    for interval in &intervals[3..] {
        assert_close(*interval, 100);
    }

    // Idle ticks carry no image, active ones carry a JPEG
    assert!(recorder.data[..3].iter().all(|p| p.image.is_none()));
    let image = recorder.data[3].image.as_ref().expect("active tick attaches an image");
    assert_eq!(&image[..2], &[0xFF, 0xD8]);

    assert!(recorder.data[..3].iter().all(|p| p.white_pixels == 0.0));
    assert_eq!(recorder.data[3].white_pixels, 8.0);
    assert!(recorder.data[3].activation_level > 15.0);
    assert_eq!(recorder.data[3].gain, 0.1);

    // Only the idle ticks asked the camera to drop stale frames
    assert_eq!(stats.slow_mode_grabs(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_local_only_node_keeps_sampling() {
    let (sensor, stats) = sensor_for(vec![blank()]);
    let mut reactor = Reactor::standalone(NodeConfig::default(), sensor, None);

    reactor
        .run(tokio::time::sleep(Duration::from_millis(3500)))
        .await
        .unwrap();

    assert_eq!(reactor.state(), NodeState::Stopped);
    // Seed frame plus ticks at 1 s, 2 s and 3 s
    assert_eq!(stats.grabs(), 4);
    let controller = reactor.controller().unwrap();
    assert_eq!(controller.percentage_active_pixels(), 0.0);
    assert!(controller.is_below_threshold());
}

#[tokio::test(start_paused = true)]
async fn test_send_image_attaches_images_while_idle() {
    let (sensor, _stats) = sensor_for(vec![blank()]);
    let (link, mut server) = Link::pair();
    let config = NodeConfig {
        send_image: true,
        ..NodeConfig::default()
    };
    let mut reactor = Reactor::standalone(config, sensor, Some(link));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let collect = async move {
        let mut recorder = ServerRecorder::new();
        let record = server.recv().await.expect("reactor hung up early");
        route(record, &mut recorder).unwrap();
        let _ = stop_tx.send(());
        (recorder, server)
    };
    let shutdown = async {
        let _ = stop_rx.await;
    };

    let (result, (recorder, _server)) = tokio::join!(reactor.run(shutdown), collect);
    result.unwrap();
    assert_eq!(recorder.data[0].sample_time, 1.0);
    assert!(recorder.data[0].image.is_some());
}
