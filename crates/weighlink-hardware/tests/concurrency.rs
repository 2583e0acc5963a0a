//! Registry behaviour on a multi-threaded runtime.
//!
//! Supervisors, relays and callers run on different worker threads here, so
//! these tests catch ordering problems the current-thread tests cannot.

mod common;

use common::{RecordingSink, id, scale, test_config};
use std::time::Duration;
use weighlink_hardware::notify::Notification;
use weighlink_hardware::{DeviceManager, DeviceState, ReconnectionPolicy};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_matches_reply() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (device, _mock) = scale("scale-1", ReconnectionPolicy::disabled());
    manager.register_device(device).unwrap();
    let scale_id = id("scale-1");

    for round in 0..1000 {
        manager.connect(&scale_id).await.unwrap();
        assert_eq!(
            manager.status(&scale_id).unwrap().state,
            DeviceState::Connected,
            "round {round}"
        );

        manager.stop(&scale_id).await.unwrap();
        assert_eq!(
            manager.statuses()[0].1.state,
            DeviceState::Disconnected,
            "round {round}"
        );
    }

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_churn_beside_a_busy_device() {
    const ROUNDS: usize = 25;

    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (busy, _busy_mock) = scale("scale-a", ReconnectionPolicy::disabled());
    manager.register_device(busy).unwrap();
    manager.enter_demo(&id("scale-a")).await.unwrap();

    for _ in 0..ROUNDS {
        let (device, _mock) = scale("scale-b", ReconnectionPolicy::disabled());
        manager.register_device(device).unwrap();
        manager.connect(&id("scale-b")).await.unwrap();
        assert!(manager.unregister_device(&id("scale-b")).await);
    }

    let expected = 1 + 2 * ROUNDS;
    sink.wait_until(|log| {
        log.iter()
            .filter(|n| matches!(n, Notification::ListChanged))
            .count()
            == expected
    })
    .await;
    sink.wait_until(|log| {
        log.iter()
            .filter(|n| matches!(n, Notification::Data { device_id, .. } if device_id == "scale-a"))
            .count()
            >= 3
    })
    .await;

    // Nothing late trickles in
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.list_changes(), expected);

    let transitions = sink.transitions("scale-a");
    assert_eq!(transitions[0].0, "Uninitialized");
    for window in transitions.windows(2) {
        assert_eq!(window[0].1, window[1].0, "broken chain: {transitions:?}");
    }
    assert_eq!(
        transitions.last(),
        Some(&("Disconnected".to_string(), "Demo".to_string()))
    );

    assert_eq!(manager.device_ids(), vec![id("scale-a")]);
    assert_eq!(
        manager.status(&id("scale-a")).unwrap().state,
        DeviceState::Demo
    );

    manager.shutdown().await;
}
