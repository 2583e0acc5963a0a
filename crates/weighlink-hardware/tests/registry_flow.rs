//! Integration tests for the device registry.
//!
//! These tests drive mock devices through the [`DeviceManager`] and check
//! what reaches the notification sink.

mod common;

use common::{RecordingSink, fast_retries, id, scale, test_config};
use weighlink_hardware::mock::{MockDriver, WeightReading};
use weighlink_hardware::notify::Notification;
use weighlink_hardware::{
    DescriptorSet, DeviceManager, DeviceState, HardwareError, ReconnectionPolicy,
};

fn pair(old: &str, new: &str) -> (String, String) {
    (old.to_string(), new.to_string())
}

#[tokio::test]
async fn test_scale_lifecycle_reaches_sink() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (device, mock) = scale("scale-1", ReconnectionPolicy::disabled());
    manager.register_device(device).unwrap();

    manager.connect(&id("scale-1")).await.unwrap();
    manager.start(&id("scale-1")).await.unwrap();
    sink.wait_for_transition("scale-1", "Running").await;

    mock.unplug().unwrap();
    sink.wait_until(|log| {
        log.iter()
            .any(|n| matches!(n, Notification::Error { device_id, .. } if device_id == "scale-1"))
    })
    .await;

    assert_eq!(
        sink.transitions("scale-1"),
        vec![
            pair("Uninitialized", "Disconnected"),
            pair("Disconnected", "Connecting"),
            pair("Connecting", "Connected"),
            pair("Connected", "Running"),
            pair("Running", "Error"),
        ]
    );

    assert_eq!(
        sink.errors("scale-1"),
        vec![Notification::Error {
            device_id: "scale-1".to_string(),
            device_type: "Scale".to_string(),
            message: "Device disconnected: cable unplugged".to_string(),
            severity: "Error".to_string(),
        }]
    );

    for notification in sink.notifications() {
        if let Notification::StatusUpdate { device_type, .. } = notification {
            assert_eq!(device_type, "Scale");
        }
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (first, _mock1) = scale("scale-1", ReconnectionPolicy::disabled());
    let (second, mock2) = scale("scale-1", ReconnectionPolicy::disabled());

    manager.register_device(first).unwrap();
    let err = manager.register_device(second).unwrap_err();

    assert!(matches!(err, HardwareError::DuplicateIdentity { ref id } if id.as_str() == "scale-1"));
    assert_eq!(manager.device_count(), 1);

    // The original registration is untouched
    manager.connect(&id("scale-1")).await.unwrap();
    assert_eq!(mock2.open_count(), 0);

    sink.wait_until(|log| log.iter().any(|n| matches!(n, Notification::ListChanged)))
        .await;
    sink.wait_for_transition("scale-1", "Connected").await;
    assert_eq!(sink.list_changes(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unregister_notifies_once() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (device, mock) = scale("scale-1", ReconnectionPolicy::disabled());
    let handle = manager.register_device(device).unwrap();
    sink.wait_until(|log| log.iter().any(|n| matches!(n, Notification::ListChanged)))
        .await;

    manager.connect(&id("scale-1")).await.unwrap();
    manager.start(&id("scale-1")).await.unwrap();

    assert!(!manager.unregister_device(&id("missing")).await);
    assert_eq!(sink.list_changes(), 1);

    assert!(manager.unregister_device(&id("scale-1")).await);
    assert_eq!(sink.list_changes(), 2);
    assert!(!manager.contains(&id("scale-1")));
    assert!(!mock.is_open());
    assert!(!handle.is_alive());

    // Second removal is a no-op
    assert!(!manager.unregister_device(&id("scale-1")).await);
    assert_eq!(sink.list_changes(), 2);

    assert!(matches!(
        manager.start(&id("scale-1")).await,
        Err(HardwareError::DeviceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_observed_transitions_chain() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (device, mock) = scale("scale-1", fast_retries(Some(5)));
    manager.register_device(device).unwrap();
    let scale_id = id("scale-1");

    manager.connect(&scale_id).await.unwrap();
    manager.start(&scale_id).await.unwrap();
    manager.pause(&scale_id).await.unwrap();
    manager.resume(&scale_id).await.unwrap();
    manager.stop(&scale_id).await.unwrap();
    manager.enter_demo(&scale_id).await.unwrap();
    manager.stop(&scale_id).await.unwrap();
    mock.fail_next_connects(1);
    assert!(manager.connect(&scale_id).await.is_err());
    manager.reconnect(&scale_id).await.unwrap();
    manager.stop(&scale_id).await.unwrap();

    sink.wait_until(|log| {
        log.iter()
            .filter(|n| matches!(n, Notification::StatusUpdate { new_state, .. } if new_state == "Disconnected"))
            .count()
            == 4
    })
    .await;

    let transitions = sink.transitions("scale-1");
    assert_eq!(transitions[0].0, "Uninitialized");
    for window in transitions.windows(2) {
        assert_eq!(window[0].1, window[1].0, "broken chain: {transitions:?}");
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn test_data_fan_out() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (device, mock) = scale("scale-1", ReconnectionPolicy::disabled());
    manager.register_device(device).unwrap();
    manager.connect(&id("scale-1")).await.unwrap();
    manager.start(&id("scale-1")).await.unwrap();

    mock.push(WeightReading::stable(12_480.0)).unwrap();
    mock.push(WeightReading::in_motion(12_490.5)).unwrap();

    sink.wait_until(|log| {
        log.iter()
            .filter(|n| matches!(n, Notification::Data { .. }))
            .count()
            == 2
    })
    .await;

    let data: Vec<_> = sink
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Data {
                payload,
                sequence_number,
                is_synthetic,
                device_type,
                ..
            } => Some((payload, sequence_number, is_synthetic, device_type)),
            _ => None,
        })
        .collect();

    assert_eq!(data[0].0["weight"], 12_480.0);
    assert_eq!(data[0].0["stable"], true);
    assert_eq!(data[1].0["stable"], false);
    assert_eq!(data[0].1, 1);
    assert_eq!(data[1].1, 2);
    assert!(data.iter().all(|d| !d.2 && d.3 == "Scale"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_demo_mode_is_synthetic() {
    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    let (driver, _mock) = MockDriver::scanner("gate");
    manager
        .register_device(weighlink_hardware::Device::new(id("gate"), driver))
        .unwrap();
    manager.enter_demo(&id("gate")).await.unwrap();

    sink.wait_until(|log| log.iter().any(|n| matches!(n, Notification::Data { .. })))
        .await;

    let synthetic = sink.notifications().into_iter().all(|n| match n {
        Notification::Data { is_synthetic, .. } => is_synthetic,
        _ => true,
    });
    assert!(synthetic);
    assert_eq!(manager.status(&id("gate")).unwrap().state, DeviceState::Demo);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_register_from_descriptors() {
    let set = DescriptorSet::from_json_str(
        r#"{ "devices": [
            {
                "id": "dock-1",
                "metadata": { "device_type": "Scale", "name": "Dock 1", "protocol": "Simulated" },
                "protocol": { "type": "simulated" },
                "polling_interval_ms": 100,
                "reconnection": { "enabled": false }
            },
            {
                "id": "dock-2",
                "metadata": { "device_type": "Scale", "name": "Dock 2", "protocol": "Simulated" },
                "protocol": { "type": "simulated" }
            }
        ]}"#,
    )
    .unwrap();

    let sink = RecordingSink::new();
    let manager = DeviceManager::new(sink.clone(), test_config());

    for descriptor in &set.devices {
        let (driver, _mock) = MockDriver::scale(descriptor.metadata.name.clone());
        manager.register_from_descriptor(descriptor, driver).unwrap();
    }

    assert_eq!(manager.device_ids(), vec![id("dock-1"), id("dock-2")]);
    assert_eq!(manager.handle(&id("dock-2")).unwrap().metadata().name, "Dock 2");

    let results = manager.connect_all().await;
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let statuses = manager.statuses();
    assert!(statuses.iter().all(|(_, s)| s.state == DeviceState::Connected));

    manager.shutdown().await;
    assert_eq!(manager.device_count(), 0);
}
