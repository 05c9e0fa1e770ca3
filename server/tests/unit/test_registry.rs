//! Device registry and presence tests

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

use fleetd::events::hub::{Event, EventHub};
use fleetd::registry::device::DeviceStatus;
use fleetd::registry::registry::{DeviceRegistry, HeartbeatMetrics, PresencePolicy};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn new_registry() -> (Arc<EventHub>, DeviceRegistry) {
    let hub = Arc::new(EventHub::new(64));
    let registry = DeviceRegistry::new(PresencePolicy::default(), hub.clone());
    (hub, registry)
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_heartbeat_marks_device_online_until_timeout() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();
    assert_eq!(registry.status_of(&device.id, t0), Some(DeviceStatus::Offline));

    registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), t0)
        .unwrap();

    // Timeout is 240s; status at 239 and 240 is online, at 241 offline
    let at = |secs: i64| t0 + Duration::seconds(secs);
    assert_eq!(registry.status_of(&device.id, at(239)), Some(DeviceStatus::Online));
    assert_eq!(registry.status_of(&device.id, at(240)), Some(DeviceStatus::Online));
    assert_eq!(registry.status_of(&device.id, at(241)), Some(DeviceStatus::Offline));
}

#[test]
fn test_sweep_publishes_each_flip_once() {
    let (hub, registry) = new_registry();
    let mut rx = hub.subscribe();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();
    registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), t0)
        .unwrap();
    drain(&mut rx);

    // Past the timeout the sweep flips the device offline, once
    let late = t0 + Duration::seconds(241);
    assert_eq!(registry.sweep(late), 1);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::DeviceUpdated { device_id, status, .. } => {
            assert_eq!(device_id, &device.id);
            assert_eq!(status, "offline");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Sweeping again with nothing changed publishes nothing
    assert_eq!(registry.sweep(late + Duration::seconds(30)), 0);
    assert!(drain(&mut rx).is_empty());

    // The next heartbeat flips it back online and publishes again
    registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), late + Duration::seconds(60))
        .unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::DeviceUpdated { status, .. } => assert_eq!(status, "online"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_metric_churn_does_not_publish() {
    let (hub, registry) = new_registry();
    let mut rx = hub.subscribe();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();

    let beat = |secs: i64, battery: u8| {
        registry
            .record_heartbeat(
                &device.token,
                HeartbeatMetrics {
                    battery: Some(battery),
                    app_version: None,
                },
                t0 + Duration::seconds(secs),
            )
            .unwrap();
    };

    beat(0, 80); // flip to online + first battery reading
    drain(&mut rx);

    beat(30, 80); // identical metrics, still online: no event
    assert!(drain(&mut rx).is_empty());

    beat(60, 79); // battery moved a full percent: material
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_fast_heartbeats_rate_limited_past_burst() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();

    let beat = |secs: i64| {
        registry.record_heartbeat(
            &device.token,
            HeartbeatMetrics::default(),
            t0 + Duration::seconds(secs),
        )
    };

    // First beat plus ten fast beats are accepted
    beat(0).unwrap();
    for i in 1..=10 {
        beat(i).unwrap();
    }

    // The next fast beat exceeds the burst allowance
    let err = beat(11).unwrap_err();
    assert_eq!(err.kind(), "rate_limited");

    // A properly spaced beat resets the counter
    beat(25).unwrap();
    beat(26).unwrap();
}

#[test]
fn test_unknown_token_is_unauthenticated() {
    let (_hub, registry) = new_registry();
    let err = registry
        .record_heartbeat("bogus", HeartbeatMetrics::default(), base_time())
        .unwrap_err();
    assert_eq!(err.kind(), "unauthenticated");
}

#[test]
fn test_removed_device_token_stops_resolving() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();
    registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), t0)
        .unwrap();

    registry.remove(&device.id).unwrap();

    let err = registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), t0 + Duration::seconds(30))
        .unwrap_err();
    assert_eq!(err.kind(), "unauthenticated");

    // Tombstoned devices disappear from listings
    let page = registry.list(1, 20, t0 + Duration::seconds(30)).unwrap();
    assert_eq!(page.total_count, 0);

    // Removing twice reports not found
    assert_eq!(registry.remove(&device.id).unwrap_err().kind(), "not_found");
}

#[test]
fn test_rename_updates_alias_only() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();

    let renamed = registry.rename(&device.id, "warehouse-scanner".to_string()).unwrap();
    assert_eq!(renamed.alias, "warehouse-scanner");
    assert_eq!(renamed.id, device.id);
    assert_eq!(renamed.token, device.token);

    let err = registry.rename(&device.id, "   ".to_string()).unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_list_pagination() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    for i in 0..5 {
        registry
            .register(format!("tablet-{}", i), None, t0 + Duration::seconds(i))
            .unwrap();
    }

    let page1 = registry.list(1, 2, t0 + Duration::seconds(10)).unwrap();
    assert_eq!(page1.devices.len(), 2);
    assert_eq!(page1.total_count, 5);
    assert_eq!(page1.total_pages, 3);
    assert!(page1.has_next);
    assert!(!page1.has_prev);
    // Stable order: oldest registration first
    assert_eq!(page1.devices[0].device.alias, "tablet-0");

    let page3 = registry.list(3, 2, t0 + Duration::seconds(10)).unwrap();
    assert_eq!(page3.devices.len(), 1);
    assert!(!page3.has_next);
    assert!(page3.has_prev);

    assert_eq!(registry.list(1, 0, t0).unwrap_err().kind(), "validation");
}

#[test]
fn test_list_page_far_past_end_is_empty() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    for i in 0..3 {
        registry.register(format!("tablet-{}", i), None, t0).unwrap();
    }

    // A caller-supplied page beyond any real offset must not panic
    let page = registry.list(u64::MAX, 200, t0).unwrap();
    assert!(page.devices.is_empty());
    assert_eq!(page.total_count, 3);
    assert!(!page.has_next);
    assert!(page.has_prev);
}

#[test]
fn test_heartbeat_ack_reports_status_flips() {
    let (_hub, registry) = new_registry();
    let t0 = base_time();

    let device = registry
        .register("lobby-tablet".to_string(), None, t0)
        .unwrap();

    let beat = |secs: i64| {
        registry
            .record_heartbeat(
                &device.token,
                HeartbeatMetrics::default(),
                t0 + Duration::seconds(secs),
            )
            .unwrap()
    };

    // First beat flips offline -> online; listing caches must be dropped
    assert!(beat(0).status_flipped);

    // A beat while already online is not a flip
    assert!(!beat(30).status_flipped);

    // After the sweep takes the device offline, the next beat flips again
    registry.sweep(t0 + Duration::seconds(300));
    assert!(beat(400).status_flipped);
}
