//! Auto-detection across registered drivers

use callout::endpoint::{EndpointConfig, ProtocolKind};
use callout::Announcer;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{registry_with, registry_with_timeout, store, SpyDriver};

fn spy(kind: ProtocolKind, ok: bool) -> Arc<SpyDriver> {
    let spy = SpyDriver::new(kind);
    spy.set_test_ok(ok);
    Arc::new(spy)
}

#[tokio::test]
async fn test_only_onvif_answers() {
    let drivers = [
        spy(ProtocolKind::VendorIsapi, false),
        spy(ProtocolKind::Onvif, true),
        spy(ProtocolKind::Rtsp, false),
    ];
    let announcer = Announcer::builder(store(Vec::new()))
        .registry(registry_with(&drivers))
        .build();

    let result = announcer.run_detection("192.0.2.20", 80, None).await;

    assert_eq!(result.kind, Some(ProtocolKind::Onvif));
    assert_eq!(result.attempts.len(), 3);
    assert_eq!(result.attempts[0].kind, ProtocolKind::Onvif);
    assert!(result.attempt(ProtocolKind::Onvif).unwrap().ok);
    assert!(!result.attempt(ProtocolKind::VendorIsapi).unwrap().ok);
    assert!(!result.attempt(ProtocolKind::Rtsp).unwrap().ok);
    for driver in &drivers {
        assert_eq!(driver.test_count(), 1);
    }
}

#[tokio::test]
async fn test_most_specific_wins_then_recency() {
    let drivers = [
        spy(ProtocolKind::GenericRest, true),
        spy(ProtocolKind::VendorCgi, true),
    ];
    let announcer = Announcer::builder(store(Vec::new()))
        .registry(registry_with(&drivers))
        .build();

    let result = announcer.run_detection("192.0.2.21", 80, None).await;
    assert_eq!(result.kind, Some(ProtocolKind::VendorCgi));
    assert_eq!(
        announcer.recent_kinds().get("192.0.2.21:80"),
        Some(&ProtocolKind::VendorCgi)
    );

    let hinted = Announcer::builder(store(Vec::new()))
        .registry(registry_with(&drivers))
        .recent_kinds([("192.0.2.21:80".to_string(), ProtocolKind::GenericRest)].into())
        .build();
    let result = hinted.run_detection("192.0.2.21", 80, None).await;
    assert_eq!(result.kind, Some(ProtocolKind::GenericRest));
}

#[tokio::test]
async fn test_nothing_answers() {
    let drivers = [spy(ProtocolKind::Onvif, false), spy(ProtocolKind::Rtsp, false)];
    let announcer = Announcer::builder(store(Vec::new()))
        .registry(registry_with(&drivers))
        .build();

    let result = announcer.run_detection("192.0.2.22", 80, None).await;
    assert!(!result.succeeded());
    assert_eq!(result.attempts.len(), 2);
    assert!(announcer.recent_kinds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_slow_driver() {
    let slow = spy(ProtocolKind::Onvif, true);
    slow.set_test_delay(Duration::from_secs(60));
    let fast = spy(ProtocolKind::Rtsp, true);

    let announcer = Announcer::builder(store(Vec::new()))
        .registry(registry_with_timeout(
            &[slow.clone(), fast.clone()],
            Duration::from_secs(30),
        ))
        .detection_deadline(Duration::from_secs(8))
        .build();

    let started = tokio::time::Instant::now();
    let result = announcer.run_detection("192.0.2.23", 554, None).await;

    assert!(started.elapsed() <= Duration::from_secs(9));
    assert_eq!(result.kind, Some(ProtocolKind::Rtsp));
    let onvif = result.attempt(ProtocolKind::Onvif).unwrap();
    assert!(!onvif.ok);
    assert_eq!(onvif.detail, "deadline exceeded");
}

#[tokio::test]
async fn test_configured_kind_breaks_tie() {
    let drivers = [
        spy(ProtocolKind::GenericRest, true),
        spy(ProtocolKind::VendorCgi, true),
    ];
    let desk = EndpointConfig::new("desk", "192.0.2.21", 80, ProtocolKind::GenericRest);
    let announcer = Announcer::builder(store(vec![desk]))
        .registry(registry_with(&drivers))
        .build();

    let result = announcer.run_detection("192.0.2.21", 80, None).await;
    assert_eq!(result.kind, Some(ProtocolKind::GenericRest));
}

#[tokio::test]
async fn test_reconfigured_kind_breaks_tie() {
    let drivers = [
        spy(ProtocolKind::GenericRest, true),
        spy(ProtocolKind::VendorCgi, true),
    ];
    let announcer = Announcer::builder(store(Vec::new()))
        .registry(registry_with(&drivers))
        .build();

    announcer
        .reconfigure(EndpointConfig::new(
            "desk",
            "192.0.2.24",
            80,
            ProtocolKind::GenericRest,
        ))
        .unwrap();

    let result = announcer.run_detection("192.0.2.24", 80, None).await;
    assert_eq!(result.kind, Some(ProtocolKind::GenericRest));
}
