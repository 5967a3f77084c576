//! Integration tests for session setup against the simulated bridge

use cortex_bci::{
    Credentials, IngestStatus, ProtocolClient, ProtocolError, SetupOptions, SimulatedBridge,
    SimulatedBridgeConfig, StopReason, StreamIngester, StreamStatus, WsOptions,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn credentials() -> Credentials {
    Credentials::new("integration-client", "integration-secret")
}

fn options(streams: &[&str]) -> SetupOptions {
    SetupOptions {
        streams: streams.iter().map(|s| s.to_string()).collect(),
        ..SetupOptions::default()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_partial_subscription_still_streams() {
    let config = SimulatedBridgeConfig {
        rejected_streams: vec!["mot".to_string()],
        ..SimulatedBridgeConfig::default()
    };
    let (_bridge, client_end) = SimulatedBridge::spawn(config).unwrap();

    let session =
        ProtocolClient::establish(Arc::new(client_end), credentials(), &options(&["eeg", "mot"]))
            .unwrap();

    let report = session.subscriptions();
    assert!(report.is_active("eeg"));
    assert!(report.is_partial());
    match report.status("mot") {
        Some(StreamStatus::Failed { code, .. }) => assert_eq!(*code, -32016),
        other => panic!("expected mot to fail, got {other:?}"),
    }
    match report.status("eeg") {
        Some(StreamStatus::Active { columns }) => {
            assert_eq!(columns.len(), 18);
            assert_eq!(columns[0], "TIMESTAMP");
            assert_eq!(columns[2], "AF3");
        }
        other => panic!("expected eeg to be active, got {other:?}"),
    }

    let ingester = StreamIngester::new("eeg");
    ingester.start(session).unwrap();
    assert!(wait_for(Duration::from_secs(2), || ingester.latest().is_some()));
    assert!(wait_for(Duration::from_secs(2), || {
        ingester.stats().snapshot().frames_published >= 10
    }));

    ingester.stop();
    assert_eq!(ingester.status(), IngestStatus::Stopped(StopReason::Requested));
    assert!(ingester.latest().is_some());
}

#[test]
fn test_nothing_subscribed_fails_setup() {
    let config = SimulatedBridgeConfig {
        rejected_streams: vec!["eeg".to_string()],
        ..SimulatedBridgeConfig::default()
    };
    let (_bridge, client_end) = SimulatedBridge::spawn(config).unwrap();

    let result = ProtocolClient::establish(Arc::new(client_end), credentials(), &options(&["eeg"]));
    match result {
        Err(ProtocolError::NothingSubscribed(report)) => {
            assert!(!report.any_active());
            assert_eq!(report.failed().count(), 1);
        }
        other => panic!("expected NothingSubscribed, got {other:?}"),
    }
}

#[test]
fn test_named_headset_must_exist() {
    let (_bridge, client_end) = SimulatedBridge::spawn(SimulatedBridgeConfig::default()).unwrap();
    let setup = SetupOptions {
        headset: Some("EPOCX-MISSING".to_string()),
        ..options(&["eeg"])
    };

    let result = ProtocolClient::establish(Arc::new(client_end), credentials(), &setup);
    assert!(matches!(result, Err(ProtocolError::Rpc { code: -32004, .. })));
}

#[test]
fn test_bridge_loss_surfaces_as_receive_failure() {
    let config = SimulatedBridgeConfig {
        max_frames: Some(25),
        ..SimulatedBridgeConfig::default()
    };
    let (_bridge, client_end) = SimulatedBridge::spawn(config).unwrap();
    let session =
        ProtocolClient::establish(Arc::new(client_end), credentials(), &options(&["eeg"])).unwrap();

    let ingester = StreamIngester::new("eeg");
    ingester.start(session).unwrap();

    assert!(wait_for(Duration::from_secs(3), || ingester.status().is_stopped()));
    assert!(matches!(
        ingester.status(),
        IngestStatus::Stopped(StopReason::ReceiveFailure(_))
    ));
    assert_eq!(ingester.stats().snapshot().frames_published, 25);

    // The last frame stays readable after the stream ends
    assert!(ingester.latest().is_some());
    ingester.stop();
}

#[test]
fn test_unreachable_bridge_is_connect_error() {
    let options = WsOptions {
        connect_timeout: Duration::from_secs(2),
        ..WsOptions::default()
    };
    // Bind then drop a listener so the port is known to be closed
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let result = ProtocolClient::connect(&format!("ws://127.0.0.1:{port}"), &options, credentials());
    match result {
        Err(e) => assert!(e.is_connect_error(), "unexpected error: {e}"),
        Ok(_) => panic!("connected to a closed port"),
    }
}
