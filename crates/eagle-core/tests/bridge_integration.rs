//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "test"
//! eagle_description: "Discovery and polling through the bridge facade."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use eagle_core::{
    BridgeEvent, BridgeSettings, ChannelObserver, ClientSettings, ConnectivityScope,
    ConnectivityStatus, DiscoverySettings, ErrorKind, FieldState, GatewayBridge, GatewayClient,
    GatewayEndpoint, OfflineReason, PollOutcome, ScanOutcome, TelemetryValue, ValueKind,
};
use support::{
    device_list, device_query, drain, next_matching, MockGateway, METER_A, METER_B,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn settings(scan_interval: Duration) -> BridgeSettings {
    BridgeSettings {
        discovery: DiscoverySettings {
            interval: scan_interval,
            initial_delay: Duration::ZERO,
            suggested_refresh: Duration::from_secs(60),
        },
        poll_initial_delay: Duration::ZERO,
    }
}

fn bridge(scan_interval: Duration) -> (GatewayBridge, UnboundedReceiver<BridgeEvent>) {
    let client = Arc::new(GatewayClient::new(ClientSettings::default()).unwrap());
    let (observer, rx) = ChannelObserver::new();
    let bridge = GatewayBridge::new(client, Arc::new(observer), settings(scan_interval), None);
    (bridge, rx)
}

fn is_discovery(event: &BridgeEvent) -> bool {
    matches!(event, BridgeEvent::DeviceDiscovered(_))
}

fn telemetry_for(meter: &str, event: &BridgeEvent) -> bool {
    matches!(event, BridgeEvent::TelemetryChanged { meter: m, .. } if m == meter)
}

#[tokio::test(flavor = "multi_thread")]
async fn discovers_polls_and_emits_only_changes() {
    let gateway = MockGateway::spawn().await;
    gateway.set_device_list(device_list(&[
        (METER_A, "electric_meter"),
        ("0x00135001002b3c4d", "thermostat"),
    ]));
    gateway.set_query(
        METER_A,
        device_query(
            METER_A,
            &[
                ("zigbee:InstantaneousDemand", "1.250"),
                ("zigbee:Message", "Hello & welcome"),
            ],
        ),
    );

    let (bridge, mut rx) = bridge(Duration::from_secs(3600));
    assert_eq!(bridge.configure(gateway.endpoint()), ConnectivityStatus::Online);
    bridge.start_discovery().await;

    let discovered = next_matching(&mut rx, is_discovery).await;
    let BridgeEvent::DeviceDiscovered(discovery) = discovered else {
        unreachable!()
    };
    assert_eq!(discovery.address, METER_A);
    assert_eq!(discovery.suggested_refresh, Duration::from_secs(60));

    bridge
        .start_polling(&discovery.address, Duration::from_secs(3600))
        .await
        .unwrap();

    let channels = next_matching(&mut rx, |e| {
        matches!(e, BridgeEvent::ChannelsSynthesized { .. })
    })
    .await;
    let BridgeEvent::ChannelsSynthesized { channels, .. } = channels else {
        unreachable!()
    };
    let names: Vec<_> = channels.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(
        names,
        vec![
            ("InstantaneousDemand", ValueKind::Number),
            ("Message", ValueKind::Text)
        ]
    );

    let first = next_matching(&mut rx, |e| telemetry_for(METER_A, e)).await;
    let second = next_matching(&mut rx, |e| telemetry_for(METER_A, e)).await;
    let BridgeEvent::TelemetryChanged { change: demand, .. } = first else {
        unreachable!()
    };
    let BridgeEvent::TelemetryChanged { change: message, .. } = second else {
        unreachable!()
    };
    assert_eq!(demand.state, FieldState::FirstSeen);
    assert_eq!(demand.value.to_string(), "1.250");
    assert_eq!(
        message.value,
        TelemetryValue::Text("Hello & welcome".to_owned())
    );

    assert_eq!(
        bridge.poll_now(METER_A).await,
        Some(PollOutcome::Updated { emitted: 0 })
    );
    assert!(drain(&mut rx).iter().all(|e| !telemetry_for(METER_A, e)));

    gateway.set_query(
        METER_A,
        device_query(
            METER_A,
            &[
                ("zigbee:InstantaneousDemand", "2.500"),
                ("zigbee:Message", "Hello & welcome"),
            ],
        ),
    );
    assert_eq!(
        bridge.poll_now(METER_A).await,
        Some(PollOutcome::Updated { emitted: 1 })
    );
    let changed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::TelemetryChanged { change, .. } => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].channel, "InstantaneousDemand");
    assert_eq!(changed[0].state, FieldState::Changed);
    assert_eq!(
        bridge.meter_status(METER_A).await,
        Some(ConnectivityStatus::Online)
    );

    bridge.shutdown().await;
    assert!(bridge.active_meters().await.is_empty());
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn first_scan_and_two_polls_report_demand_change_once() {
    let gateway = MockGateway::spawn().await;
    gateway.set_device_list(device_list(&[
        (METER_A, "electric_meter"),
        ("0x00135001002b3c4d", "thermostat"),
    ]));
    gateway.set_query(
        METER_A,
        device_query(
            METER_A,
            &[("zigbee:InstantaneousDemand", "1.250"), ("zigbee:Multiplier", "1")],
        ),
    );

    let (bridge, mut rx) = bridge(Duration::from_secs(3600));
    bridge.configure(GatewayEndpoint::new(
        gateway.addr().to_string(),
        "cloud123",
        "code456",
    ));

    assert_eq!(
        bridge.scan_now().await,
        ScanOutcome::Completed {
            discovered: vec![METER_A.to_owned()],
            seen: 1,
        }
    );
    assert_eq!(drain(&mut rx).iter().filter(|e| is_discovery(e)).count(), 1);

    bridge
        .start_polling(METER_A, Duration::from_secs(3600))
        .await
        .unwrap();
    let mut first_seen = Vec::new();
    for _ in 0..2 {
        let BridgeEvent::TelemetryChanged { change, .. } =
            next_matching(&mut rx, |e| telemetry_for(METER_A, e)).await
        else {
            unreachable!()
        };
        first_seen.push(change);
    }
    let summary: Vec<_> = first_seen
        .iter()
        .map(|c| (c.channel.as_str(), c.state, c.value.kind(), c.value.to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (
                "InstantaneousDemand",
                FieldState::FirstSeen,
                ValueKind::Number,
                "1.250".to_owned()
            ),
            ("Multiplier", FieldState::FirstSeen, ValueKind::Number, "1".to_owned()),
        ]
    );

    gateway.set_query(
        METER_A,
        device_query(
            METER_A,
            &[("zigbee:InstantaneousDemand", "1.300"), ("zigbee:Multiplier", "1")],
        ),
    );
    assert_eq!(
        bridge.poll_now(METER_A).await,
        Some(PollOutcome::Updated { emitted: 1 })
    );
    let changed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::TelemetryChanged { change, .. } => Some(change),
            _ => None,
        })
        .collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].channel, "InstantaneousDemand");
    assert_eq!(changed[0].state, FieldState::Changed);
    assert_eq!(changed[0].value.to_string(), "1.300");

    bridge.shutdown().await;
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_meter_does_not_block_other_meters() {
    let gateway = MockGateway::spawn().await;
    gateway.set_query(METER_A, device_query(METER_A, &[("zigbee:Divisor", "1000")]));
    gateway.set_query(METER_B, device_query(METER_B, &[("zigbee:Divisor", "1000")]));
    let (bridge, mut rx) = bridge(Duration::from_secs(3600));
    let bridge = Arc::new(bridge);
    bridge.configure(gateway.endpoint());

    bridge
        .start_polling(METER_A, Duration::from_secs(3600))
        .await
        .unwrap();
    next_matching(&mut rx, |e| telemetry_for(METER_A, e)).await;

    gateway.delay_query(METER_A, Duration::from_millis(1500));
    let slow = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.poll_now(METER_A).await }
    });
    while gateway.count_requests("device_query") < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let quick = Duration::from_millis(500);
    tokio::time::timeout(quick, bridge.start_polling(METER_B, Duration::from_secs(3600)))
        .await
        .expect("start_polling is not held up by another meter")
        .unwrap();
    let status = tokio::time::timeout(quick, bridge.meter_status(METER_A))
        .await
        .expect("meter_status is not held up by an in-flight poll");
    assert_eq!(status, Some(ConnectivityStatus::Online));
    next_matching(&mut rx, |e| telemetry_for(METER_B, e)).await;
    assert!(!slow.is_finished());

    assert_eq!(
        slow.await.unwrap(),
        Some(PollOutcome::Updated { emitted: 0 })
    );
    bridge.shutdown().await;
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_scans_report_each_meter_once() {
    let gateway = MockGateway::spawn().await;
    gateway.set_device_list(device_list(&[(METER_A, "electric_meter")]));

    let (bridge, mut rx) = bridge(Duration::from_millis(20));
    bridge.configure(gateway.endpoint());
    bridge.start_discovery().await;

    next_matching(&mut rx, is_discovery).await;
    while gateway.count_requests("device_list") < 4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(drain(&mut rx).iter().all(|e| !is_discovery(e)));

    gateway.set_device_list(device_list(&[
        (METER_A, "electric_meter"),
        (METER_B, "electric_meter"),
    ]));
    let BridgeEvent::DeviceDiscovered(discovery) = next_matching(&mut rx, is_discovery).await
    else {
        unreachable!()
    };
    assert_eq!(discovery.address, METER_B);

    let scans_before = gateway.count_requests("device_list");
    while gateway.count_requests("device_list") < scans_before + 3 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bridge.stop_discovery().await;
    assert!(drain(&mut rx).iter().all(|e| !is_discovery(e)));

    let stopped_at = gateway.count_requests("device_list");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(gateway.count_requests("device_list"), stopped_at);
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn incomplete_configuration_blocks_traffic() {
    let gateway = MockGateway::spawn().await;
    let (bridge, mut rx) = bridge(Duration::from_secs(3600));

    let status = bridge.configure(GatewayEndpoint::new(
        gateway.addr().to_string(),
        "cloud123",
        "",
    ));
    assert_eq!(
        status,
        ConnectivityStatus::Offline(OfflineReason::ConfigurationError)
    );
    assert_eq!(
        drain(&mut rx),
        vec![BridgeEvent::ConnectivityChanged {
            scope: ConnectivityScope::Gateway,
            status,
        }]
    );

    assert_eq!(bridge.scan_now().await, ScanOutcome::IncompleteConfiguration);

    bridge
        .start_polling(METER_A, Duration::from_secs(3600))
        .await
        .unwrap();
    let offline = next_matching(&mut rx, |e| {
        matches!(e, BridgeEvent::ConnectivityChanged { scope: ConnectivityScope::Device(_), .. })
    })
    .await;
    assert_eq!(
        offline,
        BridgeEvent::ConnectivityChanged {
            scope: ConnectivityScope::Device(METER_A.to_owned()),
            status: ConnectivityStatus::Offline(OfflineReason::ConfigurationError),
        }
    );
    assert!(gateway.requests().is_empty());

    bridge.shutdown().await;
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn gateway_outage_degrades_and_recovers_meter() {
    let gateway = MockGateway::spawn().await;
    gateway.set_query(METER_A, device_query(METER_A, &[("zigbee:Divisor", "1000")]));
    let (bridge, mut rx) = bridge(Duration::from_secs(3600));
    bridge.configure(gateway.endpoint());

    bridge
        .start_polling(METER_A, Duration::from_secs(3600))
        .await
        .unwrap();
    next_matching(&mut rx, |e| telemetry_for(METER_A, e)).await;

    gateway.force_status(Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(
        bridge.poll_now(METER_A).await,
        Some(PollOutcome::Failed(ErrorKind::Transport))
    );
    assert_eq!(
        bridge.meter_status(METER_A).await,
        Some(ConnectivityStatus::Offline(OfflineReason::CommunicationError))
    );

    gateway.force_status(None);
    assert_eq!(
        bridge.poll_now(METER_A).await,
        Some(PollOutcome::Updated { emitted: 0 })
    );
    assert_eq!(
        bridge.meter_status(METER_A).await,
        Some(ConnectivityStatus::Online)
    );

    bridge.shutdown().await;
    gateway.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_lifecycle_through_bridge() {
    let (bridge, _rx) = bridge(Duration::from_secs(3600));

    let err = bridge
        .start_polling("not an address", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    let err = bridge
        .start_polling(METER_A, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(bridge.active_meters().await.is_empty());

    bridge
        .start_polling(METER_A, Duration::from_secs(60))
        .await
        .unwrap();
    bridge
        .start_polling(METER_A, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(bridge.active_meters().await, vec![METER_A.to_owned()]);

    assert!(bridge.stop_polling(METER_A).await);
    assert!(!bridge.stop_polling(METER_A).await);
    assert_eq!(bridge.poll_now(METER_A).await, None);
    bridge.shutdown().await;
}
