//! End-to-end integration test: a real CSMS bound to an OS-assigned port,
//! a real `CpClient` dialing it over plaintext WebSocket, driven through
//! the full Authorize/StartTransaction/MeterValues/StopTransaction
//! sequence. Exercises the wire-level handler dispatch (§4.3) that the
//! unit tests in `csms::handlers` don't reach directly, plus the
//! invariants from §8: P1 (MeterValues only after a Start, before any
//! Stop), P4 (Accepted Start implies an earlier Accepted Authorize for the
//! same id_tag), and the StartTransactionRejected path for an unknown tag.

use std::sync::{Arc, Mutex};

use cp_anomaly_sim::csms::{spawn_heartbeat_watchdog, CsmsServer, SessionRegistry};
use cp_anomaly_sim::cp_client::CpClient;
use cp_anomaly_sim::domain::events::Event;
use cp_anomaly_sim::eventbus::EventBus;
use cp_anomaly_sim::support::shutdown::ShutdownSignal;
use rust_ocpp::v1_6::types::{ChargePointErrorCode, ChargePointStatus, Measurand, UnitOfMeasure};

struct Harness {
    bus_events: Arc<Mutex<Vec<Event>>>,
    shutdown: ShutdownSignal,
    server_task: tokio::task::JoinHandle<()>,
    watchdog_task: tokio::task::JoinHandle<()>,
    url_base: String,
}

async fn start_harness() -> Harness {
    let registry = Arc::new(SessionRegistry::default());
    let bus = EventBus::new();
    let bus_events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let bus_events = bus_events.clone();
        bus.subscribe(move |event: &Event| bus_events.lock().unwrap().push(event.clone()));
    }

    let shutdown = ShutdownSignal::new();
    let server = CsmsServer::bind("127.0.0.1:0", registry.clone(), bus.clone(), shutdown.clone())
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local_addr");
    let server_task = tokio::spawn(server.run());
    let watchdog_task = spawn_heartbeat_watchdog(registry, bus, shutdown.clone());

    Harness {
        bus_events,
        shutdown,
        server_task,
        watchdog_task,
        url_base: format!("ws://{addr}"),
    }
}

impl Harness {
    async fn teardown(self) {
        self.shutdown.trigger();
        let _ = self.server_task.await;
        self.watchdog_task.abort();
    }

    fn events(&self) -> Vec<Event> {
        self.bus_events.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn full_transaction_lifecycle_produces_the_expected_event_sequence() {
    let harness = start_harness().await;
    let url = format!("{}/CP_001", harness.url_base);
    let client = CpClient::connect("CP_001", &url, "cp-anomaly-sim", "test-rig")
        .await
        .expect("connect");

    client
        .status_notification(1, ChargePointStatus::Available, ChargePointErrorCode::NoError)
        .await
        .expect("status notification");

    let auth_status = client.authorize("DRIVER_ALPHA").await.expect("authorize");
    assert_eq!(auth_status, "Accepted");

    let (transaction_id, start_status) = client
        .start_transaction(1, "DRIVER_ALPHA", 0)
        .await
        .expect("start transaction");
    assert_eq!(start_status, "Accepted");
    assert_eq!(transaction_id, 1, "first transaction id for a fresh session is 1");

    client
        .meter_values(
            1,
            Some(transaction_id),
            vec![
                (Measurand::PowerActiveImport, 7.0, UnitOfMeasure::Kw),
                (Measurand::Voltage, 230.0, UnitOfMeasure::V),
            ],
        )
        .await
        .expect("meter values");

    client
        .stop_transaction(transaction_id, 1000, Some("DRIVER_ALPHA".to_string()))
        .await
        .expect("stop transaction");

    client.close().await;
    harness.shutdown.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let events = harness.events();
    let kinds: Vec<&str> = events.iter().map(Event::message_type).collect();
    assert_eq!(
        kinds,
        vec![
            "BootNotification",
            "StatusNotification",
            "Authorize",
            "StartTransaction",
            "MeterValues",
            "StopTransaction",
        ]
    );

    // P4: the Accepted Authorize precedes the Accepted StartTransaction for
    // the same id_tag.
    let authorize_idx = events
        .iter()
        .position(|e| matches!(e, Event::Authorize(a) if a.status == "Accepted"))
        .expect("an accepted authorize event");
    let start_idx = events
        .iter()
        .position(|e| matches!(e, Event::StartTransaction(_)))
        .expect("a start transaction event");
    assert!(authorize_idx < start_idx);

    // P1: MeterValues carries the same (cp_id, transaction_id) as the Start
    // that preceded it, and no Stop precedes it.
    let stop_idx = events
        .iter()
        .position(|e| matches!(e, Event::StopTransaction(_)))
        .unwrap();
    let meter_idx = events.iter().position(|e| matches!(e, Event::MeterValues(_))).unwrap();
    assert!(start_idx < meter_idx && meter_idx < stop_idx);

    match &events[start_idx] {
        Event::StartTransaction(s) => assert_eq!(s.transaction_id, transaction_id),
        _ => unreachable!(),
    }

    harness.teardown().await;
}

#[tokio::test]
async fn unauthorized_tag_is_rejected_with_transaction_id_zero() {
    let harness = start_harness().await;
    let url = format!("{}/CP_BAD", harness.url_base);
    let client = CpClient::connect("CP_BAD", &url, "cp-anomaly-sim", "test-rig")
        .await
        .expect("connect");

    let auth_status = client.authorize("NOT_A_REAL_TAG").await.expect("authorize");
    assert_eq!(auth_status, "Invalid");

    let (transaction_id, start_status) = client
        .start_transaction(1, "NOT_A_REAL_TAG", 0)
        .await
        .expect("start transaction");
    assert_eq!(transaction_id, 0, "a hard rejection always carries transaction_id 0");
    assert_eq!(start_status, "Invalid");

    client.close().await;

    let events = harness.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::StartTransactionRejected(r) if r.id_tag == "NOT_A_REAL_TAG")));
    assert!(
        !events.iter().any(|e| matches!(e, Event::MeterValues(_))),
        "a rejected start must never be followed by MeterValues for that attempt"
    );

    harness.teardown().await;
}

#[tokio::test]
async fn two_charge_points_each_get_their_own_monotonic_transaction_ids() {
    let harness = start_harness().await;

    let url_a = format!("{}/CP_A", harness.url_base);
    let client_a = CpClient::connect("CP_A", &url_a, "cp-anomaly-sim", "test-rig")
        .await
        .expect("connect a");
    let url_b = format!("{}/CP_B", harness.url_base);
    let client_b = CpClient::connect("CP_B", &url_b, "cp-anomaly-sim", "test-rig")
        .await
        .expect("connect b");

    client_a.authorize("DRIVER_ALPHA").await.unwrap();
    client_b.authorize("DRIVER_BRAVO").await.unwrap();

    let (tx_a1, _) = client_a.start_transaction(1, "DRIVER_ALPHA", 0).await.unwrap();
    let (tx_b1, _) = client_b.start_transaction(1, "DRIVER_BRAVO", 0).await.unwrap();
    assert_eq!(tx_a1, 1);
    assert_eq!(tx_b1, 1, "transaction ids are per-CP, not global");

    client_a.stop_transaction(tx_a1, 500, None).await.unwrap();
    let (tx_a2, _) = client_a.start_transaction(1, "DRIVER_ALPHA", 500).await.unwrap();
    assert_eq!(tx_a2, 2, "the per-CP counter keeps incrementing across transactions");

    client_a.close().await;
    client_b.close().await;
    harness.teardown().await;
}
