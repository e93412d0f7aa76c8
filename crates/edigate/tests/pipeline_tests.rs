//! End-to-end tests: provider inbox through the queue to the ERP.

mod common;

use chrono::{Duration, TimeZone, Utc};
use wiremock::ResponseTemplate;

use common::{OrderBuilder, TestHarness};
use edigate::activity::Severity;
use edigate::db::{activity_repo, document_repo, poll_state_repo, queue_repo};
use edigate::delivery::DeliveryState;
use edigate::document::DocumentType;
use edigate::provider::MARKER_KEY;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
}

fn po_123() -> OrderBuilder {
    OrderBuilder::new("PO-123")
        .number("PO-123")
        .line("4870001000011", "Молоко 1л", 12, 150.5)
        .line("4870001000028", "Кефир 0.5л", 6, 98.0)
}

#[tokio::test]
async fn test_new_order_is_delivered() {
    let harness = TestHarness::new().await;
    harness.serve_orders(&[po_123()]).await;
    harness
        .erp_responds(ResponseTemplate::new(200).set_body_string("<Ack>OK</Ack>"))
        .await;

    let services = harness.services();
    let poll = services.poller.poll_once(t0()).await.unwrap();
    assert_eq!(poll.created, 1);

    let document = document_repo::find_by_provider_id(&harness.db, "PO-123", DocumentType::Order)
        .unwrap()
        .expect("document stored");
    assert_eq!(document.number, "PO-123");
    let entry = queue_repo::find_by_document(&harness.db, document.id)
        .unwrap()
        .expect("queue entry created");
    assert_eq!(entry.state, DeliveryState::Pending);
    assert_eq!(entry.attempt_count, 0);

    let tick = services.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(tick.delivered, 1);

    let bodies = harness.erp_bodies().await;
    assert_eq!(bodies.len(), 1);
    let xml = &bodies[0];
    assert!(xml.contains("<DocumentId>PO-123</DocumentId>"));
    assert!(xml.contains("<EAN>4870001000011</EAN>"));
    assert!(xml.contains("<ItemName>Кефир 0.5л</ItemName>"));
    assert_eq!(xml.matches("<Line>").count(), 2);

    let entry = queue_repo::find_by_id(&harness.db, entry.id).unwrap().unwrap();
    assert_eq!(entry.state, DeliveryState::Delivered);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(entry.http_status, Some(200));
    assert_eq!(entry.response_body.as_deref(), Some("<Ack>OK</Ack>"));

    assert_eq!(
        poll_state_repo::get_marker(&harness.db, MARKER_KEY).unwrap().as_deref(),
        Some("2026-10-17")
    );
}

#[tokio::test]
async fn test_repolling_does_not_duplicate() {
    let harness = TestHarness::new().await;
    harness.serve_orders(&[po_123()]).await;

    let services = harness.services();
    services.poller.poll_once(t0()).await.unwrap();
    let second = services
        .poller
        .poll_once(t0() + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(second.created, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(document_repo::count(&harness.db).unwrap(), 1);
    let counts = queue_repo::count_by_state(&harness.db).unwrap();
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_empty_scan_mutates_nothing() {
    let harness = TestHarness::new().await;
    harness.serve_orders(&[po_123()]).await;
    harness.erp_responds(ResponseTemplate::new(503)).await;

    let services = harness.services();
    services.poller.poll_once(t0()).await.unwrap();
    services.scheduler.tick_at(t0()).await.unwrap();

    let document = document_repo::find_by_provider_id(&harness.db, "PO-123", DocumentType::Order)
        .unwrap()
        .unwrap();
    let before = queue_repo::find_by_document(&harness.db, document.id)
        .unwrap()
        .unwrap();
    assert_eq!(before.state, DeliveryState::AwaitingRetry);

    for seconds in [1, 20, 59] {
        let tick = services
            .scheduler
            .tick_at(t0() + Duration::seconds(seconds))
            .await
            .unwrap();
        assert_eq!(tick.due, 0);
    }

    let after = queue_repo::find_by_id(&harness.db, before.id).unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(harness.erp_bodies().await.len(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_escalate() {
    let harness = TestHarness::new().await;
    harness.write_settings(&harness.settings().telegram());
    harness.telegram_accepts().await;
    wiremock::Mock::given(wiremock::matchers::path("/api/v1/auth"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&harness.provider)
        .await;

    let services = harness.services();
    assert!(services.poller.poll_once(t0()).await.is_err());
    services.sink.flush().await;

    assert_eq!(
        activity_repo::count_by_severity(&harness.db, Severity::Critical).unwrap(),
        1
    );
    assert_eq!(harness.telegram_messages().await, 1);
    assert_eq!(poll_state_repo::get_marker(&harness.db, MARKER_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_run_once_polls_and_delivers() {
    let harness = TestHarness::new().await;
    harness.serve_orders(&[po_123(), OrderBuilder::new("PO-124")]).await;
    harness.erp_responds(ResponseTemplate::new(200)).await;

    let report = harness.services().run_once(t0()).await.unwrap();
    assert_eq!(report.poll.map(|p| p.created), Some(2));
    assert_eq!(report.delivery.delivered, 2);
    assert_eq!(harness.erp_bodies().await.len(), 2);
}
