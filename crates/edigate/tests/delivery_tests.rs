//! Retry, abandonment and recovery behaviour of the delivery queue.

mod common;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use wiremock::ResponseTemplate;

use common::{OrderBuilder, TestHarness};
use edigate::activity::Severity;
use edigate::db::{activity_repo, document_repo, queue_repo, template_repo, Database};
use edigate::delivery::{retry_delay, DeliveryState};
use edigate::document::DocumentType;
use edigate::render::{self, XmlTemplate};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).unwrap()
}

/// Polls one order and returns its queue entry ID.
async fn ingest_one(harness: &TestHarness) -> i64 {
    harness
        .serve_orders(&[OrderBuilder::new("PO-123").line("4870001000011", "Молоко 1л", 1, 1.0)])
        .await;
    harness.services().poller.poll_once(t0()).await.unwrap();
    let document = document_repo::find_by_provider_id(&harness.db, "PO-123", DocumentType::Order)
        .unwrap()
        .unwrap();
    queue_repo::find_by_document(&harness.db, document.id)
        .unwrap()
        .unwrap()
        .id
}

/// Polls the given orders as of now and returns their queue entry IDs.
async fn ingest_many(harness: &TestHarness, count: usize) -> Vec<i64> {
    let ids: Vec<String> = (1..=count).map(|i| format!("PO-{}", 200 + i)).collect();
    let orders: Vec<OrderBuilder> = ids
        .iter()
        .map(|id| OrderBuilder::new(id).line("4870001000011", "Молоко 1л", 1, 1.0))
        .collect();
    harness.serve_orders(&orders).await;
    harness.services().poller.poll_once(Utc::now()).await.unwrap();

    ids.iter()
        .map(|provider_id| {
            let document =
                document_repo::find_by_provider_id(&harness.db, provider_id, DocumentType::Order)
                    .unwrap()
                    .unwrap();
            queue_repo::find_by_document(&harness.db, document.id)
                .unwrap()
                .unwrap()
                .id
        })
        .collect()
}

fn entry(db: &Database, id: i64) -> queue_repo::QueueEntry {
    queue_repo::find_by_id(db, id).unwrap().unwrap()
}

#[tokio::test]
async fn test_timeouts_follow_backoff_schedule() {
    let harness = TestHarness::new().await;
    harness.write_settings(&harness.settings().erp_timeout_secs(1));
    harness
        .erp_responds(ResponseTemplate::new(200).set_delay(StdDuration::from_secs(3)))
        .await;
    let id = ingest_one(&harness).await;
    let scheduler = harness.services().scheduler;

    let mut now = t0();
    let mut waits = Vec::new();
    for attempt in 1..=3u32 {
        let tick = scheduler.tick_at(now).await.unwrap();
        assert_eq!(tick.retrying, 1, "attempt {}", attempt);

        let e = entry(&harness.db, id);
        assert_eq!(e.state, DeliveryState::AwaitingRetry);
        assert_eq!(e.attempt_count, attempt);
        assert!(e.last_error.as_deref().unwrap_or_default().contains("timed out"));
        assert_eq!(e.next_attempt_at - e.updated_at, retry_delay(attempt));
        waits.push((e.next_attempt_at - now).num_minutes());
        now = e.next_attempt_at;
    }

    assert_eq!(waits, vec![1, 5, 15]);
    let e = entry(&harness.db, id);
    assert_eq!(e.attempt_count, 3);
    assert!(!e.state.is_terminal());
}

#[tokio::test]
async fn test_ceiling_abandons_and_escalates_once() {
    let harness = TestHarness::new().await;
    harness.write_settings(&harness.settings().max_attempts(5).telegram());
    harness.telegram_accepts().await;
    harness
        .erp_responds(ResponseTemplate::new(500).set_body_string("internal error"))
        .await;
    let id = ingest_one(&harness).await;
    let services = harness.services();
    let scheduler = &services.scheduler;

    let mut now = t0();
    let mut waits = Vec::new();
    for _ in 0..5 {
        scheduler.tick_at(now).await.unwrap();
        let e = entry(&harness.db, id);
        if e.state == DeliveryState::AwaitingRetry {
            waits.push(e.next_attempt_at - e.updated_at);
            now = e.next_attempt_at;
        }
    }
    assert_eq!(waits, (1..=4).map(retry_delay).collect::<Vec<_>>());

    let e = entry(&harness.db, id);
    assert_eq!(e.state, DeliveryState::Abandoned);
    assert_eq!(e.attempt_count, 5);
    assert_eq!(e.http_status, Some(500));

    // No further attempts, however late.
    let tick = scheduler.tick_at(now + Duration::days(1)).await.unwrap();
    assert_eq!(tick.due, 0);
    assert_eq!(harness.erp_bodies().await.len(), 5);

    services.sink.flush().await;
    assert_eq!(
        activity_repo::count_by_severity(&harness.db, Severity::Critical).unwrap(),
        1
    );
    assert_eq!(harness.telegram_messages().await, 1);
}

#[tokio::test]
async fn test_permanent_rejection_skips_retries() {
    let harness = TestHarness::new().await;
    harness.write_settings(&harness.settings().permanent_status(400));
    harness
        .erp_responds(ResponseTemplate::new(400).set_body_string("schema violation"))
        .await;
    let id = ingest_one(&harness).await;

    harness.services().scheduler.tick_at(t0()).await.unwrap();

    let e = entry(&harness.db, id);
    assert_eq!(e.state, DeliveryState::Abandoned);
    assert_eq!(e.attempt_count, 1);
    assert_eq!(e.response_body.as_deref(), Some("schema violation"));
}

#[tokio::test]
async fn test_interrupted_attempt_is_recovered() {
    let harness = TestHarness::new().await;
    harness.erp_responds(ResponseTemplate::new(200)).await;
    let id = ingest_one(&harness).await;

    // A worker claimed the entry and the process died before completing it.
    let token = queue_repo::claim(&harness.db, id, t0()).unwrap();
    assert_eq!(token, Some(1));
    assert_eq!(entry(&harness.db, id).state, DeliveryState::InFlight);

    // A fresh scheduler, as after a restart.
    let restart = t0() + Duration::minutes(2);
    let scheduler = harness.services().scheduler;
    assert_eq!(scheduler.recover(restart).await.unwrap(), 1);

    let e = entry(&harness.db, id);
    assert_eq!(e.state, DeliveryState::AwaitingRetry);
    assert_eq!(e.next_attempt_at, restart);

    let tick = scheduler.tick_at(restart).await.unwrap();
    assert_eq!(tick.delivered, 1);
    let e = entry(&harness.db, id);
    assert_eq!(e.state, DeliveryState::Delivered);
    assert_eq!(e.attempt_count, 2);

    // The lost worker's late completion changes nothing.
    assert!(!queue_repo::complete_delivered(&harness.db, id, 1, 200, "late", restart).unwrap());
    assert_eq!(entry(&harness.db, id).response_body, e.response_body);
}

#[tokio::test]
async fn test_template_edit_applies_to_next_attempt() {
    let harness = TestHarness::new().await;
    harness.erp_responds(ResponseTemplate::new(503)).await;
    let id = ingest_one(&harness).await;
    let scheduler = harness.services().scheduler;

    scheduler.tick_at(t0()).await.unwrap();

    let edited = XmlTemplate {
        doc_type: DocumentType::Order,
        name: "Custom order".to_string(),
        body: "<Order no=\"{{number}}\">{{positions}}</Order>".to_string(),
        position_template: "<Item ean=\"{{ean}}\"/>".to_string(),
        content_type: "text/xml".to_string(),
        version: 0,
    };
    template_repo::upsert(&harness.db, &edited, t0()).unwrap();

    scheduler.tick_at(t0() + Duration::minutes(2)).await.unwrap();

    let bodies = harness.erp_bodies().await;
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0].contains("<Document>"));
    assert_eq!(
        bodies[1],
        "<Order no=\"PO-123\"><Item ean=\"4870001000011\"/></Order>"
    );
    assert_eq!(entry(&harness.db, id).attempt_count, 2);
}

#[tokio::test]
async fn test_rendering_is_deterministic() {
    let harness = TestHarness::new().await;
    ingest_one(&harness).await;

    let document = document_repo::find_by_provider_id(&harness.db, "PO-123", DocumentType::Order)
        .unwrap()
        .unwrap();
    let template = template_repo::find_active(&harness.db, DocumentType::Order)
        .unwrap()
        .unwrap();

    let first = render::render(&document, &template).unwrap();
    let second = render::render(&document, &template).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());

    let broken = XmlTemplate {
        body: "<Order>{{number}}{{no_such_field}}</Order>".to_string(),
        ..template
    };
    assert!(render::render(&document, &broken).is_err());
}

#[tokio::test]
async fn test_backoff_runs_from_each_failed_attempt() {
    let harness = TestHarness::new().await;
    harness.write_settings(&harness.settings().erp_timeout_secs(1));
    harness
        .erp_responds(ResponseTemplate::new(200).set_delay(StdDuration::from_secs(3)))
        .await;
    let ids = ingest_many(&harness, 4).await;
    let scheduler = harness.services_with_workers(1).scheduler;

    let started = Utc::now();
    let report = scheduler.tick().await.unwrap();
    let finished = Utc::now();
    assert_eq!(report.retrying, 4);

    let entries: Vec<_> = ids.iter().map(|id| entry(&harness.db, *id)).collect();
    for e in &entries {
        assert_eq!(e.attempt_count, 1);
        assert_eq!(e.next_attempt_at - e.updated_at, retry_delay(1));
    }

    // The last attempt started seconds into the tick and still waits a full
    // minute from its own failure.
    let last = entries
        .iter()
        .max_by_key(|e| e.last_attempt_at)
        .unwrap();
    assert!(last.last_attempt_at.unwrap() - started >= Duration::seconds(2));
    assert!(last.next_attempt_at - finished >= Duration::seconds(55));
}

#[tokio::test]
async fn test_overlapping_ticks_deliver_each_entry_once() {
    let harness = TestHarness::new().await;
    // In-flight entries count as stale after 2s + 5s.
    harness.write_settings(&harness.settings().erp_timeout_secs(2));
    harness
        .erp_responds(ResponseTemplate::new(200).set_delay(StdDuration::from_secs(1)))
        .await;
    let ids = ingest_many(&harness, 10).await;

    let first = harness.services_with_workers(1).scheduler;
    let second = harness.services_with_workers(1).scheduler;

    // The second tick starts while the first is still working through the
    // batch, long enough after it began to see its early claims as stale if
    // they were stamped with the first tick's start.
    let (a, b) = tokio::join!(first.tick(), async {
        tokio::time::sleep(StdDuration::from_millis(7500)).await;
        second.tick().await
    });
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(b.recovered, 0);
    assert_eq!(a.delivered + b.delivered, 10);
    for id in &ids {
        let e = entry(&harness.db, *id);
        assert_eq!(e.state, DeliveryState::Delivered);
        assert_eq!(e.attempt_count, 1);
    }
    assert_eq!(harness.erp_bodies().await.len(), 10);
}
