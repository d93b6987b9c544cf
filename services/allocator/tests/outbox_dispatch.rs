use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pairwise_allocator::allocation::{AllocationConfig, AllocationService, InMemoryDirectory};
use pairwise_allocator::counter::{InMemorySequenceStore, SequenceConfig, SequenceService};
use pairwise_allocator::domain::{Gender, Mentor, Student};
use pairwise_allocator::engine::AllocationEngine;
use pairwise_allocator::outbox::{
    DispatcherConfig, InMemoryOutboxStore, OutboxDispatcher, OutboxMessage, OutboxStatus,
    OutboxStore, WebhookPublisher,
};
use pairwise_events::event_types;
use pairwise_id::NationalId;
use pairwise_retry::{Clock, ManualClock};
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    clock: Arc<ManualClock>,
    outbox: Arc<InMemoryOutboxStore>,
    dispatcher: OutboxDispatcher,
}

impl Fixture {
    fn new(server: &MockServer) -> Self {
        Self::with_url(format!("{}/events", server.uri()))
    }

    fn with_url(url: String) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap(),
        ));
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let dispatcher = OutboxDispatcher::new(
            outbox.clone(),
            Arc::new(WebhookPublisher::new(url)),
            clock.clone(),
            DispatcherConfig::default(),
        );
        Self {
            clock,
            outbox,
            dispatcher,
        }
    }

    /// Allocates one student so the outbox holds a real `allocation.created`.
    async fn allocate_one(&self) -> OutboxMessage {
        let directory = Arc::new(InMemoryDirectory::new(self.outbox.clone()));
        directory.add_mentor(Mentor::new(7, 10).with_groups([3])).await;
        let student = Student::new(
            NationalId::with_check_digit("987654321").unwrap(),
            Gender::Female,
            3,
            1,
        );
        directory.add_student(student.clone()).await;

        let sequences = Arc::new(SequenceService::new(
            Arc::new(InMemorySequenceStore::new()),
            self.clock.clone(),
            self.clock.clone(),
            SequenceConfig::default(),
        ));
        let service = AllocationService::new(
            AllocationEngine::default(),
            sequences,
            directory.clone(),
            directory.clone(),
            directory,
            self.outbox.clone(),
            self.clock.clone(),
            AllocationConfig {
                academic_year: Some(1403),
                ..Default::default()
            },
        );
        service.allocate(&student, "req-1").await.unwrap();

        let mut messages = self.outbox.all().await;
        assert_eq!(messages.len(), 1);
        messages.remove(0)
    }

    async fn current(&self, message: &OutboxMessage) -> OutboxMessage {
        self.outbox.get(&message.event_id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn committed_allocation_is_delivered_to_webhook() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let message = fx.allocate_one().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .and(header("event-type", event_types::ALLOCATION_CREATED))
        .and(header("event-id", message.event_id.to_string().as_str()))
        .and(header("retry-count", "0"))
        .and(header_exists("occurred-at"))
        .and(body_partial_json(serde_json::json!({
            "event_type": "allocation.created",
            "payload": { "allocation_code": "033730001", "mentor_id": 7 }
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(fx.dispatcher.dispatch_once().await.unwrap(), 1);

    let sent = fx.current(&message).await;
    assert_eq!(sent.status, OutboxStatus::Sent);
    assert_eq!(sent.published_at, Some(fx.clock.now()));
    assert_eq!(fx.dispatcher.dispatch_once().await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_publish_is_retried_after_backoff() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let message = fx.allocate_one().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("retry-count", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let stats = fx.dispatcher.sweep().await.unwrap();
    assert_eq!(stats.rescheduled, 1);

    let pending = fx.current(&message).await;
    assert_eq!(pending.status, OutboxStatus::Pending);
    assert_eq!(pending.retry_count, 1);
    assert_eq!(
        pending.available_at,
        fx.clock.now() + chrono::Duration::milliseconds(250)
    );
    assert!(pending.last_error.as_deref().unwrap().contains("503"));

    assert_eq!(fx.dispatcher.sweep().await.unwrap().claimed, 0);

    fx.clock.advance(Duration::from_millis(250));
    assert_eq!(fx.dispatcher.dispatch_once().await.unwrap(), 1);
    assert_eq!(fx.current(&message).await.status, OutboxStatus::Sent);
}

#[tokio::test]
async fn persistent_failure_dead_letters_after_five_attempts() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let message = fx.allocate_one().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(5)
        .mount(&server)
        .await;

    let mut dead_lettered = 0;
    for _ in 0..8 {
        dead_lettered += fx.dispatcher.sweep().await.unwrap().dead_lettered;
        fx.clock.advance(Duration::from_secs(2));
    }

    assert_eq!(dead_lettered, 1);
    let failed = fx.current(&message).await;
    assert_eq!(failed.status, OutboxStatus::Failed);
    assert_eq!(failed.retry_count, 4);
    assert!(failed.last_error.as_deref().unwrap().contains("boom"));
    assert_eq!(fx.outbox.count_with_status(OutboxStatus::Failed).await, 1);
}

#[tokio::test]
async fn wall_clock_jump_keeps_retry_within_backoff_cap() {
    let server = MockServer::start().await;
    let fx = Fixture::new(&server);
    let message = fx.allocate_one().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    fx.dispatcher.sweep().await.unwrap();
    fx.clock.jump_wall(chrono::Duration::days(1));

    let stats = fx.dispatcher.sweep().await.unwrap();
    assert_eq!(stats.rescheduled, 1);

    let pending = fx.current(&message).await;
    let now = fx.clock.now();
    assert_eq!(pending.retry_count, 2);
    assert!(pending.available_at > now);
    assert!(pending.available_at <= now + chrono::Duration::seconds(2));
}

#[tokio::test]
async fn unreachable_webhook_reschedules_instead_of_failing_sweep() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let fx = Fixture::with_url(format!("http://127.0.0.1:{port}/events"));
    let message = fx.allocate_one().await;

    let stats = fx.dispatcher.sweep().await.unwrap();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.rescheduled, 1);

    let pending = fx.current(&message).await;
    assert_eq!(pending.status, OutboxStatus::Pending);
    assert!(pending
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("transport error"));
}
