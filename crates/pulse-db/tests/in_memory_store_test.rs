//! Behavioral tests for the in-memory intake store and vector index.
//!
//! These exercise the same contract the PostgreSQL repository implements:
//! - conditional claim under contention
//! - retry backoff and the terminal state
//! - due-time ordering of ready intakes
//! - transactional completion and memory idempotence
//! - stale processing detection for the janitor

use std::sync::Arc;

use chrono::{Duration, Utc};
use pulse_db::{
    CreateMemoryRequest, InMemoryIntakeStore, InMemoryVectorStore, IntakeRepository,
    IntakeStatus, MemoryRepository, NewIntake, RetryDecision, StatusUpdate, VectorRecord,
    VectorStore,
};
use pulse_inference::mock::MockEmbeddingBackend;
use serde_json::json;
use uuid::Uuid;

async fn ready_intake(store: &InMemoryIntakeStore, org: &str) -> Uuid {
    store
        .create(NewIntake::ready(org, format!("org/{}/intake/x", org)).with_checksum("abc"))
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn only_one_of_many_concurrent_claims_wins() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;

    let attempts = (0..16).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.claim(id, "acme").await.unwrap() })
    });
    let results = futures::future::join_all(attempts).await;
    let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(winners, 1);
    assert_eq!(store.snapshot(id).unwrap().status, IntakeStatus::Processing);
}

#[tokio::test]
async fn claim_is_scoped_to_org() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;
    assert!(!store.claim(id, "globex").await.unwrap());
    assert!(store.claim(id, "acme").await.unwrap());
    assert!(!store.claim(id, "acme").await.unwrap());
}

#[tokio::test]
async fn duplicate_idempotency_key_returns_existing_intake() {
    let store = InMemoryIntakeStore::new();
    let key = Uuid::new_v4();
    let first = store
        .create(NewIntake::ready("acme", "a").with_idempotency_key(key))
        .await
        .unwrap();
    let second = store
        .create(NewIntake::ready("acme", "b").with_idempotency_key(key))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.storage_path, "a");

    let other_org = store
        .create(NewIntake::ready("globex", "c").with_idempotency_key(key))
        .await
        .unwrap();
    assert_ne!(other_org.id, first.id);
}

#[tokio::test]
async fn retry_backoff_requeues_with_exponential_delay() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;
    store
        .update_status(
            id,
            IntakeStatus::Processing,
            StatusUpdate {
                attempts: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let before = Utc::now();
    let decision = store
        .schedule_retry(id, 2, "graph unavailable", 5, 60)
        .await
        .unwrap();

    let intake = store.snapshot(id).unwrap();
    assert_eq!(intake.status, IntakeStatus::Ready);
    assert_eq!(intake.attempts, 3);
    assert_eq!(intake.last_error.as_deref(), Some("graph unavailable"));
    let next = intake.next_retry_at.unwrap();
    assert!(next >= before + Duration::seconds(240));
    assert!(next <= Utc::now() + Duration::seconds(240));
    assert!(matches!(decision, RetryDecision::Retry { delay_secs: 240, .. }));

    // Not due yet, so it is not offered to workers.
    assert!(store.get_ready(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausting_attempts_parks_the_intake() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;
    assert!(store.claim(id, "acme").await.unwrap());

    let decision = store.schedule_retry(id, 4, "llm down", 5, 60).await.unwrap();
    assert!(decision.is_exhausted());

    let intake = store.snapshot(id).unwrap();
    assert_eq!(intake.status, IntakeStatus::FailedMaxAttempts);
    assert_eq!(intake.attempts, 5);
    assert!(intake.next_retry_at.is_none());
    assert!(intake.last_error.unwrap().contains("llm down"));
}

#[tokio::test]
async fn schedule_retry_requires_processing() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;
    assert!(store.schedule_retry(id, 0, "x", 5, 60).await.is_err());
    assert_eq!(store.snapshot(id).unwrap().attempts, 0);
}

#[tokio::test]
async fn ready_intakes_come_back_earliest_due_first() {
    let store = InMemoryIntakeStore::new();
    let late = ready_intake(&store, "acme").await;
    let early = ready_intake(&store, "acme").await;
    let third = ready_intake(&store, "acme").await;

    let now = Utc::now();
    for (id, offset) in [(late, 5), (early, 50), (third, 20)] {
        store
            .update_status(
                id,
                IntakeStatus::Ready,
                StatusUpdate {
                    next_retry_at: Some(now - Duration::seconds(offset)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let ready = store.get_ready(2).await.unwrap();
    let ids: Vec<Uuid> = ready.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![early, third]);
    assert!(store.get_ready(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn complete_writes_one_memory_and_marks_done() {
    let store = InMemoryIntakeStore::new();
    let id = ready_intake(&store, "acme").await;
    assert!(store.claim(id, "acme").await.unwrap());

    let request = CreateMemoryRequest {
        intake_id: id,
        org_id: "acme".into(),
        title: "Plan approval".into(),
        summary: "Alice approved the plan.".into(),
        metadata: json!({"total_chunks": 1}),
    };
    let first = store.complete(id, request.clone()).await.unwrap();
    let second = store.complete(id, request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.memory_count(), 1);
    assert_eq!(store.snapshot(id).unwrap().status, IntakeStatus::Done);

    let memory = store.get_for_intake(id).await.unwrap().unwrap();
    assert_eq!(memory.title, "Plan approval");
    assert_eq!(store.list_for_org("acme", 10).await.unwrap().len(), 1);
    assert!(store.list_for_org("globex", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_processing_intakes_are_listed() {
    let store = InMemoryIntakeStore::new();
    let stuck = ready_intake(&store, "acme").await;
    let fresh = ready_intake(&store, "acme").await;
    assert!(store.claim(stuck, "acme").await.unwrap());
    assert!(store.claim(fresh, "acme").await.unwrap());
    store
        .backdate(stuck, Utc::now() - Duration::hours(2))
        .unwrap();

    let stale = store
        .list_stale(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, stuck);
}

#[tokio::test]
async fn stats_count_by_status() {
    let store = InMemoryIntakeStore::new();
    let a = ready_intake(&store, "acme").await;
    let b = ready_intake(&store, "acme").await;
    ready_intake(&store, "acme").await;
    assert!(store.claim(a, "acme").await.unwrap());
    assert!(store.claim(b, "acme").await.unwrap());
    store.schedule_retry(b, 4, "boom", 5, 60).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.ready, 1);
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.failed_max_attempts, 1);
    assert_eq!(stats.recent_errors, 1);
    assert_eq!(stats.total_memories, 0);
}

#[tokio::test]
async fn vector_store_replaces_topic_records() {
    let store = InMemoryVectorStore::new(Arc::new(MockEmbeddingBackend::new(16)));
    let record = |topic: &str, text: &str| VectorRecord {
        id: Uuid::new_v4(),
        text: text.to_string(),
        metadata: json!({"topic_id": topic, "title": topic}),
    };

    store
        .upsert(&[
            record("t1", "budget approved by the board"),
            record("t1", "hiring freeze lifted"),
            record("t2", "office move scheduled"),
        ])
        .await
        .unwrap();
    assert_eq!(store.len(), 3);

    let hits = store.query("budget approved by the board", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "budget approved by the board");

    assert_eq!(store.delete_for_topic("t1").await.unwrap(), 2);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn replace_for_topic_swaps_only_that_topic() {
    let store = InMemoryVectorStore::new(Arc::new(MockEmbeddingBackend::new(16)));
    let record = |topic: &str, text: &str| VectorRecord {
        id: Uuid::new_v4(),
        text: text.to_string(),
        metadata: json!({"topic_id": topic, "title": topic}),
    };
    store
        .upsert(&[
            record("t1", "budget approved by the board"),
            record("t1", "hiring freeze lifted"),
            record("t2", "office move scheduled"),
        ])
        .await
        .unwrap();

    let (removed, written) = store
        .replace_for_topic("t1", &[record("t1", "budget cut in half")])
        .await
        .unwrap();
    assert_eq!((removed, written), (2, 1));

    let mut texts: Vec<String> = store.records().into_iter().map(|r| r.text).collect();
    texts.sort();
    assert_eq!(texts, vec!["budget cut in half", "office move scheduled"]);

    assert_eq!(store.replace_for_topic("t2", &[]).await.unwrap(), (1, 0));
    assert_eq!(store.len(), 1);
}
