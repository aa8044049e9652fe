//! Topic summarization against in-memory stores and a scripted model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::{
    EmbeddingBackend, Entity, EntityType, Error, GraphStore, NodeRef, Relationship,
    RelationshipType, Result, Vector, VectorStore,
};
use pulse_db::InMemoryVectorStore;
use pulse_graph::{InMemoryGraphStore, KnowledgeGraphBuilder, TopicSummarizer};
use pulse_inference::mock::{MockEmbeddingBackend, MockGenerationBackend};
use pulse_inference::prompts::TOPIC_EVENTS_HEADING;
use serde_json::Value;

const SUMMARY_V1: &str = r#"{"summary": "The plan was approved.",
  "findings": [{"main_event": "alice approved plan", "sub_events": ["review held"], "summary": "Alice signed off."}]}"#;

const SUMMARY_V2: &str = r#"{"summary": "Plan approved and budgeted.",
  "findings": [
    {"main_event": "alice approved plan", "summary": "Alice signed off."},
    {"main_event": "budget allocated", "summary": "Finance allocated funds."}
  ]}"#;

/// Embedder that can be switched into failing mode.
struct SwitchableEmbedder {
    inner: MockEmbeddingBackend,
    failing: AtomicBool,
}

#[async_trait]
impl EmbeddingBackend for SwitchableEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Embedding("embedding service down".to_string()));
        }
        self.inner.embed_texts(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

struct Fixture {
    graph: InMemoryGraphStore,
    vectors: Arc<InMemoryVectorStore>,
}

impl Fixture {
    async fn new() -> Self {
        let graph = InMemoryGraphStore::new();
        let mut builder = KnowledgeGraphBuilder::new(Arc::new(graph.clone()));
        builder
            .merge_entities(&[
                Entity::new("Alice", EntityType::Actor, "Product lead"),
                Entity::new("Alice approved plan", EntityType::Event, "Final sign-off")
                    .with_topic("plan approval"),
            ])
            .await
            .unwrap();
        builder
            .merge_relationships(&[Relationship::new(
                "alice",
                "alice approved plan",
                RelationshipType::Performed,
                "approved",
                0.9,
            )])
            .await
            .unwrap();
        Self {
            graph,
            vectors: Arc::new(InMemoryVectorStore::new(Arc::new(MockEmbeddingBackend::new(32)))),
        }
    }

    fn summarizer(&self, llm: MockGenerationBackend) -> TopicSummarizer {
        TopicSummarizer::new(Arc::new(self.graph.clone()), Arc::new(llm), self.vectors.clone())
    }
}

#[tokio::test]
async fn summary_is_written_to_topic_and_findings_indexed() {
    let fixture = Fixture::new().await;
    let llm = MockGenerationBackend::new().with_rule(TOPIC_EVENTS_HEADING, SUMMARY_V1);
    let summarizer = fixture.summarizer(llm.clone());

    let report = summarizer
        .summarize_topics(&["plan approval".to_string()])
        .await;
    assert_eq!(report.summarized, vec!["plan approval".to_string()]);
    assert_eq!(report.records_indexed, 1);

    let topic = fixture.graph.node(&NodeRef::topic("plan approval")).unwrap();
    assert_eq!(topic["summary"], "The plan was approved.");
    assert!(topic["metadata"].as_str().unwrap().contains("alice approved plan"));
    assert!(topic.contains_key("summarized_at"));

    let records = fixture.vectors.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata["topic_id"], topic["id"]);
    assert_eq!(records[0].metadata["title"], "plan approval");
    assert_eq!(
        records[0].text,
        "alice approved plan review held Alice signed off."
    );

    let calls = llm.calls_matching(TOPIC_EVENTS_HEADING);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].prompt.contains("alice -[PERFORMED]-> alice approved plan: approved"));
    assert!((calls[0].temperature - 0.3).abs() < f32::EPSILON);
}

#[tokio::test]
async fn resummarizing_refines_previous_summary_and_replaces_findings() {
    let fixture = Fixture::new().await;
    fixture
        .summarizer(MockGenerationBackend::new().with_rule(TOPIC_EVENTS_HEADING, SUMMARY_V1))
        .summarize_topic("plan approval")
        .await
        .unwrap();

    let llm = MockGenerationBackend::new().with_rule(TOPIC_EVENTS_HEADING, SUMMARY_V2);
    let written = fixture
        .summarizer(llm.clone())
        .summarize_topic("plan approval")
        .await
        .unwrap();
    assert_eq!(written, 2);
    assert_eq!(fixture.vectors.len(), 2);
    assert!(llm.calls()[0].prompt.contains("The plan was approved."));

    let hits = fixture.vectors.query("budget allocated", 1).await.unwrap();
    assert_eq!(hits[0].metadata["main_event"], "budget allocated");
}

#[tokio::test]
async fn failing_topic_does_not_stop_others() {
    let fixture = Fixture::new().await;
    let mut builder = KnowledgeGraphBuilder::new(Arc::new(fixture.graph.clone()));
    builder
        .merge_entities(&[Entity::new("Hired Bob", EntityType::Event, "").with_topic("hiring")])
        .await
        .unwrap();

    let llm = MockGenerationBackend::new()
        .with_failure("\"hiring\"", "model offline")
        .with_rule(TOPIC_EVENTS_HEADING, SUMMARY_V1);
    let report = fixture
        .summarizer(llm)
        .summarize_topics(&["hiring".to_string(), "plan approval".to_string()])
        .await;

    assert_eq!(report.summarized, vec!["plan approval".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "hiring");
    assert!(report.failed[0].1.contains("model offline"));
}

#[tokio::test]
async fn unparseable_summary_is_a_topic_failure() {
    let fixture = Fixture::new().await;
    let llm = MockGenerationBackend::new().with_default("I cannot help with that.");
    let report = fixture
        .summarizer(llm)
        .summarize_topics(&["plan approval".to_string()])
        .await;
    assert!(report.summarized.is_empty());
    assert_eq!(report.failed.len(), 1);

    let topic = fixture.graph.node(&NodeRef::topic("plan approval")).unwrap();
    assert!(topic.get("summary").map_or(true, Value::is_null));
}

#[tokio::test]
async fn topic_without_events_is_skipped() {
    let fixture = Fixture::new().await;
    fixture
        .graph
        .merge_node(&NodeRef::topic("empty"), &Default::default())
        .await
        .unwrap();
    let llm = MockGenerationBackend::new();
    let report = fixture
        .summarizer(llm.clone())
        .summarize_topics(&["empty".to_string()])
        .await;
    assert_eq!(report.skipped, vec!["empty".to_string()]);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn failed_embedding_keeps_previous_findings() {
    let fixture = Fixture::new().await;
    let embedder = Arc::new(SwitchableEmbedder {
        inner: MockEmbeddingBackend::new(32),
        failing: AtomicBool::new(false),
    });
    let vectors = Arc::new(InMemoryVectorStore::new(embedder.clone()));
    let summarizer = |reply: &str| {
        TopicSummarizer::new(
            Arc::new(fixture.graph.clone()),
            Arc::new(MockGenerationBackend::new().with_rule(TOPIC_EVENTS_HEADING, reply)),
            vectors.clone(),
        )
    };

    summarizer(SUMMARY_V1)
        .summarize_topic("plan approval")
        .await
        .unwrap();
    assert_eq!(vectors.len(), 1);

    embedder.failing.store(true, Ordering::SeqCst);
    let err = summarizer(SUMMARY_V2)
        .summarize_topic("plan approval")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("embedding service down"));

    let records = vectors.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata["main_event"], "alice approved plan");
}
