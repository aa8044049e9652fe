//! Topic summarization and finding indexing.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use pulse_core::{
    canonical_name, defaults, EdgeType, Error, GenerationBackend, GraphQuery, GraphRow,
    GraphStore, NodeRef, PropertyMap, Result, TopicSummary, VectorRecord, VectorStore,
};
use pulse_inference::prompts::{self, ConnectionLine, EventLine};
use pulse_inference::{parse_json_response, ParsedResponse};

/// Result of summarizing a set of topics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryReport {
    /// Topics whose summary was written.
    pub summarized: Vec<String>,
    /// Topics with no linked events.
    pub skipped: Vec<String>,
    /// `(topic, error)` for topics that failed.
    pub failed: Vec<(String, String)>,
    pub records_indexed: usize,
}

/// Writes a structured summary onto each Topic node and indexes its findings.
pub struct TopicSummarizer {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn GenerationBackend>,
    vectors: Arc<dyn VectorStore>,
    temperature: f32,
}

enum TopicOutcome {
    Summarized(usize),
    NoEvents,
}

impl TopicSummarizer {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn GenerationBackend>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            graph,
            llm,
            vectors,
            temperature: defaults::SUMMARY_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Summarize every topic, logging failures without stopping.
    pub async fn summarize_topics(&self, topics: &[String]) -> SummaryReport {
        let mut report = SummaryReport::default();
        for topic in topics {
            match self.summarize(topic).await {
                Ok(TopicOutcome::Summarized(records)) => {
                    report.records_indexed += records;
                    report.summarized.push(topic.clone());
                }
                Ok(TopicOutcome::NoEvents) => report.skipped.push(topic.clone()),
                Err(e) => {
                    warn!(
                        subsystem = "graph",
                        component = "summarizer",
                        topic = %topic,
                        error = %e,
                        "Topic summary failed"
                    );
                    report.failed.push((topic.clone(), e.to_string()));
                }
            }
        }
        report
    }

    /// Summarize one topic and return the number of vector records written.
    pub async fn summarize_topic(&self, topic: &str) -> Result<usize> {
        match self.summarize(topic).await? {
            TopicOutcome::Summarized(records) => Ok(records),
            TopicOutcome::NoEvents => Ok(0),
        }
    }

    #[instrument(skip(self), fields(subsystem = "graph", component = "summarizer", op = "summarize_topic"))]
    async fn summarize(&self, topic: &str) -> Result<TopicOutcome> {
        let start = Instant::now();
        let topic = canonical_name(topic);
        let node = NodeRef::topic(&topic);

        let props = self
            .graph
            .run(GraphQuery::Node(node.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic)))?;
        let topic_id = self.topic_id(&node, &props).await?;
        let previous = props.get("summary").and_then(Value::as_str);

        let events: Vec<EventLine> = self
            .graph
            .run(GraphQuery::TopicEvents {
                topic: topic.clone(),
            })
            .await?
            .iter()
            .filter_map(|row| {
                Some(EventLine {
                    name: str_col(row, "name")?.to_string(),
                    description: str_col(row, "description").unwrap_or("").to_string(),
                })
            })
            .collect();
        if events.is_empty() {
            debug!(topic = %topic, "Topic has no events, skipping summary");
            return Ok(TopicOutcome::NoEvents);
        }

        let connections = self
            .graph
            .run(GraphQuery::EventConnections {
                events: events.iter().map(|e| e.name.clone()).collect(),
            })
            .await?
            .iter()
            .filter_map(connection_line)
            .collect::<Vec<_>>();

        let prompt = prompts::topic_summary(&topic, &events, &connections, previous);
        let response = self.llm.generate(&prompt, self.temperature).await?;
        let summary: TopicSummary = match parse_json_response(&response) {
            ParsedResponse::Parsed(summary) => summary,
            ParsedResponse::ParseError(e) => {
                return Err(Error::Serialization(format!(
                    "topic summary response: {}",
                    e
                )))
            }
        };

        let now = Utc::now();
        let mut update = PropertyMap::new();
        update.insert("summary".into(), json!(summary.summary));
        update.insert(
            "metadata".into(),
            json!(json!({
                "findings": summary.findings,
                "event_count": events.len(),
                "model": self.llm.model_name(),
            })
            .to_string()),
        );
        update.insert("summarized_at".into(), json!(now.to_rfc3339()));
        self.graph.set_properties(&node, &update).await?;

        let records: Vec<VectorRecord> = summary
            .findings
            .iter()
            .filter_map(|finding| {
                let text = finding.embedding_text();
                if text.is_empty() {
                    return None;
                }
                Some(VectorRecord {
                    id: Uuid::now_v7(),
                    text,
                    metadata: json!({
                        "topic_id": topic_id,
                        "title": topic,
                        "main_event": finding.main_event,
                        "sub_events": finding.sub_events,
                        "summary": finding.summary,
                        "created_at": now.to_rfc3339(),
                    }),
                })
            })
            .collect();

        let (replaced, written) = self.vectors.replace_for_topic(&topic_id, &records).await?;

        info!(
            topic = %topic,
            event_count = events.len(),
            finding_count = summary.findings.len(),
            replaced,
            written,
            duration_ms = start.elapsed().as_millis() as u64,
            "Topic summarized"
        );
        Ok(TopicOutcome::Summarized(written))
    }

    /// Stable identifier of the topic, assigned on first use if missing.
    async fn topic_id(&self, node: &NodeRef, props: &PropertyMap) -> Result<String> {
        if let Some(id) = props.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            return Ok(id.to_string());
        }
        let id = Uuid::now_v7().to_string();
        let mut update = PropertyMap::new();
        update.insert("id".into(), json!(id));
        self.graph.set_properties(node, &update).await?;
        Ok(id)
    }
}

fn str_col<'a>(row: &'a GraphRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn connection_line(row: &GraphRow) -> Option<ConnectionLine> {
    let edge_type = str_col(row, "edge_type")?;
    if edge_type == EdgeType::About.as_str() {
        return None;
    }
    let event = str_col(row, "event")?.to_string();
    let other = str_col(row, "other")?.to_string();
    let (from, to) = match str_col(row, "direction") {
        Some("in") => (other, event),
        _ => (event, other),
    };
    Some(ConnectionLine {
        from,
        edge_type: edge_type.to_string(),
        to,
        description: str_col(row, "description").unwrap_or("").to_string(),
    })
}
