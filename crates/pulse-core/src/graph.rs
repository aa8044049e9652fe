//! Knowledge graph and vector index types.
//!
//! Entities and relationships are the normalized output of extraction; the
//! node/edge/query types describe the capability surface a graph store must
//! provide.

use serde::{Deserialize, Serialize};

// =============================================================================
// ENTITIES
// =============================================================================

/// Entity kind. Doubles as the graph node label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Event,
    Actor,
    Time,
    Topic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Event => "Event",
            EntityType::Actor => "Actor",
            EntityType::Time => "Time",
            EntityType::Topic => "Topic",
        }
    }

    /// Case-insensitive parse of a model-supplied type name.
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "event" => Some(EntityType::Event),
            "actor" | "person" | "people" => Some(EntityType::Actor),
            "time" | "date" => Some(EntityType::Time),
            "topic" => Some(EntityType::Topic),
            _ => None,
        }
    }

    pub fn all() -> [EntityType; 4] {
        [
            EntityType::Event,
            EntityType::Actor,
            EntityType::Time,
            EntityType::Topic,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of an entity or topic name.
pub fn canonical_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical (lowercased, trimmed) name.
    pub name: String,
    pub entity_type: EntityType,
    pub description: String,
    /// Canonical topic; only ever set on events.
    pub topic: Option<String>,
}

impl Entity {
    pub fn new(name: &str, entity_type: EntityType, description: impl Into<String>) -> Self {
        Self {
            name: canonical_name(name),
            entity_type,
            description: description.into(),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        if self.entity_type == EntityType::Event {
            self.topic = Some(canonical_name(topic));
        }
        self
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.entity_type, &self.name)
    }
}

// =============================================================================
// RELATIONSHIPS
// =============================================================================

/// Relationship kind as emitted by extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Performed,
    Discussing,
    OccurredAt,
    RelatedTo,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Performed => "PERFORMED",
            RelationshipType::Discussing => "DISCUSSING",
            RelationshipType::OccurredAt => "OCCURRED_AT",
            RelationshipType::RelatedTo => "RELATED_TO",
        }
    }

    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "PERFORMED" => Some(RelationshipType::Performed),
            "DISCUSSING" => Some(RelationshipType::Discussing),
            "OCCURRED_AT" => Some(RelationshipType::OccurredAt),
            "RELATED_TO" => Some(RelationshipType::RelatedTo),
            _ => None,
        }
    }

    /// Edge type used when the relationship is written to the graph.
    pub fn edge_type(&self) -> EdgeType {
        match self {
            RelationshipType::Performed => EdgeType::Performed,
            RelationshipType::Discussing => EdgeType::Discussing,
            RelationshipType::OccurredAt => EdgeType::AtTime,
            RelationshipType::RelatedTo => EdgeType::RelatedTo,
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized extracted relationship between two canonical entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relationship_type: RelationshipType,
    pub description: String,
    /// Clamped to `[0, 1]`.
    pub strength: f64,
}

impl Relationship {
    pub fn new(
        source: &str,
        target: &str,
        relationship_type: RelationshipType,
        description: impl Into<String>,
        strength: f64,
    ) -> Self {
        Self {
            source: canonical_name(source),
            target: canonical_name(target),
            relationship_type,
            description: description.into(),
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

// =============================================================================
// GRAPH STORE SURFACE
// =============================================================================

/// Edge types stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Performed,
    Discussing,
    AtTime,
    RelatedTo,
    /// Event → Topic membership.
    About,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Performed => "PERFORMED",
            EdgeType::Discussing => "DISCUSSING",
            EdgeType::AtTime => "AT_TIME",
            EdgeType::RelatedTo => "RELATED_TO",
            EdgeType::About => "ABOUT",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a node by label and canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: EntityType,
    pub name: String,
}

impl NodeRef {
    pub fn new(label: EntityType, name: &str) -> Self {
        Self {
            label,
            name: canonical_name(name),
        }
    }

    pub fn topic(name: &str) -> Self {
        Self::new(EntityType::Topic, name)
    }
}

/// Node or edge properties.
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;

/// One result row of a graph read, keyed by column name.
pub type GraphRow = serde_json::Map<String, serde_json::Value>;

/// Whether a property value counts as unset for fill-if-blank merges.
pub fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Read patterns supported by [`crate::GraphStore::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery {
    /// Properties of a single node; zero or one row, columns are the
    /// node's properties.
    Node(NodeRef),
    /// Events linked to a topic; columns `name`, `description`.
    TopicEvents { topic: String },
    /// Edges touching the given events; columns `event`, `direction`
    /// (`out`/`in`), `edge_type`, `other`, `other_label`, `description`.
    EventConnections { events: Vec<String> },
    /// Every topic; columns `name`, `event_count`, `summary`.
    Topics,
}

// =============================================================================
// TOPIC SUMMARIES AND VECTOR RECORDS
// =============================================================================

/// A single finding inside a topic summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub main_event: String,
    #[serde(default)]
    pub sub_events: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl Finding {
    /// Text embedded for semantic retrieval.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![self.main_event.trim()];
        parts.extend(self.sub_events.iter().map(|s| s.trim()));
        parts.push(self.summary.trim());
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Structured summary of a topic as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// A record stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: uuid::Uuid,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// A vector query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: uuid::Uuid,
    pub score: f32,
    pub text: String,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_name_lowercases_and_trims() {
        assert_eq!(canonical_name("  Alice Approved Plan \n"), "alice approved plan");
    }

    #[test]
    fn entity_type_parses_loosely() {
        assert_eq!(EntityType::parse_loose("event"), Some(EntityType::Event));
        assert_eq!(EntityType::parse_loose(" ACTOR "), Some(EntityType::Actor));
        assert_eq!(EntityType::parse_loose("Time"), Some(EntityType::Time));
        assert_eq!(EntityType::parse_loose("location"), None);
    }

    #[test]
    fn topic_is_only_kept_on_events() {
        let actor = Entity::new("Alice", EntityType::Actor, "").with_topic("planning");
        assert_eq!(actor.topic, None);

        let event = Entity::new("Kickoff", EntityType::Event, "").with_topic(" Planning ");
        assert_eq!(event.topic.as_deref(), Some("planning"));
    }

    #[test]
    fn occurred_at_maps_to_at_time_edge() {
        assert_eq!(RelationshipType::OccurredAt.edge_type(), EdgeType::AtTime);
        assert_eq!(RelationshipType::Performed.edge_type(), EdgeType::Performed);
        assert_eq!(RelationshipType::Discussing.edge_type(), EdgeType::Discussing);
        assert_eq!(RelationshipType::RelatedTo.edge_type(), EdgeType::RelatedTo);
    }

    #[test]
    fn relationship_type_parses_variants() {
        assert_eq!(
            RelationshipType::parse_loose("occurred at"),
            Some(RelationshipType::OccurredAt)
        );
        assert_eq!(
            RelationshipType::parse_loose("related-to"),
            Some(RelationshipType::RelatedTo)
        );
        assert_eq!(RelationshipType::parse_loose("OWNS"), None);
    }

    #[test]
    fn relationship_strength_is_clamped() {
        let rel = Relationship::new("a", "b", RelationshipType::RelatedTo, "", 3.5);
        assert_eq!(rel.strength, 1.0);
        let rel = Relationship::new("a", "b", RelationshipType::RelatedTo, "", -1.0);
        assert_eq!(rel.strength, 0.0);
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&json!(null))));
        assert!(is_blank(Some(&json!("  "))));
        assert!(!is_blank(Some(&json!("set"))));
        assert!(!is_blank(Some(&json!(0))));
    }

    #[test]
    fn finding_embedding_text_joins_parts() {
        let finding = Finding {
            main_event: "budget approved".into(),
            sub_events: vec!["vote held".into(), "".into(), "minutes filed".into()],
            summary: "The board approved the budget. ".into(),
        };
        assert_eq!(
            finding.embedding_text(),
            "budget approved vote held minutes filed The board approved the budget."
        );
    }

    #[test]
    fn topic_summary_tolerates_missing_findings() {
        let parsed: TopicSummary = serde_json::from_value(json!({"summary": "s"})).unwrap();
        assert!(parsed.findings.is_empty());
    }
}
