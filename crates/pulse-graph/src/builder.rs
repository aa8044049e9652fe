//! Merges one extraction batch into the knowledge graph.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_core::{
    canonical_name, defaults, EdgeType, Entity, EntityType, Error, GraphQuery, GraphStore,
    NodeRef, PropertyMap, Relationship, Result,
};

/// Topic property counting linked events.
pub const EVENT_COUNT: &str = "event_count";
/// Topic property set once the topic has overflowed.
pub const SPLIT_PENDING: &str = "split_pending";

/// Outcome of [`KnowledgeGraphBuilder::merge_entities`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityMergeOutcome {
    /// Whether any topic crossed the overflow threshold in this batch.
    pub topic_overflow: bool,
    /// Topics newly flagged for splitting.
    pub overflowed_topics: Vec<String>,
    pub nodes_created: usize,
    /// New Event→Topic links.
    pub topic_links_created: usize,
}

/// Outcome of [`KnowledgeGraphBuilder::merge_relationships`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipMergeOutcome {
    pub created: usize,
    pub existing: usize,
    /// Relationships whose endpoints are not in the current batch.
    pub skipped: usize,
}

/// Writes entities and relationships of one document into a [`GraphStore`].
///
/// The builder indexes the entities it has merged so relationships resolve
/// only against the current batch, and remembers every topic it linked an
/// event to for the summarizer.
pub struct KnowledgeGraphBuilder {
    graph: Arc<dyn GraphStore>,
    overflow_threshold: i64,
    index: HashMap<String, NodeRef>,
    touched_topics: BTreeSet<String>,
}

impl KnowledgeGraphBuilder {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            overflow_threshold: defaults::TOPIC_OVERFLOW_THRESHOLD,
            index: HashMap::new(),
            touched_topics: BTreeSet::new(),
        }
    }

    pub fn with_overflow_threshold(mut self, threshold: i64) -> Self {
        self.overflow_threshold = threshold;
        self
    }

    /// Topics linked to at least one event of this batch, sorted.
    pub fn touched_topics(&self) -> Vec<String> {
        self.touched_topics.iter().cloned().collect()
    }

    /// Merge nodes for `entities` and link events to their topics.
    pub async fn merge_entities(&mut self, entities: &[Entity]) -> Result<EntityMergeOutcome> {
        let mut outcome = EntityMergeOutcome::default();

        for entity in entities {
            let node = entity.node_ref();
            let mut props = PropertyMap::new();
            props.insert("description".into(), json!(entity.description));
            if entity.entity_type == EntityType::Topic {
                props.extend(topic_defaults());
            }
            if self.graph.merge_node(&node, &props).await? {
                outcome.nodes_created += 1;
            }
            self.index.entry(entity.name.clone()).or_insert(node.clone());

            if let Some(topic) = entity.topic.as_deref().filter(|t| !t.is_empty()) {
                if self.link_event_to_topic(&node, topic, &mut outcome).await? {
                    outcome.topic_links_created += 1;
                }
                self.touched_topics.insert(topic.to_string());
            }
        }

        outcome.topic_overflow = !outcome.overflowed_topics.is_empty();
        debug!(
            subsystem = "graph",
            component = "builder",
            op = "merge_entities",
            entity_count = entities.len(),
            nodes_created = outcome.nodes_created,
            topic_links_created = outcome.topic_links_created,
            "Entities merged"
        );
        Ok(outcome)
    }

    /// Returns whether a new ABOUT edge was created.
    async fn link_event_to_topic(
        &self,
        event: &NodeRef,
        topic: &str,
        outcome: &mut EntityMergeOutcome,
    ) -> Result<bool> {
        let topic_node = NodeRef::topic(topic);
        if self.graph.merge_node(&topic_node, &topic_defaults()).await? {
            outcome.nodes_created += 1;
        }
        let created = self
            .graph
            .merge_edge(event, &topic_node, EdgeType::About, &PropertyMap::new())
            .await?;
        if !created {
            return Ok(false);
        }

        let count = self.graph.increment(&topic_node, EVENT_COUNT, 1).await?;
        if count > self.overflow_threshold && !self.split_pending(&topic_node).await? {
            let mut flag = PropertyMap::new();
            flag.insert(SPLIT_PENDING.into(), json!(true));
            flag.insert("split_flagged_at".into(), json!(Utc::now().to_rfc3339()));
            self.graph.set_properties(&topic_node, &flag).await?;

            warn!(
                subsystem = "graph",
                component = "builder",
                topic = %topic_node.name,
                event_count = count,
                threshold = self.overflow_threshold,
                "Topic exceeded event threshold, flagged for split"
            );
            self.split_topic(&topic_node.name).await?;
            outcome.overflowed_topics.push(topic_node.name);
        }
        Ok(true)
    }

    async fn split_pending(&self, topic: &NodeRef) -> Result<bool> {
        let rows = self.graph.run(GraphQuery::Node(topic.clone())).await?;
        Ok(rows
            .first()
            .and_then(|props| props.get(SPLIT_PENDING))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Report an overflowing topic's events. Partitioning into sub-topics is
    /// not performed; the topic stays flagged until [`Self::reset_split_flag`].
    pub async fn split_topic(&self, topic: &str) -> Result<Vec<String>> {
        let rows = self
            .graph
            .run(GraphQuery::TopicEvents {
                topic: canonical_name(topic),
            })
            .await?;
        let events: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        info!(
            subsystem = "graph",
            component = "builder",
            op = "split_topic",
            topic = %topic,
            event_count = events.len(),
            events = ?events,
            "Topic split requested"
        );
        Ok(events)
    }

    /// Clear the split flag so the topic can be flagged again.
    pub async fn reset_split_flag(&self, topic: &str) -> Result<()> {
        let mut props = PropertyMap::new();
        props.insert(SPLIT_PENDING.into(), json!(false));
        self.graph
            .set_properties(&NodeRef::topic(topic), &props)
            .await
    }

    /// Merge edges for relationships whose endpoints were merged in this batch.
    pub async fn merge_relationships(
        &self,
        relationships: &[Relationship],
    ) -> Result<RelationshipMergeOutcome> {
        let mut outcome = RelationshipMergeOutcome::default();

        for rel in relationships {
            let (Some(source), Some(target)) = (self.index.get(&rel.source), self.index.get(&rel.target))
            else {
                warn!(
                    subsystem = "graph",
                    component = "builder",
                    source = %rel.source,
                    target = %rel.target,
                    relationship = %rel.relationship_type,
                    "Relationship endpoint not in batch, skipping"
                );
                outcome.skipped += 1;
                continue;
            };

            let mut props = PropertyMap::new();
            props.insert("description".into(), json!(rel.description));
            props.insert("strength".into(), json!(rel.strength));

            match self
                .graph
                .merge_edge(source, target, rel.relationship_type.edge_type(), &props)
                .await
            {
                Ok(true) => outcome.created += 1,
                Ok(false) => outcome.existing += 1,
                Err(Error::NotFound(msg)) => {
                    warn!(
                        subsystem = "graph",
                        component = "builder",
                        error = %msg,
                        "Relationship endpoint missing in graph, skipping"
                    );
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            subsystem = "graph",
            component = "builder",
            op = "merge_relationships",
            relationship_count = relationships.len(),
            created = outcome.created,
            skipped = outcome.skipped,
            "Relationships merged"
        );
        Ok(outcome)
    }
}

fn topic_defaults() -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(EVENT_COUNT.into(), json!(0));
    props.insert("id".into(), json!(Uuid::now_v7().to_string()));
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryGraphStore;
    use pulse_core::RelationshipType;

    fn event(name: &str, topic: &str) -> Entity {
        Entity::new(name, EntityType::Event, format!("{} happened", name)).with_topic(topic)
    }

    #[tokio::test]
    async fn merging_twice_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let graph: Arc<dyn GraphStore> = Arc::new(store.clone());
        let batch = vec![
            event("Alice approved plan", "plan approval"),
            Entity::new("Alice", EntityType::Actor, "Product lead"),
        ];

        let mut first = KnowledgeGraphBuilder::new(graph.clone());
        let outcome = first.merge_entities(&batch).await.unwrap();
        assert_eq!(outcome.topic_links_created, 1);

        let mut second = KnowledgeGraphBuilder::new(graph);
        let outcome = second.merge_entities(&batch).await.unwrap();
        assert_eq!(outcome.topic_links_created, 0);
        assert_eq!(outcome.nodes_created, 0);

        let topic = store.node(&NodeRef::topic("plan approval")).unwrap();
        assert_eq!(topic["event_count"], 1);
        assert_eq!(store.node_count(EntityType::Event), 1);
        assert_eq!(store.edge_count(EdgeType::About), 1);
        assert_eq!(second.touched_topics(), vec!["plan approval".to_string()]);
    }

    #[tokio::test]
    async fn topic_id_is_stable_across_merges() {
        let store = InMemoryGraphStore::new();
        let mut builder = KnowledgeGraphBuilder::new(Arc::new(store.clone()));
        builder.merge_entities(&[event("a", "hiring")]).await.unwrap();
        let id = store.node(&NodeRef::topic("hiring")).unwrap()["id"].clone();
        builder.merge_entities(&[event("b", "hiring")]).await.unwrap();
        assert_eq!(store.node(&NodeRef::topic("hiring")).unwrap()["id"], id);
    }

    #[tokio::test]
    async fn relationships_outside_batch_are_skipped() {
        let store = InMemoryGraphStore::new();
        let mut builder = KnowledgeGraphBuilder::new(Arc::new(store.clone()));
        builder
            .merge_entities(&[
                Entity::new("Alice", EntityType::Actor, ""),
                event("Alice approved plan", "plan approval"),
            ])
            .await
            .unwrap();

        let outcome = builder
            .merge_relationships(&[
                Relationship::new("alice", "alice approved plan", RelationshipType::Performed, "", 0.9),
                Relationship::new("bob", "alice approved plan", RelationshipType::Performed, "", 0.9),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(store.has_edge(
            &NodeRef::new(EntityType::Actor, "alice"),
            &NodeRef::new(EntityType::Event, "alice approved plan"),
            EdgeType::Performed
        ));
    }

    #[tokio::test]
    async fn existing_edge_description_is_kept() {
        let store = InMemoryGraphStore::new();
        let mut builder = KnowledgeGraphBuilder::new(Arc::new(store.clone()));
        builder
            .merge_entities(&[
                event("launch", "release"),
                Entity::new("2024-05-01", EntityType::Time, ""),
            ])
            .await
            .unwrap();
        let first = Relationship::new("launch", "2024-05-01", RelationshipType::OccurredAt, "on the day", 0.8);
        let second = Relationship::new("launch", "2024-05-01", RelationshipType::OccurredAt, "different", 0.8);

        let outcome = builder.merge_relationships(&[first, second]).await.unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.existing, 1);

        let rows = store
            .run(GraphQuery::EventConnections {
                events: vec!["launch".into()],
            })
            .await
            .unwrap();
        let at_time = rows.iter().find(|r| r["edge_type"] == "AT_TIME").unwrap();
        assert_eq!(at_time["description"], "on the day");
    }

    #[tokio::test]
    async fn overflow_is_flagged_once_until_reset() {
        let store = InMemoryGraphStore::new();
        let mut builder =
            KnowledgeGraphBuilder::new(Arc::new(store.clone())).with_overflow_threshold(50);

        let first_fifty: Vec<Entity> = (0..50).map(|i| event(&format!("e{}", i), "ops")).collect();
        let outcome = builder.merge_entities(&first_fifty).await.unwrap();
        assert!(!outcome.topic_overflow);

        let outcome = builder.merge_entities(&[event("e50", "ops")]).await.unwrap();
        assert!(outcome.topic_overflow);
        assert_eq!(outcome.overflowed_topics, vec!["ops".to_string()]);

        let outcome = builder.merge_entities(&[event("e51", "ops")]).await.unwrap();
        assert!(!outcome.topic_overflow);

        builder.reset_split_flag("ops").await.unwrap();
        let outcome = builder.merge_entities(&[event("e52", "ops")]).await.unwrap();
        assert_eq!(outcome.overflowed_topics, vec!["ops".to_string()]);

        let topic = store.node(&NodeRef::topic("ops")).unwrap();
        assert_eq!(topic["event_count"], 53);
        assert_eq!(topic["split_pending"], true);
    }

    #[tokio::test]
    async fn split_topic_lists_events() {
        let store = InMemoryGraphStore::new();
        let mut builder = KnowledgeGraphBuilder::new(Arc::new(store));
        builder
            .merge_entities(&[event("b event", "t"), event("a event", "t")])
            .await
            .unwrap();
        let events = builder.split_topic("T").await.unwrap();
        assert_eq!(events, vec!["a event".to_string(), "b event".to_string()]);
    }
}
