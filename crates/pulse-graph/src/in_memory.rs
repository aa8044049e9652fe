//! In-process graph store with the same merge semantics as Neo4j.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use pulse_core::{
    is_blank, EdgeType, EntityType, Error, GraphQuery, GraphRow, GraphStore, NodeRef, PropertyMap,
    Result,
};

type EdgeKey = (NodeRef, EdgeType, NodeRef);

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeRef, PropertyMap>,
    // Insertion order keeps connection listings stable.
    edges: BTreeMap<usize, (EdgeKey, PropertyMap)>,
    edge_index: HashMap<EdgeKey, usize>,
    next_edge: usize,
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("in-memory graph lock poisoned".to_string())
}

fn fill_if_blank(target: &mut PropertyMap, props: &PropertyMap) {
    for (key, value) in props {
        if is_blank(target.get(key)) {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Graph store held in a mutex.
#[derive(Default, Clone)]
pub struct InMemoryGraphStore {
    state: Arc<Mutex<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties of a node, if it exists.
    pub fn node(&self, node: &NodeRef) -> Option<PropertyMap> {
        self.state.lock().ok()?.nodes.get(node).cloned()
    }

    pub fn node_count(&self, label: EntityType) -> usize {
        self.state
            .lock()
            .map(|s| s.nodes.keys().filter(|n| n.label == label).count())
            .unwrap_or(0)
    }

    pub fn edge_count(&self, edge: EdgeType) -> usize {
        self.state
            .lock()
            .map(|s| s.edges.values().filter(|((_, e, _), _)| *e == edge).count())
            .unwrap_or(0)
    }

    pub fn has_edge(&self, from: &NodeRef, to: &NodeRef, edge: EdgeType) -> bool {
        self.state
            .lock()
            .map(|s| s.edge_index.contains_key(&(from.clone(), edge, to.clone())))
            .unwrap_or(false)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn merge_node(&self, node: &NodeRef, props: &PropertyMap) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let created = !state.nodes.contains_key(node);
        let entry = state.nodes.entry(node.clone()).or_insert_with(|| {
            let mut initial = PropertyMap::new();
            initial.insert("name".to_string(), json!(node.name));
            initial
        });
        fill_if_blank(entry, props);
        Ok(created)
    }

    async fn merge_edge(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        edge: EdgeType,
        props: &PropertyMap,
    ) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        for endpoint in [from, to] {
            if !state.nodes.contains_key(endpoint) {
                return Err(Error::NotFound(format!(
                    "edge endpoint missing: {}:{}",
                    endpoint.label, endpoint.name
                )));
            }
        }
        let key = (from.clone(), edge, to.clone());
        if let Some(&slot) = state.edge_index.get(&key) {
            if let Some((_, existing)) = state.edges.get_mut(&slot) {
                fill_if_blank(existing, props);
            }
            return Ok(false);
        }
        let slot = state.next_edge;
        state.next_edge += 1;
        state.edge_index.insert(key.clone(), slot);
        state.edges.insert(slot, (key, props.clone()));
        Ok(true)
    }

    async fn increment(&self, node: &NodeRef, property: &str, by: i64) -> Result<i64> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let props = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::NotFound(format!("{}:{}", node.label, node.name)))?;
        let value = props.get(property).and_then(Value::as_i64).unwrap_or(0) + by;
        props.insert(property.to_string(), json!(value));
        Ok(value)
    }

    async fn set_properties(&self, node: &NodeRef, props: &PropertyMap) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let target = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::NotFound(format!("{}:{}", node.label, node.name)))?;
        for (key, value) in props {
            if key != "name" {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn run(&self, query: GraphQuery) -> Result<Vec<GraphRow>> {
        let state = self.state.lock().map_err(poisoned)?;
        let rows = match query {
            GraphQuery::Node(node) => state.nodes.get(&node).cloned().into_iter().collect(),
            GraphQuery::TopicEvents { topic } => {
                let topic = NodeRef::topic(&topic);
                let mut rows: Vec<GraphRow> = state
                    .edges
                    .values()
                    .filter(|((from, edge, to), _)| {
                        *edge == EdgeType::About && *to == topic && from.label == EntityType::Event
                    })
                    .map(|((from, _, _), _)| {
                        let description = state
                            .nodes
                            .get(from)
                            .and_then(|p| p.get("description"))
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        row(&[("name", json!(from.name)), ("description", json!(description))])
                    })
                    .collect();
                rows.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
                rows
            }
            GraphQuery::EventConnections { events } => {
                let mut rows = Vec::new();
                for ((from, edge, to), props) in state.edges.values() {
                    let description = props
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    if from.label == EntityType::Event && events.contains(&from.name) {
                        rows.push(connection_row(from, "out", *edge, to, &description));
                    }
                    if to.label == EntityType::Event && events.contains(&to.name) {
                        rows.push(connection_row(to, "in", *edge, from, &description));
                    }
                }
                rows
            }
            GraphQuery::Topics => {
                let mut rows: Vec<GraphRow> = state
                    .nodes
                    .iter()
                    .filter(|(node, _)| node.label == EntityType::Topic)
                    .map(|(node, props)| {
                        row(&[
                            ("name", json!(node.name)),
                            (
                                "event_count",
                                json!(props.get("event_count").and_then(Value::as_i64).unwrap_or(0)),
                            ),
                            ("summary", props.get("summary").cloned().unwrap_or(Value::Null)),
                        ])
                    })
                    .collect();
                rows.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
                rows
            }
        };
        Ok(rows)
    }
}

fn row(columns: &[(&str, Value)]) -> GraphRow {
    columns
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn connection_row(
    event: &NodeRef,
    direction: &str,
    edge: EdgeType,
    other: &NodeRef,
    description: &str,
) -> GraphRow {
    row(&[
        ("event", json!(event.name)),
        ("direction", json!(direction)),
        ("edge_type", json!(edge.as_str())),
        ("other", json!(other.name)),
        ("other_label", json!(other.label.as_str())),
        ("description", json!(description)),
    ])
}
