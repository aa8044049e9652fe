//! Neo4j graph store over the HTTP transactional endpoint.
//!
//! Every call is a single auto-committed transaction posted to
//! `{base}/db/{database}/tx/commit`. Labels and edge types come from closed
//! enums and property keys are validated before they are spliced into
//! Cypher; everything else travels as parameters.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use pulse_core::{
    defaults, EdgeType, EntityType, Error, GraphQuery, GraphRow, GraphStore, NodeRef, PropertyMap,
    Result, TenantSecrets,
};

/// Neo4j connection settings.
#[derive(Clone)]
pub struct Neo4jConfig {
    /// Base HTTP URL, e.g. `http://localhost:7474`. Bolt-style URIs are
    /// translated to their HTTP equivalent.
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl Neo4jConfig {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
            database: defaults::NEO4J_DATABASE.to_string(),
            timeout: Duration::from_secs(defaults::GRAPH_TIMEOUT_SECS),
        }
    }

    pub fn from_secrets(secrets: &TenantSecrets) -> Self {
        Self::new(&secrets.neo4j_uri, &secrets.neo4j_user, &secrets.neo4j_password)
            .with_database(&secrets.neo4j_database)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        if !database.trim().is_empty() {
            self.database = database;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Translate a Bolt/Neo4j URI into the HTTP base URL of the same server.
pub fn http_base_url(uri: &str) -> String {
    let uri = uri.trim().trim_end_matches('/');
    let (scheme, rest) = match uri.split_once("://") {
        Some(parts) => parts,
        None => return format!("http://{}", uri),
    };
    let secure = scheme.ends_with("+s") || scheme.ends_with("+ssc") || scheme == "https";
    let http_scheme = if secure { "https" } else { "http" };
    match scheme {
        "http" | "https" => uri.to_string(),
        _ => {
            let http_port = if secure { ":7473" } else { ":7474" };
            let host = match rest.strip_suffix(":7687") {
                Some(host) => format!("{}{}", host, http_port),
                None => rest.to_string(),
            };
            format!("{}://{}", http_scheme, host)
        }
    }
}

/// Whether `key` can be used as an unquoted property name.
pub fn is_valid_property_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn checked_keys(props: &PropertyMap) -> Result<Vec<&str>> {
    props
        .keys()
        .map(|k| {
            if k == "name" || k == CREATED_MARKER || !is_valid_property_key(k) {
                Err(Error::InvalidInput(format!("invalid property key: {}", k)))
            } else {
                Ok(k.as_str())
            }
        })
        .collect()
}

const CREATED_MARKER: &str = "_created";

/// `SET` clause that writes each property only where it is currently blank.
fn fill_if_blank_clause(var: &str, keys: &[&str]) -> String {
    if keys.is_empty() {
        return String::new();
    }
    let assignments = keys
        .iter()
        .map(|k| {
            format!(
                "{v}.{k} = CASE WHEN {v}.{k} IS NULL OR trim(toString({v}.{k})) = '' THEN $props.{k} ELSE {v}.{k} END",
                v = var,
                k = k
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SET {}", assignments)
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: Value,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    row: Vec<Value>,
}

#[derive(Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

/// Graph store backed by a Neo4j server.
pub struct Neo4jGraphStore {
    client: Client,
    config: Neo4jConfig,
    endpoint: String,
}

impl Neo4jGraphStore {
    pub fn new(config: Neo4jConfig) -> Self {
        let endpoint = format!(
            "{}/db/{}/tx/commit",
            http_base_url(&config.uri),
            config.database
        );
        info!(
            subsystem = "graph",
            component = "neo4j",
            op = "init",
            endpoint = %endpoint,
            "Initializing Neo4j graph store"
        );
        Self {
            client: Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
            config,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one statement and map its rows to column-keyed maps.
    async fn execute(&self, statement: &str, parameters: Value) -> Result<Vec<GraphRow>> {
        let start = Instant::now();
        let request = CommitRequest {
            statements: vec![Statement {
                statement,
                parameters,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Graph(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Graph(format!("Neo4j returned {}: {}", status, body)));
        }

        let body: CommitResponse = response
            .json()
            .await
            .map_err(|e| Error::Graph(format!("Failed to parse response: {}", e)))?;

        if let Some(err) = body.errors.first() {
            return Err(Error::Graph(format!("{}: {}", err.code, err.message)));
        }

        let rows: Vec<GraphRow> = body
            .results
            .into_iter()
            .next()
            .map(|result| {
                result
                    .data
                    .into_iter()
                    .map(|data| result.columns.iter().cloned().zip(data.row).collect())
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            result_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Cypher statement complete"
        );
        Ok(rows)
    }

    /// Create uniqueness constraints on `name` for every node label and the
    /// topic size index.
    pub async fn ensure_schema(&self) -> Result<()> {
        for label in EntityType::all() {
            let statement = format!(
                "CREATE CONSTRAINT {}_name IF NOT EXISTS FOR (n:{}) REQUIRE n.name IS UNIQUE",
                label.as_str().to_lowercase(),
                label.as_str()
            );
            self.execute(&statement, json!({})).await?;
        }
        self.execute(
            "CREATE INDEX topic_event_count IF NOT EXISTS FOR (n:Topic) ON (n.event_count)",
            json!({}),
        )
        .await?;
        info!(
            subsystem = "graph",
            component = "neo4j",
            op = "ensure_schema",
            "Graph constraints ensured"
        );
        Ok(())
    }
}

fn created_flag(rows: &[GraphRow]) -> Option<bool> {
    rows.first()
        .map(|row| row.get("created").and_then(Value::as_bool).unwrap_or(false))
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    #[instrument(skip(self, props), fields(subsystem = "graph", component = "neo4j", op = "merge_node", label = %node.label, name = %node.name))]
    async fn merge_node(&self, node: &NodeRef, props: &PropertyMap) -> Result<bool> {
        let keys = checked_keys(props)?;
        let statement = format!(
            "MERGE (n:{label} {{name: $name}}) \
             ON CREATE SET n.{marker} = true \
             {fill} \
             WITH n, coalesce(n.{marker}, false) AS created \
             REMOVE n.{marker} \
             RETURN created",
            label = node.label.as_str(),
            marker = CREATED_MARKER,
            fill = fill_if_blank_clause("n", &keys),
        );
        let rows = self
            .execute(&statement, json!({ "name": node.name, "props": props }))
            .await?;
        Ok(created_flag(&rows).unwrap_or(false))
    }

    #[instrument(skip(self, props), fields(subsystem = "graph", component = "neo4j", op = "merge_edge", edge = %edge, from = %from.name, to = %to.name))]
    async fn merge_edge(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        edge: EdgeType,
        props: &PropertyMap,
    ) -> Result<bool> {
        let keys = checked_keys(props)?;
        let statement = format!(
            "MATCH (a:{from_label} {{name: $from}}) \
             MATCH (b:{to_label} {{name: $to}}) \
             MERGE (a)-[r:{edge}]->(b) \
             ON CREATE SET r.{marker} = true \
             {fill} \
             WITH r, coalesce(r.{marker}, false) AS created \
             REMOVE r.{marker} \
             RETURN created",
            from_label = from.label.as_str(),
            to_label = to.label.as_str(),
            edge = edge.as_str(),
            marker = CREATED_MARKER,
            fill = fill_if_blank_clause("r", &keys),
        );
        let rows = self
            .execute(
                &statement,
                json!({ "from": from.name, "to": to.name, "props": props }),
            )
            .await?;
        created_flag(&rows).ok_or_else(|| {
            Error::NotFound(format!(
                "edge endpoint missing: {}:{} -> {}:{}",
                from.label, from.name, to.label, to.name
            ))
        })
    }

    #[instrument(skip(self), fields(subsystem = "graph", component = "neo4j", op = "increment", name = %node.name))]
    async fn increment(&self, node: &NodeRef, property: &str, by: i64) -> Result<i64> {
        if !is_valid_property_key(property) {
            return Err(Error::InvalidInput(format!(
                "invalid property key: {}",
                property
            )));
        }
        let statement = format!(
            "MATCH (n:{label} {{name: $name}}) \
             SET n.{prop} = coalesce(n.{prop}, 0) + $by \
             RETURN n.{prop} AS value",
            label = node.label.as_str(),
            prop = property,
        );
        let rows = self
            .execute(&statement, json!({ "name": node.name, "by": by }))
            .await?;
        rows.first()
            .and_then(|row| row.get("value"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::NotFound(format!("{}:{}", node.label, node.name)))
    }

    #[instrument(skip(self, props), fields(subsystem = "graph", component = "neo4j", op = "set_properties", name = %node.name))]
    async fn set_properties(&self, node: &NodeRef, props: &PropertyMap) -> Result<()> {
        checked_keys(props)?;
        let statement = format!(
            "MATCH (n:{label} {{name: $name}}) SET n += $props RETURN count(n) AS matched",
            label = node.label.as_str(),
        );
        let rows = self
            .execute(&statement, json!({ "name": node.name, "props": props }))
            .await?;
        let matched = rows
            .first()
            .and_then(|row| row.get("matched"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if matched == 0 {
            return Err(Error::NotFound(format!("{}:{}", node.label, node.name)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "graph", component = "neo4j", op = "run"))]
    async fn run(&self, query: GraphQuery) -> Result<Vec<GraphRow>> {
        let result = match query {
            GraphQuery::Node(node) => {
                let statement = format!(
                    "MATCH (n:{} {{name: $name}}) RETURN properties(n) AS props",
                    node.label.as_str()
                );
                let rows = self.execute(&statement, json!({ "name": node.name })).await?;
                Ok(rows
                    .into_iter()
                    .filter_map(|mut row| match row.remove("props") {
                        Some(Value::Object(props)) => Some(props),
                        _ => None,
                    })
                    .collect())
            }
            GraphQuery::TopicEvents { topic } => {
                self.execute(
                    "MATCH (e:Event)-[:ABOUT]->(t:Topic {name: $topic}) \
                     RETURN e.name AS name, coalesce(e.description, '') AS description \
                     ORDER BY name",
                    json!({ "topic": topic }),
                )
                .await
            }
            GraphQuery::EventConnections { events } => {
                self.execute(
                    "MATCH (e:Event)-[r]->(o) WHERE e.name IN $events \
                     RETURN e.name AS event, 'out' AS direction, type(r) AS edge_type, \
                            o.name AS other, labels(o)[0] AS other_label, \
                            coalesce(r.description, '') AS description \
                     UNION ALL \
                     MATCH (e:Event)<-[r]-(o) WHERE e.name IN $events \
                     RETURN e.name AS event, 'in' AS direction, type(r) AS edge_type, \
                            o.name AS other, labels(o)[0] AS other_label, \
                            coalesce(r.description, '') AS description",
                    json!({ "events": events }),
                )
                .await
            }
            GraphQuery::Topics => {
                self.execute(
                    "MATCH (t:Topic) \
                     RETURN t.name AS name, coalesce(t.event_count, 0) AS event_count, \
                            t.summary AS summary \
                     ORDER BY name",
                    json!({}),
                )
                .await
            }
        };
        if let Err(e) = &result {
            warn!(error = %e, "Graph query failed");
        }
        result
    }
}
