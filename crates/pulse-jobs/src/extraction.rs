//! Document extraction: chunked entity/relationship extraction, topic
//! normalization and document summary.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use pulse_core::{
    canonical_name, defaults, Entity, EntityType, GenerationBackend, PipelineConfig, Relationship,
    RelationshipType, Result,
};
use pulse_inference::{parse_json_response, prompts, split_title_summary, ParsedResponse};

use crate::chunker::chunk_text;

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    entity_name: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    entity_description: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(default)]
    source_entity: Option<String>,
    #[serde(default)]
    target_entity: Option<String>,
    #[serde(default)]
    relationship_type: Option<String>,
    #[serde(default)]
    relationship_description: Option<String>,
    #[serde(default)]
    relationship_strength: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    topic: String,
}

/// Entities and relationships extracted from one chunk, after filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkExtraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// Aggregated extraction output for a whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub title: String,
    pub summary: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Canonical topics seen in the document, sorted.
    pub topics: Vec<String>,
    pub chunk_count: usize,
    /// Totals and processing stats stored on the memory.
    pub metadata: Value,
}

/// Drives the language model over a document.
pub struct ExtractionEngine {
    llm: Arc<dyn GenerationBackend>,
    config: PipelineConfig,
}

impl ExtractionEngine {
    pub fn new(llm: Arc<dyn GenerationBackend>, config: PipelineConfig) -> Self {
        Self { llm, config }
    }

    /// Run the full extraction over `text`.
    ///
    /// Model transport errors propagate so the intake is retried; responses
    /// that cannot be parsed yield empty results for their chunk.
    #[instrument(skip(self, text), fields(subsystem = "jobs", component = "extraction", op = "extract", text_len = text.len()))]
    pub async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        let start = Instant::now();
        let chunks = chunk_text(text, self.config.chunk_size);
        let mut topics = BTreeSet::new();
        let mut entities: Vec<Entity> = Vec::new();
        let mut entity_slots: HashMap<(String, EntityType), usize> = HashMap::new();
        let mut relationships: Vec<Relationship> = Vec::new();
        let mut relationship_keys = HashSet::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let extracted = self.extract_chunk(chunk, &mut topics).await?;
            debug!(
                chunk = i,
                entity_count = extracted.entities.len(),
                relationship_count = extracted.relationships.len(),
                "Chunk extracted"
            );
            for entity in extracted.entities {
                let key = (entity.name.clone(), entity.entity_type);
                match entity_slots.get(&key) {
                    Some(&slot) => {
                        let existing = &mut entities[slot];
                        if existing.description.trim().is_empty() {
                            existing.description = entity.description;
                        }
                        if existing.topic.is_none() {
                            existing.topic = entity.topic;
                        }
                    }
                    None => {
                        entity_slots.insert(key, entities.len());
                        entities.push(entity);
                    }
                }
            }
            for rel in extracted.relationships {
                let key = (rel.source.clone(), rel.target.clone(), rel.relationship_type);
                if relationship_keys.insert(key) {
                    relationships.push(rel);
                }
            }
        }

        let (title, summary) = self.summarize_document(text).await?;
        let topics: Vec<String> = topics.into_iter().collect();

        let mut type_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entity in &entities {
            *type_counts.entry(entity.entity_type.as_str()).or_default() += 1;
        }
        let metadata = json!({
            "total_chunks": chunks.len(),
            "total_entities": entities.len(),
            "total_relationships": relationships.len(),
            "entity_types": type_counts,
            "topics": topics,
            "processing_stats": {
                "chunk_size": self.config.chunk_size,
                "model_used": self.llm.model_name(),
            },
        });

        info!(
            chunk_count = chunks.len(),
            entity_count = entities.len(),
            relationship_count = relationships.len(),
            topic_count = topics.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );

        Ok(ExtractionResult {
            title,
            summary,
            entities,
            relationships,
            topics,
            chunk_count: chunks.len(),
            metadata,
        })
    }

    /// Extract one chunk, normalizing event topics against `topics`.
    pub async fn extract_chunk(
        &self,
        chunk: &str,
        topics: &mut BTreeSet<String>,
    ) -> Result<ChunkExtraction> {
        let response = self
            .llm
            .generate(&prompts::extraction(chunk), self.config.extraction_temperature)
            .await?;
        let raw: RawExtraction = match parse_json_response(&response) {
            ParsedResponse::Parsed(raw) => raw,
            ParsedResponse::ParseError(e) => {
                warn!(
                    error = %e,
                    response_len = response.len(),
                    "Unparseable extraction response, treating chunk as empty"
                );
                return Ok(ChunkExtraction::default());
            }
        };

        let mut entities = Vec::new();
        for raw_entity in raw.entities {
            let Some(entity) = self.normalize_entity(raw_entity, topics).await else {
                continue;
            };
            entities.push(entity);
        }
        let relationships = filter_relationships(&entities, topics, raw.relationships);
        Ok(ChunkExtraction {
            entities,
            relationships,
        })
    }

    async fn normalize_entity(
        &self,
        raw: RawEntity,
        topics: &mut BTreeSet<String>,
    ) -> Option<Entity> {
        let name = raw.entity_name.as_deref().map(canonical_name)?;
        if name.is_empty() {
            return None;
        }
        let Some(entity_type) = raw.entity_type.as_deref().and_then(EntityType::parse_loose) else {
            debug!(name = %name, entity_type = ?raw.entity_type, "Dropping entity of unknown type");
            return None;
        };
        let mut entity = Entity::new(
            &name,
            entity_type,
            raw.entity_description.unwrap_or_default().trim(),
        );
        if entity_type == EntityType::Event {
            if let Some(raw_topic) = raw.topic.as_deref().filter(|t| !t.trim().is_empty()) {
                let topic = self.normalize_topic(raw_topic, topics).await;
                entity = entity.with_topic(&topic);
            }
        }
        Some(entity)
    }

    /// Map a raw topic onto the running canonical topic set.
    ///
    /// Any failure falls back to the raw topic in canonical form. The result
    /// is added to `topics` either way.
    pub async fn normalize_topic(&self, raw_topic: &str, topics: &mut BTreeSet<String>) -> String {
        let fallback = canonical_name(raw_topic);
        let existing: Vec<String> = topics.iter().cloned().collect();
        let prompt = prompts::topic_normalization(raw_topic, &existing);

        let topic = match self
            .llm
            .generate(&prompt, self.config.extraction_temperature)
            .await
        {
            Ok(response) => match parse_json_response::<RawTopic>(&response) {
                ParsedResponse::Parsed(parsed) if !parsed.topic.trim().is_empty() => {
                    canonical_name(&parsed.topic)
                }
                ParsedResponse::Parsed(_) => fallback,
                ParsedResponse::ParseError(e) => {
                    debug!(raw_topic, error = %e, "Unparseable topic normalization, using raw topic");
                    fallback
                }
            },
            Err(e) => {
                warn!(raw_topic, error = %e, "Topic normalization failed, using raw topic");
                fallback
            }
        };
        topics.insert(topic.clone());
        topic
    }

    /// Title and summary for the whole document, with fixed fallbacks for an
    /// empty response.
    pub async fn summarize_document(&self, text: &str) -> Result<(String, String)> {
        let prompt = prompts::document_summary(text, defaults::SUMMARY_FOCUS);
        let response = self
            .llm
            .generate(&prompt, self.config.summary_temperature)
            .await?;
        let (title, summary) = split_title_summary(&response).unwrap_or_default();
        let title = if title.is_empty() {
            defaults::FALLBACK_SUMMARY_TITLE.to_string()
        } else {
            title
        };
        let summary = if summary.is_empty() {
            defaults::FALLBACK_SUMMARY_TEXT.to_string()
        } else {
            summary
        };
        Ok((title, summary))
    }
}

fn strength(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .unwrap_or(defaults::RELATIONSHIP_STRENGTH)
}

/// Keep relationships between entities of this chunk, dropping
/// self-references and `RELATED_TO` links that point at a topic.
fn filter_relationships(
    entities: &[Entity],
    topics: &BTreeSet<String>,
    raw: Vec<RawRelationship>,
) -> Vec<Relationship> {
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let topic_names: HashSet<&str> = entities
        .iter()
        .filter(|e| e.entity_type == EntityType::Topic)
        .map(|e| e.name.as_str())
        .chain(topics.iter().map(String::as_str))
        .collect();

    raw.into_iter()
        .filter_map(|r| {
            let source = canonical_name(r.source_entity.as_deref()?);
            let target = canonical_name(r.target_entity.as_deref()?);
            let relationship_type = r
                .relationship_type
                .as_deref()
                .and_then(RelationshipType::parse_loose)?;

            if !names.contains(source.as_str()) || !names.contains(target.as_str()) {
                debug!(source = %source, target = %target, "Dropping relationship with unknown endpoint");
                return None;
            }
            if source == target {
                return None;
            }
            if relationship_type == RelationshipType::RelatedTo
                && topic_names.contains(target.as_str())
            {
                return None;
            }
            Some(Relationship::new(
                &source,
                &target,
                relationship_type,
                r.relationship_description.unwrap_or_default().trim(),
                strength(r.relationship_strength.as_ref()),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_rel(source: &str, target: &str, kind: &str) -> RawRelationship {
        RawRelationship {
            source_entity: Some(source.into()),
            target_entity: Some(target.into()),
            relationship_type: Some(kind.into()),
            relationship_description: None,
            relationship_strength: None,
        }
    }

    #[test]
    fn relationship_filtering_rules() {
        let entities = vec![
            Entity::new("Alice", EntityType::Actor, ""),
            Entity::new("Plan approved", EntityType::Event, "").with_topic("planning"),
            Entity::new("Planning", EntityType::Topic, ""),
        ];
        let topics = BTreeSet::from(["planning".to_string()]);
        let kept = filter_relationships(
            &entities,
            &topics,
            vec![
                raw_rel("Alice", "Plan approved", "PERFORMED"),
                raw_rel("Alice", "Bob", "RELATED_TO"),
                raw_rel("alice", "ALICE", "RELATED_TO"),
                raw_rel("Plan approved", "planning", "RELATED_TO"),
                raw_rel("Plan approved", "planning", "DISCUSSING"),
                raw_rel("Alice", "Plan approved", "OWNS"),
            ],
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].relationship_type, RelationshipType::Performed);
        assert_eq!(kept[0].strength, defaults::RELATIONSHIP_STRENGTH);
        assert_eq!(kept[1].relationship_type, RelationshipType::Discussing);
    }

    #[test]
    fn strength_accepts_numbers_and_strings() {
        assert_eq!(strength(Some(&json!(0.8))), 0.8);
        assert_eq!(strength(Some(&json!("0.25"))), 0.25);
        assert_eq!(strength(Some(&json!("high"))), defaults::RELATIONSHIP_STRENGTH);
        assert_eq!(strength(None), defaults::RELATIONSHIP_STRENGTH);
        assert_eq!(strength(Some(&json!("NaN"))), defaults::RELATIONSHIP_STRENGTH);
        assert_eq!(strength(Some(&json!("inf"))), defaults::RELATIONSHIP_STRENGTH);
    }

    #[test]
    fn raw_extraction_tolerates_nulls_and_missing_fields() {
        let raw: RawExtraction = serde_json::from_value(json!({
            "entities": [{"entity_name": "Alice", "entity_type": "Actor", "entity_description": null}]
        }))
        .unwrap();
        assert_eq!(raw.entities.len(), 1);
        assert!(raw.relationships.is_empty());
    }
}
