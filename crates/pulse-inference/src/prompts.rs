//! Prompt builders for the pipeline's model contracts.
//!
//! Each prompt ends with the material to work on under a fixed heading so
//! responses can be traced back to the contract that produced them.

/// Heading above the passage in an extraction prompt.
pub const PASSAGE_HEADING: &str = "## Passage";

/// Heading above the candidate in a topic normalization prompt.
pub const CANDIDATE_TOPIC_HEADING: &str = "## Candidate topic";

/// Heading above the full text in a document summary prompt.
pub const DOCUMENT_HEADING: &str = "## Document";

/// Heading above the event list in a topic summary prompt.
pub const TOPIC_EVENTS_HEADING: &str = "## Topic events";

const EXTRACTION_SCHEMA: &str = r#"{"entities": [{"entity_name": "...", "entity_type": "Event|Actor|Time|Topic", "entity_description": "...", "topic": "..."}],
 "relationships": [{"source_entity": "...", "target_entity": "...", "relationship_type": "PERFORMED|DISCUSSING|OCCURRED_AT|RELATED_TO", "relationship_description": "...", "relationship_strength": 0.8}]}"#;

const TOPIC_SUMMARY_SCHEMA: &str = r#"{"summary": "...", "findings": [{"main_event": "...", "sub_events": ["..."], "summary": "..."}]}"#;

/// Entity and relationship extraction for one chunk.
pub fn extraction(chunk: &str) -> String {
    format!(
        "You are building a knowledge graph from a passage of a meeting or conversation.

Extract entities of these types:
- Event: something that happened, was decided or was planned. Give every event a short \"topic\" naming the subject it belongs to.
- Actor: a person, team or organization taking part.
- Time: a date or time reference. Use ISO 8601 (YYYY-MM-DD) when the date is known.
- Topic: a subject under discussion.

Extract relationships between the entities you listed:
- PERFORMED: Actor -> Event
- DISCUSSING: Actor or Event -> Topic
- OCCURRED_AT: Event -> Time
- RELATED_TO: any other meaningful connection

Only relate entities that appear in your entity list, and never relate an entity to itself.
relationship_strength is a number between 0 and 1.

Respond with one JSON object and nothing else:
{EXTRACTION_SCHEMA}

{PASSAGE_HEADING}
{chunk}
"
    )
}

/// Classify a raw topic against the known canonical topics.
///
/// `existing` should be sorted so identical inputs produce identical prompts.
pub fn topic_normalization(raw_topic: &str, existing: &[String]) -> String {
    let known = if existing.is_empty() {
        "(none yet)".to_string()
    } else {
        existing
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You maintain the canonical topic list of a knowledge graph.
Decide whether the candidate topic means the same thing as one of the existing topics.
If it does, answer with that existing topic exactly as written.
Otherwise answer with a short lowercase name for a new topic.

## Existing topics
{known}

{CANDIDATE_TOPIC_HEADING}
{raw_topic}

Respond with one JSON object and nothing else: {{\"topic\": \"...\"}}
"
    )
}

/// Title plus summary of a whole document.
pub fn document_summary(text: &str, focus: &str) -> String {
    format!(
        "Summarize the following {focus}.
Put a short descriptive title on the first line.
On the following lines write a concise summary covering the key points, decisions and participants.
Do not use markdown.

{DOCUMENT_HEADING}
{text}
"
    )
}

/// An event linked to a topic, as shown to the topic summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLine {
    pub name: String,
    pub description: String,
}

/// A graph edge touching one of the topic's events.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionLine {
    pub from: String,
    pub edge_type: String,
    pub to: String,
    pub description: String,
}

/// Structured summary of a topic, refining any previous summary.
pub fn topic_summary(
    topic: &str,
    events: &[EventLine],
    connections: &[ConnectionLine],
    previous_summary: Option<&str>,
) -> String {
    let previous = previous_summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("(none)");
    let event_lines = events
        .iter()
        .map(|e| {
            if e.description.trim().is_empty() {
                format!("- {}", e.name)
            } else {
                format!("- {}: {}", e.name, e.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let connection_lines = if connections.is_empty() {
        "(none)".to_string()
    } else {
        connections
            .iter()
            .map(|c| {
                if c.description.trim().is_empty() {
                    format!("- {} -[{}]-> {}", c.from, c.edge_type, c.to)
                } else {
                    format!("- {} -[{}]-> {}: {}", c.from, c.edge_type, c.to, c.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You keep a running summary of the topic \"{topic}\" in an organization's knowledge graph.
Update the previous summary with the events and connections below.
Group related events into findings: each finding has one main event, the sub-events that belong to it, and a short summary.

## Previous summary
{previous}

{TOPIC_EVENTS_HEADING}
{event_lines}

## Connections
{connection_lines}

Respond with one JSON object and nothing else:
{TOPIC_SUMMARY_SCHEMA}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_carries_chunk_and_schema() {
        let prompt = extraction("Alice approved the plan.");
        assert!(prompt.contains(PASSAGE_HEADING));
        assert!(prompt.ends_with("Alice approved the plan.\n"));
        assert!(prompt.contains("\"relationship_strength\""));
        assert!(!prompt.contains(CANDIDATE_TOPIC_HEADING));
    }

    #[test]
    fn normalization_prompt_lists_known_topics() {
        let prompt = topic_normalization("Plan sign-off", &["budget".into(), "plan approval".into()]);
        assert!(prompt.contains("- budget\n- plan approval"));
        assert!(prompt.contains("Plan sign-off"));
        assert!(prompt.contains("{\"topic\": \"...\"}"));

        let empty = topic_normalization("x", &[]);
        assert!(empty.contains("(none yet)"));
    }

    #[test]
    fn prompt_headings_are_disjoint() {
        let prompts = [
            extraction("t"),
            topic_normalization("t", &[]),
            document_summary("t", "meeting"),
            topic_summary("t", &[], &[], None),
        ];
        let headings = [
            PASSAGE_HEADING,
            CANDIDATE_TOPIC_HEADING,
            DOCUMENT_HEADING,
            TOPIC_EVENTS_HEADING,
        ];
        for (i, prompt) in prompts.iter().enumerate() {
            for (j, heading) in headings.iter().enumerate() {
                assert_eq!(prompt.contains(heading), i == j, "prompt {} heading {}", i, j);
            }
        }
    }

    #[test]
    fn topic_summary_includes_previous_and_connections() {
        let prompt = topic_summary(
            "plan approval",
            &[EventLine {
                name: "alice approved plan".into(),
                description: "Final sign-off".into(),
            }],
            &[ConnectionLine {
                from: "alice".into(),
                edge_type: "PERFORMED".into(),
                to: "alice approved plan".into(),
                description: "".into(),
            }],
            Some("Earlier: plan drafted."),
        );
        assert!(prompt.contains("Earlier: plan drafted."));
        assert!(prompt.contains("- alice approved plan: Final sign-off"));
        assert!(prompt.contains("- alice -[PERFORMED]-> alice approved plan"));
    }
}
