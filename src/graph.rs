use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Entity in the knowledge graph
///
/// `name` is the natural primary key: re-creating an entity with the same
/// name merges into the existing node instead of duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Entity {
    /// Unique name of the entity (serves as ID)
    pub name: String,

    /// Type of entity (person, organization, concept, etc.)
    #[serde(rename = "entityType")]
    pub entity_type: String,

    /// Deduplicated facts recorded about the entity, in insertion order
    pub observations: Vec<String>,
}

/// Directed, typed edge between two entities
///
/// Identified by the ordered (source, relationType, target) triple;
/// re-creating an identical triple is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Relation {
    /// Source entity name
    pub source: String,

    /// Target entity name
    pub target: String,

    /// Type of relation (works_at, knows, related_to, etc.)
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

/// Snapshot projection of the graph returned by read queries
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Input for adding observations to an entity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservationInput {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// Result of adding observations: only the strings actually appended
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservationResult {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "addedObservations")]
    pub added_observations: Vec<String>,
}

/// Input for deleting observations from an entity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservationDeletion {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub observations: Vec<String>,
}

/// Aggregate counts over the whole graph
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct GraphStats {
    #[serde(rename = "entityCount")]
    pub entity_count: u64,
    #[serde(rename = "relationCount")]
    pub relation_count: u64,
    #[serde(rename = "observationCount")]
    pub observation_count: u64,
}
