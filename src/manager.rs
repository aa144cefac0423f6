use std::path::PathBuf;

use anyhow::Result;

use crate::graph::{
    Entity, GraphStats, KnowledgeGraph, ObservationDeletion, ObservationInput, ObservationResult,
    Relation,
};
use crate::storage::GraphStore;

/// Filter expression matching every entity
const MATCH_ALL: &str = "*";

/// Manager for knowledge graph operations
///
/// Async API over the graph store. All three read tools funnel through
/// the store's single full-text primitive: `read_graph` with the
/// match-all filter, `search_nodes` with caller-supplied text, and
/// `open_nodes` with a synthesized OR-of-names query.
pub struct KnowledgeGraphManager {
    store: GraphStore,
}

impl KnowledgeGraphManager {
    /// Open the store at the given path and initialize schema and index
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = GraphStore::open(&db_path)?;
        store.initialize()?;
        Ok(Self { store })
    }

    /// Upsert entities by name (merge semantics)
    pub async fn create_entities(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        self.store.create_entities(&entities)
    }

    /// Upsert relations; missing endpoints make a relation a no-op
    pub async fn create_relations(&self, relations: Vec<Relation>) -> Result<Vec<Relation>> {
        self.store.create_relations(&relations)
    }

    /// Append deduplicated observations to entities
    pub async fn add_observations(
        &self,
        inputs: Vec<ObservationInput>,
    ) -> Result<Vec<ObservationResult>> {
        self.store.add_observations(&inputs)
    }

    /// Delete entities (cascades to their relations)
    pub async fn delete_entities(&self, names: Vec<String>) -> Result<usize> {
        self.store.delete_entities(&names)
    }

    /// Remove listed observation strings from entities
    pub async fn delete_observations(&self, deletions: Vec<ObservationDeletion>) -> Result<()> {
        self.store.delete_observations(&deletions)
    }

    /// Delete relations matching exact triples
    pub async fn delete_relations(&self, relations: Vec<Relation>) -> Result<usize> {
        self.store.delete_relations(&relations)
    }

    /// Read the entire knowledge graph
    pub async fn read_graph(&self) -> Result<KnowledgeGraph> {
        self.store.load_graph(MATCH_ALL)
    }

    /// Full-text search across names, types, and observations
    pub async fn search_nodes(&self, query: Option<String>) -> Result<KnowledgeGraph> {
        let filter = match query {
            Some(q) if !q.trim().is_empty() => q,
            _ => MATCH_ALL.to_string(),
        };
        self.store.load_graph(&filter)
    }

    /// Open specific nodes by name
    pub async fn open_nodes(&self, names: Vec<String>) -> Result<KnowledgeGraph> {
        if names.is_empty() {
            return Ok(KnowledgeGraph::default());
        }
        self.store.load_graph(&name_filter(&names))
    }

    /// Aggregate graph statistics
    pub async fn get_stats(&self) -> Result<GraphStats> {
        self.store.get_stats()
    }

    /// Liveness probe; never errors
    pub async fn test_connection(&self) -> bool {
        self.store.test_connection()
    }

    /// Release the backing store
    pub fn close(self) {
        self.store.close();
    }
}

/// Synthesize an OR-of-names filter restricted to the name column,
/// e.g. `name : ("Alice" OR "Bob")`.
fn name_filter(names: &[String]) -> String {
    let quoted: Vec<String> = names
        .iter()
        .map(|n| format!("\"{}\"", n.replace('"', "\"\"")))
        .collect();
    format!("name : ({})", quoted.join(" OR "))
}
