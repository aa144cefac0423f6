use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use crate::graph::{
    Entity, GraphStats, KnowledgeGraph, ObservationDeletion, ObservationInput, ObservationResult,
    Relation,
};

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_TYPE_LENGTH: usize = 128;
const MAX_OBSERVATION_LENGTH: usize = 4096;

/// Validate entity name (no control characters, bounded length)
fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.is_empty() {
        bail!("{} cannot be empty", field);
    }
    if name.len() > MAX_NAME_LENGTH {
        bail!("{} too long (max {} chars)", field, MAX_NAME_LENGTH);
    }
    if name.chars().any(|c| c.is_control() || c == '\0') {
        bail!("{} contains invalid characters", field);
    }
    Ok(())
}

/// Validate entity/relation type
///
/// Types are user-chosen taxonomy labels that end up inside queries, so
/// they are restricted to identifier-like characters.
fn validate_type(type_str: &str, field: &str) -> Result<()> {
    if type_str.is_empty() {
        bail!("{} cannot be empty", field);
    }
    if type_str.len() > MAX_TYPE_LENGTH {
        bail!("{} too long (max {} chars)", field, MAX_TYPE_LENGTH);
    }
    if !type_str
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':')
    {
        bail!(
            "{} contains invalid characters (only alphanumeric, -, _, ., : allowed)",
            field
        );
    }
    Ok(())
}

/// Validate observation content
fn validate_observation(obs: &str) -> Result<()> {
    if obs.len() > MAX_OBSERVATION_LENGTH {
        bail!("Observation too long (max {} chars)", MAX_OBSERVATION_LENGTH);
    }
    if obs.contains('\0') {
        bail!("Observation contains null bytes");
    }
    Ok(())
}

fn validate_relation(rel: &Relation) -> Result<()> {
    validate_name(&rel.source, "Source entity")?;
    validate_name(&rel.target, "Target entity")?;
    validate_type(&rel.relation_type, "Relation type")
}

/// Build SQL placeholders for IN queries (?1, ?2, ?3, ...)
fn build_placeholders(count: usize, offset: usize) -> String {
    (offset..offset + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check the extension and pin the database file to an absolute,
/// canonical path. The file may not exist yet; in that case its parent
/// directory is created and canonicalized instead.
fn validate_db_path(path: &Path) -> Result<PathBuf> {
    if path.extension().map_or(true, |ext| ext != "db") {
        bail!("Database path must have a .db extension");
    }

    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let filename = path.file_name().context("Database path has no filename")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    let canonical = parent
        .canonicalize()
        .with_context(|| format!("Failed to resolve database directory {}", parent.display()))?;
    Ok(canonical.join(filename))
}

const SCHEMA: &str = r#"
-- Entity nodes; name is the natural primary key
CREATE TABLE IF NOT EXISTS entities (
    name TEXT PRIMARY KEY NOT NULL,
    entity_type TEXT NOT NULL,
    observations TEXT NOT NULL
) STRICT;

-- Directed typed edges, identified by the (source, relation_type, target) triple.
-- FOREIGN KEY cascade gives detach-delete when an endpoint is removed.
CREATE TABLE IF NOT EXISTS relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    UNIQUE(source, target, relation_type),
    FOREIGN KEY(source) REFERENCES entities(name) ON DELETE CASCADE,
    FOREIGN KEY(target) REFERENCES entities(name) ON DELETE CASCADE
) STRICT;

CREATE INDEX IF NOT EXISTS idx_entity_type ON entities(entity_type);
CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source);
CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target);
CREATE INDEX IF NOT EXISTS idx_relations_type ON relations(relation_type);
"#;

// Created without IF NOT EXISTS: an "already exists" failure is expected on
// restart and swallowed; anything else aborts startup.
const FTS_INDEX: &str = r#"
CREATE VIRTUAL TABLE entities_fts USING fts5(
    name,
    entity_type,
    observations,
    content='entities',
    content_rowid='rowid'
);
"#;

const FTS_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS entities_ai AFTER INSERT ON entities BEGIN
    INSERT INTO entities_fts(rowid, name, entity_type, observations)
    VALUES (new.rowid, new.name, new.entity_type, new.observations);
END;

CREATE TRIGGER IF NOT EXISTS entities_ad AFTER DELETE ON entities BEGIN
    INSERT INTO entities_fts(entities_fts, rowid, name, entity_type, observations)
    VALUES ('delete', old.rowid, old.name, old.entity_type, old.observations);
END;

CREATE TRIGGER IF NOT EXISTS entities_au AFTER UPDATE ON entities BEGIN
    INSERT INTO entities_fts(entities_fts, rowid, name, entity_type, observations)
    VALUES ('delete', old.rowid, old.name, old.entity_type, old.observations);
    INSERT INTO entities_fts(rowid, name, entity_type, observations)
    VALUES (new.rowid, new.name, new.entity_type, new.observations);
END;
"#;

/// Owner of all reads and writes against the persisted knowledge graph.
///
/// Every method takes a fresh connection lease from the pool for its
/// duration; the lease is released on every exit path when it drops.
/// Batch operations over relations are deliberately NOT wrapped in one
/// transaction: each relation is an independent round-trip, so a failure
/// partway through a batch leaves earlier relations committed.
pub struct GraphStore {
    pool: Pool<SqliteConnectionManager>,
}

impl GraphStore {
    /// Open or create the backing database with a connection pool.
    ///
    /// Owns path validation: the extension check and canonicalization
    /// happen here, before anything touches the filesystem pool.
    pub fn open(path: &Path) -> Result<Self> {
        let path = validate_db_path(path)?;

        // Pragmas are per-connection, so they run on every pooled connection
        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder()
            .max_size(15)
            .build(manager)
            .context("Failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Verify connectivity and create the schema and full-text index.
    ///
    /// An "already exists" failure from index creation is swallowed and
    /// logged; any other failure propagates and aborts startup.
    pub fn initialize(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;

        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Backing store is unreachable")?;

        conn.execute_batch(SCHEMA)
            .context("Failed to create graph schema")?;

        if let Err(err) = conn.execute_batch(FTS_INDEX) {
            if err.to_string().contains("already exists") {
                debug!("Full-text index already present, skipping creation");
            } else {
                return Err(err).context("Failed to create full-text index");
            }
        }

        conn.execute_batch(FTS_TRIGGERS)
            .context("Failed to create full-text index triggers")?;

        Ok(())
    }

    /// Load a projection of the graph matching a full-text filter.
    ///
    /// This is the single read primitive: `*` selects every entity, any
    /// other filter is handed to the full-text index. From every matched
    /// entity the result expands one hop in both directions, collecting
    /// each relation whose source OR target was matched.
    pub fn load_graph(&self, filter: &str) -> Result<KnowledgeGraph> {
        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;

        let entities = if filter == "*" {
            let mut stmt =
                conn.prepare("SELECT name, entity_type, observations FROM entities")?;
            let rows = stmt.query_map([], row_to_entity_parts)?;
            collect_entities(rows)?
        } else {
            let mut stmt = conn.prepare(
                "SELECT e.name, e.entity_type, e.observations
                 FROM entities e
                 INNER JOIN entities_fts fts ON e.rowid = fts.rowid
                 WHERE entities_fts MATCH ?1",
            )?;
            let rows = stmt
                .query_map(params![filter], row_to_entity_parts)
                .with_context(|| format!("Full-text query failed for filter '{}'", filter))?;
            collect_entities(rows)?
        };

        let entity_names: HashSet<&String> = entities.iter().map(|e| &e.name).collect();

        let mut relations = Vec::new();
        if !entity_names.is_empty() {
            let placeholders_source = build_placeholders(entity_names.len(), 1);
            let placeholders_target =
                build_placeholders(entity_names.len(), entity_names.len() + 1);

            let query = format!(
                "SELECT source, target, relation_type FROM relations
                 WHERE source IN ({}) OR target IN ({})",
                placeholders_source, placeholders_target
            );

            let mut sql_params: Vec<&dyn rusqlite::ToSql> = Vec::new();
            for name in &entity_names {
                sql_params.push(name);
            }
            for name in &entity_names {
                sql_params.push(name);
            }

            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(sql_params.as_slice(), |row| {
                Ok(Relation {
                    source: row.get(0)?,
                    target: row.get(1)?,
                    relation_type: row.get(2)?,
                })
            })?;

            for row in rows {
                relations.push(row?);
            }
        }

        Ok(KnowledgeGraph {
            entities,
            relations,
        })
    }

    /// Upsert entities by name.
    ///
    /// An existing entity is merged into: its type and its full
    /// observations sequence are replaced by the provided values. Callers
    /// wanting append semantics use `add_observations` instead. Returns
    /// the input list unchanged.
    pub fn create_entities(&self, entities: &[Entity]) -> Result<Vec<Entity>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        for entity in entities {
            validate_name(&entity.name, "Entity name")?;
            validate_type(&entity.entity_type, "Entity type")?;
            for obs in &entity.observations {
                validate_observation(obs)?;
            }
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;
        let tx = conn
            .unchecked_transaction()
            .context("Failed to start transaction for creating entities")?;

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO entities (name, entity_type, observations)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET
                         entity_type = excluded.entity_type,
                         observations = excluded.observations",
                )
                .context("Failed to prepare upsert statement for entities")?;

            for entity in entities {
                let obs_json = serde_json::to_string(&entity.observations).with_context(|| {
                    format!("Failed to serialize observations for entity '{}'", entity.name)
                })?;
                stmt.execute(params![&entity.name, &entity.entity_type, &obs_json])
                    .with_context(|| format!("Failed to upsert entity '{}'", entity.name))?;
            }
        }

        tx.commit()
            .context("Failed to commit transaction for creating entities")?;
        Ok(entities.to_vec())
    }

    /// Upsert relations, one independent round-trip per relation.
    ///
    /// A relation is written only when both endpoints exist; a missing
    /// endpoint makes that relation a silent no-op. An already existing
    /// (source, relationType, target) triple is left untouched. Returns
    /// the input list unchanged.
    pub fn create_relations(&self, relations: &[Relation]) -> Result<Vec<Relation>> {
        if relations.is_empty() {
            return Ok(Vec::new());
        }

        for rel in relations {
            validate_relation(rel)?;
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;

        let mut stmt = conn
            .prepare_cached(
                "INSERT OR IGNORE INTO relations (source, target, relation_type)
                 SELECT ?1, ?2, ?3
                 WHERE EXISTS (SELECT 1 FROM entities WHERE name = ?1)
                   AND EXISTS (SELECT 1 FROM entities WHERE name = ?2)",
            )
            .context("Failed to prepare upsert statement for relations")?;

        for rel in relations {
            stmt.execute(params![&rel.source, &rel.target, &rel.relation_type])
                .with_context(|| {
                    format!(
                        "Failed to upsert relation '{}' -> '{}' (type: '{}')",
                        rel.source, rel.target, rel.relation_type
                    )
                })?;
        }

        Ok(relations.to_vec())
    }

    /// Append observations not already present on each entity.
    ///
    /// Returns, per entity, the strings actually added. An entity that
    /// does not exist yields an empty added slice, not an error.
    pub fn add_observations(&self, inputs: &[ObservationInput]) -> Result<Vec<ObservationResult>> {
        for input in inputs {
            validate_name(&input.entity_name, "Entity name")?;
            for obs in &input.contents {
                validate_observation(obs)?;
            }
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;
        let tx = conn
            .unchecked_transaction()
            .context("Failed to start transaction for adding observations")?;
        let mut results = Vec::new();

        for input in inputs {
            let current: Option<String> = tx
                .query_row(
                    "SELECT observations FROM entities WHERE name = ?1",
                    params![&input.entity_name],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| {
                    format!("Database error querying entity '{}'", input.entity_name)
                })?;

            let Some(current) = current else {
                // Unknown entity: report nothing added
                results.push(ObservationResult {
                    entity_name: input.entity_name.clone(),
                    added_observations: Vec::new(),
                });
                continue;
            };

            let mut observations: Vec<String> = serde_json::from_str(&current).with_context(
                || format!("Corrupted observations data for entity '{}'", input.entity_name),
            )?;

            // Set difference: keep only contents not already recorded
            let mut added = Vec::new();
            for obs in &input.contents {
                if !observations.contains(obs) && !added.contains(obs) {
                    observations.push(obs.clone());
                    added.push(obs.clone());
                }
            }

            if !added.is_empty() {
                let obs_json = serde_json::to_string(&observations).with_context(|| {
                    format!(
                        "Failed to serialize observations for entity '{}'",
                        input.entity_name
                    )
                })?;
                tx.execute(
                    "UPDATE entities SET observations = ?1 WHERE name = ?2",
                    params![&obs_json, &input.entity_name],
                )
                .with_context(|| {
                    format!(
                        "Failed to update observations for entity '{}'",
                        input.entity_name
                    )
                })?;
            }

            results.push(ObservationResult {
                entity_name: input.entity_name.clone(),
                added_observations: added,
            });
        }

        tx.commit()
            .context("Failed to commit transaction for adding observations")?;
        Ok(results)
    }

    /// Delete entities by name, cascading to their relations.
    ///
    /// Names without a matching entity are ignored. Returns the number of
    /// entities removed.
    pub fn delete_entities(&self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }

        for name in names {
            validate_name(name, "Entity name")?;
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;

        let placeholders = build_placeholders(names.len(), 1);
        let query = format!("DELETE FROM entities WHERE name IN ({})", placeholders);

        let sql_params: Vec<&dyn rusqlite::ToSql> =
            names.iter().map(|s| s as &dyn rusqlite::ToSql).collect();

        let count = conn
            .execute(&query, sql_params.as_slice())
            .with_context(|| format!("Failed to delete {} entities", names.len()))?;

        // Relations touching the deleted entities go with them (CASCADE)

        Ok(count)
    }

    /// Remove exactly the listed observation strings from each entity.
    ///
    /// A non-existent entity is a silent no-op.
    pub fn delete_observations(&self, deletions: &[ObservationDeletion]) -> Result<()> {
        for deletion in deletions {
            validate_name(&deletion.entity_name, "Entity name")?;
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;
        let tx = conn
            .unchecked_transaction()
            .context("Failed to start transaction for deleting observations")?;

        for deletion in deletions {
            let current: Option<String> = tx
                .query_row(
                    "SELECT observations FROM entities WHERE name = ?1",
                    params![&deletion.entity_name],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| {
                    format!("Database error querying entity '{}'", deletion.entity_name)
                })?;

            let Some(current) = current else {
                continue;
            };

            let mut observations: Vec<String> = serde_json::from_str(&current).with_context(
                || {
                    format!(
                        "Corrupted observations data for entity '{}'",
                        deletion.entity_name
                    )
                },
            )?;
            observations.retain(|obs| !deletion.observations.contains(obs));

            let obs_json = serde_json::to_string(&observations).with_context(|| {
                format!(
                    "Failed to serialize observations for entity '{}'",
                    deletion.entity_name
                )
            })?;
            tx.execute(
                "UPDATE entities SET observations = ?1 WHERE name = ?2",
                params![&obs_json, &deletion.entity_name],
            )
            .with_context(|| {
                format!(
                    "Failed to delete observations from entity '{}'",
                    deletion.entity_name
                )
            })?;
        }

        tx.commit()
            .context("Failed to commit transaction for deleting observations")?;
        Ok(())
    }

    /// Delete relations matching the exact (source, relationType, target)
    /// triple, one independent round-trip per relation.
    ///
    /// A non-matching triple is a silent no-op. Returns the number of
    /// relations removed.
    pub fn delete_relations(&self, relations: &[Relation]) -> Result<usize> {
        if relations.is_empty() {
            return Ok(0);
        }

        for rel in relations {
            validate_relation(rel)?;
        }

        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;
        let mut count = 0;

        let mut stmt = conn
            .prepare_cached(
                "DELETE FROM relations
                 WHERE source = ?1 AND target = ?2 AND relation_type = ?3",
            )
            .context("Failed to prepare delete statement for relations")?;

        for rel in relations {
            count += stmt
                .execute(params![&rel.source, &rel.target, &rel.relation_type])
                .with_context(|| {
                    format!(
                        "Failed to delete relation '{}' -> '{}' (type: '{}')",
                        rel.source, rel.target, rel.relation_type
                    )
                })?;
        }

        Ok(count)
    }

    /// Aggregate counts of entities, relations, and stored observations,
    /// computed in one query.
    pub fn get_stats(&self) -> Result<GraphStats> {
        let conn = self
            .pool
            .get()
            .context("Failed to get database connection from pool")?;

        let stats = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM entities),
                        (SELECT COUNT(*) FROM relations),
                        (SELECT COALESCE(SUM(json_array_length(observations)), 0) FROM entities)",
                [],
                |row| {
                    Ok(GraphStats {
                        entity_count: row.get::<_, i64>(0)? as u64,
                        relation_count: row.get::<_, i64>(1)? as u64,
                        observation_count: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .context("Failed to compute graph statistics")?;

        Ok(stats)
    }

    /// Liveness probe; reports failure instead of raising it
    pub fn test_connection(&self) -> bool {
        match self.pool.get() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(err) => {
                warn!("Connection probe failed: {}", err);
                false
            }
        }
    }

    /// Release the connection pool. No operations are issued afterwards.
    pub fn close(self) {
        debug!("Closing graph store connection pool");
        drop(self.pool);
    }
}

type EntityParts = (String, String, String);

fn row_to_entity_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn collect_entities(
    rows: impl Iterator<Item = rusqlite::Result<EntityParts>>,
) -> Result<Vec<Entity>> {
    let mut entities = Vec::new();
    for row in rows {
        let (name, entity_type, obs_json) = row?;
        let observations: Vec<String> = serde_json::from_str(&obs_json)
            .with_context(|| format!("Corrupted observations data for entity '{}'", name))?;
        entities.push(Entity {
            name,
            entity_type,
            observations,
        });
    }
    Ok(entities)
}
