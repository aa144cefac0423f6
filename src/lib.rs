//! Authenticated knowledge graph memory server.
//!
//! Persistent entity/relation/observation storage with full-text search,
//! exposed as MCP tools, behind a pluggable credential chain.

pub mod auth;
pub mod graph;
pub mod logging;
pub mod manager;
pub mod storage;
