use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use graph_memory_mcp_rs::auth::{middleware::require_auth, AuthConfig, AuthManager};
use graph_memory_mcp_rs::graph::{Entity, ObservationDeletion, ObservationInput, Relation};
use graph_memory_mcp_rs::logging::{init_logging, TransportMode};
use graph_memory_mcp_rs::manager::KnowledgeGraphManager;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Database file path (fallback: MEMORY_FILE_PATH env, then the
    /// platform data directory)
    #[arg(long, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Enable streamable HTTP mode (default: stdio)
    #[arg(short = 's', long = "stream")]
    stream_mode: bool,

    /// HTTP port for stream mode
    #[arg(short = 'p', long, default_value = "8000")]
    port: u16,

    /// Bind address for stream mode
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable file logging. Optionally specify log file name
    #[arg(short = 'l', long, value_name = "FILE", num_args = 0..=1, default_missing_value = "graph-memory-mcp-rs.log")]
    log: Option<String>,
}

#[derive(Clone)]
struct MemoryServer {
    manager: Arc<KnowledgeGraphManager>,
    auth: Arc<AuthManager>,
    tool_router: ToolRouter<Self>,
}

impl MemoryServer {
    fn new(manager: Arc<KnowledgeGraphManager>, auth: Arc<AuthManager>) -> Self {
        Self {
            manager,
            auth,
            tool_router: Self::tool_router(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "graph-memory-mcp-rs".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: None,
        }
    }
}

#[tool_router]
impl MemoryServer {
    /// Create or merge entities in the knowledge graph
    #[tool(
        name = "create_entities",
        description = "Create multiple new entities in the knowledge graph. An existing entity with the same name is merged into (its type and observations are replaced)."
    )]
    async fn create_entities(
        &self,
        Parameters(args): Parameters<CreateEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let created = self
            .manager
            .create_entities(args.entities)
            .await
            .map_err(|err| tool_error("Failed to create entities", err))?;

        let summary = format!("{} entities created successfully", created.len());

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(created)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Create relations between entities
    #[tool(
        name = "create_relations",
        description = "Create multiple new relations between entities in the knowledge graph. A relation whose endpoints are missing is skipped silently."
    )]
    async fn create_relations(
        &self,
        Parameters(args): Parameters<CreateRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let created = self
            .manager
            .create_relations(args.relations)
            .await
            .map_err(|err| tool_error("Failed to create relations", err))?;

        let summary = format!("{} relations processed successfully", created.len());

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(created)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Add observations to entities
    #[tool(
        name = "add_observations",
        description = "Add new observations to existing entities in the knowledge graph. Duplicates are dropped; unknown entities report nothing added."
    )]
    async fn add_observations(
        &self,
        Parameters(args): Parameters<AddObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let results = self
            .manager
            .add_observations(args.observations)
            .await
            .map_err(|err| tool_error("Failed to add observations", err))?;

        let summary = format!("Added observations to {} entities", results.len());

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(results)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Delete entities and their relations
    #[tool(
        name = "delete_entities",
        description = "Delete entities and their associated relations from the knowledge graph. Unknown names are ignored."
    )]
    async fn delete_entities(
        &self,
        Parameters(args): Parameters<DeleteEntitiesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let count = self
            .manager
            .delete_entities(args.entity_names)
            .await
            .map_err(|err| tool_error("Failed to delete entities", err))?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} entities deleted successfully",
            count
        ))]))
    }

    /// Delete observations from entities
    #[tool(
        name = "delete_observations",
        description = "Delete specific observations from entities in the knowledge graph. Unknown entities are ignored."
    )]
    async fn delete_observations(
        &self,
        Parameters(args): Parameters<DeleteObservationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        self.manager
            .delete_observations(args.deletions)
            .await
            .map_err(|err| tool_error("Failed to delete observations", err))?;

        Ok(CallToolResult::success(vec![Content::text(
            "Observations deleted successfully",
        )]))
    }

    /// Delete relations
    #[tool(
        name = "delete_relations",
        description = "Delete specific relations from the knowledge graph. A relation that does not match exactly is ignored."
    )]
    async fn delete_relations(
        &self,
        Parameters(args): Parameters<DeleteRelationsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let count = self
            .manager
            .delete_relations(args.relations)
            .await
            .map_err(|err| tool_error("Failed to delete relations", err))?;

        Ok(CallToolResult::success(vec![Content::text(format!(
            "{} relations deleted successfully",
            count
        ))]))
    }

    /// Read entire knowledge graph
    #[tool(name = "read_graph", description = "Read the entire knowledge graph")]
    async fn read_graph(&self) -> Result<CallToolResult, McpError> {
        let graph = self
            .manager
            .read_graph()
            .await
            .map_err(|err| tool_error("Failed to read graph", err))?;

        let summary = format!(
            "Knowledge graph contains {} entities and {} relations",
            graph.entities.len(),
            graph.relations.len()
        );

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(graph)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Search nodes by query
    #[tool(
        name = "search_nodes",
        description = "Search for nodes in the knowledge graph using full-text search across entity names, types, and observations. Matched entities come back with every relation touching them."
    )]
    async fn search_nodes(
        &self,
        Parameters(args): Parameters<SearchNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .manager
            .search_nodes(args.query)
            .await
            .map_err(|err| tool_error("Failed to search nodes", err))?;

        let summary = format!(
            "Found {} entities and {} relations",
            result.entities.len(),
            result.relations.len()
        );

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(result)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Open specific nodes by names
    #[tool(
        name = "open_nodes",
        description = "Open specific nodes in the knowledge graph by their names"
    )]
    async fn open_nodes(
        &self,
        Parameters(args): Parameters<OpenNodesArgs>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .manager
            .open_nodes(args.names)
            .await
            .map_err(|err| tool_error("Failed to open nodes", err))?;

        let summary = format!(
            "Retrieved {} entities and {} relations",
            result.entities.len(),
            result.relations.len()
        );

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(result)),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Aggregate graph statistics and connectivity
    #[tool(
        name = "memory_stats",
        description = "Report aggregate knowledge graph statistics (entity, relation, and observation counts) and backing store connectivity"
    )]
    async fn memory_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self
            .manager
            .get_stats()
            .await
            .map_err(|err| tool_error("Failed to compute statistics", err))?;
        let connected = self.manager.test_connection().await;

        let summary = format!(
            "{} entities, {} relations, {} observations (connected: {})",
            stats.entity_count, stats.relation_count, stats.observation_count, connected
        );

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!({ "stats": stats, "connected": connected })),
            is_error: Some(false),
            meta: None,
        })
    }

    /// Authentication configuration status
    #[tool(
        name = "auth_status",
        description = "Report which authentication providers are configured"
    )]
    async fn auth_status(&self) -> Result<CallToolResult, McpError> {
        let status = self.auth.status();

        let summary = if status.providers.is_empty() {
            "No authentication providers configured (anonymous access)".to_string()
        } else {
            format!("Configured providers: {}", status.providers.join(", "))
        };

        Ok(CallToolResult {
            content: vec![Content::text(&summary)],
            structured_content: Some(json!(status)),
            is_error: Some(false),
            meta: None,
        })
    }
}

#[tool_handler]
impl ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        self.server_info()
    }
}

// Tool argument schemas

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateEntitiesArgs {
    entities: Vec<Entity>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateRelationsArgs {
    relations: Vec<Relation>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddObservationsArgs {
    observations: Vec<ObservationInput>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteEntitiesArgs {
    entity_names: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteObservationsArgs {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteRelationsArgs {
    relations: Vec<Relation>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchNodesArgs {
    query: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OpenNodesArgs {
    names: Vec<String>,
}

/// Wrap a tool failure into a generic MCP error carrying the detail
/// as structured data
fn tool_error(message: &'static str, err: impl ToString) -> McpError {
    McpError::internal_error(message, Some(json!({ "error": err.to_string() })))
}

fn resolve_db_path(arg: Option<PathBuf>) -> PathBuf {
    if let Some(path) = arg {
        return path;
    }
    if let Ok(path) = std::env::var("MEMORY_FILE_PATH") {
        return PathBuf::from(path);
    }
    let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("graph-memory-mcp");
    path.push("knowledge_graph.db");
    path
}

/// Run server in stdio mode (default).
///
/// stdio clients are local and trusted; the credential chain gates the
/// network transport.
async fn run_stdio_mode(server: MemoryServer) -> Result<(), Box<dyn std::error::Error>> {
    let transport = stdio();
    let svc = server.serve(transport).await?;
    svc.waiting().await?;
    Ok(())
}

/// Run server in streamable HTTP mode with the auth middleware in front
/// of the MCP endpoint
async fn run_stream_mode(
    server: MemoryServer,
    auth: Arc<AuthManager>,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    use rmcp::transport::StreamableHttpService;
    use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;

    let addr = format!("{}:{}", bind, port);
    tracing::info!("Starting MCP HTTP server on http://{}/mcp", addr);

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    // Every request to /mcp runs the credential chain; /health is added
    // after the layer and stays open
    let router = axum::Router::new()
        .nest_service("/mcp", service)
        .layer(axum::middleware::from_fn_with_state(auth, require_auth))
        .route("/health", axum::routing::get(|| async { "OK" }));

    let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received, stopping server");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mode = if args.stream_mode {
        TransportMode::Stream
    } else {
        TransportMode::Stdio
    };

    // CRITICAL: stdio mode MUST NOT log to stderr unless --log is given;
    // stderr output breaks the MCP handshake
    init_logging(mode, args.log)?;

    // Path validation and directory setup happen inside the store;
    // connectivity or index failures abort startup here
    let db_path = resolve_db_path(args.db_path);
    let manager = Arc::new(KnowledgeGraphManager::new(db_path)?);

    let auth = Arc::new(AuthManager::from_config(&AuthConfig::from_env()));

    let server = MemoryServer::new(manager.clone(), auth.clone());

    match mode {
        TransportMode::Stdio => run_stdio_mode(server).await?,
        TransportMode::Stream => run_stream_mode(server, auth, &args.bind, args.port).await?,
    }

    // Sole owner by now in the common case; releases the pool explicitly
    if let Some(manager) = Arc::into_inner(manager) {
        manager.close();
    }

    Ok(())
}
