//! # Rhea MCP Service
//!
//! The session controller: implements `rmcp::ServerHandler` over the
//! orchestration core. Each transport session gets its own service instance
//! (the streamable-HTTP transport constructs one per session id), so the
//! session registry inside a service is invisible to every other session.
//!
//! The only baseline tool is `find_tools`. Calling it clears the session's
//! previous bindings, asks the semantic index for the top-K tools for the
//! query, installs a callable binding and a documentation resource for each,
//! and emits `tools/list_changed` and `resources/list_changed` — after the
//! session state reflects the change and before the reply is sent. Every
//! other call resolves a binding and dispatches through the scheduler to a
//! worker; tool exit codes, stdout, and stderr always come back in the
//! structured result, never as protocol errors.

mod schema;

pub use schema::{find_tools_schema, input_schema_for, project_params};

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, ErrorData as McpError, Implementation,
        ListResourcesResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion, RawResource,
        ReadResourceRequestParam, ReadResourceResult, Resource, ResourceContents,
        ResourcesCapability, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
    },
    service::{NotificationContext, Peer, RequestContext, RoleServer},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::descriptor::ToolCatalog;
use crate::error::{Result, RheaError};
use crate::metrics as metric_names;
use crate::retry::{RetryConfig, execute_with_retry};
use crate::scheduler::WorkerScheduler;
use crate::semantic::SemanticIndex;
use crate::session::{DocResource, SessionRegistry, SessionState, ToolBinding};
use crate::worker::{InvocationResult, RunOptions};
use rhea_common::BlobStore;

/// Summary of a bound tool, returned by `find_tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub long_description: String,
}

/// Process-wide state shared by every session's service instance.
pub struct AppState {
    pub catalog: Arc<ToolCatalog>,
    pub scheduler: Arc<WorkerScheduler>,
    pub store: BlobStore,
    pub semantic: Arc<dyn SemanticIndex>,
    pub sessions: Arc<SessionRegistry>,
    pub find_tools_top_k: usize,
    pub retry: RetryConfig,
}

/// One session's view of the server.
#[derive(Clone)]
pub struct RheaMcpService {
    state: Arc<AppState>,
    session: Arc<SessionState>,
    /// Peer handle captured on initialization, for notifications sent
    /// outside a request context.
    peer: Arc<RwLock<Option<Peer<RoleServer>>>>,
}

impl RheaMcpService {
    pub fn new(state: Arc<AppState>) -> Self {
        let session = state.sessions.create();
        tracing::debug!(session_id = %session.id, "session created");
        Self {
            state,
            session,
            peer: Arc::new(RwLock::new(None)),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Resolve a tool name: session bindings first, then lazily from the
    /// descriptor catalog when the name maps there.
    pub fn resolve_tool(&self, name: &str) -> Option<Arc<crate::descriptor::ToolDescriptor>> {
        if let Some(binding) = self.session.binding(name) {
            return self.state.catalog.get(&binding.tool_id);
        }
        self.state.catalog.resolve_name(name)
    }

    /// Core of `find_tools`: replace this session's bindings with the top-K
    /// tools for the query. Notifications are the caller's duty, emitted
    /// after this returns and before the reply goes out.
    pub async fn install_bindings(&self, query: &str) -> Result<Vec<ToolSummary>> {
        self.session.touch();
        self.session.clear();

        let top_k = self.state.find_tools_top_k;
        let semantic = Arc::clone(&self.state.semantic);
        let ids = execute_with_retry(&self.state.retry, || {
            let semantic = Arc::clone(&semantic);
            async move { semantic.top_k(query, top_k).await }
        })
        .await?;

        let mut summaries = Vec::new();
        for tool_id in ids {
            let Some(tool) = self.state.catalog.get(&tool_id) else {
                tracing::warn!(%tool_id, "semantic index returned unknown tool");
                continue;
            };

            let bound_name = tool.sanitized_name();
            self.session.insert_binding(
                &bound_name,
                ToolBinding {
                    tool_id: tool.id.clone(),
                    title: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: Arc::new(input_schema_for(&tool)),
                },
            );
            self.session.insert_resource(DocResource {
                uri: format!("resource://documentation/{}", tool.name),
                name: format!("{} Documentation", tool.name),
                description: format!("Full documentation for {}", tool.name),
                text: tool.documentation.clone().unwrap_or_else(|| {
                    format!("Documentation for '{}' is not available.", tool.name)
                }),
            });

            summaries.push(ToolSummary {
                name: bound_name,
                description: tool.description.clone(),
                long_description: tool
                    .long_description
                    .clone()
                    .unwrap_or_else(|| "Long description not available for this tool.".to_string()),
            });
        }

        tracing::info!(
            session_id = %self.session.id,
            bound = summaries.len(),
            "find_tools populated session registry"
        );
        Ok(summaries)
    }

    /// Core of a tool call: resolve, bind arguments, dispatch to a worker.
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<InvocationResult> {
        self.session.touch();

        let tool = self
            .resolve_tool(name)
            .ok_or_else(|| RheaError::NotFound(format!("unknown tool '{name}'")))?;
        let params = project_params(&tool, args)?;

        metrics::counter!(metric_names::TOOL_EXECUTION_REQUESTS).increment(1);
        let worker = self.state.scheduler.ensure(&tool).await?;

        tracing::info!(session_id = %self.session.id, tool_id = %tool.id, "executing tool");
        let started = Instant::now();
        let result = worker.run_serialized(params, RunOptions::default()).await;
        metrics::histogram!(metric_names::TOOL_EXECUTION_RUNTIME)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(invocation) => {
                metrics::counter!(metric_names::SUCCESSFUL_TOOL_EXECUTIONS).increment(1);
                tracing::info!(
                    tool_id = %tool.id,
                    exit_code = invocation.exit_code,
                    outputs = invocation.files.len(),
                    "tool finished"
                );
            }
            Err(e) => {
                metrics::counter!(metric_names::FAILED_TOOL_EXECUTIONS).increment(1);
                tracing::warn!(tool_id = %tool.id, error = %e, "tool execution failed");
            }
        }
        result
    }

    fn baseline_find_tools() -> Tool {
        Tool {
            name: "find_tools".into(),
            title: Some("Find Tools".to_string()),
            icons: None,
            description: Some(
                "Find and populate relevant tools for a query. Once called, the server \
                 installs the matching tools into this session and notifies the client."
                    .into(),
            ),
            input_schema: Arc::new(find_tools_schema()),
            output_schema: None,
            annotations: None,
            meta: None,
        }
    }

    async fn handle_find_tools(
        &self,
        params: CallToolRequestParam,
        peer: &Peer<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let args = params.arguments.unwrap_or_default();
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return Err(McpError::invalid_params(
                "find_tools requires a 'query' string".to_string(),
                None,
            ));
        };

        metrics::counter!(metric_names::FIND_TOOLS_REQUESTS).increment(1);
        let started = Instant::now();
        let outcome = self.install_bindings(query).await;
        metrics::histogram!(metric_names::FIND_TOOLS_LATENCY)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(summaries) => {
                // Session state is updated; announce before replying.
                if let Err(e) = peer.notify_tool_list_changed().await {
                    tracing::warn!(error = %e, "tools/list_changed notification failed");
                }
                if let Err(e) = peer.notify_resource_list_changed().await {
                    tracing::warn!(error = %e, "resources/list_changed notification failed");
                }

                let body = serde_json::to_string_pretty(&summaries)
                    .unwrap_or_else(|e| format!("serialization error: {e}"));
                Ok(CallToolResult::success(vec![Content::text(body)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "find_tools failed: {e}"
            ))])),
        }
    }
}

impl ServerHandler for RheaMcpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: None,
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("Rhea".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Call find_tools with a task description to populate this session with \
                 matching tools, then call them by name. File inputs are object-store \
                 handles obtained from the upload endpoint."
                    .to_string(),
            ),
        }
    }

    fn on_initialized(
        &self,
        context: NotificationContext<RoleServer>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        async move {
            tracing::info!(session_id = %self.session.id, "client connected");
            let mut peer_guard = self.peer.write().unwrap();
            if peer_guard.is_none() {
                *peer_guard = Some(context.peer.clone());
            }
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<ListToolsResult, McpError>> + Send + '_
    {
        async move {
            self.session.touch();
            let mut tools = vec![Self::baseline_find_tools()];

            for (name, binding) in self.session.bindings_snapshot() {
                tools.push(Tool {
                    name: name.into(),
                    title: Some(binding.title.clone()),
                    icons: None,
                    description: Some(binding.description.clone().into()),
                    input_schema: Arc::clone(&binding.input_schema),
                    output_schema: None,
                    annotations: None,
                    meta: None,
                });
            }

            Ok(ListToolsResult {
                meta: None,
                tools,
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<CallToolResult, McpError>> + Send + '_
    {
        async move {
            let tool_name = params.name.to_string();

            if tool_name == "find_tools" {
                return self.handle_find_tools(params, &context.peer).await;
            }

            let args = params.arguments.unwrap_or_default();
            match self.invoke(&tool_name, &args).await {
                Ok(result) => {
                    let body = serde_json::to_string_pretty(&result)
                        .unwrap_or_else(|e| format!("serialization error: {e}"));
                    Ok(CallToolResult::success(vec![Content::text(body)]))
                }
                Err(RheaError::NotFound(msg)) => Err(McpError::invalid_params(msg, None)),
                Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                    "{}: {e}",
                    e.category()
                ))])),
            }
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<ListResourcesResult, McpError>> + Send + '_
    {
        async move {
            let resources = self
                .session
                .resources_snapshot()
                .into_iter()
                .map(|doc| {
                    let mut raw = RawResource::new(doc.uri, doc.name);
                    raw.description = Some(doc.description);
                    raw.mime_type = Some("text/markdown".to_string());
                    Resource {
                        raw,
                        annotations: None,
                    }
                })
                .collect();

            Ok(ListResourcesResult {
                meta: None,
                resources,
                next_cursor: None,
            })
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<ReadResourceResult, McpError>> + Send + '_
    {
        async move {
            let Some(doc) = self.session.resource(&request.uri) else {
                return Err(McpError::resource_not_found(
                    format!("unknown resource '{}'", request.uri),
                    None,
                ));
            };

            Ok(ReadResourceResult {
                contents: vec![ResourceContents::TextResourceContents {
                    uri: doc.uri,
                    mime_type: Some("text/markdown".to_string()),
                    text: doc.text,
                    meta: None,
                }],
            })
        }
    }
}
