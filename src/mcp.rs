//! MCP Protocol Handler
//!
//! Implements JSON-RPC 2.0 over stdio for Model Context Protocol.
//! Reference: https://modelcontextprotocol.io/specification

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::conversation::ConversationMemory;
use crate::domain::Domain;
use crate::workflow::{ResearchWorkflow, WorkflowError};

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Notification (no id, no response expected)
    pub fn notification() -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: None,
            id: None,
        }
    }
}

/// MCP Error Codes
pub mod error_codes {
    // JSON-RPC standard errors
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;

    // MCP custom errors (-32000 to -32099)
    pub const TOOL_NOT_FOUND: i32 = -32000;
    pub const TOOL_EXECUTION_ERROR: i32 = -32001;
}

/// Session used when a `research` call names none
const DEFAULT_SESSION: &str = "mcp";

/// MCP Server
pub struct McpServer {
    workflow: Arc<ResearchWorkflow>,
    memory: ConversationMemory,
}

impl McpServer {
    /// Create new MCP server
    pub fn new(workflow: Arc<ResearchWorkflow>) -> Self {
        Self {
            workflow,
            memory: ConversationMemory::new(),
        }
    }

    /// Run the MCP server (stdio mode)
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        info!("MCP server ready, waiting for requests...");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("Client disconnected (EOF)");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!("← {}", trimmed);

            let response = match serde_json::from_str::<McpRequest>(trimmed) {
                Ok(request) => {
                    // Notifications get no response
                    if request.id.is_none() && request.method.starts_with("notifications/") {
                        debug!("Received notification {}", request.method);
                        continue;
                    }
                    self.handle_request(request).await
                }
                Err(e) => {
                    error!("Parse error: {}", e);
                    McpResponse::error(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e))
                }
            };

            if response.id.is_none() && response.result.is_none() && response.error.is_none() {
                continue;
            }

            let response_json = serde_json::to_string(&response)?;
            debug!("→ {}", response_json);

            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }

    /// Handle a single MCP request
    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        if request.jsonrpc != "2.0" {
            warn!("Unexpected jsonrpc version: {}", request.jsonrpc);
        }

        match request.method.as_str() {
            // Lifecycle
            "initialize" => self.handle_initialize(request.id),
            "initialized" => McpResponse::notification(),
            "shutdown" => {
                info!("Shutdown requested");
                McpResponse::success(request.id, serde_json::json!({}))
            }

            // Tools
            "tools/list" => McpResponse::success(request.id, serde_json::json!({ "tools": tool_definitions() })),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,

            // Ping
            "ping" => McpResponse::success(request.id, serde_json::json!({})),

            // Unknown
            method => {
                warn!("Unknown method: {}", method);
                McpResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                )
            }
        }
    }

    /// Handle initialize
    fn handle_initialize(&self, id: Option<serde_json::Value>) -> McpResponse {
        McpResponse::success(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    }
                },
                "serverInfo": {
                    "name": "research-agent",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handle tools/call
    async fn handle_tools_call(
        &self,
        id: Option<serde_json::Value>,
        params: serde_json::Value,
    ) -> McpResponse {
        let name = match params.get("name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => {
                return McpResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing 'name' parameter",
                )
            }
        };

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        match name {
            "research" => self.call_research(id, &arguments).await,
            "list_domains" => text_result(id, self.list_domains()),
            other => McpResponse::error(
                id,
                error_codes::TOOL_NOT_FOUND,
                format!("Unknown tool: {}", other),
            ),
        }
    }

    async fn call_research(&self, id: Option<serde_json::Value>, arguments: &serde_json::Value) -> McpResponse {
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let session = arguments
            .get("session")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SESSION);

        let context = self.memory.context(session);
        match self.workflow.run(query, &context).await {
            Ok(answer) => {
                self.memory.add_exchange(session, query, &answer.answer_text);
                match serde_json::to_string_pretty(&answer) {
                    Ok(json) => text_result(id, json),
                    Err(e) => McpResponse::error(
                        id,
                        error_codes::TOOL_EXECUTION_ERROR,
                        format!("Failed to encode answer: {}", e),
                    ),
                }
            }
            Err(WorkflowError::EmptyQuery) => McpResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "Missing or empty 'query' argument",
            ),
            Err(e) => McpResponse::error(
                id,
                error_codes::TOOL_EXECUTION_ERROR,
                format!("Tool 'research' failed: {}", e),
            ),
        }
    }

    fn list_domains(&self) -> String {
        self.workflow
            .domains()
            .iter()
            .map(|d: &Domain| format!("- {}: {}", d.as_str(), d.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn text_result(id: Option<serde_json::Value>, text: String) -> McpResponse {
    McpResponse::success(
        id,
        serde_json::json!({
            "content": [{
                "type": "text",
                "text": text
            }]
        }),
    )
}

/// Tool definitions for tools/list
fn tool_definitions() -> serde_json::Value {
    serde_json::json!([
        {
            "name": "research",
            "description": "Answer a research question with domain specialists, grounding and quality checks. \
                            Returns the answer with its sources.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The research question" },
                    "session": { "type": "string", "description": "Conversation id for follow-up questions" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_domains",
            "description": "List the specialist domains questions can be routed to",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}
