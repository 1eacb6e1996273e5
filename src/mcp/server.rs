//! MCP server implementation
//!
//! Implements the Model Context Protocol server that exposes the
//! `get_python_docs` tool via stdio. Every request runs on its own task, so
//! a tool call waiting on the upstream search never holds up the next one.

use crate::mcp::codec::{Frame, JsonLinesCodec, MAX_LINE_LENGTH};
use crate::mcp::protocol::*;
use crate::mcp::tools;
use crate::upstream::UpstreamSearch;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

const SERVER_NAME: &str = "python-docs-server";

#[derive(Clone)]
pub struct McpServer {
    search: Arc<dyn UpstreamSearch>,
    result_count: u32,
}

impl McpServer {
    pub fn new(search: Arc<dyn UpstreamSearch>, result_count: u32) -> Self {
        Self {
            search,
            result_count,
        }
    }

    /// Run the MCP server on stdin/stdout until the client disconnects
    pub async fn run(&self) -> Result<()> {
        info!("MCP server starting on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `reader`, answering on `writer`
    ///
    /// Returns once `reader` hits EOF and every in-flight request has been
    /// answered.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(Self::write_loop(writer, response_rx));

        let mut lines = FramedRead::new(reader, JsonLinesCodec::new());
        let mut read_error = None;

        while let Some(frame) = lines.next().await {
            let line = match frame {
                Ok(Frame::Line(line)) => line,
                Ok(Frame::NotUtf8) => {
                    let _ = response_tx.send(parse_error("line is not valid UTF-8"));
                    continue;
                }
                Ok(Frame::TooLong) => {
                    let _ = response_tx.send(parse_error(&format!(
                        "line exceeds {} bytes",
                        MAX_LINE_LENGTH
                    )));
                    continue;
                }
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    read_error = Some(e);
                    break;
                }
            };

            let content = line.trim();
            if content.is_empty() {
                continue;
            }

            debug!("Received request: {}", content);

            let server = self.clone();
            let response_tx = response_tx.clone();
            let content = content.to_string();
            tokio::spawn(async move {
                if let Some(response) = server.handle_message(&content).await {
                    let _ = response_tx.send(response);
                }
            });
        }

        if read_error.is_none() {
            info!("Client closed connection");
        }

        // The writer drains until the last in-flight task drops its sender
        drop(response_tx);
        writer_task.await??;

        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn write_loop<W>(writer: W, mut response_rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sink = FramedWrite::new(writer, JsonLinesCodec::new());

        while let Some(response) = response_rx.recv().await {
            let response_json = serde_json::to_string(&response)?;
            sink.send(response_json).await?;
            debug!("Sent response");
        }

        Ok(())
    }

    /// Handle one raw line. `None` means nothing should be written back.
    pub async fn handle_message(&self, content: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(e) => return Some(parse_error(&e.to_string())),
        };

        let Some(object) = value.as_object() else {
            return Some(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::new(INVALID_REQUEST, "Invalid request: expected an object"),
            ));
        };

        if !object.contains_key("method") {
            debug!("Ignoring response from client: {}", content);
            return None;
        }

        // `"id": null` still expects a reply, so key on presence
        let has_id = object.contains_key("id");
        let id = object.get("id").cloned().unwrap_or(Value::Null);
        let mut request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
                ));
            }
        };

        if has_id {
            request.id.get_or_insert(Value::Null);
        }

        self.handle_request(request).await
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!("Received notification: {}", request.method);
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            _ => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            )),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| {
                JsonRpcError::new(INVALID_PARAMS, format!("Invalid initialize params: {}", e))
            })?;

        info!(
            "Client connected: {} {} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                resources: Some(json!({})),
            },
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        serde_json::to_value(result).map_err(|e| {
            JsonRpcError::new(INTERNAL_ERROR, format!("Failed to serialize result: {}", e))
        })
    }

    fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: tools::get_tool_definitions(),
        };

        serde_json::to_value(result).map_err(|e| {
            JsonRpcError::new(INTERNAL_ERROR, format!("Failed to serialize tools: {}", e))
        })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| {
                JsonRpcError::new(INVALID_PARAMS, format!("Invalid tool call params: {}", e))
            })?;

        let result = tools::call_tool(
            &params.name,
            params.arguments.as_ref(),
            self.search.as_ref(),
            self.result_count,
        )
        .await?;

        serde_json::to_value(result).map_err(|e| {
            JsonRpcError::new(INTERNAL_ERROR, format!("Failed to serialize tool result: {}", e))
        })
    }
}

fn parse_error(detail: &str) -> JsonRpcResponse {
    JsonRpcResponse::failure(
        Value::Null,
        JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", detail)),
    )
}
