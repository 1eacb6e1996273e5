//! MCP client implementation
//!
//! Handles communication with the upstream MCP server via newline-delimited
//! JSON-RPC over its stdin/stdout

use crate::config::UpstreamServer;
use crate::mcp::codec::{Frame, JsonLinesCodec};
use crate::mcp::protocol::{
    CallToolParams, CallToolResult, Implementation, IncomingMessage, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    PROTOCOL_VERSION,
};
use crate::types::DocsError;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, DocsError>>>>>;

/// MCP client for a single upstream server
pub struct McpClient {
    /// Configured server name (e.g., "brave-search")
    server_name: String,

    /// Next request ID
    next_id: AtomicU64,

    /// Requests awaiting a response
    pending: PendingMap,

    /// Serialized messages for the write loop
    outgoing: mpsc::UnboundedSender<String>,

    /// Set once the upstream closes its output
    closed: Arc<AtomicBool>,

    /// Reported by the upstream during initialize
    server_info: Option<Implementation>,

    /// Upstream process, killed on drop
    _child: Option<Child>,
}

impl McpClient {
    /// Spawn the upstream server and complete the MCP handshake
    pub async fn spawn(server: &UpstreamServer) -> Result<Self, DocsError> {
        info!(
            "Spawning upstream server {}: {} {}",
            server.name,
            server.command,
            server.args.join(" ")
        );

        let mut child = Command::new(&server.command)
            .args(&server.args)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DocsError::ServerNotFound(
                    server.name.clone(),
                    format!("failed to run {}: {}", server.command, e),
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DocsError::Transport("Failed to get upstream stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DocsError::Transport("Failed to get upstream stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_loop(server.name.clone(), stderr));
        }

        let client = Self::establish(server.name.clone(), stdout, stdin, Some(child)).await?;

        info!("Upstream server {} initialized successfully", server.name);

        Ok(client)
    }

    /// Connect over an existing reader/writer pair and complete the handshake
    pub async fn connect<R, W>(
        server_name: impl Into<String>,
        reader: R,
        writer: W,
    ) -> Result<Self, DocsError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::establish(server_name.into(), reader, writer, None).await
    }

    async fn establish<R, W>(
        server_name: String,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Result<Self, DocsError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::write_loop(writer, outgoing_rx));
        tokio::spawn(Self::read_loop(
            server_name.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
            outgoing.clone(),
        ));

        let mut client = Self {
            server_name,
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            closed,
            server_info: None,
            _child: child,
        };

        let result = client.initialize().await?;
        client.server_info = Some(result.server_info);

        Ok(client)
    }

    /// Background task to write messages to the upstream server
    async fn write_loop<W>(writer: W, mut outgoing_rx: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        let mut sink = FramedWrite::new(writer, JsonLinesCodec::new());

        while let Some(message) = outgoing_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                error!("Failed to write to upstream server: {}", e);
                break;
            }
        }
    }

    /// Background task to read messages from the upstream server
    async fn read_loop<R>(
        server_name: String,
        reader: R,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
        outgoing: mpsc::UnboundedSender<String>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, JsonLinesCodec::new());

        while let Some(frame) = lines.next().await {
            let line = match frame {
                Ok(Frame::Line(line)) => line,
                Ok(Frame::NotUtf8) => {
                    warn!("Skipping non-UTF-8 line from {}", server_name);
                    continue;
                }
                Ok(Frame::TooLong) => {
                    warn!("Skipping over-long line from {}", server_name);
                    continue;
                }
                Err(e) => {
                    error!("Failed to read from upstream server: {}", e);
                    break;
                }
            };

            let message = line.trim();
            if message.is_empty() {
                continue;
            }

            debug!("Received message: {}", message);
            Self::handle_message(message, &pending, &outgoing).await;
        }

        warn!("Upstream server {} closed stdout", server_name);

        // Flag first so no request registers after the drain
        closed.store(true, Ordering::SeqCst);
        let mut pending = pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(DocsError::ServerClosed(server_name.clone())));
        }
    }

    async fn stderr_loop(server_name: String, stderr: ChildStderr) {
        let mut lines = FramedRead::new(stderr, JsonLinesCodec::new());
        while let Some(Ok(frame)) = lines.next().await {
            if let Frame::Line(line) = frame {
                debug!(upstream = %server_name, "{}", line);
            }
        }
    }

    async fn handle_message(
        content: &str,
        pending: &PendingMap,
        outgoing: &mpsc::UnboundedSender<String>,
    ) {
        match serde_json::from_str::<IncomingMessage>(content) {
            Ok(IncomingMessage::Response(response)) => {
                let Some(id) = response.id.as_u64() else {
                    warn!("Response without a usable id: {}", content);
                    return;
                };

                let Some(sender) = pending.lock().await.remove(&id) else {
                    debug!("Response for unknown request {}", id);
                    return;
                };

                let result = match (response.result, response.error) {
                    (_, Some(error)) => Err(DocsError::Protocol(format!(
                        "{} (code {})",
                        error.message, error.code
                    ))),
                    (Some(result), None) => Ok(result),
                    (None, None) => Err(DocsError::Protocol("No result or error".to_string())),
                };

                let _ = sender.send(result);
            }
            Ok(IncomingMessage::Request(request)) => {
                let Some(id) = request.id else {
                    debug!("Upstream notification: {}", request.method);
                    return;
                };

                let response = if request.method == "ping" {
                    JsonRpcResponse::success(id, json!({}))
                } else {
                    JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(
                            METHOD_NOT_FOUND,
                            format!("Method not found: {}", request.method),
                        ),
                    )
                };

                match serde_json::to_string(&response) {
                    Ok(message) => {
                        let _ = outgoing.send(message);
                    }
                    Err(e) => error!("Failed to serialize reply to upstream: {}", e),
                }
            }
            Err(e) => warn!("Unknown message type: {} ({})", content, e),
        }
    }

    /// Send a request and wait for its response
    async fn send_request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, DocsError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, serde_json::to_value(params)?);
        let message = serde_json::to_string(&request)?;
        debug!("Sending request {}: {}", id, method);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(DocsError::ServerClosed(self.server_name.clone()));
            }
            pending.insert(id, tx);
        }

        if self.outgoing.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(DocsError::Transport(format!(
                "Failed to send request to {}",
                self.server_name
            )));
        }

        let result = rx
            .await
            .map_err(|_| DocsError::ServerClosed(self.server_name.clone()))??;

        serde_json::from_value(result)
            .map_err(|e| DocsError::Protocol(format!("Failed to parse {} response: {}", method, e)))
    }

    /// Send a notification (no response expected)
    async fn send_notification(&self, method: &str) -> Result<(), DocsError> {
        let message = serde_json::to_string(&JsonRpcRequest::notification(method))?;
        debug!("Sending notification: {}", method);

        self.outgoing.send(message).map_err(|_| {
            DocsError::Transport(format!("Failed to send notification to {}", self.server_name))
        })
    }

    async fn initialize(&self) -> Result<InitializeResult, DocsError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self.send_request("initialize", params).await?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                "Upstream {} negotiated protocol {} (requested {})",
                self.server_name, result.protocol_version, PROTOCOL_VERSION
            );
        }

        self.send_notification("notifications/initialized").await?;

        Ok(result)
    }

    /// Call a tool on the upstream server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, DocsError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };

        self.send_request("tools/call", params).await
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Whether the upstream has closed its side of the connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio_util::codec::LinesCodec;

    enum Reply {
        Result(Value),
        Error(i32, &'static str),
        Silent,
        Hangup,
    }

    type Seen = Arc<StdMutex<Vec<JsonRpcRequest>>>;

    /// Runs a scripted upstream on the far end of an in-memory pipe
    fn scripted_upstream<F>(handler: F) -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, Seen)
    where
        F: Fn(&JsonRpcRequest) -> Reply + Send + 'static,
    {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let seen: Seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        tokio::spawn(async move {
            let (server_read, server_write) = tokio::io::split(server_io);
            let mut lines = FramedRead::new(server_read, LinesCodec::new());
            let mut sink = FramedWrite::new(server_write, LinesCodec::new());

            while let Some(Ok(line)) = lines.next().await {
                let request: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                let reply = handler(&request);
                let id = request.id.clone().unwrap_or(Value::Null);
                seen_clone.lock().unwrap().push(request);

                let response = match reply {
                    Reply::Result(result) => JsonRpcResponse::success(id, result),
                    Reply::Error(code, message) => {
                        JsonRpcResponse::failure(id, JsonRpcError::new(code, message))
                    }
                    Reply::Silent => continue,
                    Reply::Hangup => break,
                };
                sink.send(serde_json::to_string(&response).unwrap())
                    .await
                    .unwrap();
            }
        });

        (client_read, client_write, seen)
    }

    fn handshake(request: &JsonRpcRequest) -> Option<Reply> {
        match request.method.as_str() {
            "initialize" => Some(Reply::Result(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "fake-search", "version": "1.0.0"}
            }))),
            "notifications/initialized" => Some(Reply::Silent),
            _ => None,
        }
    }

    fn echo_search(request: &JsonRpcRequest) -> Reply {
        if let Some(reply) = handshake(request) {
            return reply;
        }

        let query = request
            .params
            .as_ref()
            .and_then(|p| p.pointer("/arguments/query"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        Reply::Result(json!({
            "content": [{"type": "text", "text": format!("results for {}", query)}]
        }))
    }

    #[tokio::test]
    async fn test_handshake_then_tool_call() {
        let (reader, writer, seen) = scripted_upstream(echo_search);
        let client = McpClient::connect("fake-search", reader, writer).await.unwrap();

        assert_eq!(client.server_info().unwrap().name, "fake-search");

        let result = client
            .call_tool("search_web", json!({"query": "asyncio", "count": 3}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("results for asyncio"));

        let methods: Vec<String> = seen.lock().unwrap().iter().map(|r| r.method.clone()).collect();
        assert_eq!(methods, vec!["initialize", "notifications/initialized", "tools/call"]);

        let seen = seen.lock().unwrap();
        let params = seen[2].params.as_ref().unwrap();
        assert_eq!(params["name"], "search_web");
        assert_eq!(params["arguments"]["count"], 3);
        assert!(seen[1].is_notification());
    }

    #[tokio::test]
    async fn test_upstream_tool_error_is_not_a_fault() {
        let (reader, writer, _) = scripted_upstream(|request| {
            handshake(request).unwrap_or_else(|| {
                Reply::Result(json!({
                    "content": [{"type": "text", "text": "rate limited"}],
                    "isError": true
                }))
            })
        });
        let client = McpClient::connect("fake-search", reader, writer).await.unwrap();

        let result = client.call_tool("search_web", json!({})).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("rate limited"));
    }

    #[tokio::test]
    async fn test_error_response_maps_to_protocol_error() {
        let (reader, writer, _) = scripted_upstream(|request| {
            handshake(request).unwrap_or(Reply::Error(-32602, "Unknown tool: search_web"))
        });
        let client = McpClient::connect("fake-search", reader, writer).await.unwrap();

        let err = client.call_tool("search_web", json!({})).await.unwrap_err();
        match err {
            DocsError::Protocol(message) => assert!(message.contains("Unknown tool: search_web")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hangup_fails_pending_call() {
        let (reader, writer, _) =
            scripted_upstream(|request| handshake(request).unwrap_or(Reply::Hangup));
        let client = McpClient::connect("fake-search", reader, writer).await.unwrap();

        let err = client.call_tool("search_web", json!({})).await.unwrap_err();
        assert!(matches!(err, DocsError::ServerClosed(name) if name == "fake-search"));
        assert!(client.is_closed());

        let err = client.call_tool("search_web", json!({})).await.unwrap_err();
        assert!(matches!(err, DocsError::ServerClosed(_)));
    }

    #[tokio::test]
    async fn test_undecodable_upstream_line_is_skipped() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, mut server_write) = tokio::io::split(server_io);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let initialize: JsonRpcRequest =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

            server_write.write_all(b"\xff\xfe not json\n").await.unwrap();
            let response = JsonRpcResponse::success(
                initialize.id.unwrap(),
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "serverInfo": {"name": "noisy-search", "version": "1.0.0"}
                }),
            );
            let line = format!("{}\n", serde_json::to_string(&response).unwrap());
            server_write.write_all(line.as_bytes()).await.unwrap();

            // Keep the pipe open until the client goes away
            while lines.next_line().await.unwrap().is_some() {}
        });

        let client = McpClient::connect("noisy-search", client_read, client_write)
            .await
            .unwrap();
        assert_eq!(client.server_info().unwrap().name, "noisy-search");
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_failed_handshake() {
        let (reader, writer, _) = scripted_upstream(|_| Reply::Hangup);
        let result = McpClient::connect("fake-search", reader, writer).await;
        assert!(matches!(result, Err(DocsError::ServerClosed(_))));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let server = UpstreamServer {
            name: "missing".to_string(),
            command: "/nonexistent/python-docs-mcp-upstream".to_string(),
            args: vec![],
            env: HashMap::new(),
            tool: "search_web".to_string(),
        };

        let result = McpClient::spawn(&server).await;
        assert!(matches!(result, Err(DocsError::ServerNotFound(name, _)) if name == "missing"));
    }
}
