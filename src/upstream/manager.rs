//! Upstream manager for lifecycle management
//!
//! Owns the single upstream MCP client, spawning it lazily on first use and
//! again if the previous process has gone away.

use crate::config::UpstreamServer;
use crate::types::DocsError;
use crate::upstream::{McpClient, SearchResult, UpstreamSearch};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct UpstreamManager {
    /// Launch and call configuration
    server: UpstreamServer,

    /// Active client, if one has been spawned
    client: Mutex<Option<Arc<McpClient>>>,
}

impl UpstreamManager {
    pub fn new(server: UpstreamServer) -> Self {
        info!("Upstream search: {} (tool {})", server.name, server.tool);

        Self {
            server,
            client: Mutex::new(None),
        }
    }

    /// Get the live client or spawn a new one
    async fn get_or_create_client(&self) -> Result<Arc<McpClient>, DocsError> {
        let mut client = self.client.lock().await;

        if let Some(existing) = client.as_ref() {
            if !existing.is_closed() {
                debug!("Reusing existing upstream client for {}", self.server.name);
                return Ok(Arc::clone(existing));
            }
            info!("Upstream server {} exited, respawning", self.server.name);
        }

        let spawned = Arc::new(McpClient::spawn(&self.server).await?);
        *client = Some(Arc::clone(&spawned));

        Ok(spawned)
    }

    /// Drop the upstream client, killing its process once no call holds it
    pub async fn shutdown(&self) {
        if let Some(client) = self.client.lock().await.take() {
            info!("Shutting down upstream client for {}", client.server_name());
        }
    }
}

#[async_trait]
impl UpstreamSearch for UpstreamManager {
    async fn search(&self, query: &str, limit: u32) -> Result<SearchResult, DocsError> {
        let client = self.get_or_create_client().await?;

        debug!("Calling {}/{} for {:?}", self.server.name, self.server.tool, query);

        client
            .call_tool(&self.server.tool, json!({ "query": query, "count": limit }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    #[cfg(unix)]
    use std::time::Duration;

    fn missing_server() -> UpstreamServer {
        UpstreamServer {
            name: "brave-search".to_string(),
            command: "/nonexistent/python-docs-mcp-upstream".to_string(),
            args: vec![],
            env: HashMap::new(),
            tool: "search_web".to_string(),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_search_fault() {
        let manager = UpstreamManager::new(missing_server());

        let err = manager.search("python documentation gil", 3).await.unwrap_err();
        assert!(matches!(err, DocsError::ServerNotFound(_, _)));
        assert!(manager.client.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_without_client() {
        let manager = UpstreamManager::new(missing_server());
        manager.shutdown().await;
        assert!(manager.client.lock().await.is_none());
    }

    /// Answers the handshake and a single tools/call with its pid, then exits
    #[cfg(unix)]
    const ONE_SHOT_UPSTREAM: &str = r#"
reply_id() { printf '%s\n' "$1" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p'; }
read -r line
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-search","version":"1.0.0"}}}\n' "$(reply_id "$line")"
read -r line
read -r line
printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pid %s"}]}}\n' "$(reply_id "$line")" "$$"
"#;

    #[cfg(unix)]
    fn one_shot_server() -> UpstreamServer {
        UpstreamServer {
            name: "sh-search".to_string(),
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), ONE_SHOT_UPSTREAM.to_string()],
            env: HashMap::new(),
            tool: "search_web".to_string(),
        }
    }

    #[cfg(unix)]
    async fn wait_for_exit(manager: &UpstreamManager) {
        for _ in 0..200 {
            if let Some(client) = manager.client.lock().await.as_ref() {
                if client.is_closed() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upstream did not exit");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reuse_respawn_and_shutdown() {
        let manager = UpstreamManager::new(one_shot_server());

        let first = manager.get_or_create_client().await.unwrap();
        let again = manager.get_or_create_client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.server_info().unwrap().name, "sh-search");

        let result = manager.search("python documentation gil", 3).await.unwrap();
        assert!(!result.is_error);
        let first_pid = result.first_text().unwrap().to_string();
        assert!(first_pid.starts_with("pid "));

        wait_for_exit(&manager).await;

        let result = manager.search("python documentation gil", 3).await.unwrap();
        assert!(!result.is_error);
        let second_pid = result.first_text().unwrap().to_string();
        assert_ne!(first_pid, second_pid);

        let respawned = manager.client.lock().await.clone().unwrap();
        assert!(!Arc::ptr_eq(&first, &respawned));

        manager.shutdown().await;
        assert!(manager.client.lock().await.is_none());
    }
}
