//! Upstream web search
//!
//! The tool server delegates every query to an [`UpstreamSearch`]. In
//! production that is an [`UpstreamManager`], which talks MCP to a separate
//! search server process.

pub mod client;
pub mod manager;

pub use client::McpClient;
pub use manager::UpstreamManager;

use crate::mcp::protocol::CallToolResult;
use crate::types::DocsError;
use async_trait::async_trait;

/// Upstream tool result: content items plus the upstream's own error flag
pub type SearchResult = CallToolResult;

#[async_trait]
pub trait UpstreamSearch: Send + Sync {
    /// Run one search. `Err` means the call itself failed; an upstream that
    /// answered with an error is `Ok` with `is_error` set.
    async fn search(&self, query: &str, limit: u32) -> Result<SearchResult, DocsError>;
}
