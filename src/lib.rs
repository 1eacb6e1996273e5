//! python-docs-mcp - Python documentation lookup for Model Context Protocol
//!
//! Exposes a single MCP tool, `get_python_docs`, that forwards queries to an
//! upstream web search MCP server and relays the results.

pub mod config;
pub mod mcp;
pub mod types;
pub mod upstream;

pub use config::ConfigLoader;
pub use mcp::McpServer;
pub use types::DocsError;
pub use upstream::{McpClient, UpstreamManager, UpstreamSearch};
