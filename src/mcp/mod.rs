//! MCP server and tools module

pub mod codec;
pub mod protocol;
pub mod server;
pub mod tools;

pub use server::McpServer;
