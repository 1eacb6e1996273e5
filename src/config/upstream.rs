//! Upstream search server description

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How to launch the upstream MCP server and which of its tools to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub tool: String,
}
