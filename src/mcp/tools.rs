//! MCP tools implementation
//!
//! Defines `get_python_docs` and maps its upstream search outcome onto a
//! tool result.

use crate::mcp::protocol::{CallToolResult, JsonRpcError, Tool, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::types::DocsError;
use crate::upstream::UpstreamSearch;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const TOOL_NAME: &str = "get_python_docs";

/// Prepended to every user query before it reaches the search engine
const QUERY_CONTEXT: &str = "python documentation ";

/// Get all tool definitions
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![Tool {
        name: TOOL_NAME.to_string(),
        description: "Get Python documentation for a given query".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query for Python documentation"
                }
            },
            "required": ["query"]
        }),
    }]
}

/// Validated arguments of `get_python_docs`
#[derive(Debug, Clone, PartialEq)]
pub struct PythonDocsArgs {
    pub query: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgsError {
    #[error("arguments are missing")]
    Missing,

    #[error("arguments must be an object")]
    NotAnObject,

    #[error("query must be a string")]
    InvalidQuery,
}

impl PythonDocsArgs {
    pub fn parse(arguments: Option<&Value>) -> Result<Self, ArgsError> {
        let object = match arguments {
            None | Some(Value::Null) => return Err(ArgsError::Missing),
            Some(Value::Object(object)) => object,
            Some(_) => return Err(ArgsError::NotAnObject),
        };

        match object.get("query") {
            Some(Value::String(query)) => Ok(Self {
                query: query.clone(),
            }),
            _ => Err(ArgsError::InvalidQuery),
        }
    }

    /// Query as sent upstream
    pub fn upstream_query(&self) -> String {
        format!("{}{}", QUERY_CONTEXT, self.query)
    }
}

/// Call a tool by name
///
/// Unknown tools and malformed arguments are protocol errors. Everything
/// that goes wrong upstream comes back as a result with `isError` set.
pub async fn call_tool(
    name: &str,
    arguments: Option<&Value>,
    search: &dyn UpstreamSearch,
    result_count: u32,
) -> Result<CallToolResult, JsonRpcError> {
    if name != TOOL_NAME {
        return Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Unknown tool: {}", name),
        ));
    }

    let args = PythonDocsArgs::parse(arguments)
        .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid arguments: {}", e)))?;

    Ok(handle_get_python_docs(&args, search, result_count).await)
}

async fn handle_get_python_docs(
    args: &PythonDocsArgs,
    search: &dyn UpstreamSearch,
    result_count: u32,
) -> CallToolResult {
    let upstream_query = args.upstream_query();
    debug!("Searching upstream for {:?}", upstream_query);

    match search.search(&upstream_query, result_count).await {
        Ok(result) if result.is_error => {
            let message = result.first_text().unwrap_or("unknown error");
            warn!("Upstream search reported an error: {}", message);
            CallToolResult::error(format!("Error searching for documentation: {}", message))
        }
        Ok(result) => match result.first_text() {
            Some(results) => CallToolResult::text(format!(
                "Search results for \"{}\":\n{}",
                args.query, results
            )),
            None => {
                warn!("Upstream search returned no text content");
                CallToolResult::error(format!("Error: {}", DocsError::NoTextContent))
            }
        },
        Err(e) => {
            warn!("Upstream search failed: {}", e);
            CallToolResult::error(format!("Error: {}", e))
        }
    }
}
