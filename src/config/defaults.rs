//! Built-in defaults
//!
//! Used for every key the user config leaves unset.

use crate::config::UpstreamServer;
use std::collections::HashMap;

pub const DEFAULT_RESULT_COUNT: u32 = 3;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub fn default_upstream() -> UpstreamServer {
    UpstreamServer {
        name: "brave-search".to_string(),
        command: "npx".to_string(),
        args: vec![
            "-y".to_string(),
            "@modelcontextprotocol/server-brave-search".to_string(),
        ],
        env: HashMap::new(),
        tool: "search_web".to_string(),
    }
}
