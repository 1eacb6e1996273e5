//! Configuration loader with 2-tier precedence
//!
//! Priority order (highest to lowest):
//! 1. User config (--config, ./.python-docs-mcp.toml, $PYTHON_DOCS_MCP_CONFIG
//!    or ~/.config/python-docs-mcp/config.toml; first found wins)
//! 2. Built-in defaults

use crate::config::{default_upstream, UpstreamServer, UserConfig};
use crate::config::defaults::{DEFAULT_LOG_LEVEL, DEFAULT_RESULT_COUNT};
use crate::types::DocsError;
use std::path::{Path, PathBuf};
use tracing::debug;

const PROJECT_CONFIG: &str = ".python-docs-mcp.toml";
const CONFIG_ENV: &str = "PYTHON_DOCS_MCP_CONFIG";

#[derive(Debug, Default)]
pub struct ConfigLoader {
    user_config: Option<UserConfig>,
    source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration. An explicit path must exist; otherwise the
    /// usual locations are searched and a missing file means defaults.
    pub fn new(explicit: Option<&Path>) -> Result<Self, DocsError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(DocsError::ConfigError(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::load_file(path);
        }

        for path in Self::candidates() {
            if path.exists() {
                return Self::load_file(&path);
            }
        }

        debug!("No user config file found");
        Ok(Self::default())
    }

    /// Build a loader from TOML text
    pub fn from_toml(content: &str) -> Result<Self, DocsError> {
        let config: UserConfig = toml::from_str(content)
            .map_err(|e| DocsError::ConfigError(format!("Failed to parse config: {}", e)))?;

        if config.settings.result_count == Some(0) {
            return Err(DocsError::ConfigError(
                "settings.result_count must be at least 1".to_string(),
            ));
        }

        if matches!(config.upstream.command.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(DocsError::ConfigError(
                "upstream.command must not be empty".to_string(),
            ));
        }

        Ok(Self {
            user_config: Some(config),
            source: None,
        })
    }

    fn load_file(path: &Path) -> Result<Self, DocsError> {
        debug!("Loading user config from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| DocsError::ConfigError(format!("Failed to read config: {}", e)))?;

        let mut loader = Self::from_toml(&content)?;
        loader.source = Some(path.to_path_buf());
        Ok(loader)
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(PROJECT_CONFIG));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            candidates.push(PathBuf::from(config_path));
        }

        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("python-docs-mcp").join("config.toml"));
        }

        candidates
    }

    /// File the configuration was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn log_level(&self) -> &str {
        self.user_config
            .as_ref()
            .and_then(|c| c.settings.log_level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Number of results requested from the upstream search
    pub fn result_count(&self) -> u32 {
        self.user_config
            .as_ref()
            .and_then(|c| c.settings.result_count)
            .unwrap_or(DEFAULT_RESULT_COUNT)
    }

    /// Upstream server with user overrides applied over the defaults
    pub fn upstream(&self) -> UpstreamServer {
        let mut upstream = default_upstream();

        let Some(user_cfg) = &self.user_config else {
            return upstream;
        };
        let overrides = &user_cfg.upstream;

        if let Some(name) = &overrides.name {
            upstream.name = name.clone();
        }
        if let Some(command) = &overrides.command {
            upstream.command = command.clone();
            // A new command rarely takes the default npx arguments
            upstream.args = overrides.args.clone().unwrap_or_default();
        } else if let Some(args) = &overrides.args {
            upstream.args = args.clone();
        }
        if let Some(tool) = &overrides.tool {
            upstream.tool = tool.clone();
        }
        upstream
            .env
            .extend(overrides.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        upstream
    }
}
