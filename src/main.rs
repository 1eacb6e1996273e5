use anyhow::Result;
use clap::Parser;
use python_docs_mcp::{ConfigLoader, McpServer, UpstreamManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Python documentation lookup for Model Context Protocol
///
/// Serves the `get_python_docs` tool on stdio and answers it through an
/// upstream web search MCP server.
#[derive(Parser, Debug)]
#[command(name = "python-docs-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// If not specified, the first existing of:
    /// 1. ./.python-docs-mcp.toml
    /// 2. $PYTHON_DOCS_MCP_CONFIG
    /// 3. ~/.config/python-docs-mcp/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn setup_logging(log_level: &str, log_file: Option<PathBuf>) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into());

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false);

    // stdout carries the protocol, so logs never go there
    if let Some(log_path) = log_file {
        let file = std::fs::File::create(log_path)?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match ConfigLoader::new(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level().to_string());
    setup_logging(&log_level, args.log_file)?;

    if let Some(source) = config.source() {
        info!("Configuration loaded from {}", source.display());
    }

    let upstream = Arc::new(UpstreamManager::new(config.upstream()));
    let mcp_server = McpServer::new(upstream.clone(), config.result_count());

    // Written regardless of --log-level or --log-file
    eprintln!("Python docs MCP server running on stdio");

    // Runs until the client closes stdin
    let outcome = mcp_server.run().await;

    upstream.shutdown().await;

    match outcome {
        Ok(()) => {
            info!("MCP server stopped normally");
            Ok(())
        }
        Err(e) => {
            eprintln!("MCP server error: {}", e);
            Err(e)
        }
    }
}
