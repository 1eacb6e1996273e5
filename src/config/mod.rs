//! Configuration system
//!
//! User config file over built-in defaults.

mod defaults;
mod loader;
mod upstream;
mod user_config;

pub use defaults::{default_upstream, DEFAULT_RESULT_COUNT};
pub use loader::ConfigLoader;
pub use upstream::UpstreamServer;
pub use user_config::{Settings, UpstreamOverride, UserConfig};
