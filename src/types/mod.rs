//! Shared types

mod errors;

pub use errors::{DocsError, Result};
