//! CLI command handlers.

mod completions;
mod config;
mod get;
mod progress;
mod put;

pub use completions::run_completions;
pub use config::run_config;
pub use get::run_get;
pub use put::run_put;
