//! CLI argument parsing and command dispatch.
//!
//! - `args` - Command-line argument structures
//! - `handlers` - Command execution handlers

pub mod args;
pub mod handlers;

pub use args::{AskArgs, Cli, Commands, LogLevel, SearchArgs, SuggestArgs};
pub use handlers::{RunStatus, dispatch_command};
