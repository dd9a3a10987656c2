//! Command-line argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use sidekick_engine::config::ENV_CONFIG;

/// Log level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    Info,
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Streamed answers for search queries and selected text.
#[derive(Parser, Debug)]
#[command(name = "sidekick")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, short, global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream an answer for a text
    Ask(AskArgs),
    /// Answer the query of a search result page
    Search(SearchArgs),
    /// Show the application name
    Info,
    /// Print suggested questions
    Suggest(SuggestArgs),
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Text to send, or the content a question is about
    pub text: String,

    /// Ask this question about TEXT instead of sending it as is
    #[arg(long, short)]
    pub question: Option<String>,

    /// Print follow-up questions after the answer
    #[arg(long)]
    pub suggest: bool,

    /// Continue an existing conversation
    #[arg(long, value_name = "ID")]
    pub conversation: Option<String>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Result page URL, e.g. https://www.baidu.com/s?wd=rust
    pub url: String,
}

#[derive(Args, Debug)]
pub struct SuggestArgs {
    /// Follow-ups for this message instead of the opening questions
    #[arg(long)]
    pub message_id: Option<String>,
}
