//! Sidekick CLI library module.
//!
//! A headless driver over the engine:
//! - `ask` - stream an answer for a text, optionally a question about it
//! - `search` - run the search-page prompt for a result page URL
//! - `info` - resolve and cache the application name
//! - `suggest` - print opening or follow-up questions

pub mod cli;
pub mod output;
