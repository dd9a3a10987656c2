//! Sidekick Protocol - wire types for the streaming chat API
//!
//! This crate defines the request body posted to `/chat-messages`, the
//! `data: `-prefixed JSON payloads carried by the streaming response, and
//! the small auxiliary documents (`/info`, `/parameters`, suggested
//! questions, error bodies) the engine reads.

pub mod app;
pub mod events;
pub mod request;

#[cfg(test)]
mod tests;

pub use app::{ApiErrorBody, AppInfo, AppParameters, SuggestedAfterAnswer, SuggestedQuestions};
pub use events::{DATA_PREFIX, StreamEvent, StreamPayload};
pub use request::{ChatInputs, ChatRequest, DEFAULT_USER, ResponseMode};
