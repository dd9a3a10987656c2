//! Chat request body.

use serde::{Deserialize, Serialize};

/// User identifier sent with every request when none is configured.
pub const DEFAULT_USER: &str = "extension_user";

/// How the server should deliver the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Chunked `data: ` lines, one fragment at a time.
    #[default]
    Streaming,
    /// A single JSON document once the answer is complete.
    Blocking,
}

/// Template inputs forwarded to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatInputs {
    pub text: String,
}

/// Body of `POST {api}/chat-messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Prompt shown to the model.
    pub query: String,
    /// End-user identifier.
    pub user: String,
    pub response_mode: ResponseMode,
    pub inputs: ChatInputs,
    /// Continue an existing conversation instead of starting a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Build a streaming request with `query` as the prompt and `text` as the
    /// raw input the prompt was derived from.
    pub fn streaming(query: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user: DEFAULT_USER.to_string(),
            response_mode: ResponseMode::Streaming,
            inputs: ChatInputs { text: text.into() },
            conversation_id: None,
        }
    }

    /// Override the end-user identifier.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Attach the request to an existing conversation.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}
