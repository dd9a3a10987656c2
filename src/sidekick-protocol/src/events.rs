//! Streaming payloads and the typed events decoded from them.
//!
//! The response body is a sequence of newline-delimited lines. A line that
//! starts with [`DATA_PREFIX`] carries one JSON object whose `event` field
//! selects its shape; every other line is ignored.

use serde::Deserialize;

/// Prefix of every payload-carrying line.
pub const DATA_PREFIX: &str = "data: ";

/// Message used when the server reports an error without text.
const DEFAULT_STREAM_ERROR: &str = "Stream error";

/// One JSON object as sent by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamPayload {
    /// Answer fragment to append.
    Message {
        #[serde(default)]
        answer: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Answer fragment produced by an agent application.
    AgentMessage {
        #[serde(default)]
        answer: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Server finished producing the message. Some servers only send the
    /// id under `id`, others send both keys.
    MessageEnd {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Fatal error for this stream.
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        status: Option<u16>,
    },
    /// Any event the client has no use for (`ping`, workflow progress, ...).
    #[serde(other)]
    Other,
}

impl StreamPayload {
    /// Parse one complete line.
    ///
    /// Returns `None` for lines without the data prefix, `Some(Err(_))` for
    /// prefixed lines whose JSON does not parse.
    pub fn from_line(line: &str) -> Option<Result<Self, serde_json::Error>> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let json = line.strip_prefix(DATA_PREFIX)?;
        Some(serde_json::from_str(json))
    }

    /// Reduce the payload to the event the client acts on.
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            Self::Message { answer, .. } | Self::AgentMessage { answer, .. } => {
                Some(StreamEvent::Message { fragment: answer })
            }
            Self::MessageEnd { message_id, id, .. } => Some(StreamEvent::MessageEnd {
                message_id: message_id.or(id),
            }),
            Self::Error { message, .. } => Some(StreamEvent::Error {
                message: message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_STREAM_ERROR.to_string()),
            }),
            Self::Other => None,
        }
    }
}

/// Typed event produced by the stream decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fragment to append to the running answer.
    Message { fragment: String },
    /// Server-side end of the message; carries the id used for follow-ups.
    MessageEnd { message_id: Option<String> },
    /// Server-reported failure. Terminates the stream.
    Error { message: String },
    /// The transport finished. Always the last event.
    End,
}

impl StreamEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::End)
    }
}
