//! Answer accumulator.
//!
//! Folds decoded events into the running answer. Every update hands out the
//! *full* normalized answer so a renderer can re-parse it from scratch.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SidekickError};
use sidekick_protocol::StreamEvent;

/// Two or more consecutive blank (or whitespace-only) lines.
static BLANK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid blank-run pattern"));

/// Collapse runs of two or more blank lines into exactly one.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").into_owned()
}

/// How a stream ended without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server finished the answer.
    Completed {
        answer: String,
        message_id: Option<String>,
    },
    /// The caller cancelled; `answer` is what had arrived by then.
    Stopped { answer: String },
}

impl StreamOutcome {
    pub fn answer(&self) -> &str {
        match self {
            Self::Completed { answer, .. } | Self::Stopped { answer } => answer,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

/// Callbacks of one request. All methods run on the decode loop; after
/// `done` or `failed` nothing else is called.
pub trait AnswerSink: Send + Sync {
    /// Full normalized answer so far.
    fn progress(&self, answer: &str);

    fn done(&self, outcome: &StreamOutcome);

    fn failed(&self, error: &SidekickError);
}

/// State of one stream. Append-only until terminal.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub answer_text: String,
    pub message_id: Option<String>,
    pub aborted: bool,
    pub terminal: bool,
}

/// Effect of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Render this text.
    Render(String),
    /// Nothing visible changed.
    Unchanged,
    /// The stream is over.
    Finished(StreamOutcome),
}

#[derive(Debug, Default)]
pub struct AnswerAccumulator {
    state: StreamState,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.terminal
    }

    /// Normalized answer as it would be rendered now.
    pub fn rendered(&self) -> String {
        collapse_blank_lines(&self.state.answer_text)
    }

    /// Apply one event. A server `error` event ends the stream with
    /// [`SidekickError::Protocol`].
    pub fn apply(&mut self, event: StreamEvent) -> Result<Update> {
        if self.state.terminal {
            tracing::trace!(?event, "Event after terminal state ignored");
            return Ok(Update::Unchanged);
        }

        match event {
            StreamEvent::Message { fragment } => {
                if fragment.is_empty() {
                    return Ok(Update::Unchanged);
                }
                self.state.answer_text.push_str(&fragment);
                Ok(Update::Render(self.rendered()))
            }
            StreamEvent::MessageEnd { message_id } => {
                if message_id.is_some() {
                    self.state.message_id = message_id;
                }
                Ok(Update::Unchanged)
            }
            StreamEvent::Error { message } => {
                self.state.terminal = true;
                Err(SidekickError::protocol(message))
            }
            StreamEvent::End => {
                self.state.terminal = true;
                Ok(Update::Finished(StreamOutcome::Completed {
                    answer: self.rendered(),
                    message_id: self.state.message_id.clone(),
                }))
            }
        }
    }

    /// Finalize after cancellation. Returns the outcome only the first time.
    pub fn abort(&mut self) -> Option<StreamOutcome> {
        if self.state.terminal {
            return None;
        }
        self.state.aborted = true;
        self.state.terminal = true;
        Some(StreamOutcome::Stopped {
            answer: self.rendered(),
        })
    }

    /// Mark the stream terminal after a transport failure.
    pub fn close(&mut self) {
        self.state.terminal = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(fragment: &str) -> StreamEvent {
        StreamEvent::Message {
            fragment: fragment.to_string(),
        }
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n \n\t\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\nb"), "a\nb");
    }

    #[test]
    fn test_progress_always_carries_full_answer() {
        let mut acc = AnswerAccumulator::new();
        assert_eq!(
            acc.apply(message("Hello")).expect("apply"),
            Update::Render("Hello".to_string())
        );
        assert_eq!(
            acc.apply(message(", world")).expect("apply"),
            Update::Render("Hello, world".to_string())
        );
        assert_eq!(acc.apply(message("")).expect("apply"), Update::Unchanged);
    }

    #[test]
    fn test_blank_runs_split_across_fragments() {
        let mut acc = AnswerAccumulator::new();
        acc.apply(message("one\n\n")).expect("apply");
        acc.apply(message("\n")).expect("apply");
        assert_eq!(
            acc.apply(message("\ntwo")).expect("apply"),
            Update::Render("one\n\ntwo".to_string())
        );
        assert_eq!(acc.state().answer_text, "one\n\n\n\ntwo");
    }

    #[test]
    fn test_end_completes_with_message_id() {
        let mut acc = AnswerAccumulator::new();
        acc.apply(message("done")).expect("apply");
        acc.apply(StreamEvent::MessageEnd {
            message_id: Some("m1".to_string()),
        })
        .expect("apply");
        let update = acc.apply(StreamEvent::End).expect("apply");
        assert_eq!(
            update,
            Update::Finished(StreamOutcome::Completed {
                answer: "done".to_string(),
                message_id: Some("m1".to_string()),
            })
        );
        assert!(acc.is_terminal());
        assert_eq!(acc.apply(message("late")).expect("apply"), Update::Unchanged);
    }

    #[test]
    fn test_error_event_is_protocol_failure() {
        let mut acc = AnswerAccumulator::new();
        acc.apply(message("partial")).expect("apply");
        let err = acc
            .apply(StreamEvent::Error {
                message: "quota exceeded".to_string(),
            })
            .expect_err("error");
        assert!(matches!(err, SidekickError::Protocol(ref m) if m == "quota exceeded"));
        assert!(acc.is_terminal());
        assert_eq!(acc.abort(), None);
    }

    #[test]
    fn test_abort_once() {
        let mut acc = AnswerAccumulator::new();
        acc.apply(message("half")).expect("apply");
        let outcome = acc.abort().expect("outcome");
        assert!(outcome.is_stopped());
        assert_eq!(outcome.answer(), "half");
        assert!(acc.state().aborted);
        assert_eq!(acc.abort(), None);
    }
}
