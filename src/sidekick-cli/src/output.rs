//! Terminal output for streamed answers.
//!
//! The engine hands every progress callback the full answer so far; the
//! terminal can only append, so [`TerminalSink`] prints the part it has not
//! printed yet.

use std::io::Write;

use parking_lot::Mutex;

use sidekick_engine::accumulator::{AnswerSink, StreamOutcome};
use sidekick_engine::error::SidekickError;
use sidekick_engine::render::STOPPED_MARKER;

/// Suffix of `answer` not covered by `printed`.
///
/// Normalization may rewrite text that was already printed (a blank run
/// collapsing); the terminal keeps what it showed and continues after the
/// common prefix.
fn unprinted<'a>(printed: &str, answer: &'a str) -> &'a str {
    if let Some(rest) = answer.strip_prefix(printed) {
        return rest;
    }
    let common = printed
        .char_indices()
        .zip(answer.chars())
        .find(|((_, a), b)| a != b)
        .map_or(answer.len(), |((i, _), _)| i);
    tracing::debug!(common, "Printed answer diverged from the normalized one");
    answer.get(common..).unwrap_or_default()
}

#[derive(Default)]
struct Printed {
    text: String,
    failure: Option<String>,
    outcome: Option<StreamOutcome>,
}

/// [`AnswerSink`] appending answer deltas to a writer.
pub struct TerminalSink<W> {
    out: Mutex<W>,
    state: Mutex<Printed>,
}

impl TerminalSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            state: Mutex::new(Printed::default()),
        }
    }

    /// User-facing text of the failure, if the request failed.
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.state.lock().outcome.clone()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn append(&self, answer: &str, trailer: &str) {
        let mut state = self.state.lock();
        let delta = unprinted(&state.text, answer).to_string();
        state.text = answer.to_string();
        drop(state);
        self.write(&format!("{delta}{trailer}"));
    }

    fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "Failed to write answer");
        }
    }
}

#[cfg(test)]
impl TerminalSink<Vec<u8>> {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.out.lock()).into_owned()
    }
}

impl<W: Write + Send> AnswerSink for TerminalSink<W> {
    fn progress(&self, answer: &str) {
        self.append(answer, "");
    }

    fn done(&self, outcome: &StreamOutcome) {
        match outcome {
            StreamOutcome::Completed { answer, .. } => self.append(answer, "\n"),
            StreamOutcome::Stopped { answer } => {
                let separator = if answer.is_empty() { "" } else { "\n" };
                self.append(answer, &format!("{separator}{STOPPED_MARKER}\n"));
            }
        }
        self.state.lock().outcome = Some(outcome.clone());
    }

    fn failed(&self, error: &SidekickError) {
        let printed_any = {
            let mut state = self.state.lock();
            state.failure = Some(error.user_message());
            !state.text.is_empty()
        };
        if printed_any {
            self.write("\n");
        }
    }
}
