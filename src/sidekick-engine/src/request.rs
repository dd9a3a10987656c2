//! Request session.
//!
//! A [`RequestSession`] owns one in-flight chat request: the HTTP call, the
//! decode loop and the cancellation token. Cancelling is a normal way to
//! finish; the sink then receives [`StreamOutcome::Stopped`] with whatever
//! had been accumulated.
//!
//! A [`RequestSlot`] holds at most one running session. Starting a new
//! session through the slot cancels the previous one first and waits until
//! it has finalized, so callbacks of an old request never interleave with
//! those of its replacement.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::accumulator::{AnswerAccumulator, AnswerSink, StreamOutcome, Update};
use crate::client::{ChatBackend, Endpoint};
use crate::decoder;
use crate::error::SidekickError;
use sidekick_protocol::ChatRequest;

/// Lifecycle of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Waiting for the response head.
    Connecting,
    /// Response accepted, body is being decoded.
    Streaming,
    Completed { message_id: Option<String> },
    Stopped,
    Failed,
}

impl RequestStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Stopped | Self::Failed
        )
    }
}

/// One chat request, not yet started.
pub struct RequestSession {
    backend: Arc<dyn ChatBackend>,
    endpoint: Endpoint,
    request: ChatRequest,
    sink: Arc<dyn AnswerSink>,
}

impl RequestSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        endpoint: Endpoint,
        request: ChatRequest,
        sink: Arc<dyn AnswerSink>,
    ) -> Self {
        Self {
            backend,
            endpoint,
            request,
            sink,
        }
    }

    /// Spawn the request. The returned handle can cancel it immediately,
    /// even before the response head arrived.
    pub fn start(self) -> RequestHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RequestStatus::Connecting);
        let handle = RequestHandle {
            cancel: cancel.clone(),
            status: status_rx,
        };
        tokio::spawn(self.drive(cancel, status_tx));
        handle
    }

    async fn drive(self, cancel: CancellationToken, status: watch::Sender<RequestStatus>) {
        let mut answer = AnswerAccumulator::new();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.backend.open_stream(&self.endpoint, &self.request) => Some(result),
        };
        let body = match opened {
            None => {
                tracing::debug!("Request cancelled before the response arrived");
                self.stop(&mut answer, &status);
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Chat request failed");
                self.fail(&mut answer, &e, &status);
                return;
            }
            Some(Ok(body)) => body,
        };

        status.send_replace(RequestStatus::Streaming);
        let mut events = decoder::decode(body);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => next,
            };
            // Cancellation wins over data that arrived in the same turn.
            if cancel.is_cancelled() {
                self.stop(&mut answer, &status);
                return;
            }

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Answer stream broke off");
                    self.fail(&mut answer, &e, &status);
                    return;
                }
                None => {
                    let e = SidekickError::internal("answer stream ended without end marker");
                    self.fail(&mut answer, &e, &status);
                    return;
                }
            };

            match answer.apply(event) {
                Ok(Update::Render(text)) => self.sink.progress(&text),
                Ok(Update::Unchanged) => {}
                Ok(Update::Finished(outcome)) => {
                    let message_id = match &outcome {
                        StreamOutcome::Completed { message_id, .. } => message_id.clone(),
                        StreamOutcome::Stopped { .. } => None,
                    };
                    tracing::debug!(chars = outcome.answer().len(), "Answer complete");
                    self.sink.done(&outcome);
                    status.send_replace(RequestStatus::Completed { message_id });
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Server reported a stream error");
                    self.fail(&mut answer, &e, &status);
                    return;
                }
            }
        }
    }

    fn stop(&self, answer: &mut AnswerAccumulator, status: &watch::Sender<RequestStatus>) {
        if let Some(outcome) = answer.abort() {
            self.sink.done(&outcome);
        }
        status.send_replace(RequestStatus::Stopped);
    }

    fn fail(
        &self,
        answer: &mut AnswerAccumulator,
        error: &SidekickError,
        status: &watch::Sender<RequestStatus>,
    ) {
        answer.close();
        self.sink.failed(error);
        status.send_replace(RequestStatus::Failed);
    }
}

/// Control over a started request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    cancel: CancellationToken,
    status: watch::Receiver<RequestStatus>,
}

impl RequestHandle {
    /// Ask the request to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> RequestStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().is_finished()
    }

    /// Wait until the response head arrived or the request ended.
    pub async fn opened(&self) -> RequestStatus {
        self.wait_for(|s| *s != RequestStatus::Connecting).await
    }

    /// Wait until the request ended.
    pub async fn finished(&self) -> RequestStatus {
        self.wait_for(RequestStatus::is_finished).await
    }

    /// Whether both handles control the same request.
    pub fn same_request(&self, other: &RequestHandle) -> bool {
        self.status.same_channel(&other.status)
    }

    async fn wait_for(&self, done: impl Fn(&RequestStatus) -> bool) -> RequestStatus {
        let mut status = self.status.clone();
        let reached = match status.wait_for(|s| done(s)).await {
            Ok(s) => s.clone(),
            // The decode task went away without reporting; treat as failed.
            Err(_) => RequestStatus::Failed,
        };
        reached
    }
}

/// At most one running request, last writer wins.
#[derive(Debug, Default)]
pub struct RequestSlot {
    current: Mutex<Option<RequestHandle>>,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever runs in the slot, wait for it to finalize, then start
    /// `session` in its place.
    pub async fn start(&self, session: RequestSession) -> RequestHandle {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.cancel();
            previous.finished().await;
        }
        let handle = session.start();
        // A concurrent start may have won the race while we waited.
        if let Some(other) = self.current.lock().replace(handle.clone()) {
            other.cancel();
        }
        handle
    }

    /// Cancel the running request, if any. The handle stays in the slot so
    /// the next [`RequestSlot::start`] still waits for it to finalize.
    pub fn cancel(&self) -> Option<RequestHandle> {
        let handle = self.current.lock().clone();
        if let Some(handle) = &handle {
            handle.cancel();
        }
        handle
    }

    pub fn current(&self) -> Option<RequestHandle> {
        self.current.lock().clone()
    }

    /// Whether a request is running.
    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
