//! Test doubles shared by the engine tests.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::accumulator::{AnswerSink, StreamOutcome};
use crate::client::{ByteStream, ChatBackend, Endpoint};
use crate::config::SidekickConfig;
use crate::error::{Result, SidekickError};
use crate::host::{CONTAINER_ID, CONTENT_ID, HostDocument, MemoryDocument, NodeId};
use crate::reconciler::{Reconciler, SlotContext, SlotHandle, SlotState};
use crate::render::MarkdownRenderer;
use crate::settings::{MemorySettingsStore, Settings};
use crate::surface::BaiduSurface;
use sidekick_protocol::{AppInfo, ChatRequest};

/// One step of a scripted response body.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(String),
    Delay(Duration),
    /// Never finish.
    Hang,
}

/// `data: ` line for an answer fragment.
pub fn message(fragment: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"event": "message", "answer": fragment, "message_id": "m1"})
    )
}

/// `data: ` line ending the message.
pub fn message_end(id: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"event": "message_end", "message_id": id})
    )
}

pub fn stream_error(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"event": "error", "message": text, "status": 400})
    )
}

/// [`ChatBackend`] replaying scripted bodies.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Vec<Step>,
    head_delay: Duration,
    failure: Option<(u16, String)>,
    app_name: Option<String>,
    suggestions: Vec<String>,
    opens: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body answering `text` in one fragment.
    pub fn answering(text: &str) -> Self {
        Self::new().chunk(&message(text)).chunk(&message_end("m1"))
    }

    pub fn chunk(mut self, chunk: &str) -> Self {
        self.script.push(Step::Chunk(chunk.to_string()));
        self
    }

    pub fn delay(mut self, millis: u64) -> Self {
        self.script.push(Step::Delay(Duration::from_millis(millis)));
        self
    }

    pub fn hang(mut self) -> Self {
        self.script.push(Step::Hang);
        self
    }

    /// Time until the response head arrives.
    pub fn head_delay(mut self, millis: u64) -> Self {
        self.head_delay = Duration::from_millis(millis);
        self
    }

    pub fn failing(mut self, status: u16, message: &str) -> Self {
        self.failure = Some((status, message.to_string()));
        self
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = Some(name.to_string());
        self
    }

    pub fn suggestions(mut self, questions: &[&str]) -> Self {
        self.suggestions = questions.iter().map(|q| q.to_string()).collect();
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(&self, _endpoint: &Endpoint, request: &ChatRequest) -> Result<ByteStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.head_delay.is_zero() {
            tokio::time::sleep(self.head_delay).await;
        }
        if let Some((status, message)) = &self.failure {
            return Err(SidekickError::Network {
                status: *status,
                message: message.clone(),
            });
        }

        let steps = self.script.clone();
        let body = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(chunk) => yield Ok::<Bytes, SidekickError>(Bytes::from(chunk)),
                    Step::Delay(delay) => tokio::time::sleep(delay).await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        };
        Ok(body.boxed())
    }

    async fn app_info(&self, _endpoint: &Endpoint) -> Result<AppInfo> {
        Ok(AppInfo {
            name: self.app_name.clone(),
            ..Default::default()
        })
    }

    async fn suggested_questions(
        &self,
        _endpoint: &Endpoint,
        _message_id: &str,
    ) -> Result<Vec<String>> {
        Ok(self.suggestions.clone())
    }
}

/// What an [`AnswerSink`] was told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Progress(String),
    Done(StreamOutcome),
    Failed(String),
}

/// Sink recording every callback, optionally into a log shared with other
/// sinks.
#[derive(Clone)]
pub struct RecordingSink {
    tag: &'static str,
    log: Arc<Mutex<Vec<(&'static str, SinkEvent)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::shared("sink", Arc::default())
    }

    pub fn shared(tag: &'static str, log: Arc<Mutex<Vec<(&'static str, SinkEvent)>>>) -> Self {
        Self { tag, log }
    }

    /// Events recorded under this sink's tag.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.log
            .lock()
            .iter()
            .filter(|(tag, _)| *tag == self.tag)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn progress(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.log.lock().push((self.tag, event));
    }
}

impl AnswerSink for RecordingSink {
    fn progress(&self, answer: &str) {
        self.push(SinkEvent::Progress(answer.to_string()));
    }

    fn done(&self, outcome: &StreamOutcome) {
        self.push(SinkEvent::Done(outcome.clone()));
    }

    fn failed(&self, error: &SidekickError) {
        self.push(SinkEvent::Failed(error.user_message()));
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::new(
        "https://api.example.com/v1",
        secrecy::SecretString::new("app-1".into()),
        "tester",
    )
}

/// Configuration with a usable endpoint.
pub fn configured() -> SidekickConfig {
    SidekickConfig {
        api_url: Some("https://api.example.com/v1".to_string()),
        tokens: vec!["app-1".to_string()],
        selected_token: Some("app-1".to_string()),
        ..Default::default()
    }
}

pub fn results_url(query: &str) -> String {
    format!("https://www.baidu.com/s?wd={query}")
}

/// A result page with three results under `#content_left`.
pub struct Page {
    pub doc: Arc<MemoryDocument>,
    pub root: NodeId,
}

impl Page {
    pub fn new(url: &str) -> Self {
        let doc = Arc::new(MemoryDocument::new(url));
        let wrapper = doc.append(doc.body(), "div", Some("wrapper"));
        let root = doc.append(wrapper, "div", Some("content_left"));
        for i in 1..=3 {
            doc.append(root, "div", Some(&format!("result-{i}")));
        }
        Self { doc, root }
    }

    pub fn search(query: &str) -> Self {
        Self::new(&results_url(query))
    }

    /// Host-side re-render adding one result.
    pub fn add_result(&self) -> NodeId {
        self.doc.append(self.root, "div", None)
    }

    /// Navigate in place: new URL plus a fresh result.
    pub fn navigate(&self, query: &str) {
        self.doc.set_url(results_url(query));
        self.add_result();
    }

    pub fn containers(&self) -> usize {
        self.doc.count(&format!("#{CONTAINER_ID}"))
    }

    pub fn content(&self) -> String {
        self.doc
            .find_by_id(CONTENT_ID)
            .map(|c| self.doc.markup(c))
            .unwrap_or_default()
    }
}

/// Run a slot for the Baidu surface on `page`.
pub fn spawn_slot(
    page: &Page,
    backend: Arc<ScriptedBackend>,
    store: Arc<MemorySettingsStore>,
) -> SlotHandle {
    let settings = Settings::from(&store.config());
    Reconciler::spawn(
        SlotContext {
            doc: page.doc.clone(),
            backend,
            store,
            renderer: Arc::new(MarkdownRenderer),
            surface: Arc::new(BaiduSurface),
        },
        &settings,
    )
}

/// Let the page settle past the quiet period.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

pub async fn wait_for_state(handle: &SlotHandle, state: SlotState) {
    let mut rx = handle.subscribe();
    let reached = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .is_ok_and(|r| r.is_ok());
    assert!(
        reached,
        "slot never reached {state:?}, stuck in {:?}",
        handle.state()
    );
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition never held");
}

/// Wait until the current request of `handle` has finished.
pub async fn request_finished(handle: &SlotHandle) {
    let request = handle.requests().current().expect("request started");
    within(request.finished()).await;
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}
