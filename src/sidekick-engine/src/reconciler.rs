//! Reconciler.
//!
//! One task per logical slot keeps the injected UI mounted exactly once while
//! the host page rewrites itself. Mutation batches re-arm a trailing
//! debounce; once the page has been quiet for the configured period the
//! reconciler compares what is mounted against what should be and picks one
//! of: nothing, rebuild the container, or a full reinitialize.
//!
//! An initialize runs as a future polled by the same loop, so mutations and
//! commands keep flowing while it waits on the network. The `is_initializing`
//! lock drops overlapping triggers, and the initialize re-validates the page
//! after every await instead of trusting what it read before.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::accumulator::{AnswerSink, StreamOutcome};
use crate::anchor::{AnchorRegistry, MountState};
use crate::client::{ChatBackend, Endpoint};
use crate::config::{ContainerLossPolicy, TimingConfig};
use crate::debounce::DebounceWindow;
use crate::error::{Result, SidekickError};
use crate::host::{ContainerBuilder, HostDocument, MutationReceiver, MutationRecord, NodeId};
use crate::render::{Renderer, error_markup, loading_markup, stopped_markup, suggestions_markup};
use crate::request::{RequestHandle, RequestSession, RequestSlot, RequestStatus};
use crate::session::Session;
use crate::settings::{DEFAULT_APP_TITLE, Settings, SettingsStore, resolve_app_title};
use crate::surface::{SearchSurface, parse_url};
use sidekick_protocol::ChatRequest;

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing mounted.
    Idle,
    /// Anchor and container mounted; a stream may be running.
    Active,
    /// Dismissed by the user less than the suppression window ago.
    Suppressed,
    /// A full initialize replacing the previous UI is in flight.
    Reinitializing,
}

/// Input from the host integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCommand {
    /// Initialize now, without waiting for the page to settle.
    Initialize,
    /// The user clicked the dismiss control.
    Dismiss,
    /// The page URL changed without a reload.
    Navigated,
    SettingsChanged,
    Shutdown,
}

/// Counters, mostly for tests and diagnostics.
#[derive(Debug, Default)]
pub struct SlotStats {
    stability_checks: AtomicUsize,
    initializations: AtomicUsize,
    dropped_triggers: AtomicUsize,
    containers_rebuilt: AtomicUsize,
}

impl SlotStats {
    pub fn stability_checks(&self) -> usize {
        self.stability_checks.load(Ordering::Acquire)
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::Acquire)
    }

    /// Initialize triggers dropped because one was already running.
    pub fn dropped_triggers(&self) -> usize {
        self.dropped_triggers.load(Ordering::Acquire)
    }

    /// Containers rebuilt in place after the host page removed them.
    pub fn containers_rebuilt(&self) -> usize {
        self.containers_rebuilt.load(Ordering::Acquire)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::AcqRel);
    }
}

/// Collaborators of one slot.
pub struct SlotContext {
    pub doc: Arc<dyn HostDocument>,
    pub backend: Arc<dyn ChatBackend>,
    pub store: Arc<dyn SettingsStore>,
    pub renderer: Arc<dyn Renderer>,
    pub surface: Arc<dyn SearchSurface>,
}

impl SlotContext {
    /// Search terms of the page as it is now.
    pub fn current_query(&self) -> Option<String> {
        let url = parse_url(&self.doc.url()).ok()?;
        self.surface.extract_query(&url)
    }

    /// Results root as it is now.
    pub fn root(&self) -> Option<NodeId> {
        self.doc.query(self.surface.host_root_selector())
    }
}

/// Writes answer updates into the registry's content element.
struct ContainerSink {
    registry: Arc<AnchorRegistry>,
    renderer: Arc<dyn Renderer>,
}

impl AnswerSink for ContainerSink {
    fn progress(&self, answer: &str) {
        self.registry.render(&self.renderer.render(answer));
    }

    fn done(&self, outcome: &StreamOutcome) {
        let markup = self.renderer.render(outcome.answer());
        match outcome {
            StreamOutcome::Completed { .. } => self.registry.render(&markup),
            StreamOutcome::Stopped { .. } => self.registry.render(&stopped_markup(&markup)),
        };
    }

    fn failed(&self, error: &SidekickError) {
        self.registry.render(&error_markup(&error.user_message()));
    }
}

/// Why an initialize was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitKind {
    Initial,
    QueryChanged,
    AnchorLost,
    ContainerLost,
    SettingsChanged,
}

impl InitKind {
    /// Whether the current UI is torn down before mounting again.
    fn replaces_ui(self) -> bool {
        matches!(
            self,
            Self::QueryChanged | Self::AnchorLost | Self::SettingsChanged
        )
    }
}

enum InitOutcome {
    Mounted {
        query: String,
        container: NodeId,
        title: String,
        settings: Option<Settings>,
    },
    Abandoned(&'static str),
}

/// One initialize: mount anchor and container, start the request, wait for
/// the response head.
struct InitJob {
    ctx: Arc<SlotContext>,
    registry: Arc<AnchorRegistry>,
    requests: Arc<RequestSlot>,
    query: String,
}

impl InitJob {
    async fn run(self) -> InitOutcome {
        match self.mount_and_start().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Initialize failed");
                InitOutcome::Abandoned("host document rejected a write")
            }
        }
    }

    /// Results root, provided the page still shows the query being
    /// initialized.
    fn revalidate(&self) -> Option<NodeId> {
        if self.ctx.current_query().as_deref() != Some(self.query.as_str()) {
            return None;
        }
        self.ctx.root()
    }

    fn mount(&self, root: NodeId, title: &str) -> Result<NodeId> {
        let anchor = self.registry.ensure_anchor(root)?;
        self.registry
            .ensure_container(anchor, &ContainerBuilder::new(title))
    }

    async fn mount_and_start(&self) -> Result<InitOutcome> {
        let settings = match self.ctx.store.load().await {
            Ok(settings) => settings,
            Err(e) => {
                let err = SidekickError::from(e);
                tracing::warn!(error = %err, "Settings unavailable");
                return self.mount_notice(DEFAULT_APP_TITLE, &err, None);
            }
        };
        if self.revalidate().is_none() {
            return Ok(InitOutcome::Abandoned("page changed while loading settings"));
        }

        let endpoint = match settings.endpoint() {
            Ok(endpoint) => endpoint,
            Err(err) => {
                let title = settings.app_name().unwrap_or(DEFAULT_APP_TITLE).to_string();
                return self.mount_notice(&title, &err, Some(settings));
            }
        };

        // The old request must not render over the new container.
        if let Some(previous) = self.requests.cancel() {
            previous.finished().await;
        }

        let title = resolve_app_title(
            &settings,
            self.ctx.backend.as_ref(),
            self.ctx.store.as_ref(),
            &endpoint,
        )
        .await;
        let Some(root) = self.revalidate() else {
            return Ok(InitOutcome::Abandoned("page changed while resolving the title"));
        };

        self.registry.clear_markup();
        let container = self.mount(root, &title)?;
        self.registry.render(&loading_markup());

        let request = ChatRequest::streaming(settings.render_prompt(&self.query), self.query.clone())
            .with_user(settings.user.clone());
        let sink = Arc::new(ContainerSink {
            registry: self.registry.clone(),
            renderer: self.ctx.renderer.clone(),
        });
        let session = RequestSession::new(self.ctx.backend.clone(), endpoint.clone(), request, sink);
        let handle = self.requests.start(session).await;
        let status = handle.opened().await;
        tracing::info!(query = %self.query, status = ?status, "Answer request opened");

        if settings.enable_suggestions {
            spawn_follow_ups(
                self.ctx.backend.clone(),
                endpoint,
                self.registry.clone(),
                self.requests.clone(),
                handle.clone(),
            );
        }

        if self.revalidate().is_none() {
            handle.cancel();
            return Ok(InitOutcome::Abandoned("page changed while the request was opening"));
        }

        Ok(InitOutcome::Mounted {
            query: self.query.clone(),
            container,
            title,
            settings: Some(settings),
        })
    }

    /// Mount the container showing `err` instead of an answer.
    fn mount_notice(
        &self,
        title: &str,
        err: &SidekickError,
        settings: Option<Settings>,
    ) -> Result<InitOutcome> {
        let Some(root) = self.revalidate() else {
            return Ok(InitOutcome::Abandoned("results root missing"));
        };
        self.registry.clear_markup();
        let container = self.mount(root, title)?;
        self.registry.render(&error_markup(&err.user_message()));
        Ok(InitOutcome::Mounted {
            query: self.query.clone(),
            container,
            title: title.to_string(),
            settings,
        })
    }
}

/// Append follow-up questions once the answer completed, unless the request
/// has been replaced in the meantime.
fn spawn_follow_ups(
    backend: Arc<dyn ChatBackend>,
    endpoint: Endpoint,
    registry: Arc<AnchorRegistry>,
    requests: Arc<RequestSlot>,
    handle: RequestHandle,
) {
    tokio::spawn(async move {
        let RequestStatus::Completed {
            message_id: Some(message_id),
        } = handle.finished().await
        else {
            return;
        };
        let questions = match backend.suggested_questions(&endpoint, &message_id).await {
            Ok(questions) => questions,
            Err(e) => {
                tracing::debug!(error = %e, "No follow-up questions");
                return;
            }
        };
        let current = requests
            .current()
            .is_some_and(|h| h.same_request(&handle));
        if current
            && !questions.is_empty()
            && let Some(markup) = registry.last_markup()
        {
            registry.render(&format!("{markup}{}", suggestions_markup(&questions)));
        }
    });
}

async fn poll_init(init: &mut Option<BoxFuture<'static, InitOutcome>>) -> InitOutcome {
    match init {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Command(Option<SlotCommand>),
    InitFinished(InitOutcome),
    Mutations(Vec<MutationRecord>),
    Stable,
}

/// Handle to a running slot.
pub struct SlotHandle {
    commands: mpsc::UnboundedSender<SlotCommand>,
    state: watch::Receiver<SlotState>,
    registry: Arc<AnchorRegistry>,
    requests: Arc<RequestSlot>,
    stats: Arc<SlotStats>,
    task: JoinHandle<()>,
}

impl SlotHandle {
    pub fn state(&self) -> SlotState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotState> {
        self.state.clone()
    }

    pub fn send(&self, command: SlotCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "Slot already stopped");
        }
    }

    pub fn initialize(&self) {
        self.send(SlotCommand::Initialize);
    }

    pub fn dismiss(&self) {
        self.send(SlotCommand::Dismiss);
    }

    pub fn navigated(&self) {
        self.send(SlotCommand::Navigated);
    }

    pub fn settings_changed(&self) {
        self.send(SlotCommand::SettingsChanged);
    }

    pub fn registry(&self) -> &Arc<AnchorRegistry> {
        &self.registry
    }

    pub fn requests(&self) -> &Arc<RequestSlot> {
        &self.requests
    }

    pub fn stats(&self) -> &Arc<SlotStats> {
        &self.stats
    }

    /// Stop the slot, tear its UI down and wait for the task to exit.
    pub async fn shutdown(self) {
        self.send(SlotCommand::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Slot task ended abnormally");
        }
    }
}

/// State machine of one slot.
pub struct Reconciler {
    ctx: Arc<SlotContext>,
    registry: Arc<AnchorRegistry>,
    requests: Arc<RequestSlot>,
    stats: Arc<SlotStats>,
    session: Session,
    debounce: DebounceWindow,
    timing: TimingConfig,
    container_loss: ContainerLossPolicy,
    title: String,
    commands: mpsc::UnboundedReceiver<SlotCommand>,
    mutations: MutationReceiver,
    state: watch::Sender<SlotState>,
    init: Option<BoxFuture<'static, InitOutcome>>,
}

impl Reconciler {
    /// Start a slot. Its first stability check runs one quiet period after
    /// start, or earlier via [`SlotHandle::initialize`].
    pub fn spawn(ctx: SlotContext, settings: &Settings) -> SlotHandle {
        let ctx = Arc::new(ctx);
        let registry = Arc::new(AnchorRegistry::new(ctx.doc.clone()));
        let requests = Arc::new(RequestSlot::new());
        let stats = Arc::new(SlotStats::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SlotState::Idle);
        let mutations = ctx.doc.observe();

        let reconciler = Self {
            ctx,
            registry: registry.clone(),
            requests: requests.clone(),
            stats: stats.clone(),
            session: Session::new(),
            debounce: DebounceWindow::new(settings.timing.quiet_period()),
            timing: settings.timing,
            container_loss: settings.container_loss,
            title: settings.app_name().unwrap_or(DEFAULT_APP_TITLE).to_string(),
            commands: commands_rx,
            mutations,
            state: state_tx,
            init: None,
        };
        let task = tokio::spawn(reconciler.run());

        SlotHandle {
            commands: commands_tx,
            state: state_rx,
            registry,
            requests,
            stats,
            task,
        }
    }

    async fn run(mut self) {
        tracing::debug!(surface = self.ctx.surface.name(), "Slot started");
        self.debounce.arm(Instant::now());

        loop {
            let deadline = self.debounce.deadline();
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                outcome = poll_init(&mut self.init) => Wake::InitFinished(outcome),
                Some(batch) = self.mutations.recv() => Wake::Mutations(batch),
                () = sleep_until(deadline) => Wake::Stable,
            };

            match wake {
                Wake::Command(None | Some(SlotCommand::Shutdown)) => break,
                Wake::Command(Some(command)) => self.on_command(command),
                Wake::InitFinished(outcome) => self.on_init_finished(outcome),
                Wake::Mutations(batch) => self.on_mutations(&batch),
                Wake::Stable => self.on_stable(),
            }
        }

        self.teardown();
        self.publish(SlotState::Idle);
        tracing::debug!(surface = self.ctx.surface.name(), "Slot stopped");
    }

    fn publish(&self, state: SlotState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = ?current, to = ?state, "Slot state");
            *current = state;
            true
        });
    }

    fn on_command(&mut self, command: SlotCommand) {
        tracing::debug!(?command, "Slot command");
        match command {
            SlotCommand::Initialize => self.trigger_initialize(),
            SlotCommand::Dismiss => self.dismiss(),
            SlotCommand::Navigated => self.debounce.arm(Instant::now()),
            SlotCommand::SettingsChanged => {
                // Explicit user action: forget the dismissal.
                self.abandon_init();
                self.session.dismissed_query = None;
                self.session.manually_closed_at = None;
                match self.ctx.current_query() {
                    Some(query) => self.start_init(InitKind::SettingsChanged, query),
                    None => {
                        self.teardown();
                        self.publish(SlotState::Idle);
                    }
                }
            }
            SlotCommand::Shutdown => {}
        }
    }

    /// Explicit initialize request. A no-op when the page is already
    /// enhanced for its current query.
    fn trigger_initialize(&mut self) {
        if self
            .session
            .is_suppressed(Instant::now(), self.timing.suppression())
        {
            tracing::debug!("Recently dismissed, initialize skipped");
            return;
        }
        let Some(query) = self.ctx.current_query() else {
            tracing::debug!("No query on this page");
            return;
        };
        if !self.session.is_initializing
            && self.session.initialized
            && query == self.session.query
            && self.registry.mount_state(self.ctx.root()) == MountState::Mounted
        {
            return;
        }
        self.start_init(InitKind::Initial, query);
    }

    /// Mutation batch from the host document. Dropped while an initialize
    /// holds the lock; a re-check is armed when it finishes.
    fn on_mutations(&mut self, batch: &[MutationRecord]) {
        if self.session.is_initializing {
            return;
        }
        let root = self.ctx.root();
        if batch.iter().any(|m| self.is_relevant(m, root)) {
            self.debounce.observe(Instant::now());
        }
    }

    /// Only changes inside the results root count, minus our own container.
    /// Losing the anchor always counts.
    fn is_relevant(&self, mutation: &MutationRecord, root: Option<NodeId>) -> bool {
        if let Some(record) = self.registry.record()
            && !self.ctx.doc.is_attached(record.anchor)
        {
            return true;
        }
        let Some(root) = root else {
            return false;
        };
        let inside = |node: NodeId| self.ctx.doc.contains(root, node) && !self.registry.owns(node);
        inside(mutation.target) || mutation.added.iter().any(|n| inside(*n))
    }

    fn on_stable(&mut self) {
        let now = Instant::now();
        if !self.debounce.fire(now) {
            return;
        }
        SlotStats::bump(&self.stats.stability_checks);
        if self.session.is_initializing {
            return;
        }

        let Some(root) = self.ctx.root() else {
            tracing::debug!("Results root not found");
            return;
        };
        let suppression = self.timing.suppression();
        if self.session.is_suppressed(now, suppression) {
            tracing::debug!("Recently dismissed, not recreating");
            if let Some(at) = self.session.manually_closed_at {
                self.debounce
                    .arm_after(now, suppression.saturating_sub(now.saturating_duration_since(at)));
            }
            return;
        }
        let mount_state = self.registry.mount_state(Some(root));
        if self.session.manually_closed_at.take().is_some() && mount_state == MountState::Unmounted
        {
            self.publish(SlotState::Idle);
        }

        let query = self.ctx.current_query();
        match mount_state {
            MountState::Unmounted => match query {
                Some(query) if !self.session.was_dismissed(&query) => {
                    self.start_init(InitKind::Initial, query);
                }
                _ => self.publish(SlotState::Idle),
            },
            MountState::Mounted => match query {
                Some(query) if query != self.session.query => {
                    tracing::info!(from = %self.session.query, to = %query, "Query changed");
                    self.start_init(InitKind::QueryChanged, query);
                }
                Some(_) => {}
                None => {
                    self.teardown();
                    self.publish(SlotState::Idle);
                }
            },
            MountState::ContainerMissing => self.on_container_lost(query),
            MountState::AnchorMissing => {
                let Some(query) = query else {
                    self.teardown();
                    self.publish(SlotState::Idle);
                    return;
                };
                if self.session.reinit_allowed(now, self.timing.reinit_cooldown()) {
                    tracing::info!("Anchor lost, reinitializing");
                    self.session.last_reinit_at = Some(now);
                    self.start_init(InitKind::AnchorLost, query);
                } else {
                    self.debounce.arm(now);
                }
            }
        }
    }

    fn on_container_lost(&mut self, query: Option<String>) {
        let Some(query) = query else {
            self.teardown();
            self.publish(SlotState::Idle);
            return;
        };
        if query != self.session.query {
            self.start_init(InitKind::QueryChanged, query);
            return;
        }

        match self.container_loss {
            ContainerLossPolicy::Replay => {
                let Some(record) = self.registry.record() else {
                    return;
                };
                match self
                    .registry
                    .ensure_container(record.anchor, &ContainerBuilder::new(&self.title))
                {
                    Ok(container) => {
                        tracing::info!("Container lost, rebuilt in place");
                        SlotStats::bump(&self.stats.containers_rebuilt);
                        self.session.container = Some(container);
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to rebuild container"),
                }
            }
            ContainerLossPolicy::Restart => {
                tracing::info!("Container lost, restarting request");
                self.start_init(InitKind::ContainerLost, query);
            }
        }
    }

    fn start_init(&mut self, kind: InitKind, query: String) {
        if !self.session.try_begin_init() {
            tracing::debug!(?kind, "Initialize already in progress, trigger dropped");
            SlotStats::bump(&self.stats.dropped_triggers);
            return;
        }
        SlotStats::bump(&self.stats.initializations);
        tracing::debug!(?kind, query = %query, "Initializing");

        if kind.replaces_ui() {
            self.requests.cancel();
            self.registry.teardown();
            self.session.container = None;
            self.session.initialized = false;
            self.publish(SlotState::Reinitializing);
        }

        let job = InitJob {
            ctx: self.ctx.clone(),
            registry: self.registry.clone(),
            requests: self.requests.clone(),
            query,
        };
        self.init = Some(Box::pin(job.run()));
    }

    fn on_init_finished(&mut self, outcome: InitOutcome) {
        self.init = None;
        self.session.end_init();

        match outcome {
            InitOutcome::Mounted {
                query,
                container,
                title,
                settings,
            } => {
                self.session.query = query;
                self.session.container = Some(container);
                self.session.initialized = true;
                self.session.dismissed_query = None;
                self.session.manually_closed_at = None;
                self.title = title;
                if let Some(settings) = settings {
                    self.timing = settings.timing;
                    self.container_loss = settings.container_loss;
                }
                self.publish(SlotState::Active);
            }
            InitOutcome::Abandoned(reason) => {
                tracing::debug!(reason, "Initialize abandoned");
                if self.registry.mount_state(self.ctx.root()) == MountState::Unmounted {
                    self.publish(SlotState::Idle);
                }
            }
        }
        // Mutations were dropped while initializing.
        self.debounce.arm(Instant::now());
    }

    /// Drop an in-flight initialize. Its request, if already started, is
    /// cancelled through the request slot.
    fn abandon_init(&mut self) {
        if self.init.take().is_some() {
            tracing::debug!("In-flight initialize abandoned");
        }
        self.session.end_init();
    }

    fn dismiss(&mut self) {
        tracing::info!(query = %self.session.query, "Dismissed by user");
        self.abandon_init();
        self.teardown();
        let now = Instant::now();
        self.session.dismiss(now);
        // Re-check once the suppression window is over.
        self.debounce.arm_after(now, self.timing.suppression());
        self.publish(SlotState::Suppressed);
    }

    fn teardown(&mut self) {
        self.requests.cancel();
        self.registry.teardown();
        self.session.container = None;
        self.session.initialized = false;
    }
}
