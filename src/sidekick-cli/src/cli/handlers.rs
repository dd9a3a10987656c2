//! Command handlers.

use std::future::Future;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use sidekick_engine::accumulator::{AnswerSink, StreamOutcome};
use sidekick_engine::client::{ChatBackend, ChatClient, Endpoint};
use sidekick_engine::error::SidekickError;
use sidekick_engine::request::{RequestSession, RequestSlot, RequestStatus};
use sidekick_engine::settings::{
    FileSettingsStore, Settings, SettingsStore, resolve_app_title, selection_prompt,
};
use sidekick_engine::surface;
use sidekick_protocol::ChatRequest;

use super::args::{AskArgs, Cli, Commands, SearchArgs, SuggestArgs};
use crate::output::TerminalSink;

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Done,
    /// The answer was interrupted.
    Stopped,
    /// The request failed; the reason was already printed.
    Failed,
}

impl RunStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunStatus::Done => ExitCode::SUCCESS,
            RunStatus::Stopped => ExitCode::from(130),
            RunStatus::Failed => ExitCode::FAILURE,
        }
    }
}

/// Loaded settings plus what every command talks to.
struct CommandContext {
    store: FileSettingsStore,
    settings: Settings,
    backend: Arc<dyn ChatBackend>,
}

impl CommandContext {
    async fn load(config: Option<&Path>) -> Result<Self> {
        let store = match config {
            Some(path) => FileSettingsStore::new(path),
            None => FileSettingsStore::from_default_path()?,
        };
        tracing::debug!(path = %store.path().display(), "Loading settings");
        let settings = store.load().await.map_err(SidekickError::from)?;
        let backend: Arc<dyn ChatBackend> = Arc::new(ChatClient::new()?);
        Ok(Self {
            store,
            settings,
            backend,
        })
    }

    fn endpoint(&self) -> Result<Endpoint> {
        self.settings
            .endpoint()
            .map_err(|e| anyhow::anyhow!(e.user_message()))
    }

    async fn title(&self, endpoint: &Endpoint) -> String {
        resolve_app_title(&self.settings, self.backend.as_ref(), &self.store, endpoint).await
    }
}

/// Dispatch the parsed command.
pub async fn dispatch_command(cli: Cli) -> Result<RunStatus> {
    let ctx = CommandContext::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Ask(args) => run_ask(&ctx, args).await,
        Commands::Search(args) => run_search(&ctx, args).await,
        Commands::Info => run_info(&ctx).await,
        Commands::Suggest(args) => run_suggest(&ctx, args).await,
    }
}

async fn run_ask(ctx: &CommandContext, args: AskArgs) -> Result<RunStatus> {
    let endpoint = ctx.endpoint()?;
    let prompt = match &args.question {
        Some(question) => selection_prompt(&args.text, question),
        None => args.text.clone(),
    };
    let mut request =
        ChatRequest::streaming(prompt, args.text).with_user(ctx.settings.user.clone());
    if let Some(conversation) = args.conversation {
        request = request.with_conversation(conversation);
    }

    let (status, outcome) = answer(ctx, &endpoint, request).await;
    if args.suggest {
        print_follow_ups(ctx, &endpoint, outcome.as_ref()).await;
    }
    Ok(status)
}

async fn run_search(ctx: &CommandContext, args: SearchArgs) -> Result<RunStatus> {
    let url = surface::parse_url(&args.url)?;
    let candidates = surface::surfaces(&ctx.settings);
    let Some(selected) = surface::select(&candidates, &url, &ctx.settings) else {
        bail!("No enabled search surface matches {url}");
    };
    let Some(query) = selected.extract_query(&url) else {
        bail!("No search query in {url}");
    };
    tracing::info!(surface = selected.name(), query = %query, "Answering search query");

    let endpoint = ctx.endpoint()?;
    println!("{}\n", ctx.title(&endpoint).await);

    let request = ChatRequest::streaming(ctx.settings.render_prompt(&query), query)
        .with_user(ctx.settings.user.clone());
    let (status, outcome) = answer(ctx, &endpoint, request).await;
    if ctx.settings.enable_suggestions {
        print_follow_ups(ctx, &endpoint, outcome.as_ref()).await;
    }
    Ok(status)
}

async fn run_info(ctx: &CommandContext) -> Result<RunStatus> {
    let endpoint = ctx.endpoint()?;
    println!("{}", ctx.title(&endpoint).await);

    match ctx.backend.parameters(&endpoint).await {
        Ok(parameters) => {
            if let Some(opening) = parameters.opening_statement.filter(|s| !s.trim().is_empty()) {
                println!("\n{opening}");
            }
        }
        Err(e) => tracing::debug!(error = %e, "Application parameters unavailable"),
    }
    Ok(RunStatus::Done)
}

async fn run_suggest(ctx: &CommandContext, args: SuggestArgs) -> Result<RunStatus> {
    let endpoint = ctx.endpoint()?;
    let questions = match &args.message_id {
        Some(id) => ctx
            .backend
            .suggested_questions(&endpoint, id)
            .await
            .with_context(|| format!("Failed to fetch suggestions for message {id}"))?,
        None => {
            ctx.backend
                .parameters(&endpoint)
                .await
                .context("Failed to fetch application parameters")?
                .suggested_questions
        }
    };

    if questions.is_empty() {
        println!("No suggested questions.");
    }
    for question in questions {
        println!("- {question}");
    }
    Ok(RunStatus::Done)
}

/// Stream an answer to stdout until it ends or Ctrl+C stops it.
async fn answer(
    ctx: &CommandContext,
    endpoint: &Endpoint,
    request: ChatRequest,
) -> (RunStatus, Option<StreamOutcome>) {
    let sink = Arc::new(TerminalSink::stdout());
    let status = stream_answer(
        Arc::clone(&ctx.backend),
        endpoint.clone(),
        request,
        Arc::clone(&sink) as Arc<dyn AnswerSink>,
        interrupted(),
    )
    .await;

    if let Some(failure) = sink.failure() {
        eprintln!("{failure}");
    }
    (run_status(&status), sink.outcome())
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Run one request, cancelling it when `interrupt` resolves first.
pub async fn stream_answer(
    backend: Arc<dyn ChatBackend>,
    endpoint: Endpoint,
    request: ChatRequest,
    sink: Arc<dyn AnswerSink>,
    interrupt: impl Future<Output = ()>,
) -> RequestStatus {
    let slot = RequestSlot::new();
    let handle = slot
        .start(RequestSession::new(backend, endpoint, request, sink))
        .await;

    tokio::select! {
        status = handle.finished() => status,
        () = interrupt => {
            tracing::debug!("Interrupted, stopping the answer");
            handle.cancel();
            handle.finished().await
        }
    }
}

fn run_status(status: &RequestStatus) -> RunStatus {
    match status {
        RequestStatus::Stopped => RunStatus::Stopped,
        RequestStatus::Failed => RunStatus::Failed,
        _ => RunStatus::Done,
    }
}

async fn print_follow_ups(
    ctx: &CommandContext,
    endpoint: &Endpoint,
    outcome: Option<&StreamOutcome>,
) {
    let Some(StreamOutcome::Completed {
        message_id: Some(id),
        ..
    }) = outcome
    else {
        return;
    };
    match ctx.backend.suggested_questions(endpoint, id).await {
        Ok(questions) if !questions.is_empty() => {
            println!();
            for question in questions {
                println!("- {question}");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to fetch follow-up questions"),
    }
}
