//! Settings store.
//!
//! The engine reads its settings through [`SettingsStore`], an async and
//! possibly failing key/value lookup. A store that has become unusable for
//! the rest of the session reports [`StorageError::Invalidated`], which the
//! engine surfaces as a "please reload" notice instead of a generic error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::client::{ChatBackend, Endpoint};
use crate::config::{ContainerLossPolicy, SidekickConfig, SurfaceConfig, TimingConfig};
use crate::error::{Result, SidekickError};

/// Title used when the application name is unknown.
pub const DEFAULT_APP_TITLE: &str = "Smart Assistant";

/// Failure of the settings store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The store can no longer be used in this session.
    #[error("Extension context invalidated")]
    Invalidated,

    #[error("{0}")]
    Unavailable(String),
}

impl StorageError {
    /// Classify a failure message reported by a host runtime.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains("context invalidated") {
            Self::Invalidated
        } else {
            Self::Unavailable(message)
        }
    }
}

impl From<StorageError> for SidekickError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Invalidated => SidekickError::HostInvalidated,
            StorageError::Unavailable(message) => SidekickError::Storage(message),
        }
    }
}

/// Snapshot of the values the engine reads.
#[derive(Clone)]
pub struct Settings {
    pub api_url: Option<String>,
    pub selected_token: Option<SecretString>,
    pub app_names: BTreeMap<String, String>,
    pub enable_baidu_search: bool,
    pub enable_suggestions: bool,
    pub user: String,
    pub prompt_template: String,
    pub timing: TimingConfig,
    pub container_loss: ContainerLossPolicy,
    pub surfaces: Vec<SurfaceConfig>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field(
                "selected_token",
                &self.selected_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("enable_baidu_search", &self.enable_baidu_search)
            .field("enable_suggestions", &self.enable_suggestions)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl From<&SidekickConfig> for Settings {
    fn from(config: &SidekickConfig) -> Self {
        Self {
            api_url: config.api_url.clone().filter(|u| !u.trim().is_empty()),
            selected_token: config
                .selected_token
                .clone()
                .filter(|t| !t.trim().is_empty())
                .map(|t| SecretString::new(t.into())),
            app_names: config.app_names.clone(),
            enable_baidu_search: config.enable_baidu_search,
            enable_suggestions: config.enable_suggestions,
            user: config.user.clone(),
            prompt_template: config.prompt_template.clone(),
            timing: config.timing,
            container_loss: config.container_loss,
            surfaces: config.surfaces.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&SidekickConfig::default())
    }
}

impl Settings {
    /// Endpoint for requests, or a configuration error telling the user what
    /// is missing.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let api_url = self
            .api_url
            .as_ref()
            .ok_or_else(|| SidekickError::configuration("API URL is not set"))?;
        let token = self
            .selected_token
            .as_ref()
            .ok_or_else(|| SidekickError::configuration("No token selected"))?;
        Ok(Endpoint::new(api_url.clone(), token.clone(), self.user.clone()))
    }

    /// Cached display name of the selected application.
    pub fn app_name(&self) -> Option<&str> {
        let token = self.selected_token.as_ref()?;
        self.app_names
            .get(token.expose_secret())
            .map(String::as_str)
    }

    /// Prompt for a search query.
    pub fn render_prompt(&self, query: &str) -> String {
        self.prompt_template
            .replace(crate::config::QUERY_PLACEHOLDER, query)
    }
}

/// Prompt asking `question` about a piece of selected text.
pub fn selection_prompt(text: &str, question: &str) -> String {
    format!("About the following content:\n{text}\n\n{question}")
}

/// Async key/value store holding the settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the current settings.
    async fn load(&self) -> std::result::Result<Settings, StorageError>;

    /// Cache the display name of the application behind `token`.
    async fn remember_app_name(
        &self,
        token: &str,
        name: &str,
    ) -> std::result::Result<(), StorageError>;
}

/// Display name of the selected application: the cached name, else the
/// name reported by `GET /info` (written back to the cache), else
/// [`DEFAULT_APP_TITLE`].
pub async fn resolve_app_title(
    settings: &Settings,
    backend: &dyn ChatBackend,
    store: &dyn SettingsStore,
    endpoint: &Endpoint,
) -> String {
    if let Some(name) = settings.app_name() {
        return name.to_string();
    }

    match backend.app_info(endpoint).await {
        Ok(info) => match info.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => {
                if let Err(e) = store
                    .remember_app_name(endpoint.token().expose_secret(), &name)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to cache application name");
                }
                tracing::debug!(name = %name, "Resolved application name");
                name
            }
            None => DEFAULT_APP_TITLE.to_string(),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Application info unavailable");
            DEFAULT_APP_TITLE.to_string()
        }
    }
}

/// Settings backed by the TOML config file.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`SidekickConfig::default_path`].
    pub fn from_default_path() -> Result<Self> {
        SidekickConfig::default_path()
            .map(Self::new)
            .ok_or_else(|| SidekickError::config("Could not determine the config directory"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_config(&self) -> std::result::Result<SidekickConfig, StorageError> {
        SidekickConfig::load_or_default(&self.path)
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> std::result::Result<Settings, StorageError> {
        let store = self.clone();
        let mut config = tokio::task::spawn_blocking(move || store.read_config())
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))??;
        config.apply_env();
        Ok(Settings::from(&config))
    }

    async fn remember_app_name(
        &self,
        token: &str,
        name: &str,
    ) -> std::result::Result<(), StorageError> {
        let store = self.clone();
        let (token, name) = (token.to_string(), name.to_string());
        tokio::task::spawn_blocking(move || {
            let mut config = store.read_config()?;
            config.app_names.insert(token, name);
            config
                .save(&store.path)
                .map_err(|e| StorageError::Unavailable(e.to_string()))
        })
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?
    }
}

/// In-memory settings, for embedding and tests.
pub struct MemorySettingsStore {
    config: Mutex<SidekickConfig>,
    failure: Mutex<Option<StorageError>>,
    loads: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new(config: SidekickConfig) -> Self {
        Self {
            config: Mutex::new(config),
            failure: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Make every further access fail with [`StorageError::Invalidated`].
    pub fn invalidate(&self) {
        self.fail(StorageError::Invalidated);
    }

    /// Make every further access fail with `error`.
    pub fn fail(&self, error: StorageError) {
        *self.failure.lock() = Some(error);
    }

    fn check(&self) -> std::result::Result<(), StorageError> {
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Replace the stored configuration.
    pub fn update(&self, f: impl FnOnce(&mut SidekickConfig)) {
        f(&mut self.config.lock());
    }

    /// Copy of the stored configuration.
    pub fn config(&self) -> SidekickConfig {
        self.config.lock().clone()
    }

    /// Number of successful loads so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> std::result::Result<Settings, StorageError> {
        self.check()?;
        self.loads.fetch_add(1, Ordering::AcqRel);
        Ok(Settings::from(&*self.config.lock()))
    }

    async fn remember_app_name(
        &self,
        token: &str,
        name: &str,
    ) -> std::result::Result<(), StorageError> {
        self.check()?;
        self.config
            .lock()
            .app_names
            .insert(token.to_string(), name.to_string());
        Ok(())
    }
}
