//! Configuration file.
//!
//! The configuration lives in `$CONFIG_DIR/sidekick/config.toml`. Every
//! field has a default so an empty or missing file is valid; the API URL and
//! token can additionally be supplied through the environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SidekickError};
use sidekick_protocol::DEFAULT_USER;

/// Environment variable overriding `api_url`.
pub const ENV_API_URL: &str = "SIDEKICK_API_URL";
/// Environment variable overriding the selected token.
pub const ENV_TOKEN: &str = "SIDEKICK_TOKEN";
/// Environment variable pointing at an alternative config file.
pub const ENV_CONFIG: &str = "SIDEKICK_CONFIG";

/// Placeholder replaced by the search query in `prompt_template`.
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Top-level configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SidekickConfig {
    /// Base URL of the chat API, e.g. `https://api.example.com/v1`.
    #[serde(default)]
    pub api_url: Option<String>,

    /// All known application tokens.
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Token used for requests.
    #[serde(default)]
    pub selected_token: Option<String>,

    /// Display names keyed by token.
    #[serde(default)]
    pub app_names: BTreeMap<String, String>,

    /// Enhance Baidu result pages.
    #[serde(default = "default_true")]
    pub enable_baidu_search: bool,

    /// Fetch suggested questions.
    #[serde(default)]
    pub enable_suggestions: bool,

    /// End-user identifier sent with every request.
    #[serde(default = "default_user")]
    pub user: String,

    /// Prompt sent for a search query; `{query}` is substituted.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub container_loss: ContainerLossPolicy,

    /// Additional result pages to enhance.
    #[serde(default)]
    pub surfaces: Vec<SurfaceConfig>,
}

fn default_true() -> bool {
    true
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_prompt_template() -> String {
    "Please explain what \"{query}\" means. Keep it concise and list its main uses.".to_string()
}

impl Default for SidekickConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            tokens: Vec::new(),
            selected_token: None,
            app_names: BTreeMap::new(),
            enable_baidu_search: true,
            enable_suggestions: false,
            user: default_user(),
            prompt_template: default_prompt_template(),
            timing: TimingConfig::default(),
            container_loss: ContainerLossPolicy::default(),
            surfaces: Vec::new(),
        }
    }
}

impl std::fmt::Debug for SidekickConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidekickConfig")
            .field("api_url", &self.api_url)
            .field("tokens", &format!("[{} REDACTED]", self.tokens.len()))
            .field(
                "selected_token",
                &self.selected_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("enable_baidu_search", &self.enable_baidu_search)
            .field("enable_suggestions", &self.enable_suggestions)
            .field("user", &self.user)
            .field("timing", &self.timing)
            .field("container_loss", &self.container_loss)
            .field("surfaces", &self.surfaces)
            .finish()
    }
}

impl SidekickConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("sidekick").join("config.toml"))
    }

    /// Parse a config document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SidekickError::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SidekickError::Io(e)
            }
        })?;
        Self::from_toml(&content)
    }

    /// Load configuration from file, falling back to defaults when the file
    /// does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(SidekickError::ConfigNotFound { path }) => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Write the configuration back to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `SIDEKICK_API_URL` / `SIDEKICK_TOKEN` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL)
            && !url.trim().is_empty()
        {
            self.api_url = Some(url);
        }
        if let Ok(token) = std::env::var(ENV_TOKEN)
            && !token.trim().is_empty()
        {
            if !self.tokens.contains(&token) {
                self.tokens.push(token.clone());
            }
            self.selected_token = Some(token);
        }
    }
}

/// Timing knobs of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Quiet period after the last mutation before the DOM counts as stable.
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    /// How long a manual dismissal blocks recreation.
    #[serde(default = "default_suppression_ms")]
    pub suppression_ms: u64,

    /// Minimum spacing between anchor-loss reinitializations.
    #[serde(default = "default_reinit_cooldown_ms")]
    pub reinit_cooldown_ms: u64,
}

fn default_quiet_period_ms() -> u64 {
    500
}

fn default_suppression_ms() -> u64 {
    1000
}

fn default_reinit_cooldown_ms() -> u64 {
    1000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            suppression_ms: default_suppression_ms(),
            reinit_cooldown_ms: default_reinit_cooldown_ms(),
        }
    }
}

impl TimingConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn suppression(&self) -> Duration {
        Duration::from_millis(self.suppression_ms)
    }

    pub fn reinit_cooldown(&self) -> Duration {
        Duration::from_millis(self.reinit_cooldown_ms)
    }
}

/// What to do when the host page removes the container but keeps the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerLossPolicy {
    /// Rebuild the container and replay the latest rendered answer; a running
    /// stream keeps writing into the new container.
    #[default]
    Replay,
    /// Rebuild the container and issue the request again.
    Restart,
}

/// A result page described in configuration rather than built in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    pub name: String,
    /// Host names the page must be served from.
    pub hosts: Vec<String>,
    /// Accepted paths; empty accepts any path.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Query-string parameter holding the search terms.
    pub query_param: String,
    /// Selector of the element the answer is inserted into.
    pub results_root: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SidekickConfig::from_toml("").expect("parse");
        assert!(config.api_url.is_none());
        assert!(config.enable_baidu_search);
        assert!(!config.enable_suggestions);
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.timing, TimingConfig::default());
        assert_eq!(config.container_loss, ContainerLossPolicy::Replay);
    }

    #[test]
    fn test_full_document() {
        let config = SidekickConfig::from_toml(
            r##"
            api_url = "https://api.example.com/v1"
            tokens = ["app-1", "app-2"]
            selected_token = "app-2"
            enable_baidu_search = false
            container_loss = "restart"

            [app_names]
            "app-2" = "Helper"

            [timing]
            quiet_period_ms = 250

            [[surfaces]]
            name = "intranet"
            hosts = ["search.corp.example"]
            query_param = "q"
            results_root = "#results"
            "##,
        )
        .expect("parse");

        assert_eq!(config.api_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.selected_token.as_deref(), Some("app-2"));
        assert_eq!(config.app_names.get("app-2").map(String::as_str), Some("Helper"));
        assert!(!config.enable_baidu_search);
        assert_eq!(config.container_loss, ContainerLossPolicy::Restart);
        assert_eq!(config.timing.quiet_period(), Duration::from_millis(250));
        assert_eq!(config.timing.suppression(), Duration::from_millis(1000));
        assert_eq!(config.surfaces.len(), 1);
        assert!(config.surfaces[0].enabled);
        assert!(config.surfaces[0].paths.is_empty());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let config = SidekickConfig {
            tokens: vec!["secret-token".to_string()],
            selected_token: Some("secret-token".to_string()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SidekickConfig::default();
        config.api_url = Some("http://localhost:5001/v1".to_string());
        config
            .app_names
            .insert("app-1".to_string(), "Helper".to_string());
        config.save(&path).expect("save");

        let loaded = SidekickConfig::load(&path).expect("load");
        assert_eq!(loaded.api_url, config.api_url);
        assert_eq!(loaded.app_names, config.app_names);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            SidekickConfig::load(&path),
            Err(SidekickError::ConfigNotFound { .. })
        ));
        let config = SidekickConfig::load_or_default(&path).expect("defaults");
        assert!(config.api_url.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides_endpoint() {
        let mut config = SidekickConfig {
            api_url: Some("https://file.example.com/v1".to_string()),
            tokens: vec!["file-token".to_string()],
            selected_token: Some("file-token".to_string()),
            ..Default::default()
        };

        // SAFETY: Tests touching these variables run serially and restore them
        unsafe {
            std::env::set_var(ENV_API_URL, "https://env.example.com/v1");
            std::env::set_var(ENV_TOKEN, "env-token");
        }
        config.apply_env();
        unsafe {
            std::env::remove_var(ENV_API_URL);
            std::env::remove_var(ENV_TOKEN);
        }

        assert_eq!(config.api_url.as_deref(), Some("https://env.example.com/v1"));
        assert_eq!(config.selected_token.as_deref(), Some("env-token"));
        assert_eq!(config.tokens, vec!["file-token", "env-token"]);
    }

    #[test]
    #[serial]
    fn test_blank_env_is_ignored() {
        let mut config = SidekickConfig::default();
        // SAFETY: Tests touching these variables run serially and restore them
        unsafe { std::env::set_var(ENV_API_URL, "  ") };
        config.apply_env();
        unsafe { std::env::remove_var(ENV_API_URL) };
        assert!(config.api_url.is_none());
    }
}
