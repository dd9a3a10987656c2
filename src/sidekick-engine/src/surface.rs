//! Search surfaces.
//!
//! A surface is one kind of result page the engine knows how to enhance: it
//! recognises its URLs, pulls the search terms out of them and names the
//! element the answer goes into. Everything else (reconciling, streaming) is
//! shared.

use std::sync::Arc;

use url::Url;

use crate::config::SurfaceConfig;
use crate::error::{Result, SidekickError};
use crate::settings::Settings;

/// Result page the engine can enhance.
pub trait SearchSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `url` is a result page of this surface.
    fn matches(&self, url: &Url) -> bool;

    /// Search terms of the page, `None` when there are none.
    fn extract_query(&self, url: &Url) -> Option<String>;

    /// Selector of the results root the anchor is inserted into.
    fn host_root_selector(&self) -> &str;

    fn is_enabled(&self, settings: &Settings) -> bool;
}

pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| SidekickError::InvalidUrl(format!("{url}: {e}")))
}

/// Value of query parameter `name`, trimmed; `None` when absent or blank.
fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `www.baidu.com` result pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaiduSurface;

impl SearchSurface for BaiduSurface {
    fn name(&self) -> &str {
        "baidu"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str() == Some("www.baidu.com") && matches!(url.path(), "/s" | "/")
    }

    fn extract_query(&self, url: &Url) -> Option<String> {
        query_param(url, "wd")
    }

    fn host_root_selector(&self) -> &str {
        "#content_left"
    }

    fn is_enabled(&self, settings: &Settings) -> bool {
        settings.enable_baidu_search
    }
}

/// Surface described in the configuration file.
#[derive(Debug, Clone)]
pub struct CustomSurface {
    config: SurfaceConfig,
}

impl CustomSurface {
    pub fn new(config: SurfaceConfig) -> Self {
        Self { config }
    }
}

impl SearchSurface for CustomSurface {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.config.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
            && (self.config.paths.is_empty() || self.config.paths.iter().any(|p| p == url.path()))
    }

    fn extract_query(&self, url: &Url) -> Option<String> {
        query_param(url, &self.config.query_param)
    }

    fn host_root_selector(&self) -> &str {
        &self.config.results_root
    }

    fn is_enabled(&self, _settings: &Settings) -> bool {
        self.config.enabled
    }
}

/// Built-in surfaces followed by the configured ones.
pub fn surfaces(settings: &Settings) -> Vec<Arc<dyn SearchSurface>> {
    let mut all: Vec<Arc<dyn SearchSurface>> = vec![Arc::new(BaiduSurface)];
    all.extend(
        settings
            .surfaces
            .iter()
            .cloned()
            .map(|c| Arc::new(CustomSurface::new(c)) as Arc<dyn SearchSurface>),
    );
    all
}

/// First enabled surface matching `url`.
pub fn select(
    surfaces: &[Arc<dyn SearchSurface>],
    url: &Url,
    settings: &Settings,
) -> Option<Arc<dyn SearchSurface>> {
    surfaces
        .iter()
        .find(|s| s.matches(url) && s.is_enabled(settings))
        .cloned()
}
