//! Enhance manager.
//!
//! Entry point for a host page: picks the surface matching the page, owns the
//! slot running on it and reacts to navigation and settings changes.

use std::sync::Arc;

use crate::client::ChatBackend;
use crate::error::{Result, SidekickError};
use crate::host::HostDocument;
use crate::reconciler::{Reconciler, SlotContext, SlotHandle};
use crate::render::Renderer;
use crate::settings::{Settings, SettingsStore, StorageError};
use crate::surface::{SearchSurface, parse_url, select, surfaces};

/// Result of (re)starting the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A slot is running on the named surface.
    Enhanced { surface: String },
    /// No enabled surface matches the page.
    NoMatch,
    /// The settings could not be read; the text is shown to the user.
    Notice(String),
}

struct ActiveSlot {
    surface: Arc<dyn SearchSurface>,
    handle: SlotHandle,
}

pub struct EnhanceManager {
    doc: Arc<dyn HostDocument>,
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn SettingsStore>,
    renderer: Arc<dyn Renderer>,
    slot: Option<ActiveSlot>,
    notice: Option<String>,
}

impl EnhanceManager {
    pub fn new(
        doc: Arc<dyn HostDocument>,
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn SettingsStore>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            doc,
            backend,
            store,
            renderer,
            slot: None,
            notice: None,
        }
    }

    pub fn slot(&self) -> Option<&SlotHandle> {
        self.slot.as_ref().map(|s| &s.handle)
    }

    /// Name of the surface being enhanced.
    pub fn surface(&self) -> Option<&str> {
        self.slot.as_ref().map(|s| s.surface.name())
    }

    /// Last user-visible notice, if start-up could not proceed.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Start enhancing the page. Idempotent while a slot is running.
    pub async fn start(&mut self) -> Result<StartOutcome> {
        if let Some(slot) = &self.slot {
            return Ok(StartOutcome::Enhanced {
                surface: slot.surface.name().to_string(),
            });
        }

        let settings = match self.load_settings().await {
            Ok(settings) => settings,
            Err(message) => {
                self.notice = Some(message.clone());
                return Ok(StartOutcome::Notice(message));
            }
        };
        self.notice = None;

        let Some(surface) = self.select_surface(&settings)? else {
            tracing::debug!(url = %self.doc.url(), "No enabled surface matches");
            return Ok(StartOutcome::NoMatch);
        };

        tracing::info!(surface = surface.name(), "Enhancing page");
        let handle = Reconciler::spawn(
            SlotContext {
                doc: self.doc.clone(),
                backend: self.backend.clone(),
                store: self.store.clone(),
                renderer: self.renderer.clone(),
                surface: surface.clone(),
            },
            &settings,
        );
        let name = surface.name().to_string();
        self.slot = Some(ActiveSlot { surface, handle });
        Ok(StartOutcome::Enhanced { surface: name })
    }

    /// The page URL changed without a reload.
    pub async fn url_changed(&mut self) -> Result<StartOutcome> {
        self.reselect(|handle| handle.navigated()).await
    }

    /// The user changed the settings.
    pub async fn settings_changed(&mut self) -> Result<StartOutcome> {
        self.reselect(|handle| handle.settings_changed()).await
    }

    /// Stop the running slot and remove its UI.
    pub async fn stop(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracing::info!(surface = slot.surface.name(), "Stopping enhancement");
            slot.handle.shutdown().await;
        }
    }

    /// Keep the slot when the same surface still applies and notify it;
    /// otherwise restart from scratch.
    async fn reselect(&mut self, notify: impl FnOnce(&SlotHandle)) -> Result<StartOutcome> {
        let settings = match self.load_settings().await {
            Ok(settings) => settings,
            Err(message) => {
                self.stop().await;
                self.notice = Some(message.clone());
                return Ok(StartOutcome::Notice(message));
            }
        };

        let selected = self.select_surface(&settings)?;
        if let (Some(slot), Some(surface)) = (&self.slot, &selected)
            && slot.surface.name() == surface.name()
        {
            notify(&slot.handle);
            return Ok(StartOutcome::Enhanced {
                surface: surface.name().to_string(),
            });
        }

        self.stop().await;
        self.start().await
    }

    /// Settings, or the notice to show when the store cannot be read.
    async fn load_settings(&self) -> std::result::Result<Settings, String> {
        self.store.load().await.map_err(|e| {
            match &e {
                StorageError::Invalidated => {
                    tracing::warn!("Settings store invalidated; page needs a reload");
                }
                StorageError::Unavailable(message) => {
                    tracing::warn!(error = %message, "Failed to read settings");
                }
            }
            SidekickError::from(e).user_message()
        })
    }

    fn select_surface(&self, settings: &Settings) -> Result<Option<Arc<dyn SearchSurface>>> {
        let url = parse_url(&self.doc.url())?;
        Ok(select(&surfaces(settings), &url, settings))
    }
}
