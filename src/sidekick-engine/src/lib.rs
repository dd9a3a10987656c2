//! Sidekick Engine - streaming answers injected into search result pages.
//!
//! This crate contains the core functionality:
//! - Decoding the line-delimited answer stream and accumulating the answer
//! - Request sessions with cancellation (last request wins)
//! - The anchor registry and the reconciler that keeps the injected UI
//!   mounted exactly once while the host page rewrites itself
//! - Settings, configuration and the HTTP client for the chat API
//!
//! NOTE: This crate should NOT contain any terminal I/O.
//! Printing belongs in sidekick-cli.

#![deny(clippy::print_stdout, clippy::print_stderr)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::doc_markdown,
    clippy::new_without_default,
    clippy::struct_excessive_bools,
    clippy::significant_drop_tightening
)]

pub mod accumulator;
pub mod anchor;
pub mod client;
pub mod config;
pub mod debounce;
pub mod decoder;
pub mod error;
pub mod host;
pub mod manager;
pub mod reconciler;
pub mod render;
pub mod request;
pub mod session;
pub mod settings;
pub mod surface;

#[cfg(test)]
mod tests;

pub use accumulator::{AnswerAccumulator, AnswerSink, StreamOutcome, StreamState, Update};
pub use anchor::{AnchorRecord, AnchorRegistry, MountState};
pub use client::{ByteStream, ChatBackend, ChatClient, Endpoint};
pub use config::{ContainerLossPolicy, SidekickConfig, SurfaceConfig, TimingConfig};
pub use decoder::{EventStream, LineDecoder, decode, decode_line};
pub use error::{Result, SidekickError};
pub use host::{HostDocument, MemoryDocument, MutationRecord, NodeId};
pub use manager::{EnhanceManager, StartOutcome};
pub use reconciler::{Reconciler, SlotCommand, SlotContext, SlotHandle, SlotState, SlotStats};
pub use render::{MarkdownRenderer, Renderer};
pub use request::{RequestHandle, RequestSession, RequestSlot, RequestStatus};
pub use settings::{
    DEFAULT_APP_TITLE, FileSettingsStore, MemorySettingsStore, Settings, SettingsStore,
    StorageError, resolve_app_title, selection_prompt,
};
pub use surface::{BaiduSurface, CustomSurface, SearchSurface};

pub use sidekick_protocol as protocol;
