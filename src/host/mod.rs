//! Host item API abstraction
//!
//! The monitor never talks to a concrete mail client directly; it reads
//! everything through [`ItemHost`]. A handful of properties are available
//! synchronously once an item is selected (the descriptor), everything
//! else is an async read that can individually fail.

pub mod simulated;

pub use simulated::{SimulatedHost, SimulatedItem};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::snapshot::{AttachmentSummary, Importance, Recipient};

/// Errors reported by the host for a property read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A single property read failed; the field is held at its last-known
    /// value for this tick and the cycle continues.
    #[error("property read failed: {0}")]
    ReadFailed(String),

    /// No item is currently selected (moved, deleted, or deselected); the
    /// tick is aborted.
    #[error("no item is currently available")]
    ItemUnavailable,
}

pub type HostResult<T> = Result<T, HostError>;

/// Message vs. appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Message,
    Appointment,
}

/// Properties the host exposes synchronously once an item is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Stable item id; `None` means compose/new-item mode.
    pub item_id: Option<String>,
    pub conversation_id: Option<String>,
    pub item_class: String,
    pub item_type: ItemType,
    pub importance: Importance,
    pub is_read: bool,
}

/// Async access to the currently-selected item's properties.
#[async_trait]
pub trait ItemHost: Send + Sync {
    /// Descriptor of the selected item, or `None` when no item is
    /// available.
    fn current_item(&self) -> Option<ItemDescriptor>;

    async fn subject(&self) -> HostResult<String>;

    async fn categories(&self) -> HostResult<Vec<String>>;

    async fn sender(&self) -> HostResult<Option<Recipient>>;

    async fn to(&self) -> HostResult<Vec<Recipient>>;

    async fn cc(&self) -> HostResult<Vec<Recipient>>;

    async fn bcc(&self) -> HostResult<Vec<Recipient>>;

    async fn attachments(&self) -> HostResult<Vec<AttachmentSummary>>;

    /// Plain-text body, used only by the compose-action heuristic.
    async fn body_text(&self) -> HostResult<String>;
}
