//! Structured change records and monitor events
//!
//! Every confirmed field difference becomes one [`ChangeRecord`]; a tick's
//! records are handed to subscribers in a single
//! [`MonitorEvent::TickCompleted`]. The event stream is the seam towards
//! the logging/notification collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::{AttachmentSummary, Importance, ItemField, Recipient};

/// How a detected change is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Ordinary edit of an item property.
    PropertyEdit,
    /// Probable reply within the tracked conversation (best-effort).
    Reply,
    /// Probable reply-all (best-effort).
    ReplyAll,
    /// Probable forward (best-effort).
    Forward,
    /// A new, unrelated message or item.
    NewMessage,
    /// Item class suggests the item was filed as junk or processed by a
    /// rule (inferred, not certain).
    PossiblyFiled,
    /// The tracked item is no longer available (moved or deleted).
    ItemDisappeared,
    /// Diagnostic-only record, no user-visible change confirmed.
    Diagnostic,
}

/// Typed payload of one change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeDetail {
    Subject {
        previous: String,
        current: String,
    },
    Importance {
        previous: Importance,
        current: Importance,
    },
    ReadFlag {
        previous: bool,
        current: bool,
    },
    /// Category delta; only emitted when the derived lists are disjoint.
    Categories {
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Recipient list changed; reported as the new list, not a delta.
    Recipients {
        field: ItemField,
        current: Vec<Recipient>,
    },
    Sender {
        previous: Option<Recipient>,
        current: Option<Recipient>,
    },
    Attachments {
        current: Vec<AttachmentSummary>,
    },
    ItemClass {
        previous: String,
        current: String,
    },
    Conversation {
        previous: Option<String>,
        current: Option<String>,
    },
    /// The selected item changed identity mid-monitoring.
    ItemSwitch {
        previous_item: Option<String>,
        current_item: Option<String>,
        subject: String,
    },
    /// The tracked item disappeared (best-effort "filed away" signal).
    Disappeared {
        last_item: String,
    },
    /// Added/removed category lists overlapped: torn read, change
    /// suppressed and a cooldown engaged.
    CategoryInconsistency {
        overlap: Vec<String>,
    },
}

/// One detected change: field, payload, classification, timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: Uuid,
    pub field: ItemField,
    pub detail: ChangeDetail,
    pub classification: Classification,
    pub detected_at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(field: ItemField, detail: ChangeDetail, classification: Classification) -> Self {
        Self {
            id: Uuid::new_v4(),
            field,
            detail,
            classification,
            detected_at: Utc::now(),
        }
    }
}

/// Lifecycle and change events broadcast by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A baseline snapshot was captured and monitoring is active.
    Started { item_id: Option<String> },
    /// The selected item changed identity; state was reset.
    Reset {
        previous_item: Option<String>,
        current_item: Option<String>,
    },
    /// A poll tick confirmed one or more changes.
    TickCompleted {
        tick: u64,
        records: Vec<ChangeRecord>,
    },
    /// The tracked item is gone; monitoring dropped back to idle.
    ItemDisappeared { record: ChangeRecord },
    /// Non-fatal anomaly during a tick (aborted capture, torn read,
    /// stale capture dropped).
    Diagnostic { tick: u64, message: String },
    /// Monitoring was explicitly stopped.
    Stopped,
}
