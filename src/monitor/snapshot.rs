//! Point-in-time captures of the observable item state
//!
//! An [`ItemSnapshot`] is built once per capture round and never mutated
//! afterwards; each poll produces a fresh snapshot that supersedes the
//! previous one. The [`SnapshotBuilder`] overlays one round's field
//! readings on top of the previous snapshot so a failed read simply holds
//! that field at its last-known value.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::{ItemDescriptor, ItemType};

/// Item importance, ordered Low < Normal < High.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

/// One address record in a recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub display_name: String,
    pub email_address: String,
}

impl Recipient {
    pub fn new(display_name: impl Into<String>, email_address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email_address: email_address.into(),
        }
    }
}

/// Attachment kind as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Item,
    Cloud,
}

/// Summary of one attachment (the monitor never reads attachment content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub kind: AttachmentKind,
}

/// The tracked item properties, used as keys for initialization flags,
/// fresh-read bookkeeping and change records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Subject,
    Importance,
    ReadFlag,
    Categories,
    ItemClass,
    Conversation,
    Identity,
    Sender,
    To,
    Cc,
    Bcc,
    Attachments,
}

/// A point-in-time capture of the currently-displayed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Stable item id; `None` signals compose/new-item mode.
    pub item_id: Option<String>,
    pub conversation_id: Option<String>,
    pub item_class: String,
    pub item_type: ItemType,
    pub subject: String,
    pub importance: Importance,
    pub is_read: bool,
    /// Category labels; compared order-independently.
    pub categories: Vec<String>,
    pub sender: Option<Recipient>,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    pub attachments: Vec<AttachmentSummary>,
    pub captured_at: DateTime<Utc>,
    /// Monotonic capture sequence number, assigned by the monitor.
    pub tick: u64,
}

impl Default for ItemSnapshot {
    fn default() -> Self {
        Self {
            item_id: None,
            conversation_id: None,
            item_class: String::new(),
            item_type: ItemType::Message,
            subject: String::new(),
            importance: Importance::Normal,
            is_read: false,
            categories: Vec::new(),
            sender: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
            captured_at: Utc::now(),
            tick: 0,
        }
    }
}

/// One field read out of a capture round.
#[derive(Debug, Clone)]
pub enum FieldReading {
    Subject(String),
    ReadFlag(bool),
    Categories(Vec<String>),
    /// The synchronously-available descriptor properties, read as one unit.
    Identity(ItemDescriptor),
    Sender(Option<Recipient>),
    To(Vec<Recipient>),
    Cc(Vec<Recipient>),
    Bcc(Vec<Recipient>),
    Attachments(Vec<AttachmentSummary>),
    /// The host reported a failure for this field; hold it at last-known.
    Unavailable(ItemField),
}

/// Builds the next snapshot by overlaying a capture round's readings on
/// the previous snapshot.
pub struct SnapshotBuilder {
    snapshot: ItemSnapshot,
    fresh: HashSet<ItemField>,
}

impl SnapshotBuilder {
    /// Start from the previous snapshot, or from defaults when there is
    /// none (first capture after a reset).
    pub fn over(previous: Option<&ItemSnapshot>) -> Self {
        Self {
            snapshot: previous.cloned().unwrap_or_default(),
            fresh: HashSet::new(),
        }
    }

    /// Apply one field reading.
    pub fn apply(&mut self, reading: FieldReading) {
        match reading {
            FieldReading::Subject(subject) => {
                self.snapshot.subject = subject;
                self.fresh.insert(ItemField::Subject);
            }
            FieldReading::ReadFlag(is_read) => {
                self.snapshot.is_read = is_read;
                self.fresh.insert(ItemField::ReadFlag);
            }
            FieldReading::Categories(categories) => {
                self.snapshot.categories = categories;
                self.fresh.insert(ItemField::Categories);
            }
            FieldReading::Identity(descriptor) => {
                self.snapshot.item_id = descriptor.item_id;
                self.snapshot.conversation_id = descriptor.conversation_id;
                self.snapshot.item_class = descriptor.item_class;
                self.snapshot.item_type = descriptor.item_type;
                self.snapshot.importance = descriptor.importance;
                self.fresh.insert(ItemField::Identity);
                self.fresh.insert(ItemField::ItemClass);
                self.fresh.insert(ItemField::Conversation);
                self.fresh.insert(ItemField::Importance);
            }
            FieldReading::Sender(sender) => {
                self.snapshot.sender = sender;
                self.fresh.insert(ItemField::Sender);
            }
            FieldReading::To(recipients) => {
                self.snapshot.to = recipients;
                self.fresh.insert(ItemField::To);
            }
            FieldReading::Cc(recipients) => {
                self.snapshot.cc = recipients;
                self.fresh.insert(ItemField::Cc);
            }
            FieldReading::Bcc(recipients) => {
                self.snapshot.bcc = recipients;
                self.fresh.insert(ItemField::Bcc);
            }
            FieldReading::Attachments(attachments) => {
                self.snapshot.attachments = attachments;
                self.fresh.insert(ItemField::Attachments);
            }
            FieldReading::Unavailable(field) => {
                debug!(?field, "read failed, holding field at last-known value");
            }
        }
    }

    /// Fields that were freshly read in this round.
    pub fn fresh(&self) -> &HashSet<ItemField> {
        &self.fresh
    }

    /// Finalize the snapshot for the given capture sequence number.
    pub fn build(mut self, tick: u64) -> (ItemSnapshot, HashSet<ItemField>) {
        self.snapshot.captured_at = Utc::now();
        self.snapshot.tick = tick;
        (self.snapshot, self.fresh)
    }
}
