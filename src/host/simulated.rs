//! Scriptable in-memory host
//!
//! Used by the demo binary and the integration tests: items can be
//! selected, mutated and cleared between polls, and individual property
//! reads can be made to fail or take time.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{HostError, HostResult, ItemDescriptor, ItemHost, ItemType};
use crate::monitor::snapshot::{AttachmentSummary, Importance, Recipient};

/// Full mutable state of one simulated item.
#[derive(Debug, Clone)]
pub struct SimulatedItem {
    pub item_id: Option<String>,
    pub conversation_id: Option<String>,
    pub item_class: String,
    pub item_type: ItemType,
    pub importance: Importance,
    pub is_read: bool,
    pub subject: String,
    pub categories: Vec<String>,
    pub sender: Option<Recipient>,
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    pub attachments: Vec<AttachmentSummary>,
    pub body_text: String,
}

impl SimulatedItem {
    /// A received message with a stable id.
    pub fn message(item_id: &str, conversation_id: &str, subject: &str) -> Self {
        Self {
            item_id: Some(item_id.to_string()),
            conversation_id: Some(conversation_id.to_string()),
            item_class: "IPM.Note".to_string(),
            item_type: ItemType::Message,
            importance: Importance::Normal,
            is_read: false,
            subject: subject.to_string(),
            categories: Vec::new(),
            sender: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            attachments: Vec::new(),
            body_text: String::new(),
        }
    }

    /// A compose-mode item (no id assigned yet).
    pub fn compose(subject: &str) -> Self {
        let mut item = Self::message("", "", subject);
        item.item_id = None;
        item.conversation_id = None;
        item
    }

    fn descriptor(&self) -> ItemDescriptor {
        ItemDescriptor {
            item_id: self.item_id.clone(),
            conversation_id: self.conversation_id.clone(),
            item_class: self.item_class.clone(),
            item_type: self.item_type,
            importance: self.importance,
            is_read: self.is_read,
        }
    }
}

struct ReadScript {
    field: &'static str,
    remaining: usize,
    mutation: Option<Box<dyn FnOnce(&mut SimulatedItem) + Send + Sync>>,
}

#[derive(Default)]
struct SimState {
    item: Option<SimulatedItem>,
    failing_fields: HashSet<&'static str>,
    read_latency: Option<Duration>,
    read_log: Vec<&'static str>,
    scripts: Vec<ReadScript>,
}

/// In-memory [`ItemHost`] implementation.
#[derive(Default)]
pub struct SimulatedHost {
    state: RwLock<SimState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `item` the currently-selected item.
    pub fn select_item(&self, item: SimulatedItem) {
        if let Ok(mut state) = self.state.write() {
            state.item = Some(item);
        }
    }

    /// Deselect the current item (simulates move/delete).
    pub fn clear_item(&self) {
        if let Ok(mut state) = self.state.write() {
            state.item = None;
        }
    }

    /// Mutate the current item in place, if one is selected.
    pub fn update_item(&self, mutate: impl FnOnce(&mut SimulatedItem)) {
        if let Ok(mut state) = self.state.write() {
            if let Some(item) = state.item.as_mut() {
                mutate(item);
            }
        }
    }

    /// Make every read of the named field fail until cleared. Field names
    /// match the trait methods ("subject", "categories", ...).
    pub fn fail_reads_of(&self, field: &'static str) {
        if let Ok(mut state) = self.state.write() {
            state.failing_fields.insert(field);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.write() {
            state.failing_fields.clear();
        }
    }

    /// Add artificial latency to every async read.
    pub fn set_read_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.state.write() {
            state.read_latency = Some(latency);
        }
    }

    pub fn clear_read_latency(&self) {
        if let Ok(mut state) = self.state.write() {
            state.read_latency = None;
        }
    }

    /// Mutate the item right after the `nth` successful read of `field`
    /// (counting from this call), so the next read observes the mutated
    /// state. Used to simulate an item changing mid-capture.
    pub fn mutate_after_read(
        &self,
        field: &'static str,
        nth: usize,
        mutation: impl FnOnce(&mut SimulatedItem) + Send + Sync + 'static,
    ) {
        if let Ok(mut state) = self.state.write() {
            state.scripts.push(ReadScript {
                field,
                remaining: nth,
                mutation: Some(Box::new(mutation)),
            });
        }
    }

    /// Names of the async reads performed so far, in order; clears the
    /// log.
    pub fn take_read_log(&self) -> Vec<&'static str> {
        self.state
            .write()
            .map(|mut state| std::mem::take(&mut state.read_log))
            .unwrap_or_default()
    }

    async fn read<T>(&self, field: &'static str, get: impl FnOnce(&SimulatedItem) -> T) -> HostResult<T> {
        let (latency, result) = {
            let mut state = self
                .state
                .write()
                .map_err(|_| HostError::ReadFailed("host state poisoned".into()))?;
            state.read_log.push(field);
            if state.failing_fields.contains(field) {
                return Err(HostError::ReadFailed(format!("simulated failure: {field}")));
            }
            let item = state.item.as_ref().ok_or(HostError::ItemUnavailable)?;
            let value = get(item);

            // Run any scripted mutations due after this read; the value
            // above was captured before the mutation.
            let mut due = Vec::new();
            for script in state.scripts.iter_mut() {
                if script.field == field && script.remaining > 0 {
                    script.remaining -= 1;
                    if script.remaining == 0 {
                        if let Some(mutation) = script.mutation.take() {
                            due.push(mutation);
                        }
                    }
                }
            }
            state.scripts.retain(|script| script.mutation.is_some());
            if let Some(item) = state.item.as_mut() {
                for mutation in due {
                    mutation(item);
                }
            }

            (state.read_latency, value)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(result)
    }
}

#[async_trait]
impl ItemHost for SimulatedHost {
    fn current_item(&self) -> Option<ItemDescriptor> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.item.as_ref().map(SimulatedItem::descriptor))
    }

    async fn subject(&self) -> HostResult<String> {
        self.read("subject", |item| item.subject.clone()).await
    }

    async fn categories(&self) -> HostResult<Vec<String>> {
        self.read("categories", |item| item.categories.clone()).await
    }

    async fn sender(&self) -> HostResult<Option<Recipient>> {
        self.read("sender", |item| item.sender.clone()).await
    }

    async fn to(&self) -> HostResult<Vec<Recipient>> {
        self.read("to", |item| item.to.clone()).await
    }

    async fn cc(&self) -> HostResult<Vec<Recipient>> {
        self.read("cc", |item| item.cc.clone()).await
    }

    async fn bcc(&self) -> HostResult<Vec<Recipient>> {
        self.read("bcc", |item| item.bcc.clone()).await
    }

    async fn attachments(&self) -> HostResult<Vec<AttachmentSummary>> {
        self.read("attachments", |item| item.attachments.clone()).await
    }

    async fn body_text(&self) -> HostResult<String> {
        self.read("body_text", |item| item.body_text.clone()).await
    }
}
