//! Snapshot comparison
//!
//! Field-by-field diff of two snapshots of the same item. Every field is
//! evaluated independently (no short-circuit) so a tick reports the
//! complete set of differences, not just the first one. Categories are
//! compared as unordered sets with an overlap guard against torn reads.

use std::collections::HashSet;

use super::change::{ChangeDetail, ChangeRecord, Classification};
use super::classify;
use super::snapshot::{ItemField, ItemSnapshot};

/// Result of an order-independent category comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryDelta {
    Unchanged,
    Changed {
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// The derived lists share an element, which a correct set difference
    /// cannot produce: the comparison ran against a torn or partial read.
    Inconsistent { overlap: Vec<String> },
}

impl CategoryDelta {
    /// Validate derived added/removed lists. Kept separate from
    /// [`category_delta`] so the torn-read guard is exercisable on its
    /// own.
    pub fn from_lists(added: Vec<String>, removed: Vec<String>) -> Self {
        let removed_set: HashSet<&String> = removed.iter().collect();
        let overlap: Vec<String> = added
            .iter()
            .filter(|label| removed_set.contains(label))
            .cloned()
            .collect();

        if !overlap.is_empty() {
            return CategoryDelta::Inconsistent { overlap };
        }
        if added.is_empty() && removed.is_empty() {
            return CategoryDelta::Unchanged;
        }
        CategoryDelta::Changed { added, removed }
    }
}

/// Compare two category lists as sets, order-independently.
pub fn category_delta(previous: &[String], current: &[String]) -> CategoryDelta {
    let previous_set: HashSet<&String> = previous.iter().collect();
    let current_set: HashSet<&String> = current.iter().collect();

    let added: Vec<String> = current
        .iter()
        .filter(|label| !previous_set.contains(label))
        .cloned()
        .collect();
    let removed: Vec<String> = previous
        .iter()
        .filter(|label| !current_set.contains(label))
        .cloned()
        .collect();

    CategoryDelta::from_lists(added, removed)
}

/// Everything one tick's comparison needs.
pub struct DiffInput<'a> {
    pub previous: &'a ItemSnapshot,
    pub current: &'a ItemSnapshot,
    /// Fields freshly read this round; stale fields are not compared.
    pub fresh: &'a HashSet<ItemField>,
    /// Fields with an established baseline; uninitialized fields never
    /// emit a change (first-tick suppression).
    pub initialized: &'a HashSet<ItemField>,
    pub junk_markers: &'a [String],
}

/// Output of one tick's comparison.
#[derive(Debug, Default)]
pub struct TickDiff {
    pub records: Vec<ChangeRecord>,
    /// Raw category delta, set when the category field was comparable and
    /// differed. The caller confirms it with a re-read before reporting;
    /// a torn confirmation trips the overlap guard and engages a cooldown.
    pub category_change: Option<CategoryDelta>,
}

/// True when the two snapshots describe different items. Comparing across
/// an identity change is meaningless; the caller resets instead.
pub fn identity_changed(previous: &ItemSnapshot, current: &ItemSnapshot) -> bool {
    previous.item_id != current.item_id
}

/// Field-by-field comparison of two snapshots of the same item.
pub fn diff_snapshots(input: &DiffInput<'_>) -> TickDiff {
    let DiffInput {
        previous,
        current,
        fresh,
        initialized,
        junk_markers,
    } = input;
    let comparable = |field: ItemField| fresh.contains(&field) && initialized.contains(&field);

    let mut diff = TickDiff::default();

    if comparable(ItemField::Subject) && previous.subject != current.subject {
        diff.records.push(ChangeRecord::new(
            ItemField::Subject,
            ChangeDetail::Subject {
                previous: previous.subject.clone(),
                current: current.subject.clone(),
            },
            Classification::PropertyEdit,
        ));
    }

    if comparable(ItemField::Importance) && previous.importance != current.importance {
        diff.records.push(ChangeRecord::new(
            ItemField::Importance,
            ChangeDetail::Importance {
                previous: previous.importance,
                current: current.importance,
            },
            Classification::PropertyEdit,
        ));
    }

    if comparable(ItemField::ReadFlag) && previous.is_read != current.is_read {
        diff.records.push(ChangeRecord::new(
            ItemField::ReadFlag,
            ChangeDetail::ReadFlag {
                previous: previous.is_read,
                current: current.is_read,
            },
            Classification::PropertyEdit,
        ));
    }

    if comparable(ItemField::Categories) {
        match category_delta(&previous.categories, &current.categories) {
            CategoryDelta::Unchanged => {}
            delta => diff.category_change = Some(delta),
        }
    }

    for (field, prev_list, cur_list) in [
        (ItemField::To, &previous.to, &current.to),
        (ItemField::Cc, &previous.cc, &current.cc),
        (ItemField::Bcc, &previous.bcc, &current.bcc),
    ] {
        if comparable(field) && prev_list != cur_list {
            diff.records.push(ChangeRecord::new(
                field,
                ChangeDetail::Recipients {
                    field,
                    current: cur_list.clone(),
                },
                Classification::PropertyEdit,
            ));
        }
    }

    if comparable(ItemField::Sender) && previous.sender != current.sender {
        diff.records.push(ChangeRecord::new(
            ItemField::Sender,
            ChangeDetail::Sender {
                previous: previous.sender.clone(),
                current: current.sender.clone(),
            },
            Classification::PropertyEdit,
        ));
    }

    if comparable(ItemField::Attachments) && previous.attachments != current.attachments {
        diff.records.push(ChangeRecord::new(
            ItemField::Attachments,
            ChangeDetail::Attachments {
                current: current.attachments.clone(),
            },
            Classification::PropertyEdit,
        ));
    }

    if comparable(ItemField::Conversation) && previous.conversation_id != current.conversation_id {
        diff.records.push(ChangeRecord::new(
            ItemField::Conversation,
            ChangeDetail::Conversation {
                previous: previous.conversation_id.clone(),
                current: current.conversation_id.clone(),
            },
            classify::classify_transition(&current.subject, false),
        ));
    }

    if comparable(ItemField::ItemClass) && previous.item_class != current.item_class {
        let classification = if classify::is_junk_class(&current.item_class, junk_markers) {
            Classification::PossiblyFiled
        } else {
            Classification::PropertyEdit
        };
        diff.records.push(ChangeRecord::new(
            ItemField::ItemClass,
            ChangeDetail::ItemClass {
                previous: previous.item_class.clone(),
                current: current.item_class.clone(),
            },
            classification,
        ));
    }

    diff
}
