pub mod change;
pub mod classify;
pub mod diff;
pub mod engine;
pub mod snapshot;

pub use change::{ChangeDetail, ChangeRecord, Classification, MonitorEvent};
pub use classify::{detect_compose_action, detect_compose_action_for, ComposeAction};
pub use diff::{category_delta, diff_snapshots, CategoryDelta, DiffInput, TickDiff};
pub use engine::{MonitorError, MonitorResult, Phase, PropertyMonitor};
pub use snapshot::{
    AttachmentKind, AttachmentSummary, FieldReading, Importance, ItemField, ItemSnapshot,
    Recipient, SnapshotBuilder,
};
