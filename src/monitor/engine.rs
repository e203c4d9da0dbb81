//! Polling property-change monitor
//!
//! Drives the Idle → Initializing → Active state machine: a recurring
//! interval triggers a capture round, each round reads the tracked fields
//! through a fresh [`JobQueue`] in a fixed order, and the completed
//! snapshot is compared against the last-known one. State always advances
//! to the newest committed snapshot so transient inconsistencies cannot
//! accumulate across polls.
//!
//! Each capture carries a monotonic sequence number and commits only if it
//! is newer than the last committed capture, so an out-of-cycle capture
//! (host push event fast-path) racing the timer cannot overwrite newer
//! state with older reads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::change::{ChangeDetail, ChangeRecord, Classification, MonitorEvent};
use super::classify;
use super::diff::{self, CategoryDelta, DiffInput};
use super::snapshot::{FieldReading, ItemField, ItemSnapshot, SnapshotBuilder};
use crate::config::MonitorConfig;
use crate::host::{HostError, ItemHost};
use crate::queue::{Job, JobError, JobQueue, QueueEvent};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Monitoring lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not tracking anything; waiting for an item.
    Idle,
    /// An item is selected but no baseline snapshot is committed yet.
    Initializing,
    /// Baseline committed; every poll compares against it.
    Active,
}

#[derive(Debug)]
struct MonitorState {
    phase: Phase,
    last_known: Option<ItemSnapshot>,
    /// Fields with an established comparison baseline.
    initialized: HashSet<ItemField>,
    /// Overlap guard: a category read is outstanding.
    category_read_in_flight: bool,
    last_category_read: Option<Instant>,
    /// Set after a torn category read; category checks resume afterwards.
    category_cooldown_until: Option<Instant>,
    /// Next capture sequence number.
    next_tick: u64,
    /// Highest capture sequence committed to `last_known`.
    committed_tick: u64,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            last_known: None,
            initialized: HashSet::new(),
            category_read_in_flight: false,
            last_category_read: None,
            category_cooldown_until: None,
            next_tick: 0,
            committed_tick: 0,
        }
    }

    /// Back to idle: snapshot discarded, flags and guards cleared. The
    /// tick counters survive so stale captures stay detectable.
    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.last_known = None;
        self.initialized.clear();
        self.category_read_in_flight = false;
        self.last_category_read = None;
        self.category_cooldown_until = None;
    }
}

/// Polling state machine detecting property changes of the selected item.
pub struct PropertyMonitor {
    config: MonitorConfig,
    host: Arc<dyn ItemHost>,
    state: Arc<Mutex<MonitorState>>,
    events: broadcast::Sender<MonitorEvent>,
    poller_handle: Mutex<Option<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
}

impl PropertyMonitor {
    pub fn new(host: Arc<dyn ItemHost>, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config,
            host,
            state: Arc::new(Mutex::new(MonitorState::new())),
            events,
            poller_handle: Mutex::new(None),
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Subscribe to change records and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn last_snapshot(&self) -> Option<ItemSnapshot> {
        self.state.lock().await.last_known.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Start the polling loop. Calling `start` on a running monitor is a
    /// no-op.
    pub async fn start(&self) -> MonitorResult<()> {
        self.config.validate().map_err(MonitorError::InvalidConfig)?;

        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Ok(());
        }

        info!(
            interval_secs = self.config.poll_interval_secs,
            "starting property monitor"
        );

        let host = self.host.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let running = self.is_running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(config.poll_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    debug!("monitor stopped, poller loop exiting");
                    break;
                }
                Self::poll_once(host.clone(), config.clone(), state.clone(), events.clone()).await;
            }
        });

        *self.poller_handle.lock().await = Some(handle);
        *is_running = true;
        Ok(())
    }

    /// Stop polling and drop back to idle. Calling `stop` on a stopped
    /// monitor is a no-op.
    pub async fn stop(&self) {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return;
        }
        *is_running = false;

        if let Some(handle) = self.poller_handle.lock().await.take() {
            handle.abort();
        }

        self.state.lock().await.reset();
        info!("property monitor stopped");
        let _ = self.events.send(MonitorEvent::Stopped);
    }

    /// Run one capture round immediately, outside the polling cycle. Used
    /// as a fast path when the host reports a coarse change event.
    pub async fn trigger_capture(&self) {
        Self::poll_once(
            self.host.clone(),
            self.config.clone(),
            self.state.clone(),
            self.events.clone(),
        )
        .await;
    }

    async fn poll_once(
        host: Arc<dyn ItemHost>,
        config: MonitorConfig,
        state: Arc<Mutex<MonitorState>>,
        events: broadcast::Sender<MonitorEvent>,
    ) {
        let Some(descriptor) = host.current_item() else {
            Self::handle_disappearance(&state, &events).await;
            return;
        };

        // Assign this capture's sequence number and decide whether the
        // expensive category read joins the round.
        let (seq, previous, include_categories) = {
            let mut st = state.lock().await;
            if st.phase == Phase::Idle {
                st.phase = Phase::Initializing;
            }
            st.next_tick += 1;
            let seq = st.next_tick;

            let now = Instant::now();
            let throttle = Duration::from_secs(config.category_throttle_secs);
            let cooled = st
                .category_cooldown_until
                .map_or(true, |until| now >= until);
            let spaced = st
                .last_category_read
                .map_or(true, |at| now.duration_since(at) >= throttle);
            let include = cooled && spaced && !st.category_read_in_flight;
            if include {
                st.category_read_in_flight = true;
            }
            (seq, st.last_known.clone(), include)
        };

        debug!(tick = seq, include_categories, "capture round starting");

        // One job per field, fixed order; concurrency 1 keeps the round's
        // reads from interleaving.
        let mut queue: JobQueue<FieldReading> =
            JobQueue::with_concurrency(config.capture_concurrency)
                .default_timeout(Duration::from_millis(config.read_timeout_ms));

        {
            let host = host.clone();
            queue.push(Job::from_future("subject", async move {
                field_reading(
                    host.subject().await.map(FieldReading::Subject),
                    ItemField::Subject,
                )
            }));
        }
        {
            let is_read = descriptor.is_read;
            queue.push(Job::from_future("read_flag", async move {
                Ok(Some(FieldReading::ReadFlag(is_read)))
            }));
        }
        if include_categories {
            let host = host.clone();
            queue.push(Job::from_future("categories", async move {
                field_reading(
                    host.categories().await.map(FieldReading::Categories),
                    ItemField::Categories,
                )
            }));
        }
        {
            let descriptor = descriptor.clone();
            queue.push(Job::from_future("identity", async move {
                Ok(Some(FieldReading::Identity(descriptor)))
            }));
        }
        {
            let host = host.clone();
            queue.push(Job::from_future("sender", async move {
                field_reading(host.sender().await.map(FieldReading::Sender), ItemField::Sender)
            }));
        }
        {
            let host = host.clone();
            queue.push(Job::from_future("to", async move {
                field_reading(host.to().await.map(FieldReading::To), ItemField::To)
            }));
        }
        {
            let host = host.clone();
            queue.push(Job::from_future("cc", async move {
                field_reading(host.cc().await.map(FieldReading::Cc), ItemField::Cc)
            }));
        }
        {
            let host = host.clone();
            queue.push(Job::from_future("bcc", async move {
                field_reading(host.bcc().await.map(FieldReading::Bcc), ItemField::Bcc)
            }));
        }
        {
            let host = host.clone();
            queue.push(Job::from_future("attachments", async move {
                field_reading(
                    host.attachments().await.map(FieldReading::Attachments),
                    ItemField::Attachments,
                )
            }));
        }

        let mut queue_events = queue.subscribe();
        let outcome = queue.run().await;
        while let Ok(event) = queue_events.try_recv() {
            if let QueueEvent::Timeout { label } = event {
                warn!(tick = seq, job = %label, "property read timed out, proceeding without it");
            }
        }

        let readings = match outcome {
            Ok(readings) => readings,
            Err(failure) => {
                if include_categories {
                    state.lock().await.category_read_in_flight = false;
                }
                if host.current_item().is_none() {
                    Self::handle_disappearance(&state, &events).await;
                } else {
                    warn!(tick = seq, error = %failure, "capture aborted");
                    let _ = events.send(MonitorEvent::Diagnostic {
                        tick: seq,
                        message: format!("capture aborted: {failure}"),
                    });
                }
                return;
            }
        };

        let mut builder = SnapshotBuilder::over(previous.as_ref());
        for reading in readings {
            builder.apply(reading);
        }
        let (mut snapshot, fresh) = builder.build(seq);

        let mut st = state.lock().await;
        if include_categories {
            st.category_read_in_flight = false;
            st.last_category_read = Some(Instant::now());
        }

        if seq <= st.committed_tick {
            debug!(
                tick = seq,
                committed = st.committed_tick,
                "capture finished out of order, dropping stale snapshot"
            );
            let _ = events.send(MonitorEvent::Diagnostic {
                tick: seq,
                message: format!("stale capture {seq} dropped (committed {})", st.committed_tick),
            });
            return;
        }

        let prev = match (st.phase, st.last_known.clone()) {
            (Phase::Active, Some(prev)) => prev,
            _ => {
                // Baseline capture (fresh start or post-reset).
                st.phase = Phase::Active;
                st.initialized = fresh;
                st.committed_tick = seq;
                info!(item = ?snapshot.item_id, tick = seq, "baseline captured, monitoring active");
                let _ = events.send(MonitorEvent::Started {
                    item_id: snapshot.item_id.clone(),
                });
                st.last_known = Some(snapshot);
                return;
            }
        };

        if diff::identity_changed(&prev, &snapshot) {
            let same_conversation = prev.conversation_id.is_some()
                && prev.conversation_id == snapshot.conversation_id;
            let classification = classify::classify_transition(&snapshot.subject, same_conversation);
            info!(
                previous = ?prev.item_id,
                current = ?snapshot.item_id,
                ?classification,
                "item identity changed, resetting state"
            );

            let record = ChangeRecord::new(
                ItemField::Identity,
                ChangeDetail::ItemSwitch {
                    previous_item: prev.item_id.clone(),
                    current_item: snapshot.item_id.clone(),
                    subject: snapshot.subject.clone(),
                },
                classification,
            );
            let _ = events.send(MonitorEvent::Reset {
                previous_item: prev.item_id.clone(),
                current_item: snapshot.item_id.clone(),
            });
            let _ = events.send(MonitorEvent::TickCompleted {
                tick: seq,
                records: vec![record],
            });

            // Re-initialize against the new item; this capture becomes
            // the new baseline.
            st.initialized = fresh;
            st.category_cooldown_until = None;
            st.committed_tick = seq;
            st.last_known = Some(snapshot);
            return;
        }

        let tick_diff = diff::diff_snapshots(&DiffInput {
            previous: &prev,
            current: &snapshot,
            fresh: &fresh,
            initialized: &st.initialized,
            junk_markers: &config.junk_class_markers,
        });
        let mut records = tick_diff.records;

        if let Some(delta) = tick_diff.category_change {
            let validated = match delta {
                CategoryDelta::Changed { added, removed } => {
                    confirm_category_change(
                        host.as_ref(),
                        &prev.categories,
                        &snapshot.categories,
                        added,
                        removed,
                    )
                    .await
                }
                other => other,
            };
            match validated {
                CategoryDelta::Unchanged => {}
                CategoryDelta::Changed { added, removed } => {
                    records.push(ChangeRecord::new(
                        ItemField::Categories,
                        ChangeDetail::Categories { added, removed },
                        Classification::PropertyEdit,
                    ));
                }
                CategoryDelta::Inconsistent { overlap } => {
                    warn!(tick = seq, ?overlap, "torn category read, engaging cooldown");
                    st.category_cooldown_until = Some(
                        Instant::now() + Duration::from_secs(config.inconsistency_cooldown_secs),
                    );
                    let _ = events.send(MonitorEvent::Diagnostic {
                        tick: seq,
                        message: format!("category comparison inconsistent, overlap {overlap:?}"),
                    });
                    records.push(ChangeRecord::new(
                        ItemField::Categories,
                        ChangeDetail::CategoryInconsistency { overlap },
                        Classification::Diagnostic,
                    ));
                    // The flickering read is untrustworthy; keep comparing
                    // against the last-known list.
                    snapshot.categories = prev.categories.clone();
                }
            }
        }

        if !records.is_empty() {
            debug!(tick = seq, changes = records.len(), "changes detected");
            let _ = events.send(MonitorEvent::TickCompleted {
                tick: seq,
                records,
            });
        }

        // Always advance state, change detected or not.
        st.initialized.extend(fresh);
        st.committed_tick = seq;
        st.last_known = Some(snapshot);
    }

    async fn handle_disappearance(
        state: &Arc<Mutex<MonitorState>>,
        events: &broadcast::Sender<MonitorEvent>,
    ) {
        let mut st = state.lock().await;
        if st.phase == Phase::Idle {
            return;
        }

        let last_item = st.last_known.take().and_then(|snapshot| snapshot.item_id);
        st.reset();
        drop(st);

        if let Some(last_item) = last_item {
            warn!(item = %last_item, "tracked item disappeared (possibly filed or deleted)");
            let record = ChangeRecord::new(
                ItemField::Identity,
                ChangeDetail::Disappeared { last_item },
                Classification::ItemDisappeared,
            );
            let _ = events.send(MonitorEvent::ItemDisappeared { record });
        }
    }
}

/// Re-read the categories once before reporting a change.
///
/// `added` comes from the in-round read; `removed` is recomputed against
/// the confirming read. A label that flickered in and out of the list
/// between the two reads therefore shows up in both derived lists and
/// trips the overlap guard in [`CategoryDelta::from_lists`].
async fn confirm_category_change(
    host: &dyn ItemHost,
    baseline: &[String],
    observed: &[String],
    added: Vec<String>,
    removed: Vec<String>,
) -> CategoryDelta {
    let confirmed = match host.categories().await {
        Ok(list) => list,
        // No second opinion available; report the single-read delta.
        Err(_) => return CategoryDelta::from_lists(added, removed),
    };

    let confirmed_set: HashSet<&String> = confirmed.iter().collect();
    let mut seen = HashSet::new();
    let removed: Vec<String> = baseline
        .iter()
        .chain(observed.iter())
        .filter(|label| seen.insert(*label) && !confirmed_set.contains(*label))
        .cloned()
        .collect();
    CategoryDelta::from_lists(added, removed)
}

fn field_reading(
    result: Result<FieldReading, HostError>,
    field: ItemField,
) -> Result<Option<FieldReading>, JobError> {
    match result {
        Ok(reading) => Ok(Some(reading)),
        // The whole item vanished mid-round; abort the capture.
        Err(HostError::ItemUnavailable) => Err(JobError::Failed("item unavailable".into())),
        // A single failed read holds the field at last-known for this tick.
        Err(HostError::ReadFailed(reason)) => {
            warn!(?field, %reason, "property read failed, holding last-known value");
            Ok(Some(FieldReading::Unavailable(field)))
        }
    }
}
