//! Integration tests for the property-change monitor
//!
//! These drive the monitor deterministically through `trigger_capture`
//! against the scriptable in-memory host, and assert on the broadcast
//! event stream.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;
    use tokio::time::sleep;

    use inboxwatch::config::MonitorConfig;
    use inboxwatch::host::{SimulatedHost, SimulatedItem};
    use inboxwatch::monitor::{
        ChangeDetail, Classification, ItemField, MonitorEvent, Phase, PropertyMonitor, Recipient,
    };

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_secs: 1,
            read_timeout_ms: 1000,
            capture_concurrency: 1,
            category_throttle_secs: 0,
            inconsistency_cooldown_secs: 30,
            junk_class_markers: vec!["Junk".to_string(), "Rules".to_string()],
        }
    }

    fn setup() -> (Arc<SimulatedHost>, PropertyMonitor) {
        let host = Arc::new(SimulatedHost::new());
        let monitor = PropertyMonitor::new(host.clone(), test_config());
        (host, monitor)
    }

    fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn tick_records(events: &[MonitorEvent]) -> Vec<&MonitorEvent> {
        events
            .iter()
            .filter(|event| matches!(event, MonitorEvent::TickCompleted { .. }))
            .collect()
    }

    #[tokio::test]
    async fn baseline_capture_emits_started_and_no_changes() {
        let (host, monitor) = setup();
        let mut events = monitor.subscribe();

        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        assert!(matches!(
            events.as_slice(),
            [MonitorEvent::Started { item_id: Some(id) }] if id == "I1"
        ));
        assert_eq!(monitor.phase().await, Phase::Active);
    }

    #[tokio::test]
    async fn category_and_recipient_changes_in_one_tick() {
        let (host, monitor) = setup();

        let mut item = SimulatedItem::message("I1", "C1", "Hello");
        item.to.push(Recipient::new("A", "a@x.com"));
        host.select_item(item);
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.update_item(|item| {
            item.categories.push("Urgent".to_string());
            item.to.push(Recipient::new("B", "b@x.com"));
        });
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(records.len(), 2, "exactly two change records");

        let categories = records
            .iter()
            .find(|r| r.field == ItemField::Categories)
            .expect("categories record");
        assert_eq!(
            categories.detail,
            ChangeDetail::Categories {
                added: vec!["Urgent".to_string()],
                removed: vec![],
            }
        );

        let to = records
            .iter()
            .find(|r| r.field == ItemField::To)
            .expect("to record");
        assert!(matches!(
            &to.detail,
            ChangeDetail::Recipients { field: ItemField::To, current } if current.len() == 2
        ));
    }

    #[tokio::test]
    async fn unchanged_item_produces_no_tick_events() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        monitor.trigger_capture().await;
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        assert!(tick_records(&events).is_empty());
    }

    #[tokio::test]
    async fn late_initialized_field_is_suppressed_on_its_first_read() {
        let (host, monitor) = setup();

        let mut item = SimulatedItem::message("I1", "C1", "Hello");
        item.categories.push("Red".to_string());
        host.select_item(item);

        // Baseline without categories: the read fails.
        host.fail_reads_of("categories");
        monitor.trigger_capture().await;
        host.clear_failures();

        // First successful read differs from the (never-captured) default,
        // but the field is uninitialized: no change event.
        let mut events = monitor.subscribe();
        monitor.trigger_capture().await;
        let first = drain(&mut events);
        assert!(tick_records(&first).is_empty(), "first read only establishes the baseline");

        // Now the field is initialized; a real mutation is reported.
        host.update_item(|item| item.categories.push("Blue".to_string()));
        monitor.trigger_capture().await;
        let second = drain(&mut events);
        let ticks = tick_records(&second);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(
            records[0].detail,
            ChangeDetail::Categories {
                added: vec!["Blue".to_string()],
                removed: vec![],
            }
        );
    }

    #[tokio::test]
    async fn failed_read_holds_field_at_last_known_value() {
        let (host, monitor) = setup();

        let mut item = SimulatedItem::message("I1", "C1", "Hello");
        item.categories.push("Red".to_string());
        host.select_item(item);
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.update_item(|item| item.categories.push("Blue".to_string()));
        host.fail_reads_of("categories");
        monitor.trigger_capture().await;
        assert!(
            tick_records(&drain(&mut events)).is_empty(),
            "failed read must not produce a change"
        );

        host.clear_failures();
        monitor.trigger_capture().await;
        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1, "change detected once the read succeeds");
    }

    #[tokio::test]
    async fn item_switch_resets_and_classifies_reply() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.select_item(SimulatedItem::message("I2", "C1", "RE: Hello"));
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        assert!(matches!(
            &events[0],
            MonitorEvent::Reset { previous_item: Some(p), current_item: Some(c) }
                if p == "I1" && c == "I2"
        ));
        let MonitorEvent::TickCompleted { records, .. } = &events[1] else {
            panic!("expected tick event after reset");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, Classification::Reply);
        assert!(matches!(
            &records[0].detail,
            ChangeDetail::ItemSwitch { previous_item: Some(p), current_item: Some(c), .. }
                if p == "I1" && c == "I2"
        ));

        // The new item became the baseline: editing it diffs against I2.
        let mut events = monitor.subscribe();
        host.update_item(|item| item.subject = "RE: Hello (edited)".to_string());
        monitor.trigger_capture().await;
        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert!(matches!(
            &records[0].detail,
            ChangeDetail::Subject { previous, .. } if previous == "RE: Hello"
        ));
    }

    #[tokio::test]
    async fn unrelated_item_switch_is_classified_new_message() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.select_item(SimulatedItem::message("I9", "C9", "Budget"));
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(records[0].classification, Classification::NewMessage);
    }

    #[tokio::test]
    async fn disappearance_transitions_to_idle_with_record() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.clear_item();
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        let MonitorEvent::ItemDisappeared { record } = &events[0] else {
            panic!("expected disappearance event");
        };
        assert_eq!(record.classification, Classification::ItemDisappeared);
        assert!(matches!(
            &record.detail,
            ChangeDetail::Disappeared { last_item } if last_item == "I1"
        ));
        assert_eq!(monitor.phase().await, Phase::Idle);
        assert!(monitor.last_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn junk_item_class_change_is_flagged_possibly_filed() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.update_item(|item| item.item_class = "IPM.Note.Rules.OofTemplate".to_string());
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(records[0].classification, Classification::PossiblyFiled);
    }

    #[tokio::test]
    async fn torn_category_read_is_suppressed_and_cools_down() {
        let host = Arc::new(SimulatedHost::new());
        let mut config = test_config();
        config.inconsistency_cooldown_secs = 3600;
        let monitor = PropertyMonitor::new(host.clone(), config);

        let mut item = SimulatedItem::message("I1", "C1", "Hello");
        item.categories.push("Red".to_string());
        host.select_item(item);
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.update_item(|item| item.categories.push("Blue".to_string()));
        // The label vanishes between the round read and the confirming
        // read, so the derived added/removed lists overlap.
        host.mutate_after_read("categories", 1, |item| {
            item.categories.retain(|label| label != "Blue");
        });
        monitor.trigger_capture().await;

        let torn_events = drain(&mut events);
        assert!(
            torn_events.iter().any(|e| matches!(
                e,
                MonitorEvent::Diagnostic { message, .. } if message.contains("inconsistent")
            )),
            "torn read surfaces as a diagnostic event"
        );
        let ticks = tick_records(&torn_events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].classification, Classification::Diagnostic);
        assert!(matches!(
            &records[0].detail,
            ChangeDetail::CategoryInconsistency { overlap } if overlap == &vec!["Blue".to_string()]
        ));
        let snapshot = monitor.last_snapshot().await.expect("committed snapshot");
        assert_eq!(
            snapshot.categories,
            vec!["Red".to_string()],
            "suppressed change keeps the last-known list"
        );

        // The cooldown suppresses the category read entirely on the next
        // tick, so a real change stays invisible until it elapses.
        host.take_read_log();
        host.update_item(|item| item.categories.push("Green".to_string()));
        monitor.trigger_capture().await;
        assert!(!host.take_read_log().contains(&"categories"));
        assert!(tick_records(&drain(&mut events)).is_empty());
    }

    #[tokio::test]
    async fn throttled_category_read_is_skipped() {
        let host = Arc::new(SimulatedHost::new());
        let mut config = test_config();
        config.category_throttle_secs = 3600;
        let monitor = PropertyMonitor::new(host.clone(), config);

        let mut item = SimulatedItem::message("I1", "C1", "Hello");
        item.categories.push("Red".to_string());
        host.select_item(item);
        monitor.trigger_capture().await;

        let mut events = monitor.subscribe();
        host.update_item(|item| {
            item.categories.push("Blue".to_string());
            item.subject = "Hello again".to_string();
        });
        monitor.trigger_capture().await;

        let events = drain(&mut events);
        let ticks = tick_records(&events);
        assert_eq!(ticks.len(), 1);
        let MonitorEvent::TickCompleted { records, .. } = ticks[0] else {
            panic!("expected tick event");
        };
        assert_eq!(records.len(), 1, "only the subject change is visible");
        assert_eq!(records[0].field, ItemField::Subject);
    }

    #[tokio::test]
    async fn capture_reads_run_in_fixed_order() {
        let (host, monitor) = setup();
        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        host.take_read_log();

        monitor.trigger_capture().await;

        assert_eq!(
            host.take_read_log(),
            vec!["subject", "categories", "sender", "to", "cc", "bcc", "attachments"],
        );
    }

    #[tokio::test]
    async fn stale_capture_never_overwrites_newer_state() {
        let (host, monitor) = setup();
        let monitor = Arc::new(monitor);
        let mut events = monitor.subscribe();

        host.select_item(SimulatedItem::message("I1", "C1", "v1"));
        host.set_read_latency(Duration::from_millis(100));

        let slow = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.trigger_capture().await })
        };
        sleep(Duration::from_millis(30)).await;

        // A faster out-of-cycle capture starts later and finishes first.
        host.clear_read_latency();
        host.update_item(|item| item.subject = "v2".to_string());
        monitor.trigger_capture().await;
        slow.await.expect("slow capture task");

        let events = drain(&mut events);
        let started: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::Started { .. }))
            .collect();
        assert_eq!(started.len(), 1, "only the newer capture commits a baseline");
        assert!(
            events.iter().any(|e| matches!(
                e,
                MonitorEvent::Diagnostic { message, .. } if message.contains("stale")
            )),
            "the out-of-order capture is dropped with a diagnostic"
        );

        let snapshot = monitor.last_snapshot().await.expect("committed snapshot");
        assert_eq!(snapshot.subject, "v2");
    }

    #[tokio::test]
    async fn polling_loop_detects_changes_and_stops_cleanly() {
        let (host, monitor) = setup();
        let mut events = monitor.subscribe();

        host.select_item(SimulatedItem::message("I1", "C1", "Hello"));
        monitor.start().await.expect("start monitor");
        monitor.start().await.expect("second start is a no-op");
        assert!(monitor.is_running().await);

        sleep(Duration::from_millis(1500)).await;
        host.update_item(|item| item.subject = "Hello again".to_string());
        sleep(Duration::from_millis(1500)).await;

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        assert_eq!(monitor.phase().await, Phase::Idle);

        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, MonitorEvent::Started { .. })));
        assert!(!tick_records(&events).is_empty(), "subject change observed by the loop");
        assert!(matches!(events.last(), Some(MonitorEvent::Stopped)));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_on_start() {
        let host = Arc::new(SimulatedHost::new());
        let mut config = test_config();
        config.poll_interval_secs = 0;
        let monitor = PropertyMonitor::new(host, config);
        assert!(monitor.start().await.is_err());
    }
}
