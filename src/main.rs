use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::sleep;
use tracing::info;

use inboxwatch::cli::Cli;
use inboxwatch::config::ConfigManager;
use inboxwatch::host::{SimulatedHost, SimulatedItem};
use inboxwatch::monitor::{detect_compose_action_for, MonitorEvent, PropertyMonitor, Recipient};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let config_dir = cli
        .config_dir
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("inboxwatch")))
        .unwrap_or_else(|| PathBuf::from("."));
    let manager = ConfigManager::new(&config_dir)?;

    let mut config = manager.monitor_config().clone();
    // The demo scenario mutates quickly; poll and re-check categories at
    // demo pace unless an interval was given explicitly.
    config.poll_interval_secs = cli.interval_secs.unwrap_or(1);
    config.category_throttle_secs = 0;

    let host = Arc::new(SimulatedHost::new());
    let monitor = Arc::new(PropertyMonitor::new(host.clone(), config));

    // Logging collaborator: report every change record as it arrives.
    let mut events = monitor.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                MonitorEvent::TickCompleted { tick, records } => {
                    info!(tick, changes = records.len(), "tick produced changes");
                    for record in records {
                        let json = serde_json::to_string(&record).unwrap_or_default();
                        info!(record = %json, "change record");
                    }
                }
                MonitorEvent::Stopped => break,
                other => info!(event = ?other, "monitor event"),
            }
        }
    });

    monitor.start().await?;

    // Scripted mailbox activity.
    let step = Duration::from_secs(2);

    let mut item = SimulatedItem::message("I1", "C1", "Quarterly numbers");
    item.to.push(Recipient::new("Alice", "alice@example.com"));
    host.select_item(item);
    sleep(step).await;

    host.update_item(|item| item.categories.push("Urgent".to_string()));
    sleep(step).await;

    host.update_item(|item| {
        item.to.push(Recipient::new("Bob", "bob@example.com"));
        item.is_read = true;
    });
    sleep(step).await;

    // User opens the reply in the same conversation.
    host.select_item(SimulatedItem::message("I2", "C1", "RE: Quarterly numbers"));
    sleep(step).await;

    // Compose-action heuristic on a reply draft.
    host.update_item(|item| {
        item.body_text = "Sounds good.\n\n-----Original Message-----\nFrom: alice@example.com".into();
    });
    let action = detect_compose_action_for(host.as_ref(), Some("C1")).await?;
    info!(?action, "compose action detected");

    // The item gets filed away.
    host.clear_item();
    sleep(step).await;

    let elapsed = step * 5;
    let total = Duration::from_secs(cli.run_secs);
    if total > elapsed {
        sleep(total - elapsed).await;
    }

    monitor.stop().await;
    let _ = reporter.await;

    Ok(())
}
