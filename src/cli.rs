use std::path::PathBuf;

use clap::Parser;

/// Inboxwatch - mailbox item activity monitor
#[derive(Parser)]
#[command(name = "inboxwatch")]
#[command(about = "Watches the selected mailbox item and reports property changes")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Configuration directory path
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Override the polling interval in seconds
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Seconds to let the demo scenario run before stopping
    #[arg(long, default_value_t = 12)]
    pub run_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_without_arguments() {
        let cli = Cli::parse_from(["inboxwatch"]);
        assert!(!cli.debug);
        assert!(cli.config_dir.is_none());
        assert!(cli.interval_secs.is_none());
        assert_eq!(cli.run_secs, 12);
    }

    #[test]
    fn interval_override_parses() {
        let cli = Cli::parse_from(["inboxwatch", "--interval-secs", "2", "--debug"]);
        assert_eq!(cli.interval_secs, Some(2));
        assert!(cli.debug);
    }
}
