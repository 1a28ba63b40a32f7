//! Operator settings, parsed from flags with environment fallbacks.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Kubernetes controller for CSI volume group snapshots", long_about = None)]
pub struct Settings {
    /// Reconcile workers per resource queue
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Initial per-key retry delay after a failed reconcile
    #[arg(long, env = "RETRY_INTERVAL_START", default_value = "1s", value_parser = humantime::parse_duration)]
    pub retry_interval_start: Duration,

    /// Upper bound on the per-key retry delay
    #[arg(long, env = "RETRY_INTERVAL_MAX", default_value = "5m", value_parser = humantime::parse_duration)]
    pub retry_interval_max: Duration,

    /// Interval between full re-enqueues of every known object
    #[arg(long, env = "RESYNC", default_value = "10m", value_parser = humantime::parse_duration)]
    pub resync: Duration,

    /// Component name stamped on emitted Kubernetes events
    #[arg(long, env = "EVENT_COMPONENT", default_value = "group-snapshot-controller")]
    pub event_component: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            workers: 4,
            retry_interval_start: Duration::from_secs(1),
            retry_interval_max: Duration::from_secs(300),
            resync: Duration::from_secs(600),
            event_component: "group-snapshot-controller".to_string(),
        }
    }
}
