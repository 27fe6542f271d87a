// ABOUTME: Example application wiring the HTSP client and PVR manager against an in-memory catalogue
// ABOUTME: Connects to a real Tvheadend server and prints catalogue changes as they arrive

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use argh::FromArgs;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use htsp_pvr_core::collab::{Catalogue, CatalogueError, TaskQueue};
use htsp_pvr_core::config::{Config, IpFamily};
use htsp_pvr_core::manager::recording::RecordingEntry;
use htsp_pvr_core::manager::PvrManager;
use htsp_pvr_core::rpc::HtspClient;

/// Example application syncing a Tvheadend server's DVR catalogue to stdout
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the hostname or IP address of the Tvheadend server (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// the HTSP port to connect to (default: 9982)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// the HTSP username
    #[argh(option)]
    user: Option<String>,

    /// the HTSP password
    #[argh(option)]
    password: Option<String>,
}

/// Minimal in-process catalogue keyed by resource URL, standing in for the
/// host application's container model and database layer.
struct MemoryCatalogue(Mutex<HashMap<String, RecordingEntry>>);

impl Catalogue for MemoryCatalogue {
    fn load_by_resource(&self, resource: &str) -> Result<RecordingEntry, CatalogueError> {
        self.0
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .ok_or_else(|| CatalogueError::NotFound(resource.to_string()))
    }

    fn create(&self) -> RecordingEntry {
        RecordingEntry::default()
    }

    fn save(&self, entry: &RecordingEntry) -> Result<(), CatalogueError> {
        self.0.lock().unwrap().insert(entry.resource.clone(), entry.clone());
        Ok(())
    }

    fn list_resources(&self) -> Vec<String> {
        self.0.lock().unwrap().keys().cloned().collect()
    }

    fn container_add(&self, entry: &RecordingEntry) {
        println!("added to catalogue: {} ({})", entry.title, entry.resource);
    }
}

/// Runs deferred work inline, on the current tokio runtime, the moment it is
/// scheduled. A host application would batch and dedup by `key`; this demo
/// only needs to observe the work happening.
struct InlineTaskQueue;

impl TaskQueue for InlineTaskQueue {
    fn add(&self, key: &str, task: Box<dyn FnOnce() + Send>, _priority: i32) {
        tracing::debug!(key, "running scheduled task inline");
        task();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let host = cli_args.host.unwrap_or_else(|| "localhost".to_string());
    let port = cli_args.port.unwrap_or(9982);

    let config = Config {
        enabled: true,
        listener_address: format!("{host}:{port}"),
        ip_family: IpFamily::V4,
        user: cli_args.user,
        password: cli_args.password,
        ..Config::default()
    };

    let client = HtspClient::new(config);
    let catalogue = Arc::new(MemoryCatalogue(Mutex::new(HashMap::new())));
    let task_queue = Arc::new(InlineTaskQueue);

    let manager = PvrManager::new(client.clone(), catalogue, task_queue, "tvheadend-demo", None);
    manager.start().await?;

    tracing::info!("connected, syncing catalogue; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    client.stop().await?;
    Ok(())
}
