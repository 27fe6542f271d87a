// ABOUTME: Narrow trait boundaries toward the surrounding media-server framework
// ABOUTME: The container model, task queue and database layer are consumed, not owned, here

use crate::htsmsg::Value;
use crate::manager::recording::{RecordingDetails, RecordingEntry};

/// Deferred work queue the manager schedules refresh/delete work onto.
/// `key` is the task's dedup key: re-adding the same key before it runs
/// collapses into one queued task, matching the original's task-queue
/// dedup semantics.
pub trait TaskQueue: Send + Sync {
    fn add(&self, key: &str, task: Box<dyn FnOnce() + Send>, priority: i32);
}

/// Error surfaced by catalogue lookups. `NotFound` is not exceptional to
/// the manager; it is the signal to create a new entry.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("no catalogue entry for resource {0}")]
    NotFound(String),
    #[error("catalogue store error: {0}")]
    Store(String),
}

/// The host application's recording catalogue (content/container model and
/// database layer), addressed only through resource URLs and
/// [`RecordingEntry`] values.
pub trait Catalogue: Send + Sync {
    fn load_by_resource(&self, resource: &str) -> Result<RecordingEntry, CatalogueError>;
    fn create(&self) -> RecordingEntry;
    fn save(&self, entry: &RecordingEntry) -> Result<(), CatalogueError>;
    fn list_resources(&self) -> Vec<String>;
    fn container_add(&self, entry: &RecordingEntry);
}

/// External hook consulted in place of the built-in title/subtitle
/// composition rules when the host opts in via
/// `mp_tvheadend_recording_details_custom_processing`. Returning `None`
/// (the hook declining, or no hook installed) falls back to
/// [`crate::manager::recording::process_details`].
pub trait RecordingDetailsProcessor: Send + Sync {
    fn process(&self, event_or_epg: &Value) -> Option<RecordingDetails>;
}
