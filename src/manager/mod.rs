// ABOUTME: PVR/DVR catalogue synchronization manager (C4)
// ABOUTME: Subscribes to server events, reconciles the local catalogue, schedules refresh/delete work

pub mod recording;

use std::sync::{Arc, Mutex};

use crate::collab::{Catalogue, CatalogueError, RecordingDetailsProcessor, TaskQueue};
use crate::htsmsg::Value;
use crate::rpc::events::{EventHandler, HtspEvent};
use crate::rpc::HtspClient;

use recording::{process_details, RecordingDetails, RecordingEntry, RecordingStatus};

const VFS_SCHEME: &str = "x-tvheadend";

pub fn resource_url(dvr_id: i64) -> String {
    format!("{VFS_SCHEME}:///{dvr_id}")
}

/// `recordings_cache` has two states: an accumulating list while initial
/// sync is in progress, and the null sentinel afterward.
enum RecordingsCache {
    Syncing(Vec<String>),
    PostSync,
}

struct ManagerState {
    cache: RecordingsCache,
}

/// Drives catalogue reconciliation from the HTSP client's server-event
/// stream. Holds an `Arc` to its collaborators so it can be registered as
/// an [`EventHandler`] and still be driven independently (e.g. for tests).
pub struct PvrManager {
    client: HtspClient,
    catalogue: Arc<dyn Catalogue>,
    task_queue: Arc<dyn TaskQueue>,
    recorder_name: String,
    details_processor: Option<Arc<dyn RecordingDetailsProcessor>>,
    state: Mutex<ManagerState>,
}

impl PvrManager {
    /// `recorder_name` is stamped onto every newly created catalogue entry,
    /// identifying which manager instance created it. `details_processor`
    /// is consulted ahead of the built-in detail-composition rules when the
    /// client's `custom_processing` setting is enabled.
    pub fn new(
        client: HtspClient,
        catalogue: Arc<dyn Catalogue>,
        task_queue: Arc<dyn TaskQueue>,
        recorder_name: impl Into<String>,
        details_processor: Option<Arc<dyn RecordingDetailsProcessor>>,
    ) -> Arc<PvrManager> {
        Arc::new(PvrManager {
            client,
            catalogue,
            task_queue,
            recorder_name: recorder_name.into(),
            details_processor,
            state: Mutex::new(ManagerState {
                cache: RecordingsCache::Syncing(Vec::new()),
            }),
        })
    }

    /// Subscribes this manager to the client's event stream and kicks off
    /// initial sync. Returns the manager so the caller can hold the same
    /// `Arc` both as an `EventHandler` subscription and for direct calls
    /// (e.g. tests driving `handle_event` without a live socket).
    pub async fn start(self: &Arc<Self>) -> crate::Result<()> {
        self.client.subscribe(self.clone() as Arc<dyn EventHandler>);
        self.client.enable_async_metadata().await
    }

    /// Processes one server event. Public (not just the `EventHandler`
    /// impl) so tests can drive reconciliation without a live connection.
    pub fn handle_event(&self, event: &HtspEvent) {
        match event.method.as_str() {
            "dvrEntryAdd" | "dvrEntryUpdate" => self.handle_dvr_upsert(event),
            "dvrEntryDelete" => self.handle_dvr_delete(event),
            "initialSyncCompleted" => self.handle_initial_sync_completed(),
            _ => {}
        }
    }

    fn handle_dvr_upsert(&self, event: &HtspEvent) {
        let Some(id) = event.field("id").and_then(Value::as_i64) else {
            tracing::warn!("dvrEntry event missing id");
            return;
        };
        let resource = resource_url(id);

        {
            let mut state = self.state.lock().unwrap();
            if let RecordingsCache::Syncing(ref mut seen) = state.cache {
                if !seen.contains(&resource) {
                    seen.push(resource.clone());
                }
            }
        }

        let client = self.client.clone();
        let catalogue = self.catalogue.clone();
        let recorder_name = self.recorder_name.clone();
        let details_processor = self.details_processor.clone();
        let fields = event.fields.clone();
        let resource_for_task = resource.clone();
        self.task_queue.add(
            &format!("tvheadend-refresh-{id}"),
            Box::new(move || {
                tokio::spawn(refresh_recording(
                    client,
                    catalogue,
                    resource_for_task,
                    id,
                    fields,
                    recorder_name,
                    details_processor,
                ));
            }),
            0,
        );
    }

    fn handle_dvr_delete(&self, event: &HtspEvent) {
        let Some(id) = event.field("id").and_then(Value::as_i64) else {
            tracing::warn!("dvrEntryDelete event missing id");
            return;
        };
        let resource = resource_url(id);

        {
            let mut state = self.state.lock().unwrap();
            if let RecordingsCache::Syncing(ref mut seen) = state.cache {
                seen.retain(|r| r != &resource);
            }
        }

        schedule_delete(&self.task_queue, &resource);
    }

    fn handle_initial_sync_completed(&self) {
        let seen = {
            let mut state = self.state.lock().unwrap();
            let seen = match std::mem::replace(&mut state.cache, RecordingsCache::PostSync) {
                RecordingsCache::Syncing(seen) => seen,
                RecordingsCache::PostSync => Vec::new(),
            };
            seen
        };

        let catalogued = self.catalogue.list_resources();
        let mut orphaned = 0;
        let mut retained = 0;
        for resource in catalogued {
            if seen.contains(&resource) {
                retained += 1;
            } else {
                orphaned += 1;
                schedule_delete(&self.task_queue, &resource);
            }
        }

        tracing::info!(orphaned, retained, "initial sync reconciliation complete");
    }
}

impl EventHandler for PvrManager {
    fn handle(&self, event: &HtspEvent) {
        self.handle_event(event);
    }
}

fn schedule_delete(task_queue: &Arc<dyn TaskQueue>, resource: &str) {
    let resource = resource.to_string();
    task_queue.add(
        &format!("tvheadend-delete-{resource}"),
        Box::new(move || {
            tracing::info!(resource = %resource, "scheduled recording deletion");
        }),
        0,
    );
}

/// Resolves recording details for one DVR id (falling back to the server's
/// EPG lookups when the event didn't carry them), then upserts the
/// catalogue entry. Runs on the task queue, off the reader task.
async fn refresh_recording(
    client: HtspClient,
    catalogue: Arc<dyn Catalogue>,
    resource: String,
    dvr_id: i64,
    event: Value,
    recorder_name: String,
    details_processor: Option<Arc<dyn RecordingDetailsProcessor>>,
) {
    if let Err(err) = refresh_recording_inner(
        client,
        catalogue,
        resource,
        dvr_id,
        event,
        recorder_name,
        details_processor,
    )
    .await
    {
        tracing::error!(dvr_id, error = %err, "recording refresh failed");
    }
}

async fn refresh_recording_inner(
    client: HtspClient,
    catalogue: Arc<dyn Catalogue>,
    resource: String,
    dvr_id: i64,
    event: Value,
    recorder_name: String,
    details_processor: Option<Arc<dyn RecordingDetailsProcessor>>,
) -> crate::Result<()> {
    let status = event
        .get("state")
        .and_then(Value::as_str)
        .map(RecordingStatus::from_state)
        .unwrap_or(RecordingStatus::Unknown);

    let has_inline_details = event.has("description") || event.has("subtitle") || event.has("summary");
    let detail_source = if has_inline_details {
        event.clone()
    } else {
        resolve_epg_details(&client, &event).await.unwrap_or_else(|_| event.clone())
    };

    let details = if client.custom_processing() {
        details_processor
            .as_ref()
            .and_then(|hook| hook.process(&detail_source))
            .unwrap_or_else(|| process_details(&detail_source))
    } else {
        process_details(&detail_source)
    };

    let duration = event.get("stop").and_then(Value::as_i64).unwrap_or(0)
        - event.get("start").and_then(Value::as_i64).unwrap_or(0);
    let time_started = event.get("start").and_then(Value::as_i64).unwrap_or(0);
    let time_finished = event.get("stop").and_then(Value::as_i64).unwrap_or(0);

    match catalogue.load_by_resource(&resource) {
        Ok(mut entry) => {
            let became_finished = entry.recording_status != RecordingStatus::Finished
                && status == RecordingStatus::Finished;
            entry.recording_status = status;
            entry.refreshable = became_finished && entry.refreshable;
            entry.title = details.title;
            entry.resource_title = details.resource_title;
            entry.series = details.series;
            entry.summary = details.summary;
            entry.description = details.description;
            entry.episode = details.episode;
            entry.duration = duration;
            entry.time_started = time_started;
            entry.time_finished = time_finished;
            entry.time_sortable = time_started;
            catalogue.save(&entry).map_err(catalogue_error)?;

            if entry.refreshable {
                tracing::debug!(dvr_id, "recording became refreshable");
            }
        }
        Err(CatalogueError::NotFound(_)) => {
            let mut entry = catalogue.create();
            entry.resource = resource;
            entry.recorder = recorder_name;
            entry.recording_status = status;
            entry.refreshable = status == RecordingStatus::Finished;
            entry.title = details.title;
            entry.resource_title = details.resource_title;
            entry.series = details.series;
            entry.summary = details.summary;
            entry.description = details.description;
            entry.episode = details.episode;
            entry.duration = duration;
            entry.time_started = time_started;
            entry.time_finished = time_finished;
            entry.time_sortable = time_started;
            if let Some(channel_id) = event.get("channel").and_then(Value::as_i64) {
                entry.channel = client.get_channel_name(channel_id).await.ok();
            }
            catalogue.save(&entry).map_err(catalogue_error)?;
            catalogue.container_add(&entry);
        }
        Err(other) => return Err(catalogue_error(other)),
    }

    Ok(())
}

async fn resolve_epg_details(client: &HtspClient, event: &Value) -> crate::Result<Value> {
    let stop = event.get("stop").and_then(Value::as_i64);
    let now_or_future = stop.is_none_or(|stop| stop > time_now());

    if let (Some(event_id), true) = (event.get("eventId").and_then(Value::as_i64), now_or_future) {
        if let Ok(details) = client.get_epg_event_details(event_id).await {
            return Ok(details);
        }
    }

    let channel = event.get("channel").and_then(Value::as_i64);
    let start = event.get("start").and_then(Value::as_i64);
    if let (Some(channel), Some(start)) = (channel, start) {
        let title = event.get("title").and_then(Value::as_str);
        return client.get_epg_details(channel, start, stop, title).await;
    }

    Err(crate::Error::NotFound)
}

fn time_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn catalogue_error(err: CatalogueError) -> crate::Error {
    crate::Error::Value(err.to_string())
}
