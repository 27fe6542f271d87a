// ABOUTME: Recording entry model and the pure detail-processing rules the refresh task applies
// ABOUTME: No RPC or catalogue access here; see manager::mod for the task that calls into both

use crate::htsmsg::Value;

/// Closed set of recording lifecycle states a DVR entry can be in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    #[default]
    Unknown,
    Planned,
    Recording,
    Finished,
    Failed,
}

impl RecordingStatus {
    /// Maps the server's `dvrEntry*` `state` field to a status:
    /// `completed→Finished, missed→Failed, recording→Recording,
    /// scheduled→Planned`, anything else `Unknown`.
    pub fn from_state(state: &str) -> RecordingStatus {
        match state {
            "completed" => RecordingStatus::Finished,
            "missed" => RecordingStatus::Failed,
            "recording" => RecordingStatus::Recording,
            "scheduled" => RecordingStatus::Planned,
            _ => RecordingStatus::Unknown,
        }
    }
}

/// A locally catalogued recording, keyed externally by `resource`.
#[derive(Debug, Clone, Default)]
pub struct RecordingEntry {
    pub resource: String,
    pub title: String,
    pub resource_title: String,
    pub series: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub episode: Option<i64>,
    pub channel: Option<String>,
    pub duration: i64,
    pub time_started: i64,
    pub time_finished: i64,
    pub time_sortable: i64,
    pub recording_status: RecordingStatus,
    pub refreshable: bool,
    pub recorder: String,
}

/// Canonicalized fields derived from a `dvrEntryAdd`/`dvrEntryUpdate`
/// event plus whatever EPG detail the manager resolved for it.
#[derive(Debug, Clone, Default)]
pub struct RecordingDetails {
    pub title: String,
    pub resource_title: String,
    pub series: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub episode: Option<i64>,
}

/// Applies the title/subtitle composition and summary fallback rules:
/// a `subtitle` becomes `"{title} - {subtitle}"` with the original title
/// preserved as `resource_title`; otherwise `resource_title` mirrors
/// `title`. `summary` falls back to `subtitle` when the event carries no
/// summary of its own.
pub fn process_details(event_or_epg: &Value) -> RecordingDetails {
    let title = event_or_epg.get("title").and_then(Value::as_str).unwrap_or("").to_string();
    let subtitle = event_or_epg.get("subtitle").and_then(Value::as_str);
    let summary = event_or_epg.get("summary").and_then(Value::as_str);

    let (display_title, resource_title) = match subtitle {
        Some(subtitle) => (format!("{title} - {subtitle}"), title.clone()),
        None => (title.clone(), title.clone()),
    };

    RecordingDetails {
        title: display_title,
        resource_title,
        series: event_or_epg.get("series").and_then(Value::as_str).map(str::to_string),
        summary: summary
            .or(subtitle)
            .map(str::to_string),
        description: event_or_epg.get("description").and_then(Value::as_str).map(str::to_string),
        episode: event_or_epg.get("episodeNumber").and_then(Value::as_i64),
    }
}
