// ABOUTME: EPG lookup helpers layered on top of the RPC client's generic call()
// ABOUTME: Implements the ±5-minute window search getEpgDetails relies on

use crate::htsmsg::Value;
use crate::{Error, Result};

/// Window search slack applied on both sides of the requested interval.
pub const EPG_TIME_THRESHOLD: i64 = 5 * 60;

/// One page of `getEvents`, the only fields the window search reads.
struct EventsPage {
    events: Vec<Value>,
}

fn parse_page(response: &Value) -> EventsPage {
    let events = response
        .get("events")
        .and_then(Value::as_list)
        .map(|list| list.to_vec())
        .unwrap_or_default();
    EventsPage { events }
}

/// Runs the windowed EPG search: repeatedly calls `fetch_page` (a thin
/// wrapper around `getEvents`) until a batch either yields a match or
/// fails to advance past the window, per the documented termination rule.
///
/// `fetch_page(event_id_cursor, max_time) -> Map` is injected so this
/// function stays free of any RPC client dependency and is unit-testable
/// against canned pages.
pub async fn search_epg_details<F, Fut>(
    start: i64,
    stop: Option<i64>,
    title: Option<&str>,
    mut fetch_page: F,
) -> Result<Value>
where
    F: FnMut(Option<i64>, Option<i64>) -> Fut,
    Fut: std::future::Future<Output = Result<Value>>,
{
    let start_min = start - EPG_TIME_THRESHOLD;
    let end_max = stop.map(|s| s + EPG_TIME_THRESHOLD);

    let mut event_id_cursor: Option<i64> = None;

    loop {
        let response = fetch_page(event_id_cursor, end_max).await?;
        let page = parse_page(&response);

        if page.events.is_empty() {
            return Err(Error::Value("no EPG event matches the given criteria".into()));
        }

        let first_stop = page.events[0].get("stop").and_then(Value::as_i64);
        let precedes_window = matches!(first_stop, Some(stop) if stop <= start_min);

        if !precedes_window {
            return match_event(&page.events, start_min, end_max, title);
        }

        let last = page.events.last().unwrap();
        let last_start = last.get("start").and_then(Value::as_i64);
        let next_event_id = last.get("nextEventId").and_then(Value::as_i64);

        match (last_start, next_event_id) {
            (Some(last_start), Some(next_id)) if last_start < start_min => {
                event_id_cursor = Some(next_id);
            }
            _ => return match_event(&page.events, start_min, end_max, title),
        }
    }
}

/// First event whose `start > start_min` and `stop < end_max` and whose
/// title matches (when a title filter was supplied).
fn match_event(
    events: &[Value],
    start_min: i64,
    end_max: Option<i64>,
    title: Option<&str>,
) -> Result<Value> {
    for event in events {
        let title_matches = match title {
            None => true,
            Some(expected) => event.get("title").and_then(Value::as_str) == Some(expected),
        };
        if !title_matches {
            continue;
        }

        let start = event.get("start").and_then(Value::as_i64);
        let stop = event.get("stop").and_then(Value::as_i64);
        let in_window = match (start, stop, end_max) {
            (Some(start), Some(stop), Some(end_max)) => start > start_min && stop < end_max,
            (Some(start), Some(_), None) => start > start_min,
            _ => false,
        };

        if in_window {
            return Ok(event.clone());
        }
    }

    Err(Error::Value("no EPG event matches the given criteria".into()))
}
