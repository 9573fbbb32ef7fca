//! Converting query rows back into events.

use std::collections::HashSet;

use metrics::counter;
use pensieve_core::Event;

use crate::store::QueryRow;

/// Events assembled from one result set.
#[derive(Debug, Default)]
pub struct Assembled {
    /// Events in row order.
    pub events: Vec<Event>,
    /// Rows whose tag payload could not be parsed and were given empty tags.
    pub recovered: usize,
}

/// Parse a row's tag payload. `None` when it is not an array of string arrays.
fn parse_tags(row: &QueryRow) -> Option<Vec<Vec<String>>> {
    if row.tags_json.is_empty() {
        return Some(Vec::new());
    }
    serde_json::from_str(&row.tags_json).ok()
}

/// Convert rows into events.
///
/// A row whose tags fail to parse still produces an event, with empty tags.
/// The failure is logged and counted but never aborts the result set.
pub fn assemble(rows: Vec<QueryRow>) -> Assembled {
    let mut assembled = Assembled {
        events: Vec::with_capacity(rows.len()),
        recovered: 0,
    };

    for row in rows {
        let tags = match parse_tags(&row) {
            Some(tags) => tags,
            None => {
                tracing::warn!(
                    id = %row.id,
                    payload_len = row.tags_json.len(),
                    "failed to parse stored tags, returning event without tags"
                );
                counter!("store_tag_parse_errors_total").increment(1);
                assembled.recovered += 1;
                Vec::new()
            }
        };

        assembled.events.push(Event {
            id: row.id,
            pubkey: row.pubkey,
            created_at: row.created_at,
            kind: row.kind,
            tags,
            content: row.content,
            sig: row.sig,
        });
    }

    assembled
}

/// Drop events whose id was already seen, keeping the first occurrence in place.
pub fn dedupe_by_id(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|event| seen.insert(event.id.clone()))
        .collect()
}
