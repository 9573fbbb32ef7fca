//! Row types exchanged with the storage engine.

use clickhouse::Row;
use pensieve_core::{Event, TagName, extract_tags};
use serde::{Deserialize, Serialize};

/// Row written to the `events` table.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct EventRow {
    pub id: String,
    pub pubkey: String,
    pub created_at: u32,
    pub kind: u16,
    pub content: String,
    pub sig: String,
    pub tags: Vec<Vec<String>>,
    pub tag_e: Vec<String>,
    pub tag_p: Vec<String>,
    pub tag_a: Vec<String>,
    pub tag_t: Vec<String>,
    /// Singular replaceable-event identifier (last `d` tag wins).
    pub tag_d: String,
    pub tag_g: Vec<String>,
    pub tag_r: Vec<String>,
    /// When this relay received the event, Unix seconds.
    pub relay_received_at: u32,
    /// Replacement version; the highest version per id is authoritative.
    pub version: u64,
    /// Soft-delete flag.
    pub deleted: u8,
}

impl EventRow {
    /// Build a row from an event, extracting the tag projections in one pass.
    pub fn from_event(event: Event, received_at: u32, version: u64) -> Self {
        let mut extracted = extract_tags(&event.tags);
        let tag_d = extracted.d_tag().to_string();

        Self {
            tag_e: extracted.take(TagName::E),
            tag_p: extracted.take(TagName::P),
            tag_a: extracted.take(TagName::A),
            tag_t: extracted.take(TagName::T),
            tag_d,
            tag_g: extracted.take(TagName::G),
            tag_r: extracted.take(TagName::R),
            id: event.id,
            pubkey: event.pubkey,
            created_at: event.created_at,
            kind: event.kind,
            content: event.content,
            sig: event.sig,
            tags: event.tags,
            relay_received_at: received_at,
            version,
            deleted: 0,
        }
    }
}

/// Row returned by an event query. Tags come back as a JSON string.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct QueryRow {
    pub id: String,
    pub pubkey: String,
    pub created_at: u32,
    pub kind: u16,
    pub content: String,
    pub sig: String,
    pub tags_json: String,
}

/// Aggregated engagement counters for one target event.
#[derive(Debug, Clone, Default, PartialEq, Row, Serialize, Deserialize)]
pub struct EngagementRow {
    pub event_id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u32,
    pub replies: u64,
    pub reactions: u64,
    pub reposts: u64,
    pub zaps: u64,
    pub zap_msats: u64,
}

/// Row written to the `hot_posts` table.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct HotPostRow {
    pub event_id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u32,
    pub score: f64,
    pub replies: u64,
    pub reactions: u64,
    pub reposts: u64,
    pub zaps: u64,
    pub zap_msats: u64,
    /// When the refresh that produced this row ran, Unix seconds.
    pub computed_at: u32,
    /// Identifies the refresh run; strictly increasing across runs.
    pub run_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tags: &[&[&str]]) -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind: 1,
            tags: tags
                .iter()
                .map(|t| t.iter().map(|s| s.to_string()).collect())
                .collect(),
            content: "hello".to_string(),
            sig: "c".repeat(128),
        }
    }

    #[test]
    fn test_event_row_projects_tags() {
        let row = EventRow::from_event(
            event(&[&["e", "abc"], &["p", "def"], &["e", "ghi"], &["d", "x"], &["d", "y"]]),
            10,
            20,
        );
        assert_eq!(row.tag_e, ["abc", "ghi"]);
        assert_eq!(row.tag_p, ["def"]);
        assert_eq!(row.tag_d, "y");
        assert!(row.tag_t.is_empty());
        assert_eq!(row.tags.len(), 5);
        assert_eq!(row.relay_received_at, 10);
        assert_eq!(row.version, 20);
        assert_eq!(row.deleted, 0);
    }

    #[test]
    fn test_event_row_keeps_event_fields() {
        let row = EventRow::from_event(event(&[]), 0, 1);
        assert_eq!(row.id, "a".repeat(64));
        assert_eq!(row.pubkey, "b".repeat(64));
        assert_eq!(row.created_at, 1_700_000_000);
        assert_eq!(row.kind, 1);
        assert_eq!(row.content, "hello");
        assert_eq!(row.tag_d, "");
    }
}
