//! Core types shared by the Pensieve relay store.
//!
//! This crate provides:
//! - The stored [`Event`] record and its verified JSON parsing (via the nostr crate)
//! - Single-pass tag extraction into indexed projections ([`extract_tags`])
//! - Read [`Filter`]s with fixed tag slots for the indexed tag names
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod filter;
pub mod metrics;
mod tags;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Nostr genesis date: November 7, 2020.
/// Events with `created_at` before this date are considered bogus.
pub const NOSTR_GENESIS_TIMESTAMP: u32 = 1604707200; // 2020-11-07 00:00:00 UTC

pub use error::{Error, Result};
pub use event::{Event, HEX_KEY_LEN, HEX_SIG_LEN};
pub use filter::{Filter, MAX_OVERFLOW_TAGS, TagFilters};
pub use tags::{ExtractedTags, TagName, extract_tags};
