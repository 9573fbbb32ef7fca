//! Read filters (NIP-01 `REQ` filters).
//!
//! Tag constraints are held in fixed slots for the recognized [`TagName`]s plus
//! a small bounded list for any other single-letter names. An empty field is
//! unconstrained on that dimension.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tags::TagName;

/// Maximum number of distinct unrecognized tag names a filter may constrain.
pub const MAX_OVERFLOW_TAGS: usize = 4;

/// Tag constraints of a filter, keyed by tag name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilters {
    known: [Vec<String>; TagName::COUNT],
    overflow: Vec<(String, Vec<String>)>,
}

impl TagFilters {
    /// Add accepted values for a tag name.
    ///
    /// Values for a name already present are appended. An empty value list
    /// adds no constraint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] if the name is empty or if more than
    /// [`MAX_OVERFLOW_TAGS`] unrecognized names would be constrained.
    pub fn insert(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidFilter("empty tag name".to_string()));
        }
        if values.is_empty() {
            return Ok(());
        }

        if let Some(known) = TagName::from_name(name) {
            self.insert_known(known, values);
            return Ok(());
        }

        if let Some((_, existing)) = self.overflow.iter_mut().find(|(n, _)| n == name) {
            existing.extend(values);
            return Ok(());
        }

        if self.overflow.len() >= MAX_OVERFLOW_TAGS {
            return Err(Error::InvalidFilter(format!(
                "more than {MAX_OVERFLOW_TAGS} unindexed tag names in one filter"
            )));
        }
        self.overflow.push((name.to_string(), values));
        Ok(())
    }

    /// Add accepted values for a recognized tag name. Recognized names have
    /// their own slots, so this cannot fail.
    pub fn insert_known(&mut self, name: TagName, values: Vec<String>) {
        self.known[name.index()].extend(values);
    }

    /// Accepted values for a recognized tag name.
    pub fn get(&self, name: TagName) -> &[String] {
        &self.known[name.index()]
    }

    /// Constraints on unrecognized tag names, in insertion order.
    pub fn overflow(&self) -> &[(String, Vec<String>)] {
        &self.overflow
    }

    /// Recognized names that carry at least one value, in slot order.
    pub fn known_names(&self) -> impl Iterator<Item = TagName> + '_ {
        TagName::ALL
            .into_iter()
            .filter(|name| !self.known[name.index()].is_empty())
    }

    /// Number of distinct tag names constrained, recognized or not.
    pub fn populated_count(&self) -> usize {
        self.known_names().count() + self.overflow.len()
    }

    /// The recognized name, if it is the only tag name constrained.
    pub fn single_known(&self) -> Option<TagName> {
        if self.populated_count() != 1 {
            return None;
        }
        self.known_names().next()
    }

    /// Whether no tag constraint is present.
    pub fn is_empty(&self) -> bool {
        self.populated_count() == 0
    }
}

/// A read request over stored events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct Filter {
    /// Accepted event ids.
    pub ids: Vec<String>,
    /// Accepted author pubkeys.
    pub authors: Vec<String>,
    /// Accepted kinds.
    pub kinds: Vec<u16>,
    /// Accepted tag values per tag name.
    pub tags: TagFilters,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<u32>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<u32>,
    /// Requested result cap.
    pub limit: Option<u32>,
    /// Full-text search term (NIP-50).
    pub search: Option<String>,
}

impl Filter {
    /// Create an unconstrained filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a NIP-01 filter object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Constrain to the given ids.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Constrain to the given authors.
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Constrain to the given kinds.
    pub fn kinds<I: IntoIterator<Item = u16>>(mut self, kinds: I) -> Self {
        self.kinds.extend(kinds);
        self
    }

    /// Constrain a recognized tag name to the given values.
    pub fn tag<I, S>(mut self, name: TagName, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .insert_known(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the inclusive lower time bound.
    pub fn since(mut self, since: u32) -> Self {
        self.since = Some(since);
        self
    }

    /// Set the inclusive upper time bound.
    pub fn until(mut self, until: u32) -> Self {
        self.until = Some(until);
        self
    }

    /// Set the requested result cap.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the search term.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }
}

/// Wire form of a filter before tag keys are sorted into slots.
#[derive(Debug, Deserialize)]
struct RawFilter {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    kinds: Vec<u16>,
    since: Option<u32>,
    until: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawFilter> for Filter {
    type Error = Error;

    fn try_from(raw: RawFilter) -> Result<Self> {
        let mut tags = TagFilters::default();
        for (key, value) in raw.extra {
            // Unknown non-tag keys are ignored, as relays do.
            let Some(name) = key.strip_prefix('#') else {
                continue;
            };
            let values: Vec<String> = serde_json::from_value(value).map_err(|e| {
                Error::InvalidFilter(format!("values for '{key}' must be strings: {e}"))
            })?;
            tags.insert(name, values)?;
        }

        Ok(Self {
            ids: raw.ids,
            authors: raw.authors,
            kinds: raw.kinds,
            tags,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
            search: raw.search.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nip01_filter() {
        let filter = Filter::from_json(
            r##"{"ids":["aa"],"authors":["bb"],"kinds":[1,7],"#e":["abc"],"#p":["def"],"since":10,"until":20,"limit":50,"search":"hello"}"##,
        )
        .unwrap();
        assert_eq!(filter.ids, ["aa"]);
        assert_eq!(filter.authors, ["bb"]);
        assert_eq!(filter.kinds, [1, 7]);
        assert_eq!(filter.tags.get(TagName::E), ["abc"]);
        assert_eq!(filter.tags.get(TagName::P), ["def"]);
        assert_eq!(filter.since, Some(10));
        assert_eq!(filter.until, Some(20));
        assert_eq!(filter.limit, Some(50));
        assert_eq!(filter.search.as_deref(), Some("hello"));
    }

    #[test]
    fn test_parse_empty_filter_is_unconstrained() {
        let filter = Filter::from_json("{}").unwrap();
        assert_eq!(filter, Filter::new());
        assert!(filter.tags.is_empty());
    }

    #[test]
    fn test_parse_unrecognized_tag_goes_to_overflow() {
        let filter = Filter::from_json(r##"{"#x":["1","2"]}"##).unwrap();
        assert_eq!(filter.tags.overflow(), [("x".to_string(), vec!["1".to_string(), "2".to_string()])]);
        assert_eq!(filter.tags.populated_count(), 1);
        assert_eq!(filter.tags.single_known(), None);
    }

    #[test]
    fn test_parse_rejects_non_string_tag_values() {
        let err = Filter::from_json(r##"{"#e":[1,2]}"##).unwrap_err();
        assert!(err.to_string().contains("#e"));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let filter = Filter::from_json(r#"{"kinds":[1],"unknown":true}"#).unwrap();
        assert_eq!(filter.kinds, [1]);
        assert!(filter.tags.is_empty());
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let filter = Filter::from_json(r#"{"search":"   "}"#).unwrap();
        assert_eq!(filter.search, None);
    }

    #[test]
    fn test_overflow_is_bounded() {
        let mut tags = TagFilters::default();
        for name in ["u", "v", "w", "x"] {
            tags.insert(name, vec!["1".to_string()]).unwrap();
        }
        let err = tags.insert("y", vec!["1".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
        // Extending an existing overflow name is still allowed.
        tags.insert("u", vec!["2".to_string()]).unwrap();
        assert_eq!(tags.overflow()[0].1, ["1", "2"]);
    }

    #[test]
    fn test_empty_values_add_no_constraint() {
        let mut tags = TagFilters::default();
        tags.insert("p", Vec::new()).unwrap();
        tags.insert("zz", Vec::new()).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_single_known() {
        let filter = Filter::new().tag(TagName::P, ["def"]);
        assert_eq!(filter.tags.single_known(), Some(TagName::P));

        let filter = Filter::new()
            .tag(TagName::P, ["def"])
            .tag(TagName::E, ["abc"]);
        assert_eq!(filter.tags.single_known(), None);
        assert_eq!(filter.tags.populated_count(), 2);
    }

    #[test]
    fn test_single_known_with_overflow_is_none() {
        let mut filter = Filter::new().tag(TagName::T, ["nostr"]);
        filter.tags.insert("x", vec!["1".to_string()]).unwrap();
        assert_eq!(filter.tags.single_known(), None);
    }

    #[test]
    fn test_known_tag_accepted_with_full_overflow() {
        let mut filter = Filter::new();
        for name in ["u", "v", "w", "x"] {
            filter.tags.insert(name, vec!["1".to_string()]).unwrap();
        }
        let filter = filter.tag(TagName::P, ["def"]);
        assert_eq!(filter.tags.get(TagName::P), ["def"]);
        assert_eq!(filter.tags.populated_count(), 5);
    }

    #[test]
    fn test_builder_appends_values() {
        let filter = Filter::new()
            .tag(TagName::E, ["a"])
            .tag(TagName::E, ["b"])
            .kinds([1])
            .kinds([6]);
        assert_eq!(filter.tags.get(TagName::E), ["a", "b"]);
        assert_eq!(filter.kinds, [1, 6]);
    }
}
