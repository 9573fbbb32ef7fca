//! Single-pass tag extraction.
//!
//! Every event is scanned once to build the typed projections that the
//! storage layout indexes (`tag_e`, `tag_p`, ...). The same [`TagName`] set
//! drives query routing, so a name is either recognized everywhere or nowhere.

use std::fmt;

/// Tag names that get their own indexed projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagName {
    /// Referenced event id.
    E,
    /// Referenced pubkey.
    P,
    /// Referenced addressable event (`kind:pubkey:d`).
    A,
    /// Hashtag.
    T,
    /// Replaceable-event identifier.
    D,
    /// Geohash.
    G,
    /// Reference URL.
    R,
}

impl TagName {
    /// All recognized names, in slot order.
    pub const ALL: [TagName; 7] = [
        TagName::E,
        TagName::P,
        TagName::A,
        TagName::T,
        TagName::D,
        TagName::G,
        TagName::R,
    ];

    /// Number of recognized names.
    pub const COUNT: usize = Self::ALL.len();

    /// Look up a recognized tag name. Matching is exact and case-sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "e" => Some(Self::E),
            "p" => Some(Self::P),
            "a" => Some(Self::A),
            "t" => Some(Self::T),
            "d" => Some(Self::D),
            "g" => Some(Self::G),
            "r" => Some(Self::R),
            _ => None,
        }
    }

    /// The single-letter tag name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E => "e",
            Self::P => "p",
            Self::A => "a",
            Self::T => "t",
            Self::D => "d",
            Self::G => "g",
            Self::R => "r",
        }
    }

    /// Slot index into fixed-size per-name arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The indexed projections of one event's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTags {
    values: [Vec<String>; TagName::COUNT],
    /// Full copy of the original tag list, including unrecognized and
    /// malformed entries.
    pub tags: Vec<Vec<String>>,
}

impl ExtractedTags {
    /// Values of the given tag name, in original order.
    pub fn get(&self, name: TagName) -> &[String] {
        &self.values[name.index()]
    }

    /// Take ownership of one projection, leaving it empty.
    pub fn take(&mut self, name: TagName) -> Vec<String> {
        std::mem::take(&mut self.values[name.index()])
    }

    /// The singular `d` identifier. When an event carries several `d` tags
    /// the last one wins; no `d` tag yields an empty string.
    pub fn d_tag(&self) -> &str {
        self.get(TagName::D).last().map_or("", String::as_str)
    }
}

/// Extract the indexed tag projections from a tag list in one pass.
///
/// Tags whose name is not recognized, and tags with no value element, are
/// kept only in [`ExtractedTags::tags`].
pub fn extract_tags(tags: &[Vec<String>]) -> ExtractedTags {
    let mut extracted = ExtractedTags {
        values: Default::default(),
        tags: tags.to_vec(),
    };

    for tag in tags {
        let (Some(name), Some(value)) = (tag.first(), tag.get(1)) else {
            continue;
        };
        if let Some(name) = TagName::from_name(name) {
            extracted.values[name.index()].push(value.clone());
        }
    }

    extracted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|tag| tag.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_extract_preserves_order_per_name() {
        let input = tags(&[&["e", "abc"], &["p", "def"], &["e", "ghi"]]);
        let extracted = extract_tags(&input);
        assert_eq!(extracted.get(TagName::E), ["abc", "ghi"]);
        assert_eq!(extracted.get(TagName::P), ["def"]);
        assert!(extracted.get(TagName::T).is_empty());
    }

    #[test]
    fn test_extract_round_trip_is_structural_copy() {
        let input = tags(&[&["e", "abc", "wss://relay", "reply"], &["x", "1"], &["t"]]);
        let extracted = extract_tags(&input);
        assert_eq!(extracted.tags, input);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let input = tags(&[&["t", "nostr"], &["r", "https://a"], &["g", "u4pr"]]);
        assert_eq!(extract_tags(&input), extract_tags(&input));
    }

    #[test]
    fn test_malformed_tags_kept_only_in_round_trip() {
        let input = tags(&[&["p"], &[], &["e", "abc"]]);
        let extracted = extract_tags(&input);
        assert!(extracted.get(TagName::P).is_empty());
        assert_eq!(extracted.get(TagName::E), ["abc"]);
        assert_eq!(extracted.tags.len(), 3);
    }

    #[test]
    fn test_unrecognized_names_not_projected() {
        let input = tags(&[&["E", "upper"], &["emoji", "x"], &["imeta", "url y"]]);
        let extracted = extract_tags(&input);
        for name in TagName::ALL {
            assert!(extracted.get(name).is_empty(), "{name} should be empty");
        }
        assert_eq!(extracted.tags, input);
    }

    #[test]
    fn test_d_tag_last_value_wins() {
        let input = tags(&[&["d", "first"], &["d", "second"]]);
        let extracted = extract_tags(&input);
        assert_eq!(extracted.d_tag(), "second");
        assert_eq!(extracted.get(TagName::D), ["first", "second"]);
    }

    #[test]
    fn test_d_tag_missing_is_empty() {
        let extracted = extract_tags(&tags(&[&["e", "abc"]]));
        assert_eq!(extracted.d_tag(), "");
    }

    #[test]
    fn test_take_empties_slot() {
        let mut extracted = extract_tags(&tags(&[&["t", "rust"]]));
        assert_eq!(extracted.take(TagName::T), vec!["rust".to_string()]);
        assert!(extracted.get(TagName::T).is_empty());
    }

    #[test]
    fn test_tag_name_lookup() {
        for name in TagName::ALL {
            assert_eq!(TagName::from_name(name.as_str()), Some(name));
        }
        assert_eq!(TagName::from_name("x"), None);
        assert_eq!(TagName::from_name(""), None);
        assert_eq!(TagName::from_name("ee"), None);
    }
}
